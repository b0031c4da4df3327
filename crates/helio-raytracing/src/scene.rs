use std::collections::BTreeMap;

use helio_core::Aabb;

use crate::acceleration_structure::{BoxPrimitive, SurfaceMaterial, BVH};
use crate::ray::{
    ContentQueryFailure, InstanceId, InstanceSnapshot, Mobility, Ray, RayBackend, RayHit,
    TraceScope,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneInstance {
    pub bounds: Aabb,
    pub material: SurfaceMaterial,
    pub mobility: Mobility,
}

/// CPU reference scene: one BVH for static content, one for dynamic content.
///
/// Every change to static content rebuilds the static BVH and bumps the static
/// generation. Dynamic changes only rebuild the dynamic BVH.
#[derive(Debug, Default)]
pub struct SceneBvh {
    instances: BTreeMap<InstanceId, SceneInstance>,
    static_boxes: Vec<BoxPrimitive>,
    dynamic_boxes: Vec<BoxPrimitive>,
    static_bvh: BVH,
    dynamic_bvh: BVH,
    static_generation: u64,
    next_id: u32,
    traversal_limit: Option<usize>,
}

impl SceneBvh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(
        &mut self,
        bounds: Aabb,
        material: SurfaceMaterial,
        mobility: Mobility,
    ) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.instances.insert(id, SceneInstance { bounds, material, mobility });
        self.rebuild(mobility);
        id
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> Option<SceneInstance> {
        let removed = self.instances.remove(&id)?;
        self.rebuild(removed.mobility);
        Some(removed)
    }

    pub fn move_instance(&mut self, id: InstanceId, bounds: Aabb) -> bool {
        let Some(instance) = self.instances.get_mut(&id) else {
            return false;
        };
        instance.bounds = bounds;
        let mobility = instance.mobility;
        self.rebuild(mobility);
        true
    }

    pub fn instance(&self, id: InstanceId) -> Option<&SceneInstance> {
        self.instances.get(&id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Caps how many instances a single content query may visit. Queries over
    /// regions holding more instances fail with `ContentQueryFailure::Incomplete`.
    pub fn set_traversal_limit(&mut self, limit: Option<usize>) {
        self.traversal_limit = limit;
    }

    fn rebuild(&mut self, mobility: Mobility) {
        let boxes: Vec<BoxPrimitive> = self
            .instances
            .iter()
            .filter(|(_, inst)| inst.mobility == mobility)
            .map(|(&id, inst)| BoxPrimitive {
                bounds: inst.bounds,
                material: inst.material,
                instance: id,
            })
            .collect();

        match mobility {
            Mobility::Static => {
                self.static_bvh.build(&boxes);
                self.static_boxes = boxes;
                self.static_generation += 1;
                log::debug!(
                    "Rebuilt static BVH: {} boxes, {} nodes, generation {}",
                    self.static_boxes.len(),
                    self.static_bvh.nodes.len(),
                    self.static_generation
                );
            }
            Mobility::Dynamic => {
                self.dynamic_bvh.build(&boxes);
                self.dynamic_boxes = boxes;
                log::trace!("Rebuilt dynamic BVH: {} boxes", self.dynamic_boxes.len());
            }
        }
    }

    fn trace_in(&self, bvh: &BVH, boxes: &[BoxPrimitive], ray: &Ray) -> Option<RayHit> {
        let hit = bvh.intersect(boxes, ray)?;
        let material = boxes[hit.primitive as usize].material;
        Some(RayHit {
            distance: hit.distance,
            normal: hit.normal,
            albedo: material.albedo,
            reflectivity: material.reflectivity,
            emissive: material.emissive,
        })
    }
}

impl RayBackend for SceneBvh {
    fn trace(&self, ray: &Ray, scope: TraceScope) -> Option<RayHit> {
        match scope {
            TraceScope::Static => self.trace_in(&self.static_bvh, &self.static_boxes, ray),
            TraceScope::Dynamic => self.trace_in(&self.dynamic_bvh, &self.dynamic_boxes, ray),
            TraceScope::Full => {
                let stat = self.trace_in(&self.static_bvh, &self.static_boxes, ray);
                let dynamic = self.trace_in(&self.dynamic_bvh, &self.dynamic_boxes, ray);
                match (stat, dynamic) {
                    (Some(s), Some(d)) => Some(if d.distance < s.distance { d } else { s }),
                    (s, d) => s.or(d),
                }
            }
        }
    }

    fn static_generation(&self) -> u64 {
        self.static_generation
    }
}

impl crate::ray::SceneQuery for SceneBvh {
    fn instances_in(&self, region: &Aabb) -> Result<Vec<InstanceSnapshot>, ContentQueryFailure> {
        let found: Vec<InstanceSnapshot> = self
            .instances
            .iter()
            .filter(|(_, inst)| inst.bounds.intersects(region))
            .map(|(&id, inst)| InstanceSnapshot {
                id,
                bounds: inst.bounds,
                mobility: inst.mobility,
            })
            .collect();

        match self.traversal_limit {
            Some(limit) if found.len() > limit => Err(ContentQueryFailure::Incomplete {
                visited: limit,
                total: found.len(),
            }),
            _ => Ok(found),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ray::SceneQuery;
    use glam::Vec3;

    fn wall(x: f32) -> Aabb {
        Aabb::new(Vec3::new(x, -5.0, -5.0), Vec3::new(x + 1.0, 5.0, 5.0))
    }

    #[test]
    fn test_static_changes_bump_generation() {
        let mut scene = SceneBvh::new();
        let g0 = scene.static_generation();
        let id = scene.add_instance(wall(3.0), SurfaceMaterial::default(), Mobility::Static);
        assert!(scene.static_generation() > g0);

        let g1 = scene.static_generation();
        scene.add_instance(wall(8.0), SurfaceMaterial::default(), Mobility::Dynamic);
        assert_eq!(scene.static_generation(), g1);

        scene.move_instance(id, wall(4.0));
        assert!(scene.static_generation() > g1);
    }

    #[test]
    fn test_scopes_see_their_own_content() {
        let mut scene = SceneBvh::new();
        scene.add_instance(wall(6.0), SurfaceMaterial::default(), Mobility::Static);
        scene.add_instance(wall(3.0), SurfaceMaterial::default(), Mobility::Dynamic);
        let ray = Ray::new(Vec3::ZERO, Vec3::X, 100.0);

        let stat = scene.trace(&ray, TraceScope::Static).unwrap();
        let dynamic = scene.trace(&ray, TraceScope::Dynamic).unwrap();
        let full = scene.trace(&ray, TraceScope::Full).unwrap();
        assert_eq!(stat.distance, 6.0);
        assert_eq!(dynamic.distance, 3.0);
        assert_eq!(full.distance, 3.0);
    }

    #[test]
    fn test_query_fails_over_traversal_limit() {
        let mut scene = SceneBvh::new();
        for i in 0..4 {
            scene.add_instance(wall(i as f32 * 2.0), SurfaceMaterial::default(), Mobility::Static);
        }
        let region = Aabb::new(Vec3::splat(-20.0), Vec3::splat(20.0));
        assert_eq!(scene.instances_in(&region).unwrap().len(), 4);

        scene.set_traversal_limit(Some(2));
        assert_eq!(
            scene.instances_in(&region),
            Err(ContentQueryFailure::Incomplete { visited: 2, total: 4 })
        );
    }
}
