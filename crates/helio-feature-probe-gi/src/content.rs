use std::collections::BTreeMap;

use helio_core::Aabb;
use helio_raytracing::{ContentQueryFailure, InstanceId, InstanceSnapshot, Mobility, SceneQuery};

/// Areas of the scene whose content changed since the last successful query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentChanges {
    pub static_areas: Vec<Aabb>,
    pub dynamic_areas: Vec<Aabb>,
    pub added: usize,
    pub removed: usize,
    pub moved: usize,
}

impl ContentChanges {
    pub fn is_empty(&self) -> bool {
        self.static_areas.is_empty() && self.dynamic_areas.is_empty()
    }

    fn record(&mut self, mobility: Mobility, area: Aabb) {
        match mobility {
            Mobility::Static => self.static_areas.push(area),
            Mobility::Dynamic => self.dynamic_areas.push(area),
        }
    }
}

/// Diffs the instances inside the detection region against the last committed snapshot.
///
/// Instances that only cross the region border because the region itself moved are taken
/// into or dropped from the snapshot silently; probes there are new or gone anyway.
#[derive(Debug, Default)]
pub struct ContentTracker {
    known: BTreeMap<InstanceId, InstanceSnapshot>,
    region: Option<Aabb>,
}

impl ContentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&self) -> Option<Aabb> {
        self.region
    }

    pub fn known_instances(&self) -> usize {
        self.known.len()
    }

    /// Query `scene` over `region`. Nothing is committed when the query fails.
    pub fn find_content(
        &mut self,
        scene: &dyn SceneQuery,
        region: Aabb,
    ) -> Result<ContentChanges, ContentQueryFailure> {
        let found = scene.instances_in(&region)?;
        let mut changes = ContentChanges::default();
        let previous_region = self.region;

        let mut current = BTreeMap::new();
        for snapshot in found {
            match self.known.get(&snapshot.id) {
                Some(old) if old.bounds != snapshot.bounds => {
                    changes.record(old.mobility, old.bounds);
                    changes.record(snapshot.mobility, snapshot.bounds);
                    changes.moved += 1;
                }
                Some(_) => {}
                None => {
                    let appeared = previous_region.is_some_and(|r| r.intersects(&snapshot.bounds));
                    if appeared {
                        changes.record(snapshot.mobility, snapshot.bounds);
                        changes.added += 1;
                    }
                }
            }
            current.insert(snapshot.id, snapshot);
        }

        for (id, old) in &self.known {
            if current.contains_key(id) {
                continue;
            }
            // Still inside the region but not reported: it was removed or moved away.
            if old.bounds.intersects(&region) {
                changes.record(old.mobility, old.bounds);
                changes.removed += 1;
            }
        }

        self.known = current;
        self.region = Some(region);
        Ok(changes)
    }

    pub fn reset(&mut self) {
        self.known.clear();
        self.region = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use helio_raytracing::{SceneBvh, SurfaceMaterial};

    fn cube(center: Vec3) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3::splat(0.5))
    }

    fn region() -> Aabb {
        Aabb::new(Vec3::splat(-20.0), Vec3::splat(20.0))
    }

    #[test]
    fn test_first_query_adopts_everything_silently() {
        let mut scene = SceneBvh::new();
        scene.add_instance(cube(Vec3::ZERO), SurfaceMaterial::default(), Mobility::Static);
        let mut tracker = ContentTracker::new();
        let changes = tracker.find_content(&scene, region()).unwrap();
        assert!(changes.is_empty());
        assert_eq!(tracker.known_instances(), 1);
    }

    #[test]
    fn test_add_move_remove_are_reported() {
        let mut scene = SceneBvh::new();
        let wall = scene.add_instance(cube(Vec3::ZERO), SurfaceMaterial::default(), Mobility::Static);
        let mut tracker = ContentTracker::new();
        tracker.find_content(&scene, region()).unwrap();

        let crate_id = scene.add_instance(cube(Vec3::X * 3.0), SurfaceMaterial::default(), Mobility::Dynamic);
        let changes = tracker.find_content(&scene, region()).unwrap();
        assert_eq!(changes.added, 1);
        assert_eq!(changes.dynamic_areas, vec![cube(Vec3::X * 3.0)]);

        scene.move_instance(wall, cube(Vec3::Y * 2.0));
        let changes = tracker.find_content(&scene, region()).unwrap();
        assert_eq!(changes.moved, 1);
        assert_eq!(changes.static_areas, vec![cube(Vec3::ZERO), cube(Vec3::Y * 2.0)]);

        scene.remove_instance(crate_id);
        let changes = tracker.find_content(&scene, region()).unwrap();
        assert_eq!(changes.removed, 1);
        assert_eq!(changes.dynamic_areas.len(), 1);
    }

    #[test]
    fn test_failed_query_commits_nothing() {
        let mut scene = SceneBvh::new();
        scene.add_instance(cube(Vec3::ZERO), SurfaceMaterial::default(), Mobility::Static);
        let mut tracker = ContentTracker::new();
        tracker.find_content(&scene, region()).unwrap();

        scene.add_instance(cube(Vec3::ONE * 4.0), SurfaceMaterial::default(), Mobility::Static);
        scene.set_traversal_limit(Some(1));
        assert!(tracker.find_content(&scene, region()).is_err());
        assert_eq!(tracker.known_instances(), 1);

        scene.set_traversal_limit(None);
        let changes = tracker.find_content(&scene, region()).unwrap();
        assert_eq!(changes.added, 1);
    }

    #[test]
    fn test_region_motion_is_not_a_change() {
        let mut scene = SceneBvh::new();
        scene.add_instance(cube(Vec3::new(15.0, 0.0, 0.0)), SurfaceMaterial::default(), Mobility::Static);
        let mut tracker = ContentTracker::new();
        tracker.find_content(&scene, region()).unwrap();

        let shifted = region().translate(Vec3::new(-40.0, 0.0, 0.0));
        let changes = tracker.find_content(&scene, shifted).unwrap();
        assert!(changes.is_empty());
        assert_eq!(tracker.known_instances(), 0);
    }
}
