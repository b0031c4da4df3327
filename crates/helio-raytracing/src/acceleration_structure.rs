use glam::Vec3;
use helio_core::Aabb;

use crate::ray::{InstanceId, Ray};

const MAX_LEAF_PRIMITIVES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMaterial {
    pub albedo: Vec3,
    pub reflectivity: f32,
    pub emissive: Vec3,
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.8),
            reflectivity: 0.0,
            emissive: Vec3::ZERO,
        }
    }
}

/// Axis-aligned box primitive, the unit the CPU BVH is built over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxPrimitive {
    pub bounds: Aabb,
    pub material: SurfaceMaterial,
    pub instance: InstanceId,
}

impl BoxPrimitive {
    /// Closest intersection and the face normal. Rays starting inside the box
    /// report the exit face, so the normal faces along the ray.
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        let inv = ray.direction.recip();
        let t0 = (self.bounds.min - ray.origin) * inv;
        let t1 = (self.bounds.max - ray.origin) * inv;
        let t_min = t0.min(t1);
        let t_max = t0.max(t1);
        let near = t_min.max_element();
        let far = t_max.min_element();

        if far < 0.0 || near > far {
            return None;
        }

        if near >= 0.0 {
            if near > ray.max_distance {
                return None;
            }
            let axis = max_axis(t_min);
            let mut normal = Vec3::ZERO;
            normal[axis] = -ray.direction[axis].signum();
            Some((near, normal))
        } else {
            if far > ray.max_distance {
                return None;
            }
            let axis = min_axis(t_max);
            let mut normal = Vec3::ZERO;
            normal[axis] = ray.direction[axis].signum();
            Some((far, normal))
        }
    }
}

fn max_axis(v: Vec3) -> usize {
    if v.x >= v.y && v.x >= v.z {
        0
    } else if v.y >= v.z {
        1
    } else {
        2
    }
}

fn min_axis(v: Vec3) -> usize {
    if v.x <= v.y && v.x <= v.z {
        0
    } else if v.y <= v.z {
        1
    } else {
        2
    }
}

/// Internal node: `count == 0`, children at `left_or_first` and `left_or_first + 1`.
/// Leaf node: `count > 0` primitives starting at `left_or_first` in `BVH::primitives`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BVHNode {
    pub bounds: Aabb,
    pub left_or_first: u32,
    pub count: u32,
}

impl BVHNode {
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BVHHit {
    pub distance: f32,
    pub normal: Vec3,
    pub primitive: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BVH {
    pub nodes: Vec<BVHNode>,
    pub primitives: Vec<u32>,
}

impl BVH {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Median split on the longest centroid axis.
    pub fn build(&mut self, boxes: &[BoxPrimitive]) {
        self.nodes.clear();
        self.primitives = (0..boxes.len() as u32).collect();
        if boxes.is_empty() {
            return;
        }

        let centroids: Vec<Vec3> = boxes.iter().map(|b| b.bounds.center()).collect();
        self.nodes.push(BVHNode {
            bounds: Aabb::EMPTY,
            left_or_first: 0,
            count: boxes.len() as u32,
        });

        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let first = self.nodes[node_index].left_or_first as usize;
            let count = self.nodes[node_index].count as usize;
            let range = first..first + count;

            let mut bounds = Aabb::EMPTY;
            let mut centroid_bounds = Aabb::EMPTY;
            for &prim in &self.primitives[range.clone()] {
                bounds = bounds.union(&boxes[prim as usize].bounds);
                centroid_bounds.expand(centroids[prim as usize]);
            }
            self.nodes[node_index].bounds = bounds;

            if count <= MAX_LEAF_PRIMITIVES {
                continue;
            }

            let axis = centroid_bounds.longest_axis();
            self.primitives[range].sort_by(|&a, &b| {
                centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
            });

            let half = count / 2;
            let left = self.nodes.len();
            self.nodes.push(BVHNode {
                bounds: Aabb::EMPTY,
                left_or_first: first as u32,
                count: half as u32,
            });
            self.nodes.push(BVHNode {
                bounds: Aabb::EMPTY,
                left_or_first: (first + half) as u32,
                count: (count - half) as u32,
            });
            self.nodes[node_index].left_or_first = left as u32;
            self.nodes[node_index].count = 0;
            stack.push(left);
            stack.push(left + 1);
        }
    }

    pub fn intersect(&self, boxes: &[BoxPrimitive], ray: &Ray) -> Option<BVHHit> {
        if self.nodes.is_empty() {
            return None;
        }

        let inv_dir = ray.direction.recip();
        let mut closest: Option<BVHHit> = None;
        let mut stack = vec![0u32];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            let limit = closest.map_or(ray.max_distance, |hit| hit.distance);
            if node.bounds.ray_intersect(ray.origin, inv_dir, limit).is_none() {
                continue;
            }

            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &prim in &self.primitives[first..first + node.count as usize] {
                    if let Some((distance, normal)) = boxes[prim as usize].intersect(ray) {
                        if closest.map_or(true, |hit| distance < hit.distance) {
                            closest = Some(BVHHit { distance, normal, primitive: prim });
                        }
                    }
                }
            } else {
                stack.push(node.left_or_first);
                stack.push(node.left_or_first + 1);
            }
        }

        closest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(center: Vec3, id: u32) -> BoxPrimitive {
        BoxPrimitive {
            bounds: Aabb::from_center_half_extents(center, Vec3::splat(0.5)),
            material: SurfaceMaterial::default(),
            instance: InstanceId(id),
        }
    }

    #[test]
    fn test_box_hit_from_outside_faces_ray() {
        let prim = unit_box(Vec3::new(5.0, 0.0, 0.0), 0);
        let (t, normal) = prim.intersect(&Ray::new(Vec3::ZERO, Vec3::X, 100.0)).unwrap();
        assert!((t - 4.5).abs() < 1e-5);
        assert_eq!(normal, Vec3::NEG_X);
    }

    #[test]
    fn test_box_hit_from_inside_is_backface() {
        let prim = unit_box(Vec3::ZERO, 0);
        let ray = Ray::new(Vec3::ZERO, Vec3::Y, 100.0);
        let (t, normal) = prim.intersect(&ray).unwrap();
        assert!((t - 0.5).abs() < 1e-5);
        assert!(normal.dot(ray.direction) > 0.0);
    }

    #[test]
    fn test_bvh_matches_brute_force() {
        let boxes: Vec<BoxPrimitive> = (0..20)
            .map(|i| unit_box(Vec3::new(i as f32 * 3.0, (i % 3) as f32, 0.0), i))
            .collect();
        let mut bvh = BVH::new();
        bvh.build(&boxes);
        assert!(bvh.nodes.len() > 1);

        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 1000.0);
        let brute = boxes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.intersect(&ray).map(|(t, _)| (t, i as u32)))
            .min_by(|a, b| a.0.total_cmp(&b.0));
        let hit = bvh.intersect(&boxes, &ray).unwrap();
        assert_eq!(Some((hit.distance, hit.primitive)), brute);
    }

    #[test]
    fn test_empty_bvh_never_hits() {
        let bvh = BVH::new();
        assert!(bvh.intersect(&[], &Ray::new(Vec3::ZERO, Vec3::X, 10.0)).is_none());
    }
}
