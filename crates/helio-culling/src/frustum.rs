use glam::{Mat4, Vec3, Vec4};
use helio_core::Aabb;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_matrix(view_projection: Mat4) -> Self {
        let mut planes = [Vec4::ZERO; 6];

        // Gribb/Hartmann extraction, depth in [0, 1]
        planes[0] = view_projection.row(3) + view_projection.row(0); // Left
        planes[1] = view_projection.row(3) - view_projection.row(0); // Right
        planes[2] = view_projection.row(3) + view_projection.row(1); // Bottom
        planes[3] = view_projection.row(3) - view_projection.row(1); // Top
        planes[4] = view_projection.row(2); // Near
        planes[5] = view_projection.row(3) - view_projection.row(2); // Far

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }

        Self { planes }
    }

    /// A frustum that accepts every point. Used when no view is available.
    pub fn everything() -> Self {
        Self {
            planes: [Vec4::W; 6],
        }
    }

    pub fn test_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.dot(center.extend(1.0)) >= -radius)
    }

    /// Sphere test that ignores the far plane, so distant geometry still counts as in view.
    pub fn test_sphere_unbounded(&self, center: Vec3, radius: f32) -> bool {
        self.planes[..5]
            .iter()
            .all(|plane| plane.dot(center.extend(1.0)) >= -radius)
    }

    pub fn test_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let p = Vec3::new(
                if plane.x > 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.y > 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.z > 0.0 { aabb.max.z } else { aabb.min.z },
            );

            if plane.dot(p.extend(1.0)) < 0.0 {
                return false;
            }
        }
        true
    }
}
