use glam::Vec3;
use helio_core::Aabb;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub max_distance: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3, max_distance: f32) -> Self {
        Self { origin, direction, max_distance }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Surface data returned for the closest hit along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub reflectivity: f32,
    pub emissive: Vec3,
}

impl RayHit {
    /// True when the ray struck the inside of a surface.
    pub fn is_backface(&self, direction: Vec3) -> bool {
        self.normal.dot(direction) > 0.0
    }
}

/// Which part of the scene a trace is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceScope {
    Static,
    Dynamic,
    Full,
}

/// Ray intersection backend consumed by the GI subsystem.
///
/// `static_generation` must increase every time static content changes; cached static
/// trace results tagged with an older generation are never reused.
pub trait RayBackend {
    fn trace(&self, ray: &Ray, scope: TraceScope) -> Option<RayHit>;

    fn static_generation(&self) -> u64;

    fn occluded(&self, ray: &Ray) -> bool {
        self.trace(ray, TraceScope::Full).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mobility {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub bounds: Aabb,
    pub mobility: Mobility,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentQueryFailure {
    #[error("scene traversal incomplete: {visited} of {total} instances visited")]
    Incomplete { visited: usize, total: usize },

    #[error("scene unavailable")]
    Unavailable,
}

/// Host scene access used by the content tracker.
pub trait SceneQuery {
    fn instances_in(&self, region: &Aabb) -> Result<Vec<InstanceSnapshot>, ContentQueryFailure>;
}
