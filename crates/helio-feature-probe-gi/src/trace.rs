use glam::Vec3;
use helio_raytracing::{Ray, RayBackend, RayHit, TraceScope};

use crate::maps::RaySample;

/// Back-face hits shorten the recorded distance so the distance map pulls shading away
/// from the inside of walls.
const BACKFACE_DISTANCE_SCALE: f32 = 0.2;

// ======================== Light API ========================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightType {
    Directional,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightConfig {
    pub light_type: LightType,
    pub position: Vec3,
    /// Direction the light travels, for directional lights
    pub direction: Vec3,
    pub intensity: f32,
    pub color: Vec3,
    pub attenuation_radius: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            light_type: LightType::Directional,
            position: Vec3::new(10.0, 15.0, 10.0),
            direction: Vec3::new(0.5, -1.0, 0.3).normalize(),
            intensity: 1.0,
            color: Vec3::ONE,
            attenuation_radius: 20.0,
        }
    }
}

impl LightConfig {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            direction: direction.normalize_or_zero(),
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            light_type: LightType::Point,
            position,
            color,
            intensity,
            attenuation_radius: radius,
            ..Default::default()
        }
    }
}

// ======================== Tracing ========================

/// How a probe's rays were resolved this update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TracePath {
    /// Static and dynamic content traced fresh
    Full,
    /// Static hits read from the ray cache, dynamic content traced fresh
    Cached,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSettings {
    pub max_distance: f32,
    pub max_ray_radiance: f32,
    pub sky_radiance: Vec3,
    pub normal_bias: f32,
    pub shadow_distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTrace {
    pub slot: u32,
    pub origin: Vec3,
    pub path: TracePath,
    pub directions: Vec<Vec3>,
    /// Closest hit per ray across static and dynamic content
    pub hits: Vec<Option<RayHit>>,
    /// Static-only hits, captured for a ray cache rebuild
    pub static_hits: Option<Vec<Option<RayHit>>>,
    pub samples: Vec<RaySample>,
}

pub struct RayTraceOrchestrator<'a> {
    backend: &'a dyn RayBackend,
    lights: &'a [LightConfig],
    settings: TraceSettings,
}

impl<'a> RayTraceOrchestrator<'a> {
    pub fn new(backend: &'a dyn RayBackend, lights: &'a [LightConfig], settings: TraceSettings) -> Self {
        Self { backend, lights, settings }
    }

    pub fn settings(&self) -> &TraceSettings {
        &self.settings
    }

    /// Trace one probe.
    ///
    /// With `cached` hits, static content comes from the cache and only dynamic content is
    /// traced, along the canonical directions the cache was built with. With
    /// `capture_static`, static and dynamic content are traced separately along the
    /// canonical directions so the static half can fill the cache. Otherwise the whole
    /// scene is traced along the frame's rotated directions.
    pub fn trace_probe(
        &self,
        slot: u32,
        origin: Vec3,
        rotated: &[Vec3],
        canonical: &[Vec3],
        cached: Option<&[Option<RayHit>]>,
        capture_static: bool,
    ) -> ProbeTrace {
        let max = self.settings.max_distance;
        let cached = cached.filter(|hits| hits.len() == canonical.len());

        let (path, directions, hits, static_hits) = if let Some(cached) = cached {
            let hits = canonical
                .iter()
                .zip(cached)
                .map(|(&dir, stat)| {
                    let dynamic = self.backend.trace(&Ray::new(origin, dir, max), TraceScope::Dynamic);
                    nearer(*stat, dynamic)
                })
                .collect();
            (TracePath::Cached, canonical.to_vec(), hits, None)
        } else if capture_static {
            let mut static_hits = Vec::with_capacity(canonical.len());
            let mut hits = Vec::with_capacity(canonical.len());
            for &dir in canonical {
                let ray = Ray::new(origin, dir, max);
                let stat = self.backend.trace(&ray, TraceScope::Static);
                let dynamic = self.backend.trace(&ray, TraceScope::Dynamic);
                static_hits.push(stat);
                hits.push(nearer(stat, dynamic));
            }
            (TracePath::Full, canonical.to_vec(), hits, Some(static_hits))
        } else {
            let hits = rotated
                .iter()
                .map(|&dir| self.backend.trace(&Ray::new(origin, dir, max), TraceScope::Full))
                .collect();
            (TracePath::Full, rotated.to_vec(), hits, None)
        };

        let samples = directions
            .iter()
            .zip(&hits)
            .map(|(&dir, hit)| self.shade(origin, dir, hit.as_ref()))
            .collect();

        ProbeTrace {
            slot,
            origin,
            path,
            directions,
            hits,
            static_hits,
            samples,
        }
    }

    /// Radiance arriving at the probe along `dir`. Misses see the sky.
    pub fn shade(&self, origin: Vec3, dir: Vec3, hit: Option<&RayHit>) -> RaySample {
        let s = &self.settings;
        let (radiance, distance) = match hit {
            None => (s.sky_radiance, s.max_distance),
            Some(hit) if hit.is_backface(dir) => (Vec3::ZERO, hit.distance * BACKFACE_DISTANCE_SCALE),
            Some(hit) => {
                let position = origin + dir * hit.distance + hit.normal * s.normal_bias;
                let direct = self.direct_light(position, hit.normal);
                let reflect = hit.reflectivity.clamp(0.0, 1.0);
                let radiance = hit.emissive + hit.albedo * (1.0 - reflect) * direct + s.sky_radiance * reflect;
                (radiance, hit.distance)
            }
        };
        RaySample::clamped(dir, radiance, distance, s.max_ray_radiance, s.max_distance)
    }

    fn direct_light(&self, position: Vec3, normal: Vec3) -> Vec3 {
        let mut total = Vec3::ZERO;
        for light in self.lights {
            let (to_light, max_distance, attenuation) = match light.light_type {
                LightType::Directional => (-light.direction, self.settings.shadow_distance, 1.0),
                LightType::Point => {
                    let offset = light.position - position;
                    let distance = offset.length();
                    if distance <= f32::EPSILON || distance >= light.attenuation_radius {
                        continue;
                    }
                    let falloff = (1.0 - (distance / light.attenuation_radius).powi(2)).max(0.0);
                    (offset / distance, distance, falloff * falloff)
                }
            };

            let n_dot_l = normal.dot(to_light);
            if n_dot_l <= 0.0 {
                continue;
            }
            if self.backend.occluded(&Ray::new(position, to_light, max_distance)) {
                continue;
            }
            total += light.color * light.intensity * n_dot_l * attenuation;
        }
        total
    }
}

fn nearer(a: Option<RayHit>, b: Option<RayHit>) -> Option<RayHit> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.distance < a.distance { b } else { a }),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helio_core::Aabb;
    use helio_raytracing::{Mobility, SceneBvh, SurfaceMaterial};

    fn settings() -> TraceSettings {
        TraceSettings {
            max_distance: 20.0,
            max_ray_radiance: 10.0,
            sky_radiance: Vec3::new(0.2, 0.3, 0.4),
            normal_bias: 0.01,
            shadow_distance: 100.0,
        }
    }

    #[test]
    fn test_miss_resolves_to_sky() {
        let scene = SceneBvh::new();
        let orchestrator = RayTraceOrchestrator::new(&scene, &[], settings());
        let sample = orchestrator.shade(Vec3::ZERO, Vec3::Y, None);
        assert_eq!(sample.radiance, Vec3::new(0.2, 0.3, 0.4));
        assert_eq!(sample.distance, 20.0);
    }

    #[test]
    fn test_lit_floor_reflects_albedo() {
        let mut scene = SceneBvh::new();
        let floor = SurfaceMaterial {
            albedo: Vec3::new(0.5, 0.5, 0.5),
            ..Default::default()
        };
        scene.add_instance(
            Aabb::new(Vec3::new(-10.0, -2.0, -10.0), Vec3::new(10.0, -1.0, 10.0)),
            floor,
            Mobility::Static,
        );
        let lights = [LightConfig::directional(Vec3::NEG_Y, Vec3::ONE, 2.0)];
        let orchestrator = RayTraceOrchestrator::new(&scene, &lights, settings());

        let down = [Vec3::NEG_Y];
        let trace = orchestrator.trace_probe(0, Vec3::ZERO, &down, &down, None, false);
        assert_eq!(trace.path, TracePath::Full);
        assert!((trace.samples[0].distance - 1.0).abs() < 1e-5);
        assert!((trace.samples[0].radiance - Vec3::ONE).abs().max_element() < 1e-5);
    }

    #[test]
    fn test_occluded_light_contributes_nothing() {
        let mut scene = SceneBvh::new();
        scene.add_instance(
            Aabb::new(Vec3::new(-10.0, -2.0, -10.0), Vec3::new(10.0, -1.0, 10.0)),
            SurfaceMaterial::default(),
            Mobility::Static,
        );
        scene.add_instance(
            Aabb::new(Vec3::new(-10.0, 3.0, -10.0), Vec3::new(10.0, 4.0, 10.0)),
            SurfaceMaterial::default(),
            Mobility::Dynamic,
        );
        let lights = [LightConfig::directional(Vec3::NEG_Y, Vec3::ONE, 2.0)];
        let orchestrator = RayTraceOrchestrator::new(&scene, &lights, settings());
        let down = [Vec3::NEG_Y];
        let trace = orchestrator.trace_probe(0, Vec3::ZERO, &down, &down, None, false);
        assert_eq!(trace.samples[0].radiance, Vec3::ZERO);
    }

    #[test]
    fn test_cached_path_merges_fresh_dynamic_hits() {
        let mut scene = SceneBvh::new();
        scene.add_instance(
            Aabb::new(Vec3::new(2.0, -5.0, -5.0), Vec3::new(3.0, 5.0, 5.0)),
            SurfaceMaterial::default(),
            Mobility::Dynamic,
        );
        let orchestrator = RayTraceOrchestrator::new(&scene, &[], settings());
        let dirs = [Vec3::X, Vec3::NEG_X];
        let cached_static = [
            Some(RayHit {
                distance: 5.0,
                normal: Vec3::NEG_X,
                albedo: Vec3::ONE,
                reflectivity: 0.0,
                emissive: Vec3::ZERO,
            }),
            Some(RayHit {
                distance: 4.0,
                normal: Vec3::X,
                albedo: Vec3::ONE,
                reflectivity: 0.0,
                emissive: Vec3::ONE,
            }),
        ];
        let trace = orchestrator.trace_probe(0, Vec3::ZERO, &dirs, &dirs, Some(&cached_static), false);
        assert_eq!(trace.path, TracePath::Cached);
        assert_eq!(trace.hits[0].map(|h| h.distance), Some(2.0));
        assert_eq!(trace.hits[1].map(|h| h.distance), Some(4.0));
        assert_eq!(trace.samples[1].radiance, Vec3::ONE);
    }

    #[test]
    fn test_capture_keeps_static_hits_separate() {
        let mut scene = SceneBvh::new();
        scene.add_instance(
            Aabb::new(Vec3::new(4.0, -5.0, -5.0), Vec3::new(5.0, 5.0, 5.0)),
            SurfaceMaterial::default(),
            Mobility::Static,
        );
        scene.add_instance(
            Aabb::new(Vec3::new(2.0, -5.0, -5.0), Vec3::new(3.0, 5.0, 5.0)),
            SurfaceMaterial::default(),
            Mobility::Dynamic,
        );
        let orchestrator = RayTraceOrchestrator::new(&scene, &[], settings());
        let dirs = [Vec3::X];
        let trace = orchestrator.trace_probe(3, Vec3::ZERO, &dirs, &dirs, None, true);
        let static_hits = trace.static_hits.unwrap();
        assert_eq!(static_hits[0].map(|h| h.distance), Some(4.0));
        assert_eq!(trace.hits[0].map(|h| h.distance), Some(2.0));
    }

    #[test]
    fn test_backface_hit_is_dark_and_short() {
        let scene = SceneBvh::new();
        let orchestrator = RayTraceOrchestrator::new(&scene, &[], settings());
        let hit = RayHit {
            distance: 1.0,
            normal: Vec3::Y,
            albedo: Vec3::ONE,
            reflectivity: 0.0,
            emissive: Vec3::ONE,
        };
        let sample = orchestrator.shade(Vec3::ZERO, Vec3::Y, Some(&hit));
        assert_eq!(sample.radiance, Vec3::ZERO);
        assert!((sample.distance - 0.2).abs() < 1e-6);
    }
}
