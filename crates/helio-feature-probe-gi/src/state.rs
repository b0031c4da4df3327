use std::collections::{BTreeMap, BTreeSet};

use glam::{IVec3, Vec2, Vec3};
use helio_core::{Aabb, HelioError, Result};
use helio_culling::Frustum;
use helio_raytracing::{RayBackend, SceneQuery};

use crate::cascade::{Cascade, CascadeDesc};
use crate::config::{ProbeGiConfig, MAX_RAYS_PER_PROBE};
use crate::content::ContentTracker;
use crate::corrector::{self, CorrectorSettings, ExtentUpdate, OffsetUpdate, RayClearance};
use crate::directions::RayDirections;
use crate::grid::GridShift;
use crate::maps::BlendParams;
use crate::pass::{FramePlan, GiPass};
use crate::readback::ReadbackRing;
use crate::scheduler::{SchedulerSettings, UpdateScheduler, WorkSets};
use crate::trace::{LightConfig, ProbeTrace, RayTraceOrchestrator, TracePath, TraceSettings};

pub const MAX_LIGHTS: usize = 8;

/// Shading weight kept by a probe that found no clearance.
const DEGENERATE_WEIGHT: f32 = 0.1;
/// Floor on the wrap term so probes behind the surface still contribute a little.
const WRAP_FLOOR: f32 = 0.2;
const MIN_VARIANCE: f32 = 1e-4;

/// Offsets and extents computed in one frame, applied in the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionReadback {
    pub cascade: usize,
    pub offsets: Vec<OffsetUpdate>,
    pub extents: Vec<ExtentUpdate>,
}

/// What one call to [`GiState::update`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub active_cascade: Option<usize>,
    pub content_query_ok: bool,
    pub invalidated_probes: usize,
    pub exposed_probes: usize,
    pub cleared_probes: usize,
    pub updated_probes: Vec<u32>,
    pub full_traces: usize,
    pub cached_traces: usize,
    pub cache_rebuilds: usize,
    pub probes_moved: usize,
}

/// All probe GI state for one view: cascades, lights and the per-frame driver.
pub struct GiState {
    config: ProbeGiConfig,
    cascades: Vec<Cascade>,
    directions: RayDirections,
    lights: Vec<LightConfig>,
    readback: ReadbackRing<CorrectionReadback>,
    content: ContentTracker,
    frame: u64,
    round_robin: usize,
    last_plan: FramePlan,
}

impl GiState {
    pub fn new(config: ProbeGiConfig, position: Vec3) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Initializing probe GI ({:?}, {} cascades, {} rays per probe)",
            config.quality,
            config.cascade_count,
            config.rays_per_probe
        );

        let cascades = (0..config.cascade_count as usize)
            .map(|index| {
                let mut cascade = Cascade::new(CascadeDesc {
                    index,
                    probe_count: config.probe_count,
                    spacing: config.cascade_spacing(index),
                    origin: Vec3::ZERO,
                    rays_per_probe: config.rays_per_probe,
                    irradiance_resolution: config.irradiance_resolution,
                    distance_resolution: config.distance_resolution,
                    max_detection_range: config.max_detection_range,
                });
                cascade.teleport(position);
                log::info!(
                    "  cascade {}: {} probes, spacing {}, origin {}",
                    index,
                    cascade.store().len(),
                    cascade.spacing(),
                    cascade.grid().origin()
                );
                cascade
            })
            .collect();

        Ok(Self {
            directions: RayDirections::new(config.rays_per_probe),
            config,
            cascades,
            lights: Vec::new(),
            readback: ReadbackRing::new(),
            content: ContentTracker::new(),
            frame: 0,
            round_robin: 0,
            last_plan: FramePlan::new(),
        })
    }

    pub fn config(&self) -> &ProbeGiConfig {
        &self.config
    }

    pub fn cascades(&self) -> &[Cascade] {
        &self.cascades
    }

    pub fn cascade(&self, index: usize) -> Option<&Cascade> {
        self.cascades.get(index)
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn directions(&self) -> &RayDirections {
        &self.directions
    }

    /// Passes issued by the most recent update.
    pub fn last_plan(&self) -> &FramePlan {
        &self.last_plan
    }

    // ===== Lights =====

    pub fn add_light(&mut self, light: LightConfig) -> Result<()> {
        if self.lights.len() >= MAX_LIGHTS {
            return Err(HelioError::invalid_config(format!("Max {} lights reached", MAX_LIGHTS)));
        }
        self.lights.push(light);
        self.relight_all();
        Ok(())
    }

    pub fn set_lights(&mut self, lights: Vec<LightConfig>) -> Result<()> {
        if lights.len() > MAX_LIGHTS {
            return Err(HelioError::invalid_config(format!("Max {} lights reached", MAX_LIGHTS)));
        }
        self.lights = lights;
        self.relight_all();
        Ok(())
    }

    pub fn clear_lights(&mut self) {
        self.lights.clear();
        self.relight_all();
    }

    pub fn lights(&self) -> &[LightConfig] {
        &self.lights
    }

    /// Lighting changed: every probe with data needs a relight, caches stay.
    fn relight_all(&mut self) -> usize {
        let everything = Aabb::new(Vec3::splat(f32::MIN), Vec3::splat(f32::MAX));
        self.touch_dynamic_area(&everything)
    }

    // ===== Invalidation =====

    pub fn invalidate_area(&mut self, area: &Aabb, hard: bool) -> usize {
        self.cascades
            .iter_mut()
            .map(|cascade| cascade.invalidate_area(area, hard))
            .sum()
    }

    pub fn touch_dynamic_area(&mut self, area: &Aabb) -> usize {
        self.cascades
            .iter_mut()
            .map(|cascade| cascade.touch_dynamic_area(area))
            .sum()
    }

    /// Queue a relight of every valid probe not traced within the last `frames` frames.
    pub fn mark_stale_older_than(&mut self, frames: u64) -> usize {
        let frame = self.frame;
        self.cascades
            .iter_mut()
            .map(|cascade| cascade.mark_stale_older_than(frame, frames))
            .sum()
    }

    pub fn invalidate_all(&mut self) {
        for cascade in &mut self.cascades {
            cascade.invalidate_all();
        }
        self.readback.clear();
    }

    /// Jump every cascade to `position` without hysteresis.
    pub fn teleport(&mut self, position: Vec3) {
        for cascade in &mut self.cascades {
            cascade.teleport(position);
        }
    }

    pub fn set_rays_per_probe(&mut self, rays: u32) -> Result<()> {
        if rays == 0 || rays > MAX_RAYS_PER_PROBE {
            return Err(HelioError::invalid_config(format!(
                "rays per probe {} outside 1..={}",
                rays, MAX_RAYS_PER_PROBE
            )));
        }
        if rays == self.config.rays_per_probe {
            return Ok(());
        }
        log::info!("Probe GI rays per probe {} -> {}", self.config.rays_per_probe, rays);
        self.config.rays_per_probe = rays;
        self.directions = RayDirections::new(rays);
        for cascade in &mut self.cascades {
            cascade.resize_rays(rays);
        }
        Ok(())
    }

    // ===== Frame =====

    /// Advance one frame: apply last frame's corrections, follow the listener, pick up
    /// content changes, then schedule, trace and blend probes of one cascade.
    ///
    /// A failed content query skips probe updates for the frame; pending clears still run.
    pub fn update(
        &mut self,
        position: Vec3,
        frustum: &Frustum,
        backend: &dyn RayBackend,
        scene: &dyn SceneQuery,
    ) -> Result<FrameReport> {
        let frame = self.frame;
        let mut report = FrameReport {
            frame,
            ..Default::default()
        };

        if let Some(readback) = self.readback.take_previous(frame) {
            report.probes_moved = self.apply_corrections(&readback);
        }

        for cascade in &mut self.cascades {
            report.exposed_probes += match cascade.follow(position, self.config.recenter_hysteresis) {
                GridShift::None => 0,
                GridShift::Partial { exposed, .. } => exposed.len(),
                GridShift::Whole { .. } => cascade.store().len(),
            };
        }

        let region = self.detection_region();
        report.content_query_ok = match self.content.find_content(scene, region) {
            Ok(changes) => {
                if !changes.is_empty() {
                    log::debug!(
                        "Probe GI content: {} added, {} removed, {} moved",
                        changes.added,
                        changes.removed,
                        changes.moved
                    );
                }
                for cascade in &mut self.cascades {
                    for area in &changes.static_areas {
                        report.invalidated_probes += cascade.invalidate_area(area, true);
                    }
                    for area in &changes.dynamic_areas {
                        report.invalidated_probes += cascade.touch_dynamic_area(area);
                    }
                }
                true
            }
            Err(err) => {
                log::warn!("Probe GI content query failed, skipping probe updates: {}", err);
                false
            }
        };

        let generation = backend.static_generation();
        for cascade in &mut self.cascades {
            cascade.sync_generation(generation, report.content_query_ok);
            cascade.classify_view(frustum);
        }

        let work = if report.content_query_ok {
            let index = self.pick_cascade();
            let cascade = &self.cascades[index];
            let scheduler = UpdateScheduler::new(self.scheduler_settings(cascade.requires_full_update_inside_view()));
            let sets = scheduler.select(cascade.store(), &cascade.pending_clear(), frame);
            scheduler.commit(&mut self.cascades[index].store, &sets);
            Some((index, sets))
        } else {
            None
        };

        let plan = self.build_plan(work.as_ref());
        plan.validate()?;

        let readback = self.execute(&plan, backend, generation, &mut report);
        if let Some(readback) = readback {
            self.readback.submit(frame, readback);
        }

        if let Some((index, sets)) = work {
            let cascade = &mut self.cascades[index];
            for &slot in &sets.update_probes {
                cascade.finish_probe_update(slot, frame, self.config.settle_frames);
            }
            if !sets.update_probes.is_empty() {
                cascade.mark_updated(frame);
            }
            report.active_cascade = Some(index);
            report.updated_probes = sets.update_probes;
        }

        log::debug!(
            "Probe GI frame {}: cascade {:?}, {} updated ({} cached, {} full, {} cache rebuilds), {} cleared, {} moved",
            frame,
            report.active_cascade,
            report.updated_probes.len(),
            report.cached_traces,
            report.full_traces,
            report.cache_rebuilds,
            report.cleared_probes,
            report.probes_moved
        );

        self.last_plan = plan;
        self.frame += 1;
        Ok(report)
    }

    fn detection_region(&self) -> Aabb {
        self.cascades
            .iter()
            .fold(Aabb::EMPTY, |region, cascade| region.union(&cascade.detection_box()))
    }

    /// Coarsest cascade needing a full update, then coarsest with invalid probes in view,
    /// otherwise round-robin.
    fn pick_cascade(&mut self) -> usize {
        let n = self.cascades.len();
        if let Some(index) = (0..n).rev().find(|&i| self.cascades[i].requires_full_update_inside_view()) {
            return index;
        }
        if let Some(index) = (0..n).rev().find(|&i| self.cascades[i].has_invalid_inside_view()) {
            return index;
        }
        let index = self.round_robin % n;
        self.round_robin = (index + 1) % n;
        index
    }

    fn scheduler_settings(&self, full_update_inside_view: bool) -> SchedulerSettings {
        SchedulerSettings {
            budget: self.config.probes_per_frame as usize,
            inside_view_share: self.config.inside_view_share,
            stale_after_frames: self.config.stale_after_frames,
            fill_with_aged: self.config.fill_with_aged_probes,
            full_update_inside_view,
        }
    }

    fn blend_params(&self) -> BlendParams {
        BlendParams {
            irradiance_hysteresis: self.config.irradiance_hysteresis(),
            distance_hysteresis: self.config.distance_hysteresis(),
            distance_sharpness: self.config.distance_sharpness(),
        }
    }

    fn build_plan(&self, work: Option<&(usize, WorkSets)>) -> FramePlan {
        let mut plan = FramePlan::new();
        for cascade in &self.cascades {
            plan.push(GiPass::ClearProbes {
                cascade: cascade.index(),
                slots: cascade.pending_clear(),
            });
        }
        plan.barrier();

        if let Some((cascade, sets)) = work {
            let cascade = *cascade;
            plan.push(GiPass::TraceRays {
                cascade,
                probes: sets.update_probes.clone(),
                rays_per_probe: self.directions.len() as u32,
            });
            plan.barrier();
            plan.push(GiPass::CopyRayCache {
                cascade,
                probes: sets.ray_cache_probes.clone(),
            });
            plan.push(GiPass::BlendIrradiance {
                cascade,
                probes: sets.update_probes.clone(),
            });
            plan.push(GiPass::BlendDistance {
                cascade,
                probes: sets.update_probes.clone(),
            });
            plan.push(GiPass::ComputeOffsets {
                cascade,
                probes: sets.update_probes.clone(),
            });
            plan.push(GiPass::ComputeExtents {
                cascade,
                probes: sets.ray_limit_probes.clone(),
            });
        }
        plan
    }

    /// CPU execution of a frame plan.
    fn execute(
        &mut self,
        plan: &FramePlan,
        backend: &dyn RayBackend,
        generation: u64,
        report: &mut FrameReport,
    ) -> Option<CorrectionReadback> {
        let rotated = self.directions.rotated(self.frame);
        let blend = self.blend_params();
        let mut traces: BTreeMap<u32, ProbeTrace> = BTreeMap::new();
        let mut readback: Option<CorrectionReadback> = None;

        for pass in plan.passes() {
            match pass {
                GiPass::ClearProbes { cascade, slots } => {
                    self.cascades[*cascade].clear_pending(slots);
                    report.cleared_probes += slots.len();
                }
                GiPass::TraceRays { cascade: index, probes, .. } => {
                    let rebuild = cache_rebuilds(plan, *index);
                    let cascade = &mut self.cascades[*index];
                    let orchestrator = RayTraceOrchestrator::new(backend, &self.lights, trace_settings(&self.config, cascade));
                    let canonical = self.directions.canonical();
                    for &slot in probes {
                        let origin = cascade.probe_position(slot);
                        let trace = if rebuild.contains(&slot) {
                            cascade.begin_cache_rebuild(slot, generation);
                            orchestrator.trace_probe(slot, origin, &rotated, canonical, None, true)
                        } else {
                            let cached = if cascade.store.flags(slot).ray_cache_valid {
                                cascade.cache.read(slot, generation)
                            } else {
                                None
                            };
                            orchestrator.trace_probe(slot, origin, &rotated, canonical, cached, false)
                        };
                        match trace.path {
                            TracePath::Full => report.full_traces += 1,
                            TracePath::Cached => report.cached_traces += 1,
                        }
                        traces.insert(slot, trace);
                    }
                }
                GiPass::CopyRayCache { cascade, probes } => {
                    let cascade = &mut self.cascades[*cascade];
                    for slot in probes {
                        let hits = traces
                            .get(slot)
                            .and_then(|trace| trace.static_hits.as_deref())
                            .unwrap_or(&[]);
                        if cascade.complete_cache_rebuild(*slot, hits, generation) {
                            report.cache_rebuilds += 1;
                        }
                    }
                }
                GiPass::BlendIrradiance { cascade, probes } => {
                    let cascade = &mut self.cascades[*cascade];
                    for slot in probes {
                        let Some(trace) = traces.get(slot) else { continue };
                        let params = if cascade.store.flags(*slot).smooth_update { blend } else { blend.replace() };
                        cascade.maps.blend_irradiance(*slot, &trace.samples, params.irradiance_hysteresis);
                    }
                }
                GiPass::BlendDistance { cascade, probes } => {
                    let cascade = &mut self.cascades[*cascade];
                    for slot in probes {
                        let Some(trace) = traces.get(slot) else { continue };
                        let params = if cascade.store.flags(*slot).smooth_update { blend } else { blend.replace() };
                        cascade.maps.blend_distance(
                            *slot,
                            &trace.samples,
                            params.distance_hysteresis,
                            params.distance_sharpness,
                        );
                    }
                }
                GiPass::ComputeOffsets { cascade: index, probes } => {
                    let cascade = &self.cascades[*index];
                    let settings = corrector_settings(&self.config, cascade);
                    let entry = readback.get_or_insert_with(|| CorrectionReadback {
                        cascade: *index,
                        ..Default::default()
                    });
                    for slot in probes {
                        let Some(trace) = traces.get(slot) else { continue };
                        let probe = cascade.store().get(*slot);
                        let rays = RayClearance::from_trace(trace);
                        let (offset, degenerate) = corrector::compute_offset(probe.offset(), &rays, &settings);
                        entry.offsets.push(OffsetUpdate {
                            slot: *slot,
                            epoch: probe.epoch,
                            offset,
                            degenerate,
                        });
                    }
                }
                GiPass::ComputeExtents { cascade: index, probes } => {
                    let cascade = &self.cascades[*index];
                    let max_distance = cascade.max_probe_distance();
                    let entry = readback.get_or_insert_with(|| CorrectionReadback {
                        cascade: *index,
                        ..Default::default()
                    });
                    for slot in probes {
                        let Some(trace) = traces.get(slot) else { continue };
                        let rays = RayClearance::from_trace(trace);
                        entry.extents.push(ExtentUpdate {
                            slot: *slot,
                            epoch: cascade.store().get(*slot).epoch,
                            extents: corrector::compute_extents(trace.origin, &rays, max_distance),
                        });
                    }
                }
                GiPass::Barrier => {}
            }
        }
        readback
    }

    fn apply_corrections(&mut self, readback: &CorrectionReadback) -> usize {
        let Some(cascade) = self.cascades.get_mut(readback.cascade) else {
            return 0;
        };
        let settings = corrector_settings(&self.config, cascade);
        let moved = corrector::apply_offsets(&mut cascade.store, &mut cascade.cache, &readback.offsets, &settings);
        corrector::apply_extents(&mut cascade.store, &readback.extents);
        moved
    }

    // ===== Shading =====

    /// Irradiance arriving at a surface point with normal `normal`, from the finest cascade
    /// covering `position` that has data there. Probes without data are skipped; `None`
    /// when no cascade has a contributing probe.
    pub fn sample_irradiance(&self, position: Vec3, normal: Vec3) -> Option<Vec3> {
        let normal = normal.try_normalize().unwrap_or(Vec3::Y);
        self.cascades
            .iter()
            .filter(|cascade| cascade.grid().contains(position))
            .find_map(|cascade| sample_cascade(cascade, position, normal))
    }
}

/// Weighted blend of the eight probes around `position`, `None` when none of them count.
fn sample_cascade(cascade: &Cascade, position: Vec3, normal: Vec3) -> Option<Vec3> {
    let grid = cascade.grid();

    let cell = (position - grid.origin()) / grid.spacing();
    let last_base = (grid.coord_clamp() - IVec3::ONE).max(IVec3::ZERO);
    let base = cell.floor().as_ivec3().clamp(IVec3::ZERO, last_base);
    let t = (cell - base.as_vec3()).clamp(Vec3::ZERO, Vec3::ONE);

    let mut sum = Vec3::ZERO;
    let mut total = 0.0;
    for corner in 0..8 {
        let step = IVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
        let Some(slot) = grid.local_slot(base + step) else {
            continue;
        };
        let probe = cascade.store().get(slot);
        if !probe.is_valid() {
            continue;
        }

        let trilinear = Vec3::select(step.cmpeq(IVec3::ONE), t, Vec3::ONE - t);
        let mut weight = trilinear.x * trilinear.y * trilinear.z;

        let to_probe = cascade.probe_position(slot) - position;
        let distance = to_probe.length();
        let dir = if distance > 1e-5 { to_probe / distance } else { normal };
        let wrap = (dir.dot(normal) + 1.0) * 0.5;
        weight *= wrap * wrap + WRAP_FLOOR;
        weight *= chebyshev(cascade.maps().sample_distance(slot, -dir), distance);
        if probe.flags.degenerate {
            weight *= DEGENERATE_WEIGHT;
        }

        sum += cascade.maps().sample_irradiance(slot, normal) * weight;
        total += weight;
    }
    (total > 1e-6).then(|| sum / total)
}

/// Probability that nothing in the distance lobe occludes a point `distance` away.
fn chebyshev(moments: Vec2, distance: f32) -> f32 {
    let mean = moments.x;
    if distance <= mean {
        return 1.0;
    }
    let variance = (moments.y - mean * mean).abs().max(MIN_VARIANCE);
    let d = distance - mean;
    let p = variance / (variance + d * d);
    p * p * p
}

fn cache_rebuilds(plan: &FramePlan, cascade: usize) -> BTreeSet<u32> {
    plan.passes()
        .iter()
        .filter_map(|pass| match pass {
            GiPass::CopyRayCache { cascade: c, probes } if *c == cascade => Some(probes),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

fn trace_settings(config: &ProbeGiConfig, cascade: &Cascade) -> TraceSettings {
    TraceSettings {
        max_distance: cascade.max_probe_distance(),
        max_ray_radiance: config.max_ray_radiance,
        sky_radiance: config.sky_radiance,
        normal_bias: config.normal_bias,
        shadow_distance: cascade.detection_box().extents().length(),
    }
}

fn corrector_settings(config: &ProbeGiConfig, cascade: &Cascade) -> CorrectorSettings {
    let spacing = cascade.spacing();
    CorrectorSettings {
        max_offset: spacing * config.max_offset_fraction,
        min_surface_distance: spacing.min_element() * config.min_surface_distance_fraction,
        move_fraction: config.offset_move_fraction,
        settle_epsilon: config.settle_epsilon,
        settle_frames: config.settle_frames,
        max_offset_moves: config.max_offset_moves,
        max_distance: cascade.max_probe_distance(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GIQuality;
    use crate::probe::ProbeState;
    use glam::UVec3;
    use helio_raytracing::{Mobility, SceneBvh, SurfaceMaterial};

    fn config() -> ProbeGiConfig {
        ProbeGiConfig::from_quality(GIQuality::Low)
            .with_cascade_count(1)
            .with_probe_count(UVec3::new(4, 2, 4))
            .with_base_spacing(Vec3::splat(2.0))
            .with_rays_per_probe(16)
            .with_probes_per_frame(8)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let bad = config().with_base_spacing(Vec3::ZERO);
        assert!(matches!(
            GiState::new(bad, Vec3::ZERO),
            Err(HelioError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_light_limit() {
        let mut state = GiState::new(config(), Vec3::ZERO).unwrap();
        for _ in 0..MAX_LIGHTS {
            state.add_light(LightConfig::default()).unwrap();
        }
        assert!(state.add_light(LightConfig::default()).is_err());
        assert_eq!(state.lights().len(), MAX_LIGHTS);
    }

    #[test]
    fn test_first_frame_updates_every_probe_in_view() {
        let scene = SceneBvh::new();
        let mut state = GiState::new(config(), Vec3::ZERO).unwrap();
        let report = state.update(Vec3::ZERO, &Frustum::everything(), &scene, &scene).unwrap();

        assert!(report.content_query_ok);
        assert_eq!(report.active_cascade, Some(0));
        assert_eq!(report.cleared_probes, 32);
        assert_eq!(report.updated_probes.len(), 32);
        assert_eq!(report.full_traces, 32);
        assert_eq!(state.cascades()[0].store().count_state(ProbeState::Settling), 32);
        assert_eq!(
            state.last_plan().pass_names()[..3],
            ["gi_clear_probes", "gi_barrier", "gi_trace_rays"]
        );
    }

    #[test]
    fn test_failed_content_query_still_clears() {
        let mut scene = SceneBvh::new();
        scene.add_instance(
            Aabb::new(Vec3::new(-1.0, -3.0, -1.0), Vec3::new(1.0, -2.0, 1.0)),
            SurfaceMaterial::default(),
            Mobility::Static,
        );
        scene.set_traversal_limit(Some(0));
        let mut state = GiState::new(config(), Vec3::ZERO).unwrap();
        let report = state.update(Vec3::ZERO, &Frustum::everything(), &scene, &scene).unwrap();

        assert!(!report.content_query_ok);
        assert_eq!(report.active_cascade, None);
        assert_eq!(report.cleared_probes, 32);
        assert!(report.updated_probes.is_empty());
        assert!(state.cascades()[0].pending_clear().is_empty());
        assert_eq!(state.cascades()[0].store().count_state(ProbeState::Unvalidated), 32);
    }

    #[test]
    fn test_open_sky_irradiance_converges_to_sky() {
        let scene = SceneBvh::new();
        let sky = Vec3::new(0.3, 0.4, 0.5);
        let mut state = GiState::new(config().with_sky_radiance(sky), Vec3::ZERO).unwrap();
        for _ in 0..4 {
            state.update(Vec3::ZERO, &Frustum::everything(), &scene, &scene).unwrap();
        }
        let irradiance = state.sample_irradiance(Vec3::new(0.5, -0.5, 0.5), Vec3::Y).unwrap();
        assert!((irradiance - sky).abs().max_element() < 1e-3, "{irradiance}");
    }

    #[test]
    fn test_nothing_sampled_before_first_trace() {
        let state = GiState::new(config(), Vec3::ZERO).unwrap();
        assert!(state.sample_irradiance(Vec3::ZERO, Vec3::Y).is_none());
        assert!(state.sample_irradiance(Vec3::splat(1000.0), Vec3::Y).is_none());
    }

    #[test]
    fn test_set_rays_per_probe_resizes_caches() {
        let mut state = GiState::new(config(), Vec3::ZERO).unwrap();
        assert!(state.set_rays_per_probe(0).is_err());
        state.set_rays_per_probe(32).unwrap();
        assert_eq!(state.directions().len(), 32);
        assert_eq!(state.cascades()[0].cache().rays_per_probe(), 32);
    }

    #[test]
    fn test_mark_stale_older_than_relights_valid_probes() {
        let scene = SceneBvh::new();
        let mut state = GiState::new(config(), Vec3::ZERO).unwrap();
        for _ in 0..20 {
            state.update(Vec3::ZERO, &Frustum::everything(), &scene, &scene).unwrap();
        }
        let valid = state.cascades()[0].store().count_state(ProbeState::Valid);
        assert!(valid > 0);
        assert_eq!(state.mark_stale_older_than(0), valid);
        assert_eq!(state.cascades()[0].store().count_state(ProbeState::Valid), 0);
    }

    #[test]
    fn test_sampling_falls_back_to_coarser_cascade() {
        let scene = SceneBvh::new();
        let sky = Vec3::new(0.3, 0.4, 0.5);
        let mut state =
            GiState::new(config().with_cascade_count(2).with_sky_radiance(sky), Vec3::ZERO).unwrap();
        for _ in 0..6 {
            state.update(Vec3::ZERO, &Frustum::everything(), &scene, &scene).unwrap();
        }
        let point = Vec3::new(0.5, -0.5, 0.5);
        assert!(state.cascades[0].grid().contains(point));
        assert!(state.cascades[1].grid().contains(point));

        state.cascades[0].invalidate_all();
        let irradiance = state.sample_irradiance(point, Vec3::Y).unwrap();
        assert!((irradiance - sky).abs().max_element() < 1e-3, "{irradiance}");
    }

    #[test]
    fn test_chebyshev_visibility() {
        assert_eq!(chebyshev(Vec2::new(2.0, 4.0), 1.0), 1.0);
        assert!(chebyshev(Vec2::new(1.0, 1.0), 3.0) < 1e-6);
    }
}
