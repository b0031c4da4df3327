use std::collections::BTreeSet;

use glam::{UVec3, Vec3};
use helio_core::Aabb;
use helio_culling::Frustum;

use crate::grid::{GridShift, ProbeGrid};
use crate::maps::ProbeMaps;
use crate::probe::{ProbeState, ProbeStore};
use crate::ray_cache::{CacheState, RayCache};
use crate::scheduler::UpdateScheduler;

/// Geometry and sizing of one cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeDesc {
    pub index: usize,
    pub probe_count: UVec3,
    pub spacing: Vec3,
    pub origin: Vec3,
    pub rays_per_probe: u32,
    pub irradiance_resolution: u32,
    pub distance_resolution: u32,
    pub max_detection_range: f32,
}

/// One resolution level: lattice, probe attributes, maps and ray cache.
#[derive(Debug, Clone)]
pub struct Cascade {
    index: usize,
    grid: ProbeGrid,
    pub(crate) store: ProbeStore,
    pub(crate) maps: ProbeMaps,
    pub(crate) cache: RayCache,
    pending_clear: BTreeSet<u32>,
    max_detection_range: f32,
    requires_full_update_inside_view: bool,
    cache_generation: Option<u64>,
    last_update_frame: Option<u64>,
}

impl Cascade {
    pub fn new(desc: CascadeDesc) -> Self {
        let grid = ProbeGrid::new(desc.probe_count, desc.spacing, desc.origin);
        let slots = grid.slot_count();
        let max_distance = max_probe_distance(desc.spacing);
        let mut cascade = Self {
            index: desc.index,
            store: ProbeStore::new(slots, desc.spacing, Aabb::default()),
            maps: ProbeMaps::new(slots, desc.irradiance_resolution, desc.distance_resolution, max_distance),
            cache: RayCache::new(slots, desc.rays_per_probe as usize),
            grid,
            pending_clear: (0..slots as u32).collect(),
            max_detection_range: desc.max_detection_range,
            requires_full_update_inside_view: true,
            cache_generation: None,
            last_update_frame: None,
        };
        let box_ = cascade.detection_box();
        cascade.store.invalidate_all(box_);
        cascade
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn grid(&self) -> &ProbeGrid {
        &self.grid
    }

    pub fn store(&self) -> &ProbeStore {
        &self.store
    }

    pub fn maps(&self) -> &ProbeMaps {
        &self.maps
    }

    pub fn cache(&self) -> &RayCache {
        &self.cache
    }

    pub fn spacing(&self) -> Vec3 {
        self.grid.spacing()
    }

    pub fn max_probe_distance(&self) -> f32 {
        max_probe_distance(self.grid.spacing())
    }

    /// Region around the cascade in which content changes matter.
    pub fn detection_box(&self) -> Aabb {
        let half = self.grid.field_size() * 0.5 + Vec3::splat(self.max_detection_range);
        Aabb::from_center_half_extents(self.grid.bounds().center(), half)
    }

    pub fn pending_clear(&self) -> Vec<u32> {
        self.pending_clear.iter().copied().collect()
    }

    pub fn requires_full_update_inside_view(&self) -> bool {
        self.requires_full_update_inside_view
    }

    pub fn has_invalid_inside_view(&self) -> bool {
        self.store
            .iter()
            .any(|(_, p)| p.flags.inside_view && !p.is_valid())
    }

    /// Refresh the inside-view flags. Returns the number of probes in view.
    pub fn classify_view(&mut self, frustum: &Frustum) -> usize {
        UpdateScheduler::classify_view(&self.grid, &mut self.store, frustum)
    }

    pub fn last_update_frame(&self) -> Option<u64> {
        self.last_update_frame
    }

    pub(crate) fn mark_updated(&mut self, frame: u64) {
        self.last_update_frame = Some(frame);
        self.requires_full_update_inside_view = false;
    }

    /// World position of a slot's probe, including its correction offset.
    pub fn probe_position(&self, slot: u32) -> Vec3 {
        self.grid.slot_position(slot) + self.store.get(slot).offset()
    }

    pub fn recenter(&mut self, center: Vec3) -> GridShift {
        let shift = self.grid.recenter(center);
        self.apply_shift(&shift);
        shift
    }

    pub fn follow(&mut self, position: Vec3, hysteresis: f32) -> GridShift {
        let shift = self.grid.follow(position, hysteresis);
        self.apply_shift(&shift);
        shift
    }

    pub fn teleport(&mut self, position: Vec3) -> GridShift {
        let shift = self.grid.teleport(position);
        self.apply_shift(&shift);
        shift
    }

    fn apply_shift(&mut self, shift: &GridShift) {
        match shift {
            GridShift::None => {}
            GridShift::Partial { exposed, .. } => {
                let box_ = self.detection_box();
                for &slot in exposed {
                    self.store.invalidate_slot(slot, box_);
                    self.cache.invalidate(slot);
                    self.pending_clear.insert(slot);
                }
            }
            GridShift::Whole { delta } => {
                log::debug!("Cascade {} jumped {} cells, invalidating all probes", self.index, delta);
                self.invalidate_all();
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        let box_ = self.detection_box();
        self.store.invalidate_all(box_);
        self.cache.invalidate_all();
        self.pending_clear.extend(0..self.store.len() as u32);
        self.requires_full_update_inside_view = true;
    }

    /// Static geometry changed inside `area`.
    pub fn invalidate_area(&mut self, area: &Aabb, hard: bool) -> usize {
        let touched = self.store.invalidate_area(area, hard);
        for &slot in &touched {
            self.cache.invalidate(slot);
        }
        touched.len()
    }

    pub fn touch_dynamic_area(&mut self, area: &Aabb) -> usize {
        self.store.touch_dynamic_area(area)
    }

    pub fn mark_stale_older_than(&mut self, frame: u64, threshold: u64) -> usize {
        self.store.mark_stale_older_than(frame, threshold)
    }

    /// Bring cache tokens in line with the backend's static generation.
    ///
    /// When every static change since the last sync was seen by the content tracker (and
    /// already invalidated by area), surviving entries are carried over to the new
    /// generation. Otherwise every entry from an older generation expires.
    pub fn sync_generation(&mut self, generation: u64, changes_observed: bool) {
        match self.cache_generation {
            Some(previous) if previous != generation && changes_observed => {
                self.cache.retag(previous, generation);
            }
            _ => {}
        }
        for slot in self.cache.expire_older_than(generation) {
            self.store.flags_mut(slot).ray_cache_valid = false;
        }
        self.cache_generation = Some(generation);
    }

    /// Ray count changed: every cached trace is unusable.
    pub fn resize_rays(&mut self, rays_per_probe: u32) {
        self.cache.resize_rays(rays_per_probe as usize);
        for slot in 0..self.store.len() as u32 {
            self.store.flags_mut(slot).ray_cache_valid = false;
        }
    }

    /// Run the clear pass for every pending slot.
    pub(crate) fn clear_pending(&mut self, slots: &[u32]) {
        for &slot in slots {
            self.maps.clear_slot(slot);
            self.pending_clear.remove(&slot);
        }
    }

    pub(crate) fn begin_cache_rebuild(&mut self, slot: u32, generation: u64) {
        self.cache.begin_rebuild(slot, generation);
        self.store.flags_mut(slot).ray_cache_valid = false;
    }

    pub(crate) fn complete_cache_rebuild(
        &mut self,
        slot: u32,
        hits: &[Option<helio_raytracing::RayHit>],
        generation: u64,
    ) -> bool {
        let ok = self.cache.complete_rebuild(slot, hits, generation);
        self.store.flags_mut(slot).ray_cache_valid = ok;
        ok
    }

    /// After a probe was traced and blended.
    pub(crate) fn finish_probe_update(&mut self, slot: u32, frame: u64, settle_frames: u32) {
        let probe = self.store.probe_mut(slot);
        probe.last_update_frame = Some(frame);
        probe.flags.smooth_update = true;
        probe.flags.reset_history = false;
        probe.state = match probe.state {
            ProbeState::Unvalidated => ProbeState::Settling,
            ProbeState::Stale if probe.settle_count < settle_frames => ProbeState::Settling,
            ProbeState::Stale => ProbeState::Valid,
            other => other,
        };
    }

    pub fn count_cache_state(&self, state: CacheState) -> usize {
        (0..self.cache.slot_count() as u32)
            .filter(|&slot| self.cache.state(slot) == state)
            .count()
    }
}

/// Rays longer than this never influence a probe.
pub fn max_probe_distance(spacing: Vec3) -> f32 {
    spacing.length() * 1.5
}
