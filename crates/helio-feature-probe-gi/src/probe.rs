use glam::Vec3;
use helio_core::Aabb;

/// Lifecycle of a probe slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ProbeState {
    /// Never traced, or its data was discarded. Never sampled.
    #[default]
    Unvalidated,
    /// Traced, offset still moving.
    Settling,
    /// Traced with a settled offset.
    Valid,
    /// Holds usable data but needs relighting.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeFlags {
    pub ray_limits_valid: bool,
    pub ray_cache_valid: bool,
    /// Next update blends with history instead of replacing it
    pub smooth_update: bool,
    /// The offset moved since the last blend; the next blend replaces history once
    pub reset_history: bool,
    pub inside_view: bool,
    /// No clearance in any direction; shading down-weights the probe
    pub degenerate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub state: ProbeState,
    pub flags: ProbeFlags,
    offset: Vec3,
    /// World-space region whose changes can affect this probe
    pub extents: Aabb,
    pub settle_count: u32,
    pub move_count: u32,
    pub last_update_frame: Option<u64>,
    /// Bumped whenever the slot is reset, so late results for a previous occupant are dropped
    pub epoch: u32,
}

impl Probe {
    fn reset(extents: Aabb, epoch: u32) -> Self {
        Self {
            state: ProbeState::Unvalidated,
            flags: ProbeFlags::default(),
            offset: Vec3::ZERO,
            extents,
            settle_count: 0,
            move_count: 0,
            last_update_frame: None,
            epoch,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state != ProbeState::Unvalidated
    }

    pub fn offset(&self) -> Vec3 {
        self.offset
    }
}

/// Per-cascade probe attributes, one entry per physical slot.
#[derive(Debug, Clone)]
pub struct ProbeStore {
    probes: Vec<Probe>,
    max_offset: Vec3,
    lru: Vec<u64>,
    lru_clock: u64,
}

impl ProbeStore {
    pub fn new(slot_count: usize, spacing: Vec3, initial_extents: Aabb) -> Self {
        Self {
            probes: vec![Probe::reset(initial_extents, 0); slot_count],
            max_offset: spacing * 0.5,
            lru: (0..slot_count as u64).collect(),
            lru_clock: slot_count as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn get(&self, slot: u32) -> &Probe {
        &self.probes[slot as usize]
    }

    pub fn probe_mut(&mut self, slot: u32) -> &mut Probe {
        &mut self.probes[slot as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Probe)> {
        self.probes.iter().enumerate().map(|(i, p)| (i as u32, p))
    }

    pub fn flags(&self, slot: u32) -> ProbeFlags {
        self.probes[slot as usize].flags
    }

    pub fn flags_mut(&mut self, slot: u32) -> &mut ProbeFlags {
        &mut self.probes[slot as usize].flags
    }

    pub fn max_offset(&self) -> Vec3 {
        self.max_offset
    }

    /// Stores `offset` clamped component-wise to half a spacing. Returns the stored value.
    pub fn set_offset(&mut self, slot: u32, offset: Vec3) -> Vec3 {
        let clamped = if offset.is_finite() {
            offset.clamp(-self.max_offset, self.max_offset)
        } else {
            Vec3::ZERO
        };
        self.probes[slot as usize].offset = clamped;
        clamped
    }

    pub fn set_extents(&mut self, slot: u32, extents: Aabb) {
        let probe = &mut self.probes[slot as usize];
        probe.extents = extents;
        probe.flags.ray_limits_valid = true;
    }

    pub fn invalidate_slot(&mut self, slot: u32, extents: Aabb) {
        let probe = &mut self.probes[slot as usize];
        *probe = Probe::reset(extents, probe.epoch.wrapping_add(1));
    }

    pub fn invalidate_all(&mut self, extents: Aabb) {
        for slot in 0..self.probes.len() as u32 {
            self.invalidate_slot(slot, extents);
        }
    }

    /// Geometry inside `area` changed. A hard invalidation also drops offsets and ray
    /// limits, a soft one only forces a relight. Returns the touched slots.
    pub fn invalidate_area(&mut self, area: &Aabb, hard: bool) -> Vec<u32> {
        let mut touched = Vec::new();
        for (slot, probe) in self.probes.iter_mut().enumerate() {
            if !probe.is_valid() || !probe.extents.intersects(area) {
                continue;
            }
            probe.flags.ray_cache_valid = false;
            if hard {
                probe.flags.ray_limits_valid = false;
                probe.flags.degenerate = false;
                probe.offset = Vec3::ZERO;
                probe.settle_count = 0;
                probe.move_count = 0;
            }
            probe.state = ProbeState::Stale;
            touched.push(slot as u32);
        }
        touched
    }

    /// Dynamic content moved inside `area`: relight affected probes, keep their caches.
    pub fn touch_dynamic_area(&mut self, area: &Aabb) -> usize {
        let mut touched = 0;
        for probe in &mut self.probes {
            if matches!(probe.state, ProbeState::Valid | ProbeState::Settling)
                && probe.extents.intersects(area)
            {
                probe.state = ProbeState::Stale;
                touched += 1;
            }
        }
        touched
    }

    /// Valid probes last traced `threshold` or more frames before `frame` go Stale.
    pub fn mark_stale_older_than(&mut self, frame: u64, threshold: u64) -> usize {
        let mut marked = 0;
        for probe in &mut self.probes {
            let old = probe
                .last_update_frame
                .map_or(false, |f| frame.saturating_sub(f) >= threshold);
            if probe.state == ProbeState::Valid && old {
                probe.state = ProbeState::Stale;
                marked += 1;
            }
        }
        marked
    }

    /// Up to `max` slots matching `pred`, in slot order.
    pub fn select_where(&self, max: usize, pred: impl Fn(&Probe) -> bool) -> Vec<u32> {
        self.iter()
            .filter(|(_, p)| pred(p))
            .map(|(slot, _)| slot)
            .take(max)
            .collect()
    }

    /// Recency stamp; smaller means selected longer ago.
    pub fn lru_stamp(&self, slot: u32) -> u64 {
        self.lru[slot as usize]
    }

    /// Move `slots` to the back of the least-recently-selected order, keeping their order.
    pub fn touch_lru(&mut self, slots: &[u32]) {
        for &slot in slots {
            self.lru[slot as usize] = self.lru_clock;
            self.lru_clock += 1;
        }
    }

    pub fn count_state(&self, state: ProbeState) -> usize {
        self.probes.iter().filter(|p| p.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProbeStore {
        ProbeStore::new(
            8,
            Vec3::splat(2.0),
            Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0)),
        )
    }

    #[test]
    fn test_offset_is_clamped_to_half_spacing() {
        let mut store = store();
        let stored = store.set_offset(3, Vec3::new(5.0, -0.5, -7.0));
        assert_eq!(stored, Vec3::new(1.0, -0.5, -1.0));
        assert_eq!(store.get(3).offset(), stored);
        assert_eq!(store.set_offset(3, Vec3::new(f32::NAN, 0.0, 0.0)), Vec3::ZERO);
    }

    #[test]
    fn test_invalidate_slot_resets_and_bumps_epoch() {
        let mut store = store();
        let probe = store.probe_mut(2);
        probe.state = ProbeState::Valid;
        probe.flags.ray_cache_valid = true;
        probe.move_count = 3;
        let epoch = probe.epoch;

        store.invalidate_slot(2, Aabb::default());
        let probe = store.get(2);
        assert_eq!(probe.state, ProbeState::Unvalidated);
        assert_eq!(probe.flags, ProbeFlags::default());
        assert_eq!(probe.move_count, 0);
        assert_eq!(probe.epoch, epoch + 1);
    }

    #[test]
    fn test_area_invalidation_only_hits_overlapping_valid_probes() {
        let mut store = store();
        for slot in 0..4 {
            let probe = store.probe_mut(slot);
            probe.state = ProbeState::Valid;
            probe.extents = Aabb::from_center_half_extents(Vec3::new(slot as f32 * 10.0, 0.0, 0.0), Vec3::ONE);
        }
        store.set_offset(1, Vec3::splat(0.3));

        let area = Aabb::from_center_half_extents(Vec3::new(10.0, 0.0, 0.0), Vec3::splat(0.5));
        assert_eq!(store.invalidate_area(&area, false), vec![1]);
        assert_eq!(store.get(1).state, ProbeState::Stale);
        assert_eq!(store.get(1).offset(), Vec3::splat(0.3));

        assert_eq!(store.invalidate_area(&area, true), vec![1]);
        assert_eq!(store.get(1).offset(), Vec3::ZERO);
        assert_eq!(store.get(0).state, ProbeState::Valid);
    }

    #[test]
    fn test_mark_stale_older_than() {
        let mut store = store();
        for (slot, frame) in [(0, 10), (1, 50), (2, 95)] {
            let probe = store.probe_mut(slot);
            probe.state = ProbeState::Valid;
            probe.last_update_frame = Some(frame);
        }
        assert_eq!(store.mark_stale_older_than(100, 50), 2);
        assert_eq!(store.get(0).state, ProbeState::Stale);
        assert_eq!(store.get(1).state, ProbeState::Stale);
        assert_eq!(store.get(2).state, ProbeState::Valid);
        assert_eq!(store.get(3).state, ProbeState::Unvalidated);
    }

    #[test]
    fn test_select_where_caps_batch() {
        let store = store();
        let picked = store.select_where(3, |p| !p.is_valid());
        assert_eq!(picked, vec![0, 1, 2]);
    }

    #[test]
    fn test_lru_touch_moves_to_back() {
        let mut store = store();
        store.touch_lru(&[0, 5]);
        assert!(store.lru_stamp(0) > store.lru_stamp(7));
        assert!(store.lru_stamp(5) > store.lru_stamp(0));
    }
}
