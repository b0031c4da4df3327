//! Per-frame probe selection.
//!
//! Selection is a pure function of the store, so it can be repeated within a frame and
//! yields the same sets. `commit` applies the bookkeeping for the chosen probes.
//!
//! Ranking: unvalidated probes inside the view go first. The rest of the budget is split
//! between probes inside and outside the view by `inside_view_share`, and any share one
//! side cannot use goes to the other. Within a side, probes are ordered by need
//! (unvalidated, stale, settling, aged), then oldest update, then least recently selected,
//! then slot index.

use glam::Vec3;
use helio_culling::Frustum;

use crate::grid::ProbeGrid;
use crate::probe::{Probe, ProbeState, ProbeStore};

/// Hard cap on probes in a single dispatch, also bounds full inside-view updates.
pub const MAX_PROBES_PER_DISPATCH: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkSets {
    pub update_probes: Vec<u32>,
    pub ray_limit_probes: Vec<u32>,
    pub ray_cache_probes: Vec<u32>,
    pub clear_probes: Vec<u32>,
}

impl WorkSets {
    pub fn is_empty(&self) -> bool {
        self.update_probes.is_empty() && self.clear_probes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub budget: usize,
    pub inside_view_share: f32,
    pub stale_after_frames: u64,
    pub fill_with_aged: bool,
    /// Take every inside-view candidate this frame, up to the dispatch cap
    pub full_update_inside_view: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Need {
    Unvalidated,
    Stale,
    Settling,
    Aged,
}

type RankKey = (Need, u64, u64, u32);

fn need(probe: &Probe, frame: u64, stale_after: u64) -> Option<Need> {
    match probe.state {
        ProbeState::Unvalidated => Some(Need::Unvalidated),
        ProbeState::Stale => Some(Need::Stale),
        ProbeState::Settling => Some(Need::Settling),
        ProbeState::Valid => {
            let aged = probe
                .last_update_frame
                .map_or(true, |f| frame.saturating_sub(f) >= stale_after);
            aged.then_some(Need::Aged)
        }
    }
}

fn age_key(probe: &Probe) -> u64 {
    probe.last_update_frame.map_or(0, |f| f + 1)
}

pub struct UpdateScheduler {
    settings: SchedulerSettings,
}

impl UpdateScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Flag probes whose cell touches the view. Planes are pushed back by half a cell
    /// diagonal so probes just outside still light visible surfaces.
    pub fn classify_view(grid: &ProbeGrid, store: &mut ProbeStore, frustum: &Frustum) -> usize {
        let radius = grid.spacing().length() * 0.5;
        let mut inside = 0;
        for slot in 0..store.len() as u32 {
            let position: Vec3 = grid.slot_position(slot) + store.get(slot).offset();
            let visible = frustum.test_sphere_unbounded(position, radius);
            store.flags_mut(slot).inside_view = visible;
            inside += visible as usize;
        }
        inside
    }

    pub fn select(&self, store: &ProbeStore, pending_clear: &[u32], frame: u64) -> WorkSets {
        let s = &self.settings;
        let mut inside: Vec<(RankKey, u32)> = Vec::new();
        let mut outside: Vec<(RankKey, u32)> = Vec::new();
        let mut idle: Vec<((u64, u64, u32), u32)> = Vec::new();

        for (slot, probe) in store.iter() {
            match need(probe, frame, s.stale_after_frames) {
                Some(n) => {
                    let key = (n, age_key(probe), store.lru_stamp(slot), slot);
                    if probe.flags.inside_view {
                        inside.push((key, slot));
                    } else {
                        outside.push((key, slot));
                    }
                }
                None if probe.is_valid() => {
                    idle.push(((age_key(probe), store.lru_stamp(slot), slot), slot));
                }
                None => {}
            }
        }
        inside.sort_unstable();
        outside.sort_unstable();

        let mut selected: Vec<u32> = Vec::new();
        let mut next_in = 0;
        let mut next_out = 0;

        if s.full_update_inside_view {
            next_in = inside.len().min(MAX_PROBES_PER_DISPATCH);
            selected.extend(inside[..next_in].iter().map(|&(_, slot)| slot));
            if next_in < inside.len() {
                log::warn!(
                    "Full inside-view update truncated to {} of {} probes",
                    next_in,
                    inside.len()
                );
            }
        } else {
            while next_in < inside.len()
                && selected.len() < s.budget
                && inside[next_in].0 .0 == Need::Unvalidated
            {
                selected.push(inside[next_in].1);
                next_in += 1;
            }
        }

        let remaining = s.budget.saturating_sub(selected.len());
        let inside_quota = (remaining as f32 * s.inside_view_share).round() as usize;
        let take_in = inside_quota.min(inside.len() - next_in);
        selected.extend(inside[next_in..next_in + take_in].iter().map(|&(_, slot)| slot));
        next_in += take_in;

        let take_out = (remaining - take_in).min(outside.len());
        selected.extend(outside[..take_out].iter().map(|&(_, slot)| slot));
        next_out += take_out;

        // unused share on one side goes to the other
        let left = s.budget.saturating_sub(selected.len());
        let more_in = left.min(inside.len() - next_in);
        selected.extend(inside[next_in..next_in + more_in].iter().map(|&(_, slot)| slot));
        let left = left - more_in;
        let more_out = left.min(outside.len() - next_out);
        selected.extend(outside[next_out..next_out + more_out].iter().map(|&(_, slot)| slot));

        if s.fill_with_aged && selected.len() < s.budget {
            idle.sort_unstable();
            let fill = s.budget - selected.len();
            selected.extend(idle.iter().take(fill).map(|&(_, slot)| slot));
        }

        let ray_limit_probes = selected
            .iter()
            .copied()
            .filter(|&slot| !store.flags(slot).ray_limits_valid)
            .collect();
        // caches are only rebuilt once the offset stopped moving
        let ray_cache_probes = selected
            .iter()
            .copied()
            .filter(|&slot| {
                let probe = store.get(slot);
                !probe.flags.ray_cache_valid && matches!(probe.state, ProbeState::Valid | ProbeState::Stale)
            })
            .collect();
        let mut clear_probes = pending_clear.to_vec();
        clear_probes.sort_unstable();
        clear_probes.dedup();

        WorkSets {
            update_probes: selected,
            ray_limit_probes,
            ray_cache_probes,
            clear_probes,
        }
    }

    /// Move selected probes to the back of the LRU order and decide how each blends.
    /// A probe's first trace and the first trace after a relocation replace history
    /// instead of blending.
    pub fn commit(&self, store: &mut ProbeStore, sets: &WorkSets) {
        store.touch_lru(&sets.update_probes);
        for &slot in &sets.update_probes {
            let probe = store.probe_mut(slot);
            probe.flags.smooth_update = probe.is_valid() && !probe.flags.reset_history;
        }
    }
}
