//! Probe relocation and safe extents.
//!
//! Offsets and extents are computed from the rays of the frame a probe was traced in and
//! applied to the store one frame later, when the readback arrives.

use glam::Vec3;
use helio_core::Aabb;

use crate::probe::{ProbeState, ProbeStore};
use crate::ray_cache::RayCache;
use crate::trace::ProbeTrace;

/// Surfaces whose normal is within ~60° of an axis bound the probe along that axis.
const AXIS_CONE_COS: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectorSettings {
    pub max_offset: Vec3,
    pub min_surface_distance: f32,
    pub move_fraction: f32,
    pub settle_epsilon: f32,
    pub settle_frames: u32,
    pub max_offset_moves: u32,
    pub max_distance: f32,
}

/// One ray as the corrector sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayClearance {
    pub direction: Vec3,
    pub distance: Option<f32>,
    pub normal: Vec3,
    pub backface: bool,
}

impl RayClearance {
    pub fn from_trace(trace: &ProbeTrace) -> Vec<RayClearance> {
        trace
            .directions
            .iter()
            .zip(&trace.hits)
            .map(|(&direction, hit)| RayClearance {
                direction,
                distance: hit.map(|h| h.distance),
                normal: hit.map_or(Vec3::ZERO, |h| h.normal),
                backface: hit.is_some_and(|h| h.is_backface(direction)),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetUpdate {
    pub slot: u32,
    pub epoch: u32,
    pub offset: Vec3,
    pub degenerate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtentUpdate {
    pub slot: u32,
    pub epoch: u32,
    pub extents: Aabb,
}

/// Distance to the nearest surface on the `+axis` and `-axis` side for each of x, y, z.
///
/// A front-face hit bounds the side its surface faces away from, at the perpendicular
/// distance to the surface plane. A back-face hit means the probe is inside geometry and
/// zeroes the side the ray went towards.
pub fn axis_clearance(rays: &[RayClearance], max_distance: f32) -> [(f32, f32); 3] {
    let mut clearance = [(max_distance, max_distance); 3];
    for ray in rays {
        let Some(distance) = ray.distance else {
            continue;
        };
        let distance = distance.clamp(0.0, max_distance);
        for (axis, (pos, neg)) in clearance.iter_mut().enumerate() {
            if ray.backface {
                let c = ray.direction[axis];
                if c >= AXIS_CONE_COS {
                    *pos = 0.0;
                } else if c <= -AXIS_CONE_COS {
                    *neg = 0.0;
                }
                continue;
            }
            let n = ray.normal[axis];
            let plane_distance = distance * (-ray.direction.dot(ray.normal)).max(0.0);
            if n >= AXIS_CONE_COS {
                *neg = neg.min(plane_distance);
            } else if n <= -AXIS_CONE_COS {
                *pos = pos.min(plane_distance);
            }
        }
    }
    clearance
}

/// Offset the probe should move to, given its rays from `current` offset.
pub fn compute_offset(current: Vec3, rays: &[RayClearance], settings: &CorrectorSettings) -> (Vec3, bool) {
    let blocked = |r: &RayClearance| {
        r.backface || r.distance.is_some_and(|d| d < settings.min_surface_distance)
    };
    if !rays.is_empty() && rays.iter().all(blocked) {
        return (Vec3::ZERO, true);
    }

    let clearance = axis_clearance(rays, settings.max_distance);
    let mut step = Vec3::ZERO;
    for (axis, &(pos, neg)) in clearance.iter().enumerate() {
        let near = pos.min(neg);
        if near >= settings.min_surface_distance {
            continue;
        }
        let toward = if pos > neg { 1.0 } else { -1.0 };
        let room = ((pos.max(neg) - near) * 0.5).max(0.0);
        let need = settings.min_surface_distance - near;
        step[axis] = toward * need.min(room) * settings.move_fraction;
    }

    let offset = (current + step).clamp(-settings.max_offset, settings.max_offset);
    (offset, false)
}

/// World-space box the probe's rays can reach.
pub fn compute_extents(position: Vec3, rays: &[RayClearance], max_distance: f32) -> Aabb {
    let clearance = axis_clearance(rays, max_distance);
    let mut min = position;
    let mut max = position;
    for (axis, &(pos, neg)) in clearance.iter().enumerate() {
        min[axis] -= neg.max(f32::EPSILON);
        max[axis] += pos.max(f32::EPSILON);
    }
    Aabb::new(min, max)
}

/// Apply offsets read back from an earlier frame. Updates for slots that were reset
/// since (epoch mismatch) are dropped.
pub fn apply_offsets(
    store: &mut ProbeStore,
    cache: &mut RayCache,
    updates: &[OffsetUpdate],
    settings: &CorrectorSettings,
) -> usize {
    let mut moved = 0;
    for update in updates {
        let probe = store.get(update.slot);
        if probe.epoch != update.epoch || !probe.is_valid() {
            continue;
        }

        // nothing to move towards: freeze at the lattice point and finish settling
        if update.degenerate {
            let was_offset = probe.offset() != Vec3::ZERO;
            store.set_offset(update.slot, Vec3::ZERO);
            let probe = store.probe_mut(update.slot);
            probe.flags.degenerate = true;
            probe.move_count = probe.move_count.max(settings.max_offset_moves);
            probe.settle_count = probe.settle_count.saturating_add(1);
            if was_offset {
                probe.flags.ray_cache_valid = false;
                probe.flags.reset_history = true;
                cache.invalidate(update.slot);
            }
            if probe.state == ProbeState::Settling {
                probe.state = ProbeState::Valid;
            }
            continue;
        }

        let old = probe.offset();
        let frozen = probe.move_count >= settings.max_offset_moves;
        let change = (update.offset - old).abs().max_element();
        store.probe_mut(update.slot).flags.degenerate = false;

        if change > settings.settle_epsilon && !frozen {
            let stored = store.set_offset(update.slot, update.offset);
            let probe = store.probe_mut(update.slot);
            probe.move_count += 1;
            probe.settle_count = 0;
            probe.flags.ray_cache_valid = false;
            probe.flags.ray_limits_valid = false;
            probe.flags.reset_history = true;
            if probe.state == ProbeState::Valid {
                probe.state = ProbeState::Settling;
            }
            cache.invalidate(update.slot);
            moved += 1;
            log::trace!("probe {} moved {} -> {}", update.slot, old, stored);
        } else {
            let probe = store.probe_mut(update.slot);
            probe.settle_count = probe.settle_count.saturating_add(1);
            if probe.state == ProbeState::Settling && (probe.settle_count >= settings.settle_frames || frozen) {
                probe.state = ProbeState::Valid;
            }
        }
    }
    moved
}

pub fn apply_extents(store: &mut ProbeStore, updates: &[ExtentUpdate]) {
    for update in updates {
        let probe = store.get(update.slot);
        if probe.epoch == update.epoch && probe.is_valid() {
            store.set_extents(update.slot, update.extents);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions::RayDirections;

    fn settings() -> CorrectorSettings {
        CorrectorSettings {
            max_offset: Vec3::splat(0.9),
            min_surface_distance: 0.5,
            move_fraction: 0.5,
            settle_epsilon: 0.05,
            settle_frames: 3,
            max_offset_moves: 5,
            max_distance: 5.0,
        }
    }

    /// Rays from a probe sitting `gap` above an infinite floor.
    fn above_floor(gap: f32) -> Vec<RayClearance> {
        RayDirections::new(64)
            .canonical()
            .iter()
            .map(|&direction| RayClearance {
                direction,
                distance: (direction.y < 0.0)
                    .then(|| gap / -direction.y)
                    .filter(|&d| d <= settings().max_distance),
                normal: Vec3::Y,
                backface: false,
            })
            .collect()
    }

    #[test]
    fn test_probe_near_floor_moves_up() {
        let (offset, degenerate) = compute_offset(Vec3::ZERO, &above_floor(0.1), &settings());
        assert!(!degenerate);
        assert!(offset.y > 0.0);
        assert!(offset.x.abs() < 1e-6 && offset.z.abs() < 1e-6);
    }

    #[test]
    fn test_probe_with_clearance_stays() {
        let (offset, _) = compute_offset(Vec3::splat(0.2), &above_floor(2.0), &settings());
        assert_eq!(offset, Vec3::splat(0.2));
    }

    #[test]
    fn test_offset_never_exceeds_bound() {
        let mut offset = Vec3::ZERO;
        for _ in 0..50 {
            let rays: Vec<RayClearance> = above_floor(0.01)
                .into_iter()
                .map(|mut r| {
                    r.distance = r.distance.map(|d| d * 0.01);
                    r
                })
                .collect();
            offset = compute_offset(offset, &rays, &settings()).0;
            assert!(offset.abs().cmple(Vec3::splat(0.9)).all());
        }
    }

    #[test]
    fn test_fully_enclosed_probe_is_degenerate() {
        let rays: Vec<RayClearance> = RayDirections::new(32)
            .canonical()
            .iter()
            .map(|&direction| RayClearance {
                direction,
                distance: Some(0.1),
                normal: -direction,
                backface: false,
            })
            .collect();
        let (offset, degenerate) = compute_offset(Vec3::splat(0.3), &rays, &settings());
        assert!(degenerate);
        assert_eq!(offset, Vec3::ZERO);
    }

    fn settling_store() -> ProbeStore {
        let mut store = ProbeStore::new(4, Vec3::splat(2.0), Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0)));
        for slot in 0..4 {
            store.probe_mut(slot).state = ProbeState::Settling;
        }
        store
    }

    #[test]
    fn test_degenerate_probe_freezes_and_finishes_settling() {
        let mut store = settling_store();
        let mut cache = RayCache::new(4, 8);
        store.set_offset(2, Vec3::splat(0.4));
        let update = OffsetUpdate {
            slot: 2,
            epoch: store.get(2).epoch,
            offset: Vec3::ZERO,
            degenerate: true,
        };

        assert_eq!(apply_offsets(&mut store, &mut cache, &[update], &settings()), 0);
        let probe = store.get(2);
        assert!(probe.flags.degenerate);
        assert_eq!(probe.offset(), Vec3::ZERO);
        assert_eq!(probe.state, ProbeState::Valid);
        assert_eq!(probe.move_count, settings().max_offset_moves);

        // a later non-degenerate result cannot move it again
        let update = OffsetUpdate {
            offset: Vec3::splat(0.5),
            degenerate: false,
            ..update
        };
        apply_offsets(&mut store, &mut cache, &[update], &settings());
        assert_eq!(store.get(2).offset(), Vec3::ZERO);
    }

    #[test]
    fn test_accepted_move_resets_history_once() {
        let mut store = settling_store();
        let mut cache = RayCache::new(4, 8);
        let update = OffsetUpdate {
            slot: 1,
            epoch: store.get(1).epoch,
            offset: Vec3::new(0.0, 0.3, 0.0),
            degenerate: false,
        };
        assert_eq!(apply_offsets(&mut store, &mut cache, &[update], &settings()), 1);
        assert!(store.get(1).flags.reset_history);
        assert!(!store.get(0).flags.reset_history);

        // same offset again is below the settle threshold and leaves the flag alone
        store.flags_mut(1).reset_history = false;
        apply_offsets(&mut store, &mut cache, &[update], &settings());
        assert!(!store.get(1).flags.reset_history);
        assert_eq!(store.get(1).settle_count, 1);
    }

    #[test]
    fn test_extents_follow_clearance() {
        let extents = compute_extents(Vec3::new(0.0, 1.0, 0.0), &above_floor(1.0), 5.0);
        assert!(extents.min.y <= 0.0 + 1e-4 && extents.min.y > -0.5);
        assert!((extents.max.y - 6.0).abs() < 1e-4);
    }
}
