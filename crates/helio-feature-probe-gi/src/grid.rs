//! Probe lattice addressing.
//!
//! A cascade covers `count` lattice points per axis. Storage is toroidal: a probe's
//! physical slot is its local coordinate plus a per-axis shift, modulo `count`. When the
//! cascade slides, only the shift changes and probes still inside the window keep their slot.
//!
//! * local coordinate: position inside the current window, `0..count` per axis
//! * shifted coordinate: physical slot coordinate, `(local + shift) mod count`
//! * slot index: `x + nx * (y + ny * z)` over shifted coordinates

use glam::{IVec3, UVec3, Vec3};
use helio_core::Aabb;

/// Round-half-up: `floor(x + 0.5)` per axis.
pub fn round_half_up(v: Vec3) -> IVec3 {
    (v + Vec3::splat(0.5)).floor().as_ivec3()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridShift {
    /// Window did not move
    None,
    /// Window moved by `delta` cells; `exposed` slots now hold lattice points that were not
    /// covered before
    Partial { delta: IVec3, exposed: Vec<u32> },
    /// Window moved at least its own extent on some axis; nothing survives
    Whole { delta: IVec3 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeGrid {
    count: IVec3,
    spacing: Vec3,
    anchor: Vec3,
    origin_cell: IVec3,
    shift: IVec3,
    reference_position: Vec3,
}

impl ProbeGrid {
    /// Grid whose local `(0, 0, 0)` probe sits at `origin`. The lattice is anchored there.
    ///
    /// Slot indices are computed in `i32`, so `count` must stay within
    /// [`MAX_PROBES_PER_CASCADE`](crate::MAX_PROBES_PER_CASCADE) probes.
    pub fn new(count: UVec3, spacing: Vec3, origin: Vec3) -> Self {
        let count = count.max(UVec3::ONE).as_ivec3();
        let mut grid = Self {
            count,
            spacing,
            anchor: origin,
            origin_cell: IVec3::ZERO,
            shift: IVec3::ZERO,
            reference_position: Vec3::ZERO,
        };
        grid.reference_position = grid.center();
        grid
    }

    pub fn probe_count(&self) -> UVec3 {
        self.count.as_uvec3()
    }

    pub fn slot_count(&self) -> usize {
        self.count.x as usize * self.count.y as usize * self.count.z as usize
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn shift(&self) -> IVec3 {
        self.shift
    }

    pub fn origin(&self) -> Vec3 {
        self.anchor + self.origin_cell.as_vec3() * self.spacing
    }

    /// Largest valid local coordinate per axis
    pub fn coord_clamp(&self) -> IVec3 {
        self.count - IVec3::ONE
    }

    pub fn field_size(&self) -> Vec3 {
        self.spacing * self.coord_clamp().as_vec3()
    }

    /// World position of the lattice point the window is centered on.
    pub fn center(&self) -> Vec3 {
        self.grid_to_world(self.count / 2)
    }

    pub fn bounds(&self) -> Aabb {
        let origin = self.origin();
        Aabb::new(origin, origin + self.field_size())
    }

    pub fn contains(&self, position: Vec3) -> bool {
        self.bounds().contains_point(position)
    }

    /// Nearest lattice coordinate relative to the current origin. Not clamped.
    pub fn world_to_grid(&self, position: Vec3) -> IVec3 {
        round_half_up((position - self.origin()) / self.spacing)
    }

    pub fn grid_to_world(&self, coord: IVec3) -> Vec3 {
        self.origin() + coord.as_vec3() * self.spacing
    }

    pub fn closest_lattice_point(&self, position: Vec3) -> Vec3 {
        let cell = round_half_up((position - self.anchor) / self.spacing);
        self.anchor + cell.as_vec3() * self.spacing
    }

    pub fn is_local_in_range(&self, local: IVec3) -> bool {
        local.cmpge(IVec3::ZERO).all() && local.cmplt(self.count).all()
    }

    pub fn local_to_shifted(&self, local: IVec3) -> IVec3 {
        (local + self.shift).rem_euclid(self.count)
    }

    pub fn shifted_to_local(&self, shifted: IVec3) -> IVec3 {
        (shifted - self.shift).rem_euclid(self.count)
    }

    pub fn coord_to_index(&self, shifted: IVec3) -> u32 {
        (shifted.x + self.count.x * (shifted.y + self.count.y * shifted.z)) as u32
    }

    pub fn index_to_coord(&self, index: u32) -> IVec3 {
        let index = index as i32;
        let x = index % self.count.x;
        let y = (index / self.count.x) % self.count.y;
        let z = index / (self.count.x * self.count.y);
        IVec3::new(x, y, z)
    }

    /// Slot holding the probe at `local`, if it lies inside the window.
    pub fn local_slot(&self, local: IVec3) -> Option<u32> {
        self.is_local_in_range(local)
            .then(|| self.coord_to_index(self.local_to_shifted(local)))
    }

    pub fn slot_local(&self, slot: u32) -> IVec3 {
        self.shifted_to_local(self.index_to_coord(slot))
    }

    /// Lattice position of the probe stored in `slot`, without its correction offset.
    pub fn slot_position(&self, slot: u32) -> Vec3 {
        self.grid_to_world(self.slot_local(slot))
    }

    /// Slide the window so it centers on the lattice point closest to `new_center`.
    pub fn recenter(&mut self, new_center: Vec3) -> GridShift {
        let center_cell = round_half_up((new_center - self.anchor) / self.spacing);
        let new_origin_cell = center_cell - self.count / 2;
        let delta = new_origin_cell - self.origin_cell;
        if delta == IVec3::ZERO {
            return GridShift::None;
        }

        self.origin_cell = new_origin_cell;
        self.shift = (self.shift + delta).rem_euclid(self.count);

        if delta.abs().cmpge(self.count).any() {
            return GridShift::Whole { delta };
        }

        // A local coordinate is new when the same lattice point was outside the old window.
        let mut exposed = Vec::new();
        for z in 0..self.count.z {
            for y in 0..self.count.y {
                for x in 0..self.count.x {
                    let local = IVec3::new(x, y, z);
                    if !self.is_local_in_range(local + delta) {
                        exposed.push(self.coord_to_index(self.local_to_shifted(local)));
                    }
                }
            }
        }
        GridShift::Partial { delta, exposed }
    }

    /// Recenter on `position`, but only along axes where the listener moved at least
    /// `hysteresis` spacings since the last accepted move.
    pub fn follow(&mut self, position: Vec3, hysteresis: f32) -> GridShift {
        let threshold = self.spacing * hysteresis;
        let moved = (position - self.reference_position).abs().cmpge(threshold);
        if !moved.any() {
            return GridShift::None;
        }
        self.reference_position = Vec3::select(moved, position, self.reference_position);
        self.recenter(self.reference_position)
    }

    /// Jump straight to `position`, resetting the follow reference.
    pub fn teleport(&mut self, position: Vec3) -> GridShift {
        self.reference_position = position;
        self.recenter(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_4() -> ProbeGrid {
        ProbeGrid::new(UVec3::splat(4), Vec3::splat(2.0), Vec3::ZERO)
    }

    #[test]
    fn test_world_to_grid_rounds_half_up() {
        let grid = grid_4();
        assert_eq!(grid.world_to_grid(Vec3::new(5.0, 1.0, 5.0)), IVec3::new(3, 1, 3));
        assert_eq!(grid.world_to_grid(Vec3::new(-1.0, 0.9, 2.0)), IVec3::new(0, 0, 1));
        assert_eq!(grid.world_to_grid(Vec3::new(-1.1, 0.0, 0.0)), IVec3::new(-1, 0, 0));
    }

    #[test]
    fn test_grid_to_world_round_trips_lattice_points() {
        let grid = grid_4();
        for z in -2..6 {
            for x in -2..6 {
                let coord = IVec3::new(x, 1, z);
                let p = grid.grid_to_world(coord);
                assert_eq!(grid.world_to_grid(p), coord);
                assert_eq!(grid.grid_to_world(grid.world_to_grid(p)), p);
            }
        }
    }

    #[test]
    fn test_shift_mapping_is_bijective() {
        let mut grid = ProbeGrid::new(UVec3::new(5, 3, 4), Vec3::ONE, Vec3::ZERO);
        grid.recenter(grid.center() + Vec3::new(2.0, -1.0, 3.0));
        assert_ne!(grid.shift(), IVec3::ZERO);

        let mut seen = vec![false; grid.slot_count()];
        for z in 0..4 {
            for y in 0..3 {
                for x in 0..5 {
                    let c = IVec3::new(x, y, z);
                    let s = grid.local_to_shifted(c);
                    assert_eq!(grid.shifted_to_local(s), c);
                    let slot = grid.coord_to_index(s) as usize;
                    assert!(!seen[slot]);
                    seen[slot] = true;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_single_probe_axis_wraps() {
        let mut grid = ProbeGrid::new(UVec3::new(1, 2, 2), Vec3::ONE, Vec3::ZERO);
        grid.recenter(grid.center() + Vec3::new(0.0, 1.0, 0.0));
        let c = IVec3::new(0, 1, 1);
        assert_eq!(grid.shifted_to_local(grid.local_to_shifted(c)), c);
        assert_eq!(grid.local_to_shifted(c).x, 0);
    }

    #[test]
    fn test_one_cell_shift_exposes_one_slice() {
        let mut grid = grid_4();
        let before = grid.clone();
        match grid.recenter(grid.center() + Vec3::new(2.0, 0.0, 0.0)) {
            GridShift::Partial { delta, exposed } => {
                assert_eq!(delta, IVec3::X);
                assert_eq!(exposed.len(), 16);
                // exposed slots are exactly the ones that held the dropped x = 0 slice
                for slot in exposed {
                    assert_eq!(before.slot_local(slot).x, 0);
                    assert_eq!(grid.slot_local(slot).x, 3);
                }
            }
            other => panic!("unexpected shift {other:?}"),
        }
    }

    #[test]
    fn test_retained_probes_keep_slot_and_world_position() {
        let mut grid = grid_4();
        let before = grid.clone();
        grid.recenter(grid.center() + Vec3::new(-2.0, 0.0, 4.0));
        for slot in 0..grid.slot_count() as u32 {
            let old_local = before.slot_local(slot);
            let new_local = grid.slot_local(slot);
            if old_local - new_local == IVec3::new(-1, 0, 2) {
                assert_eq!(before.slot_position(slot), grid.slot_position(slot));
            }
        }
    }

    #[test]
    fn test_large_move_is_whole_invalidation() {
        let mut grid = grid_4();
        let shift = grid.recenter(grid.center() + Vec3::new(0.0, 0.0, 8.0));
        assert!(matches!(shift, GridShift::Whole { .. }));
    }

    #[test]
    fn test_follow_ignores_small_motion() {
        let mut grid = grid_4();
        let start = grid.center();
        assert_eq!(grid.follow(start + Vec3::new(1.5, 0.0, 0.0), 0.8), GridShift::None);
        assert!(matches!(
            grid.follow(start + Vec3::new(1.7, 0.0, 0.0), 0.8),
            GridShift::Partial { .. }
        ));
    }
}
