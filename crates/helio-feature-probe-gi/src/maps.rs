//! Per-probe octahedral irradiance and distance tiles.

use glam::{Vec2, Vec3};

pub fn oct_encode(dir: Vec3) -> Vec2 {
    let n = dir / (dir.x.abs() + dir.y.abs() + dir.z.abs());
    let p = Vec2::new(n.x, n.z);
    if n.y >= 0.0 {
        p
    } else {
        (Vec2::ONE - Vec2::new(p.y.abs(), p.x.abs())) * sign_not_zero(p)
    }
}

pub fn oct_decode(uv: Vec2) -> Vec3 {
    let y = 1.0 - uv.x.abs() - uv.y.abs();
    let mut p = uv;
    if y < 0.0 {
        p = (Vec2::ONE - Vec2::new(uv.y.abs(), uv.x.abs())) * sign_not_zero(uv);
    }
    Vec3::new(p.x, y, p.y).normalize()
}

fn sign_not_zero(v: Vec2) -> Vec2 {
    Vec2::new(
        if v.x >= 0.0 { 1.0 } else { -1.0 },
        if v.y >= 0.0 { 1.0 } else { -1.0 },
    )
}

/// Direction through the center of texel `(x, y)` of a `res`×`res` tile.
pub fn texel_direction(res: u32, x: u32, y: u32) -> Vec3 {
    let uv = (Vec2::new(x as f32, y as f32) + 0.5) / res as f32 * 2.0 - 1.0;
    oct_decode(uv)
}

/// One traced ray, already shaded and clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaySample {
    pub direction: Vec3,
    pub radiance: Vec3,
    pub distance: f32,
}

impl RaySample {
    /// Non-finite or negative radiance becomes zero, radiance is capped at `max_radiance`
    /// and distance is limited to `[0, max_distance]`.
    pub fn clamped(
        direction: Vec3,
        radiance: Vec3,
        distance: f32,
        max_radiance: f32,
        max_distance: f32,
    ) -> Self {
        let radiance = Vec3::select(radiance.cmpge(Vec3::ZERO), radiance, Vec3::ZERO)
            .min(Vec3::splat(max_radiance.max(0.0)));
        let distance = if distance.is_nan() {
            max_distance
        } else {
            distance.clamp(0.0, max_distance)
        };
        Self { direction, radiance, distance }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendParams {
    pub irradiance_hysteresis: f32,
    pub distance_hysteresis: f32,
    pub distance_sharpness: f32,
}

impl BlendParams {
    /// Replace history entirely.
    pub fn replace(self) -> Self {
        Self {
            irradiance_hysteresis: 0.0,
            distance_hysteresis: 0.0,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeMaps {
    irradiance_resolution: u32,
    distance_resolution: u32,
    max_distance: f32,
    irradiance: Vec<Vec3>,
    distance: Vec<Vec2>,
    irradiance_dirs: Vec<Vec3>,
    distance_dirs: Vec<Vec3>,
}

impl ProbeMaps {
    pub fn new(slot_count: usize, irradiance_resolution: u32, distance_resolution: u32, max_distance: f32) -> Self {
        let irr_texels = (irradiance_resolution * irradiance_resolution) as usize;
        let dist_texels = (distance_resolution * distance_resolution) as usize;
        Self {
            irradiance_resolution,
            distance_resolution,
            max_distance,
            irradiance: vec![Vec3::ZERO; slot_count * irr_texels],
            distance: vec![Self::cleared_distance(max_distance); slot_count * dist_texels],
            irradiance_dirs: tile_directions(irradiance_resolution),
            distance_dirs: tile_directions(distance_resolution),
        }
    }

    fn cleared_distance(max_distance: f32) -> Vec2 {
        Vec2::new(max_distance, max_distance * max_distance)
    }

    pub fn irradiance_resolution(&self) -> u32 {
        self.irradiance_resolution
    }

    pub fn distance_resolution(&self) -> u32 {
        self.distance_resolution
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    fn irr_range(&self, slot: u32) -> std::ops::Range<usize> {
        let n = self.irradiance_dirs.len();
        slot as usize * n..(slot as usize + 1) * n
    }

    fn dist_range(&self, slot: u32) -> std::ops::Range<usize> {
        let n = self.distance_dirs.len();
        slot as usize * n..(slot as usize + 1) * n
    }

    pub fn irradiance_tile(&self, slot: u32) -> &[Vec3] {
        &self.irradiance[self.irr_range(slot)]
    }

    pub fn distance_tile(&self, slot: u32) -> &[Vec2] {
        &self.distance[self.dist_range(slot)]
    }

    pub fn irradiance_texels(&self) -> &[Vec3] {
        &self.irradiance
    }

    pub fn distance_texels(&self) -> &[Vec2] {
        &self.distance
    }

    pub fn clear_slot(&mut self, slot: u32) {
        let cleared = Self::cleared_distance(self.max_distance);
        let range = self.irr_range(slot);
        self.irradiance[range].fill(Vec3::ZERO);
        let range = self.dist_range(slot);
        self.distance[range].fill(cleared);
    }

    /// Blend the samples into the irradiance tile: cosine-weighted mean radiance per texel,
    /// then `old * h + estimate * (1 - h)`.
    pub fn blend_irradiance(&mut self, slot: u32, samples: &[RaySample], hysteresis: f32) {
        let h = hysteresis.clamp(0.0, 1.0);
        let range = self.irr_range(slot);
        for (texel, dir) in self.irradiance[range].iter_mut().zip(&self.irradiance_dirs) {
            let mut sum = Vec3::ZERO;
            let mut weight = 0.0;
            for sample in samples {
                let w = dir.dot(sample.direction).max(0.0);
                sum += sample.radiance * w;
                weight += w;
            }
            if weight > f32::EPSILON {
                *texel = texel.lerp(sum / weight, 1.0 - h);
            }
        }
    }

    /// Same blend for (mean distance, mean squared distance) with a `cos^sharpness` lobe.
    pub fn blend_distance(&mut self, slot: u32, samples: &[RaySample], hysteresis: f32, sharpness: f32) {
        let h = hysteresis.clamp(0.0, 1.0);
        let range = self.dist_range(slot);
        for (texel, dir) in self.distance[range].iter_mut().zip(&self.distance_dirs) {
            let mut sum = Vec2::ZERO;
            let mut weight = 0.0;
            for sample in samples {
                let cos = dir.dot(sample.direction).max(0.0);
                let w = cos.powf(sharpness);
                sum += Vec2::new(sample.distance, sample.distance * sample.distance) * w;
                weight += w;
            }
            if weight > f32::EPSILON {
                *texel = texel.lerp(sum / weight, 1.0 - h);
            }
        }
    }

    pub fn blend(&mut self, slot: u32, samples: &[RaySample], params: BlendParams) {
        self.blend_irradiance(slot, samples, params.irradiance_hysteresis);
        self.blend_distance(slot, samples, params.distance_hysteresis, params.distance_sharpness);
    }

    pub fn sample_irradiance(&self, slot: u32, dir: Vec3) -> Vec3 {
        let tile = self.irradiance_tile(slot);
        bilinear(tile, self.irradiance_resolution, dir, |a, b, t| a.lerp(b, t))
    }

    pub fn sample_distance(&self, slot: u32, dir: Vec3) -> Vec2 {
        let tile = self.distance_tile(slot);
        bilinear(tile, self.distance_resolution, dir, |a, b, t| a.lerp(b, t))
    }

    /// Overwrite a whole tile; used by uploads from external bakes and by tests.
    pub fn write_irradiance_tile(&mut self, slot: u32, value: Vec3) {
        let range = self.irr_range(slot);
        self.irradiance[range].fill(value);
    }
}

fn tile_directions(res: u32) -> Vec<Vec3> {
    (0..res)
        .flat_map(|y| (0..res).map(move |x| texel_direction(res, x, y)))
        .collect()
}

fn bilinear<T: Copy>(tile: &[T], res: u32, dir: Vec3, lerp: impl Fn(T, T, f32) -> T) -> T {
    let uv = (oct_encode(dir) + 1.0) * 0.5 * res as f32 - 0.5;
    let max = (res - 1) as f32;
    let p = uv.clamp(Vec2::ZERO, Vec2::splat(max));
    let base = p.floor();
    let t = p - base;
    let x0 = base.x as u32;
    let y0 = base.y as u32;
    let x1 = (x0 + 1).min(res - 1);
    let y1 = (y0 + 1).min(res - 1);
    let at = |x: u32, y: u32| tile[(y * res + x) as usize];
    let top = lerp(at(x0, y0), at(x1, y0), t.x);
    let bottom = lerp(at(x0, y1), at(x1, y1), t.x);
    lerp(top, bottom, t.y)
}
