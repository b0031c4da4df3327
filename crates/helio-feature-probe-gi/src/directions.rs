use std::f32::consts::TAU;

use glam::{Quat, Vec3};

const GOLDEN_RATIO_FRACT: f32 = 0.618_034;

/// Spherical Fibonacci ray directions shared by every probe.
#[derive(Debug, Clone, PartialEq)]
pub struct RayDirections {
    canonical: Vec<Vec3>,
}

impl RayDirections {
    pub fn new(count: u32) -> Self {
        let n = count.max(1) as f32;
        let canonical = (0..count.max(1))
            .map(|i| {
                let i = i as f32;
                let phi = TAU * (i * GOLDEN_RATIO_FRACT).fract();
                let cos_theta = 1.0 - (2.0 * i + 1.0) / n;
                let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
                Vec3::new(phi.cos() * sin_theta, cos_theta, phi.sin() * sin_theta)
            })
            .collect();
        Self { canonical }
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    /// Unrotated table. Cached static traces always use these.
    pub fn canonical(&self) -> &[Vec3] {
        &self.canonical
    }

    /// Table rotated by the frame's rotation, so successive updates sample different rays.
    pub fn rotated(&self, frame: u64) -> Vec<Vec3> {
        let rotation = frame_rotation(frame);
        self.canonical.iter().map(|&d| rotation * d).collect()
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn unit_float(bits: u64) -> f32 {
    (bits >> 40) as f32 / (1u64 << 24) as f32
}

/// Uniformly distributed rotation seeded by the frame number (Shoemake).
pub fn frame_rotation(frame: u64) -> Quat {
    let a = splitmix64(frame);
    let b = splitmix64(a);
    let c = splitmix64(b);
    let (u1, u2, u3) = (unit_float(a), unit_float(b), unit_float(c));
    let s1 = (1.0 - u1).sqrt();
    let s2 = u1.sqrt();
    Quat::from_xyzw(
        s1 * (TAU * u2).sin(),
        s1 * (TAU * u2).cos(),
        s2 * (TAU * u3).sin(),
        s2 * (TAU * u3).cos(),
    )
    .normalize()
}
