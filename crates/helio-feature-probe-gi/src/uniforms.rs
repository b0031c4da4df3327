use bytemuck::{Pod, Zeroable};

use crate::config::MAX_CASCADES;
use crate::state::GiState;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuCascade {
    pub origin_and_max_distance: [f32; 4], // xyz=origin of local (0,0,0), w=max ray distance
    pub spacing_and_layer: [f32; 4],       // xyz=spacing, w=atlas layer
    pub probe_count: [u32; 4],             // xyz=count, w=slot count
    pub shift: [i32; 4],                   // xyz=toroidal shift, w=unused
}

impl Default for GpuCascade {
    fn default() -> Self {
        Self {
            origin_and_max_distance: [0.0; 4],
            spacing_and_layer: [0.0; 4],
            probe_count: [0; 4],
            shift: [0; 4],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ProbeGiUniforms {
    pub params: [f32; 4], // x=cascade_count, y=irradiance_res, z=distance_res, w=frame
    pub blend: [f32; 4],  // x=irradiance hysteresis, y=distance hysteresis, z=distance sharpness, w=max radiance
    pub sky: [f32; 4],    // xyz=sky radiance, w=normal bias
    pub cascades: [GpuCascade; MAX_CASCADES],
}

impl Default for ProbeGiUniforms {
    fn default() -> Self {
        Self {
            params: [0.0; 4],
            blend: [0.0; 4],
            sky: [0.0; 4],
            cascades: [GpuCascade::default(); MAX_CASCADES],
        }
    }
}

impl ProbeGiUniforms {
    pub fn from_state(state: &GiState) -> Self {
        let config = state.config();
        let mut uniforms = Self {
            params: [
                state.cascades().len() as f32,
                config.irradiance_resolution as f32,
                config.distance_resolution as f32,
                state.frame() as f32,
            ],
            blend: [
                config.irradiance_hysteresis(),
                config.distance_hysteresis(),
                config.distance_sharpness(),
                config.max_ray_radiance,
            ],
            sky: config.sky_radiance.extend(config.normal_bias).to_array(),
            ..Default::default()
        };

        for (gpu, cascade) in uniforms.cascades.iter_mut().zip(state.cascades()) {
            let grid = cascade.grid();
            let count = grid.probe_count();
            *gpu = GpuCascade {
                origin_and_max_distance: grid.origin().extend(cascade.max_probe_distance()).to_array(),
                spacing_and_layer: grid.spacing().extend(cascade.index() as f32).to_array(),
                probe_count: count.extend(grid.slot_count() as u32).to_array(),
                shift: grid.shift().extend(0).to_array(),
            };
        }
        uniforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeGiConfig;
    use glam::{UVec3, Vec3};

    #[test]
    fn test_layout_is_std140_friendly() {
        assert_eq!(std::mem::size_of::<GpuCascade>(), 64);
        assert_eq!(std::mem::size_of::<ProbeGiUniforms>(), 48 + 64 * MAX_CASCADES);
    }

    #[test]
    fn test_uniforms_mirror_grid() {
        let config = ProbeGiConfig::default()
            .with_cascade_count(2)
            .with_probe_count(UVec3::new(4, 2, 4))
            .with_base_spacing(Vec3::splat(2.0));
        let state = GiState::new(config, Vec3::ZERO).unwrap();
        let uniforms = ProbeGiUniforms::from_state(&state);

        assert_eq!(uniforms.params[0], 2.0);
        assert_eq!(uniforms.cascades[0].probe_count, [4, 2, 4, 32]);
        assert_eq!(uniforms.cascades[0].origin_and_max_distance[..3], [-4.0, -2.0, -4.0]);
        assert_eq!(uniforms.cascades[1].spacing_and_layer, [4.0, 4.0, 4.0, 1.0]);
        assert_eq!(uniforms.cascades[2].probe_count, [0; 4]);
    }
}
