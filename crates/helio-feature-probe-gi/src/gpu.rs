use glam::{UVec2, Vec3};
use half::f16;
use wgpu::util::DeviceExt;

use crate::cascade::Cascade;
use crate::probe::ProbeState;
use crate::state::GiState;
use crate::uniforms::ProbeGiUniforms;

const IRRADIANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const DISTANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;
const PROBE_DATA_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Tiles per atlas row and column: slots `x + nx*y` run along a row, `z` picks the row.
fn atlas_tiles(state: &GiState) -> UVec2 {
    let count = state.config().probe_count;
    UVec2::new(count.x * count.y, count.z)
}

/// GPU mirror of the probe maps and probe attributes, one array layer per cascade.
pub struct ProbeGiGpu {
    pub irradiance: wgpu::Texture,
    pub irradiance_view: wgpu::TextureView,
    pub distance: wgpu::Texture,
    pub distance_view: wgpu::TextureView,
    /// xyz=offset, w=state (0 unvalidated, 1 settling, 2 valid, 3 stale) plus 4 when the
    /// probe is degenerate, so shaders down-weight it for `w >= 4`
    pub probe_data: wgpu::Texture,
    pub probe_data_view: wgpu::TextureView,
    pub uniforms_buffer: wgpu::Buffer,
    tiles: UVec2,
    layers: u32,
}

impl ProbeGiGpu {
    pub fn new(device: &wgpu::Device, state: &GiState) -> Self {
        let tiles = atlas_tiles(state);
        let layers = state.cascades().len() as u32;
        let config = state.config();
        let irr = tiles * config.irradiance_resolution;
        let dist = tiles * config.distance_resolution;

        let (irradiance, irradiance_view) =
            create_atlas(device, "probe_gi_irradiance", irr, layers, IRRADIANCE_FORMAT);
        let (distance, distance_view) = create_atlas(device, "probe_gi_distance", dist, layers, DISTANCE_FORMAT);
        let (probe_data, probe_data_view) =
            create_atlas(device, "probe_gi_probe_data", tiles, layers, PROBE_DATA_FORMAT);

        let uniforms_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("probe_gi_uniforms"),
            contents: bytemuck::bytes_of(&ProbeGiUniforms::from_state(state)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        log::info!(
            "Probe GI atlases: irradiance {}x{}, distance {}x{}, {} layers",
            irr.x,
            irr.y,
            dist.x,
            dist.y,
            layers
        );

        Self {
            irradiance,
            irradiance_view,
            distance,
            distance_view,
            probe_data,
            probe_data_view,
            uniforms_buffer,
            tiles,
            layers,
        }
    }

    /// Copy the CPU probe state to the GPU.
    pub fn upload(&self, queue: &wgpu::Queue, state: &GiState) {
        queue.write_buffer(&self.uniforms_buffer, 0, bytemuck::bytes_of(&ProbeGiUniforms::from_state(state)));

        for cascade in state.cascades().iter().take(self.layers as usize) {
            let layer = cascade.index() as u32;
            let maps = cascade.maps();

            let res = maps.irradiance_resolution();
            let texels = pack_tiles(cascade, self.tiles, res, |slot, i| {
                let v = maps.irradiance_tile(slot)[i];
                [f16::from_f32(v.x), f16::from_f32(v.y), f16::from_f32(v.z), f16::ONE]
            });
            write_layer(queue, &self.irradiance, layer, self.tiles * res, bytemuck::cast_slice(&texels), 8);

            let res = maps.distance_resolution();
            let texels = pack_tiles(cascade, self.tiles, res, |slot, i| {
                let v = maps.distance_tile(slot)[i];
                [f16::from_f32(v.x), f16::from_f32(v.y)]
            });
            write_layer(queue, &self.distance, layer, self.tiles * res, bytemuck::cast_slice(&texels), 4);

            let texels = pack_tiles(cascade, self.tiles, 1, |slot, _| {
                let probe = cascade.store().get(slot);
                probe_texel(probe.offset(), probe.state, probe.flags.degenerate)
            });
            write_layer(queue, &self.probe_data, layer, self.tiles, bytemuck::cast_slice(&texels), 8);
        }
    }
}

fn probe_texel(offset: Vec3, state: ProbeState, degenerate: bool) -> [f16; 4] {
    let state = match state {
        ProbeState::Unvalidated => 0.0,
        ProbeState::Settling => 1.0,
        ProbeState::Valid => 2.0,
        ProbeState::Stale => 3.0,
    };
    [
        f16::from_f32(offset.x),
        f16::from_f32(offset.y),
        f16::from_f32(offset.z),
        f16::from_f32(state + if degenerate { 4.0 } else { 0.0 }),
    ]
}

/// Lay out every slot's `res`×`res` tile in a row-major atlas.
fn pack_tiles<T: Copy + Default>(
    cascade: &Cascade,
    tiles: UVec2,
    res: u32,
    texel: impl Fn(u32, usize) -> T,
) -> Vec<T> {
    let width = (tiles.x * res) as usize;
    let mut out = vec![T::default(); width * (tiles.y * res) as usize];
    for slot in 0..cascade.store().len() as u32 {
        let tile_x = slot % tiles.x;
        let tile_y = slot / tiles.x;
        for y in 0..res {
            for x in 0..res {
                let row = (tile_y * res + y) as usize;
                let col = (tile_x * res + x) as usize;
                out[row * width + col] = texel(slot, (y * res + x) as usize);
            }
        }
    }
    out
}

fn create_atlas(
    device: &wgpu::Device,
    name: &str,
    size: UVec2,
    layers: u32,
    format: wgpu::TextureFormat,
) -> (wgpu::Texture, wgpu::TextureView) {
    let tex = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(name),
        size: wgpu::Extent3d { width: size.x, height: size.y, depth_or_array_layers: layers },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = tex.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        array_layer_count: Some(layers),
        ..Default::default()
    });
    (tex, view)
}

fn write_layer(queue: &wgpu::Queue, texture: &wgpu::Texture, layer: u32, size: UVec2, data: &[u8], texel_bytes: u32) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(size.x * texel_bytes),
            rows_per_image: Some(size.y),
        },
        wgpu::Extent3d { width: size.x, height: size.y, depth_or_array_layers: 1 },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeGiConfig;
    use glam::UVec3;

    #[test]
    fn test_atlas_places_tiles_by_slot() {
        let config = ProbeGiConfig::default()
            .with_cascade_count(1)
            .with_probe_count(UVec3::new(2, 1, 2));
        let state = GiState::new(config, Vec3::ZERO).unwrap();
        let tiles = atlas_tiles(&state);
        assert_eq!(tiles, UVec2::new(2, 2));

        let packed = pack_tiles(&state.cascades()[0], tiles, 2, |slot, i| slot * 10 + i as u32);
        assert_eq!(&packed[..4], &[0, 1, 10, 11]);
        assert_eq!(&packed[4..8], &[2, 3, 12, 13]);
        assert_eq!(&packed[8..12], &[20, 21, 30, 31]);
    }

    #[test]
    fn test_probe_texel_encodes_state() {
        let texel = probe_texel(Vec3::new(0.25, -0.5, 0.0), ProbeState::Valid, false);
        assert_eq!(texel[0].to_f32(), 0.25);
        assert_eq!(texel[1].to_f32(), -0.5);
        assert_eq!(texel[3].to_f32(), 2.0);
    }

    #[test]
    fn test_probe_texel_marks_degenerate_probes() {
        let texel = probe_texel(Vec3::ZERO, ProbeState::Valid, true);
        assert_eq!(texel[3].to_f32(), 6.0);
        let texel = probe_texel(Vec3::ZERO, ProbeState::Unvalidated, true);
        assert_eq!(texel[3].to_f32(), 4.0);
    }
}
