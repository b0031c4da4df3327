//! Headless probe GI walkthrough.
//!
//! A listener walks down a lit room while a crate slides around and, halfway through, a
//! pillar is added. Each frame logs what the GI driver did. When a GPU adapter is
//! available the probe maps are uploaded to textures as a renderer would.
//!
//! Run with `RUST_LOG=info` (or `debug` for per-frame detail).

use glam::{Mat4, Vec3};
use helio_core::Aabb;
use helio_culling::Frustum;
use helio_feature_probe_gi::{GIQuality, GiState, LightConfig, ProbeGiConfig, ProbeGiGpu, ProbeState};
use helio_raytracing::{InstanceId, Mobility, SceneBvh, SurfaceMaterial};

const FRAMES: u32 = 240;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    log::info!("Starting probe GI walkthrough");

    let (mut scene, crate_id) = build_room();
    let config = ProbeGiConfig::from_quality(GIQuality::Low).with_probe_count(glam::UVec3::new(16, 6, 16));
    let mut gi = GiState::new(config, Vec3::new(0.0, 1.5, -8.0))?;
    gi.add_light(LightConfig::point(Vec3::new(0.0, 4.0, 0.0), Vec3::new(1.0, 0.9, 0.8), 6.0, 15.0))?;
    gi.add_light(LightConfig::directional(
        Vec3::new(0.3, -1.0, 0.2),
        Vec3::new(0.9, 0.95, 1.0),
        1.5,
    ))?;

    let gpu = pollster::block_on(request_device()).map(|(device, queue)| {
        let targets = ProbeGiGpu::new(&device, &gi);
        (device, queue, targets)
    });
    if gpu.is_none() {
        log::warn!("No GPU adapter found, running CPU only");
    }

    for frame in 0..FRAMES {
        let t = frame as f32 / FRAMES as f32;
        let eye = Vec3::new(0.0, 1.5, -8.0 + 16.0 * t);
        let frustum = camera_frustum(eye, eye + Vec3::Z);

        if frame % 30 == 15 {
            let x = if (frame / 30) % 2 == 0 { 3.0 } else { -3.0 };
            scene.move_instance(crate_id, Aabb::from_center_half_extents(Vec3::new(x, 0.5, 2.0), Vec3::splat(0.5)));
        }
        if frame == FRAMES / 2 {
            log::info!("Adding pillar");
            scene.add_instance(
                Aabb::new(Vec3::new(-0.5, 0.0, 4.0), Vec3::new(0.5, 5.0, 5.0)),
                SurfaceMaterial::default(),
                Mobility::Static,
            );
        }

        let report = gi.update(eye, &frustum, &scene, &scene)?;
        if let Some((_, queue, targets)) = &gpu {
            targets.upload(queue, &gi);
        }

        if frame % 20 == 0 {
            let cascade = &gi.cascades()[0];
            log::info!(
                "frame {:3}: cascade {:?}, {:3} updated, {:3} cached, {} valid / {} probes",
                report.frame,
                report.active_cascade,
                report.updated_probes.len(),
                report.cached_traces,
                cascade.store().count_state(ProbeState::Valid),
                cascade.store().len()
            );
            match gi.sample_irradiance(eye - Vec3::Y * 1.4, Vec3::Y) {
                Some(irradiance) => log::info!("  floor irradiance under listener: {}", irradiance),
                None => log::info!("  floor irradiance under listener: no valid probes yet"),
            }
        }
    }

    Ok(())
}

/// Closed 16×6×20 room with a dynamic crate.
fn build_room() -> (SceneBvh, InstanceId) {
    let mut scene = SceneBvh::new();
    let wall = SurfaceMaterial {
        albedo: Vec3::new(0.7, 0.7, 0.65),
        ..Default::default()
    };
    let red = SurfaceMaterial {
        albedo: Vec3::new(0.8, 0.1, 0.1),
        ..Default::default()
    };
    let slabs = [
        (Aabb::new(Vec3::new(-8.0, -1.0, -10.0), Vec3::new(8.0, 0.0, 10.0)), wall),
        (Aabb::new(Vec3::new(-8.0, 6.0, -10.0), Vec3::new(8.0, 7.0, 10.0)), wall),
        (Aabb::new(Vec3::new(-9.0, 0.0, -10.0), Vec3::new(-8.0, 6.0, 10.0)), red),
        (Aabb::new(Vec3::new(8.0, 0.0, -10.0), Vec3::new(9.0, 6.0, 10.0)), wall),
        (Aabb::new(Vec3::new(-8.0, 0.0, 10.0), Vec3::new(8.0, 6.0, 11.0)), wall),
    ];
    for (bounds, material) in slabs {
        scene.add_instance(bounds, material, Mobility::Static);
    }
    let crate_id = scene.add_instance(
        Aabb::from_center_half_extents(Vec3::new(-3.0, 0.5, 2.0), Vec3::splat(0.5)),
        SurfaceMaterial {
            albedo: Vec3::new(0.6, 0.4, 0.2),
            ..Default::default()
        },
        Mobility::Dynamic,
    );
    (scene, crate_id)
}

fn camera_frustum(eye: Vec3, target: Vec3) -> Frustum {
    let view = Mat4::look_at_rh(eye, target, Vec3::Y);
    let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
    Frustum::from_matrix(proj * view)
}

async fn request_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok()?;
    log::info!("Using GPU: {}", adapter.get_info().name);
    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("probe_gi_walkthrough"),
            ..Default::default()
        })
        .await
        .ok()
}
