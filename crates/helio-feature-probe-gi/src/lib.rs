//! Probe-based diffuse global illumination.
//!
//! Probes sit on per-cascade lattices that follow the listener through toroidal
//! addressing, so recentering only re-lights the slice of probes that became new. Each
//! frame one cascade is scheduled: its most needed probes trace rays against a
//! [`RayBackend`](helio_raytracing::RayBackend), blend the result into octahedral
//! irradiance and distance maps, and compute relocation offsets that are applied when the
//! results are read back a frame later.

pub use cascade::{max_probe_distance, Cascade, CascadeDesc};
pub use config::{
    hysteresis_for_response, GIQuality, ProbeGiConfig, MAX_CASCADES, MAX_PROBES_PER_CASCADE, MAX_RAYS_PER_PROBE,
};
pub use content::{ContentChanges, ContentTracker};
pub use corrector::{CorrectorSettings, ExtentUpdate, OffsetUpdate, RayClearance};
pub use directions::{frame_rotation, RayDirections};
pub use gpu::ProbeGiGpu;
pub use grid::{round_half_up, GridShift, ProbeGrid};
pub use maps::{oct_decode, oct_encode, BlendParams, ProbeMaps, RaySample};
pub use pass::{FramePlan, GiPass, WORKGROUP_SIZE};
pub use probe::{Probe, ProbeFlags, ProbeState, ProbeStore};
pub use ray_cache::{CacheState, RayCache};
pub use readback::ReadbackRing;
pub use scheduler::{SchedulerSettings, UpdateScheduler, WorkSets, MAX_PROBES_PER_DISPATCH};
pub use state::{CorrectionReadback, FrameReport, GiState, MAX_LIGHTS};
pub use trace::{LightConfig, LightType, ProbeTrace, RayTraceOrchestrator, TracePath, TraceSettings};
pub use uniforms::{GpuCascade, ProbeGiUniforms};

mod cascade;
mod config;
mod content;
pub mod corrector;
mod directions;
mod gpu;
mod grid;
mod maps;
mod pass;
mod probe;
mod ray_cache;
mod readback;
mod scheduler;
mod state;
mod trace;
mod uniforms;
