use std::collections::HashSet;

use helio_core::{HelioError, Result};

/// Threads per compute workgroup for per-ray and per-probe passes.
pub const WORKGROUP_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiPass {
    ClearProbes { cascade: usize, slots: Vec<u32> },
    TraceRays { cascade: usize, probes: Vec<u32>, rays_per_probe: u32 },
    CopyRayCache { cascade: usize, probes: Vec<u32> },
    BlendIrradiance { cascade: usize, probes: Vec<u32> },
    BlendDistance { cascade: usize, probes: Vec<u32> },
    ComputeOffsets { cascade: usize, probes: Vec<u32> },
    ComputeExtents { cascade: usize, probes: Vec<u32> },
    Barrier,
}

impl GiPass {
    pub fn name(&self) -> &'static str {
        match self {
            GiPass::ClearProbes { .. } => "gi_clear_probes",
            GiPass::TraceRays { .. } => "gi_trace_rays",
            GiPass::CopyRayCache { .. } => "gi_copy_ray_cache",
            GiPass::BlendIrradiance { .. } => "gi_blend_irradiance",
            GiPass::BlendDistance { .. } => "gi_blend_distance",
            GiPass::ComputeOffsets { .. } => "gi_compute_offsets",
            GiPass::ComputeExtents { .. } => "gi_compute_extents",
            GiPass::Barrier => "gi_barrier",
        }
    }

    pub fn cascade(&self) -> Option<usize> {
        match self {
            GiPass::ClearProbes { cascade, .. }
            | GiPass::TraceRays { cascade, .. }
            | GiPass::CopyRayCache { cascade, .. }
            | GiPass::BlendIrradiance { cascade, .. }
            | GiPass::BlendDistance { cascade, .. }
            | GiPass::ComputeOffsets { cascade, .. }
            | GiPass::ComputeExtents { cascade, .. } => Some(*cascade),
            GiPass::Barrier => None,
        }
    }

    pub fn probes(&self) -> &[u32] {
        match self {
            GiPass::ClearProbes { slots, .. } => slots,
            GiPass::TraceRays { probes, .. }
            | GiPass::CopyRayCache { probes, .. }
            | GiPass::BlendIrradiance { probes, .. }
            | GiPass::BlendDistance { probes, .. }
            | GiPass::ComputeOffsets { probes, .. }
            | GiPass::ComputeExtents { probes, .. } => probes,
            GiPass::Barrier => &[],
        }
    }

    fn is_blend(&self) -> bool {
        matches!(self, GiPass::BlendIrradiance { .. } | GiPass::BlendDistance { .. })
    }

    /// Dispatch size for a compute backend.
    pub fn workgroups(&self) -> [u32; 3] {
        let n = self.probes().len() as u32;
        match self {
            GiPass::TraceRays { rays_per_probe, .. } => [(n * rays_per_probe).div_ceil(WORKGROUP_SIZE), 1, 1],
            // one workgroup per probe tile
            GiPass::ClearProbes { .. } | GiPass::BlendIrradiance { .. } | GiPass::BlendDistance { .. } => [n, 1, 1],
            GiPass::Barrier => [0, 0, 0],
            _ => [n.div_ceil(WORKGROUP_SIZE), 1, 1],
        }
    }
}

/// Ordered GI passes for one frame, with explicit barriers between dependent passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramePlan {
    passes: Vec<GiPass>,
}

impl FramePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty passes are skipped.
    pub fn push(&mut self, pass: GiPass) {
        if pass.probes().is_empty() && pass != GiPass::Barrier {
            return;
        }
        self.passes.push(pass);
    }

    pub fn barrier(&mut self) {
        if matches!(self.passes.last(), Some(p) if *p != GiPass::Barrier) {
            self.passes.push(GiPass::Barrier);
        }
    }

    pub fn passes(&self) -> &[GiPass] {
        &self.passes
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(GiPass::name).collect()
    }

    /// A cleared slot may only be blended after a barrier, and never cleared after a blend
    /// in the same frame.
    pub fn validate(&self) -> Result<()> {
        let mut unfenced: HashSet<(usize, u32)> = HashSet::new();
        let mut blended: HashSet<(usize, u32)> = HashSet::new();

        for pass in &self.passes {
            let Some(cascade) = pass.cascade() else {
                unfenced.clear();
                continue;
            };
            match pass {
                GiPass::ClearProbes { slots, .. } => {
                    for &slot in slots {
                        if blended.contains(&(cascade, slot)) {
                            return Err(HelioError::PassOrdering(format!(
                                "cascade {cascade} slot {slot} cleared after blend"
                            )));
                        }
                        unfenced.insert((cascade, slot));
                    }
                }
                p if p.is_blend() => {
                    for &slot in p.probes() {
                        if unfenced.contains(&(cascade, slot)) {
                            return Err(HelioError::PassOrdering(format!(
                                "cascade {cascade} slot {slot} blended without a barrier after its clear"
                            )));
                        }
                        blended.insert((cascade, slot));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
