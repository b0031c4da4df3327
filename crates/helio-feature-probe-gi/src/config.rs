use glam::{UVec3, Vec3};
use helio_core::{HelioError, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on cascades, matches the fixed-size uniform array.
pub const MAX_CASCADES: usize = 4;
/// Upper bound on rays a single probe may cast in one update.
pub const MAX_RAYS_PER_PROBE: u32 = 512;
/// Upper bound on probes in one cascade, keeps slot arithmetic inside `i32`.
pub const MAX_PROBES_PER_CASCADE: u64 = 1 << 24;

/// Quality presets for probe GI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GIQuality {
    /// 2 cascades of 16×8×16 probes, 64 rays per probe
    Low,
    /// 3 cascades of 24×8×24 probes, 128 rays per probe (default)
    #[default]
    Medium,
    /// 4 cascades of 32×8×32 probes, 256 rays per probe
    High,
}

impl GIQuality {
    pub fn cascade_count(&self) -> u32 {
        match self {
            GIQuality::Low => 2,
            GIQuality::Medium => 3,
            GIQuality::High => 4,
        }
    }

    pub fn probe_count(&self) -> UVec3 {
        match self {
            GIQuality::Low => UVec3::new(16, 8, 16),
            GIQuality::Medium => UVec3::new(24, 8, 24),
            GIQuality::High => UVec3::new(32, 8, 32),
        }
    }

    pub fn rays_per_probe(&self) -> u32 {
        match self {
            GIQuality::Low => 64,
            GIQuality::Medium => 128,
            GIQuality::High => 256,
        }
    }

    /// Probes traced per frame on the active cascade
    pub fn probes_per_frame(&self) -> u32 {
        match self {
            GIQuality::Low => 128,
            GIQuality::Medium => 256,
            GIQuality::High => 512,
        }
    }
}

/// Configuration builder for probe GI
///
/// When deserialized, missing fields come from the `quality` preset rather than from
/// the default preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProbeGiConfigRepr")]
pub struct ProbeGiConfig {
    pub quality: GIQuality,
    pub cascade_count: u32,
    pub probe_count: UVec3,
    /// Probe spacing of the finest cascade
    pub base_spacing: Vec3,
    /// Each cascade's spacing is the previous one's times this factor
    pub cascade_spacing_factor: f32,
    pub rays_per_probe: u32,
    pub probes_per_frame: u32,
    /// Share of the regular budget reserved for probes inside the view
    pub inside_view_share: f32,
    /// Valid probes not traced for this many frames become update candidates again
    pub stale_after_frames: u64,
    /// Spend leftover budget refreshing the oldest valid probes
    pub fill_with_aged_probes: bool,

    pub irradiance_resolution: u32,
    pub distance_resolution: u32,
    /// Updates until a step change is ~63% absorbed into the irradiance map
    pub irradiance_response_updates: f32,
    /// Same, for the distance map
    pub distance_response_updates: f32,
    /// Angle at which a ray's weight on a distance texel halves
    pub distance_lobe_half_angle_deg: f32,
    pub max_ray_radiance: f32,
    pub sky_radiance: Vec3,
    /// Hit points are pushed this far along the normal before shadow rays
    pub normal_bias: f32,

    /// Offset bound as a fraction of spacing (at most 0.5)
    pub max_offset_fraction: f32,
    /// Clearance below which a probe tries to move, as a fraction of the smallest spacing
    pub min_surface_distance_fraction: f32,
    /// Portion of the remaining distance covered per correction
    pub offset_move_fraction: f32,
    /// Offset changes smaller than this count as settled
    pub settle_epsilon: f32,
    pub settle_frames: u32,
    pub max_offset_moves: u32,

    /// Listener travel, in spacings, before a cascade recenters along an axis
    pub recenter_hysteresis: f32,
    /// Margin around each cascade inside which content changes matter
    pub max_detection_range: f32,
}

macro_rules! config_overrides {
    ($($field:ident: $ty:ty),* $(,)?) => {
        /// Serialized form: the preset plus whichever fields override it.
        #[derive(Deserialize)]
        struct ProbeGiConfigRepr {
            #[serde(default)]
            quality: GIQuality,
            $(
                #[serde(default)]
                $field: Option<$ty>,
            )*
        }

        impl From<ProbeGiConfigRepr> for ProbeGiConfig {
            fn from(repr: ProbeGiConfigRepr) -> Self {
                let mut config = ProbeGiConfig::from_quality(repr.quality);
                $(
                    if let Some(value) = repr.$field {
                        config.$field = value;
                    }
                )*
                config
            }
        }
    };
}

config_overrides! {
    cascade_count: u32,
    probe_count: UVec3,
    base_spacing: Vec3,
    cascade_spacing_factor: f32,
    rays_per_probe: u32,
    probes_per_frame: u32,
    inside_view_share: f32,
    stale_after_frames: u64,
    fill_with_aged_probes: bool,
    irradiance_resolution: u32,
    distance_resolution: u32,
    irradiance_response_updates: f32,
    distance_response_updates: f32,
    distance_lobe_half_angle_deg: f32,
    max_ray_radiance: f32,
    sky_radiance: Vec3,
    normal_bias: f32,
    max_offset_fraction: f32,
    min_surface_distance_fraction: f32,
    offset_move_fraction: f32,
    settle_epsilon: f32,
    settle_frames: u32,
    max_offset_moves: u32,
    recenter_hysteresis: f32,
    max_detection_range: f32,
}

/// Finite and not negative.
fn non_negative(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}

impl Default for ProbeGiConfig {
    fn default() -> Self {
        Self::from_quality(GIQuality::default())
    }
}

impl ProbeGiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_quality(quality: GIQuality) -> Self {
        Self {
            quality,
            cascade_count: quality.cascade_count(),
            probe_count: quality.probe_count(),
            base_spacing: Vec3::ONE,
            cascade_spacing_factor: 2.0,
            rays_per_probe: quality.rays_per_probe(),
            probes_per_frame: quality.probes_per_frame(),
            inside_view_share: 0.8,
            stale_after_frames: 240,
            fill_with_aged_probes: true,
            irradiance_resolution: 8,
            distance_resolution: 16,
            irradiance_response_updates: 10.0,
            distance_response_updates: 10.0,
            distance_lobe_half_angle_deg: 9.5,
            max_ray_radiance: 10.0,
            sky_radiance: Vec3::new(0.35, 0.45, 0.6),
            normal_bias: 0.02,
            max_offset_fraction: 0.45,
            min_surface_distance_fraction: 0.25,
            offset_move_fraction: 0.5,
            settle_epsilon: 0.05,
            settle_frames: 3,
            max_offset_moves: 5,
            recenter_hysteresis: 0.8,
            max_detection_range: 50.0,
        }
    }

    /// Apply a quality preset, keeping the non-preset settings
    pub fn with_quality(mut self, quality: GIQuality) -> Self {
        self.quality = quality;
        self.cascade_count = quality.cascade_count();
        self.probe_count = quality.probe_count();
        self.rays_per_probe = quality.rays_per_probe();
        self.probes_per_frame = quality.probes_per_frame();
        self
    }

    pub fn with_cascade_count(mut self, count: u32) -> Self {
        self.cascade_count = count.clamp(1, MAX_CASCADES as u32);
        self
    }

    pub fn with_probe_count(mut self, count: UVec3) -> Self {
        self.probe_count = count.max(UVec3::ONE);
        self
    }

    pub fn with_base_spacing(mut self, spacing: Vec3) -> Self {
        self.base_spacing = spacing;
        self
    }

    pub fn with_cascade_spacing(mut self, factor: f32) -> Self {
        self.cascade_spacing_factor = factor.max(1.0);
        self
    }

    pub fn with_rays_per_probe(mut self, rays: u32) -> Self {
        self.rays_per_probe = rays.clamp(1, MAX_RAYS_PER_PROBE);
        self
    }

    pub fn with_probes_per_frame(mut self, budget: u32) -> Self {
        self.probes_per_frame = budget.max(1);
        self
    }

    pub fn with_irradiance_response(mut self, updates: f32) -> Self {
        self.irradiance_response_updates = updates.max(0.0);
        self
    }

    pub fn with_sky_radiance(mut self, radiance: Vec3) -> Self {
        self.sky_radiance = radiance.max(Vec3::ZERO);
        self
    }

    pub fn with_stale_after(mut self, frames: u64) -> Self {
        self.stale_after_frames = frames;
        self
    }

    pub fn with_aged_fill(mut self, enabled: bool) -> Self {
        self.fill_with_aged_probes = enabled;
        self
    }

    pub fn with_recenter_hysteresis(mut self, spacings: f32) -> Self {
        self.recenter_hysteresis = spacings.max(0.0);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cascade_count == 0 || self.cascade_count as usize > MAX_CASCADES {
            return Err(HelioError::invalid_config(format!(
                "cascade count {} outside 1..={}",
                self.cascade_count, MAX_CASCADES
            )));
        }
        if self.probe_count.min_element() == 0 {
            return Err(HelioError::invalid_config(format!(
                "probe count {} has a zero axis",
                self.probe_count
            )));
        }
        let slots = self.probe_count.as_u64vec3().element_product();
        if slots > MAX_PROBES_PER_CASCADE {
            return Err(HelioError::invalid_config(format!(
                "probe count {} exceeds {} probes per cascade",
                self.probe_count, MAX_PROBES_PER_CASCADE
            )));
        }
        if !self.base_spacing.is_finite() || self.base_spacing.min_element() <= 0.0 {
            return Err(HelioError::invalid_config(format!(
                "probe spacing {} must be positive",
                self.base_spacing
            )));
        }
        if !(self.cascade_spacing_factor.is_finite() && self.cascade_spacing_factor >= 1.0) {
            return Err(HelioError::invalid_config("cascade spacing factor must be finite and at least 1"));
        }
        if self.rays_per_probe == 0 || self.rays_per_probe > MAX_RAYS_PER_PROBE {
            return Err(HelioError::invalid_config(format!(
                "rays per probe {} outside 1..={}",
                self.rays_per_probe, MAX_RAYS_PER_PROBE
            )));
        }
        if self.probes_per_frame == 0 {
            return Err(HelioError::invalid_config("probe update budget is zero"));
        }
        if self.irradiance_resolution < 2 || self.distance_resolution < 2 {
            return Err(HelioError::invalid_config("probe map resolution below 2"));
        }
        if !(self.irradiance_response_updates >= 0.0 && self.distance_response_updates >= 0.0) {
            return Err(HelioError::invalid_config("negative response time"));
        }
        if !(self.distance_lobe_half_angle_deg > 0.0 && self.distance_lobe_half_angle_deg < 90.0) {
            return Err(HelioError::invalid_config("distance lobe angle outside (0, 90)"));
        }
        if !(self.max_offset_fraction >= 0.0 && self.max_offset_fraction <= 0.5) {
            return Err(HelioError::invalid_config("offset fraction outside [0, 0.5]"));
        }
        if !(self.inside_view_share >= 0.0 && self.inside_view_share <= 1.0) {
            return Err(HelioError::invalid_config("inside view share outside [0, 1]"));
        }
        if !(self.offset_move_fraction > 0.0 && self.offset_move_fraction <= 1.0) {
            return Err(HelioError::invalid_config("offset move fraction outside (0, 1]"));
        }
        let non_negative_fields = [
            ("max ray radiance", self.max_ray_radiance),
            ("normal bias", self.normal_bias),
            ("settle epsilon", self.settle_epsilon),
            ("min surface distance fraction", self.min_surface_distance_fraction),
            ("recenter hysteresis", self.recenter_hysteresis),
            ("max detection range", self.max_detection_range),
        ];
        for (name, value) in non_negative_fields {
            if !non_negative(value) {
                return Err(HelioError::invalid_config(format!(
                    "{} must be finite and not negative, got {}",
                    name, value
                )));
            }
        }
        if !self.sky_radiance.is_finite() || self.sky_radiance.min_element() < 0.0 {
            return Err(HelioError::invalid_config(format!(
                "sky radiance {} must be finite and not negative",
                self.sky_radiance
            )));
        }
        Ok(())
    }

    pub fn cascade_spacing(&self, cascade: usize) -> Vec3 {
        self.base_spacing * self.cascade_spacing_factor.powi(cascade as i32)
    }

    /// Blend weight kept from the previous irradiance value.
    pub fn irradiance_hysteresis(&self) -> f32 {
        hysteresis_for_response(self.irradiance_response_updates)
    }

    pub fn distance_hysteresis(&self) -> f32 {
        hysteresis_for_response(self.distance_response_updates)
    }

    /// Cosine power whose lobe halves at `distance_lobe_half_angle_deg`.
    pub fn distance_sharpness(&self) -> f32 {
        let cos_half = self.distance_lobe_half_angle_deg.to_radians().cos();
        0.5f32.ln() / cos_half.ln()
    }
}

/// `exp(-1/n)`: an exponential moving average with time constant `n` updates.
pub fn hysteresis_for_response(updates: f32) -> f32 {
    if updates <= 0.0 {
        0.0
    } else {
        (-1.0 / updates).exp()
    }
}
