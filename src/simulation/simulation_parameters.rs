use serde::{Deserialize, Serialize};

use crate::error::{SmokeError, SmokeResult};

/// Upper bound for the Jacobi iteration count. Beyond this the per-frame cost
/// stops being interactive on the software backend.
pub const MAX_PRESSURE_ITERATIONS: usize = 500;

/// Largest accepted downsample shift (fields are at least 1/256 of the drawable).
pub const MAX_DOWNSAMPLE_SHIFT: u32 = 8;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DissipationMode {
    /// Multiply by the dissipation factor once per step. Visual decay depends on the frame rate.
    PerStep,

    /// Scale the factor by `dt / max_dt`, i.e. `d^(dt / max_dt)`. A step of `max_dt` decays
    /// exactly like `PerStep`.
    TimeNormalized,
}

impl Default for DissipationMode {
    fn default() -> Self {
        DissipationMode::PerStep
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    // fields have the drawable's size right-shifted by this value
    pub downsample_shift: u32,

    pub density_dissipation: f32,
    pub velocity_dissipation: f32,
    pub pressure_dissipation: f32,

    pub pressure_iterations: usize,

    // strength of the vorticity confinement force
    pub curl_strength: f32,

    // gaussian variance of a splat in normalized field coordinates
    pub splat_radius: f32,

    // given in seconds
    #[serde(default = "SimulationConfig::default_max_dt")]
    pub max_dt: f32,

    // gain applied to the pointer displacement in pixels
    #[serde(default = "SimulationConfig::default_splat_force")]
    pub splat_force: f32,

    #[serde(default = "SimulationConfig::default_splat_color_intensity")]
    pub splat_color_intensity: f32,

    #[serde(default = "SimulationConfig::default_color_cycle_moves")]
    pub color_cycle_moves: u32,

    #[serde(default)]
    pub dissipation_mode: DissipationMode,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            downsample_shift: 1,
            density_dissipation: 0.98,
            velocity_dissipation: 0.99,
            pressure_dissipation: 0.8,
            pressure_iterations: 25,
            curl_strength: 35.,
            splat_radius: 0.002,
            max_dt: Self::default_max_dt(),
            splat_force: Self::default_splat_force(),
            splat_color_intensity: Self::default_splat_color_intensity(),
            color_cycle_moves: Self::default_color_cycle_moves(),
            dissipation_mode: DissipationMode::PerStep,
        }
    }
}

impl SimulationConfig {
    fn default_max_dt() -> f32 {
        0.016
    }

    fn default_splat_force() -> f32 {
        10.
    }

    fn default_splat_color_intensity() -> f32 {
        0.3
    }

    fn default_color_cycle_moves() -> u32 {
        25
    }

    pub fn from_yaml(yaml: &str) -> SmokeResult<Self> {
        let config: SimulationConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that make the explicit scheme blow up (growing dissipation factors,
    /// unbounded time steps) or that cannot be allocated.
    pub fn validate(&self) -> SmokeResult<()> {
        fn check(ok: bool, msg: impl FnOnce() -> String) -> SmokeResult<()> {
            if ok {
                Ok(())
            } else {
                Err(SmokeError::InvalidConfig(msg()))
            }
        }

        for (name, value) in [
            ("density_dissipation", self.density_dissipation),
            ("velocity_dissipation", self.velocity_dissipation),
            ("pressure_dissipation", self.pressure_dissipation),
        ] {
            check((0f32..=1.).contains(&value), || {
                format!("{} must be within [0, 1], got {}", name, value)
            })?;
        }

        check(self.downsample_shift <= MAX_DOWNSAMPLE_SHIFT, || {
            format!(
                "downsample_shift must be at most {}, got {}",
                MAX_DOWNSAMPLE_SHIFT, self.downsample_shift
            )
        })?;
        check(self.pressure_iterations <= MAX_PRESSURE_ITERATIONS, || {
            format!(
                "pressure_iterations must be at most {}, got {}",
                MAX_PRESSURE_ITERATIONS, self.pressure_iterations
            )
        })?;
        check(self.curl_strength.is_finite() && self.curl_strength >= 0., || {
            format!("curl_strength must be finite and non-negative, got {}", self.curl_strength)
        })?;
        check(self.splat_radius.is_finite() && self.splat_radius > 0., || {
            format!("splat_radius must be positive, got {}", self.splat_radius)
        })?;
        check(self.max_dt > 0. && self.max_dt <= 0.1, || {
            format!("max_dt must be within (0, 0.1] seconds, got {}", self.max_dt)
        })?;
        check(self.splat_force.is_finite(), || {
            format!("splat_force must be finite, got {}", self.splat_force)
        })?;
        check(self.splat_color_intensity.is_finite() && self.splat_color_intensity >= 0., || {
            format!(
                "splat_color_intensity must be non-negative, got {}",
                self.splat_color_intensity
            )
        })?;
        check(self.color_cycle_moves >= 1, || String::from("color_cycle_moves must be at least 1"))?;

        Ok(())
    }

    /// Effective per-pass multiplier for a dissipation rate given the clamped step `dt`.
    pub fn dissipation_factor(&self, rate: f32, dt: f32) -> f32 {
        match self.dissipation_mode {
            DissipationMode::PerStep => rate,
            DissipationMode::TimeNormalized => rate.powf(dt / self.max_dt),
        }
    }

    /// Field resolution for a drawable of the given pixel size.
    pub fn field_resolution(&self, drawable_width: u32, drawable_height: u32) -> (u32, u32) {
        (
            u32::max(drawable_width >> self.downsample_shift, 1),
            u32::max(drawable_height >> self.downsample_shift, 1),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualizedField {
    Density,
    Velocity,
    Pressure,
    Divergence,
    Curl,
}

pub const ALL_VISUALIZED_FIELDS: [(VisualizedField, &str); 5] = [
    (VisualizedField::Density, "Density"),
    (VisualizedField::Velocity, "Velocity"),
    (VisualizedField::Pressure, "Pressure"),
    (VisualizedField::Divergence, "Divergence"),
    (VisualizedField::Curl, "Curl"),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualizationParams {
    pub visualized_field: VisualizedField,
    // only used for debug views of the non-density fields
    #[serde(default = "VisualizationParams::default_display_scale")]
    pub display_scale: f32,
}

impl VisualizationParams {
    fn default_display_scale() -> f32 {
        0.05
    }
}

impl Default for VisualizationParams {
    fn default() -> Self {
        Self {
            visualized_field: VisualizedField::Density,
            display_scale: Self::default_display_scale(),
        }
    }
}
