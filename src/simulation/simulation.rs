use log::{debug, info};

use crate::error::{SmokeError, SmokeResult};
use crate::fields::{Field, FieldSet};
use crate::graphics::{GraphicsBackend, Texel, UniformValue};
use crate::input_mapper::{InputMapper, Splat};
use crate::shader_programs::{
    Programs, U_ASPECT_RATIO, U_COLOR, U_CURL_STRENGTH, U_CURL_TEXTURE, U_DISSIPATION, U_DIVERGENCE, U_DT,
    U_POINT, U_PRESSURE, U_RADIUS, U_SCALE, U_SOURCE, U_TARGET, U_TEXEL_SIZE, U_TEXTURE, U_VALUE, U_VELOCITY,
};
use crate::simulation_parameters::{SimulationConfig, VisualizationParams, VisualizedField};
use crate::surface::Surface;
use crate::V3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Stepping,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    // clamped time step in seconds
    pub dt: f32,
    pub splats: usize,
    pub frame: u64,
}

/// The simulation and all GPU resources it owns. There is exactly one per drawing surface;
/// hosts call `step` once per display refresh and `dispose` on teardown.
pub struct SimulationSession<B: GraphicsBackend> {
    surface: Surface<B>,
    config: SimulationConfig,
    visualization: VisualizationParams,
    state: SessionState,
    programs: Option<Programs<B::Program>>,
    fields: Option<FieldSet>,
    input: InputMapper,
    last_time: Option<f64>,
    frame: u64,
}

/// Disjoint borrows of a live session for one pass.
struct Pass<'a, B: GraphicsBackend> {
    surface: &'a mut Surface<B>,
    programs: &'a Programs<B::Program>,
    fields: &'a mut FieldSet,
    config: &'a SimulationConfig,
}

impl<B: GraphicsBackend> SimulationSession<B> {
    pub fn new(surface: Surface<B>, config: SimulationConfig) -> SmokeResult<Self> {
        let input = InputMapper::new(&config);
        Self::with_input(surface, config, input)
    }

    /// Like `new` with a caller-provided input mapper (e.g. with a seeded RNG).
    pub fn with_input(surface: Surface<B>, config: SimulationConfig, input: InputMapper) -> SmokeResult<Self> {
        config.validate()?;
        Ok(Self {
            surface,
            config,
            visualization: VisualizationParams::default(),
            state: SessionState::Uninitialized,
            programs: None,
            fields: None,
            input,
            last_time: None,
            frame: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn fields(&self) -> Option<&FieldSet> {
        self.fields.as_ref()
    }

    pub fn surface(&self) -> &Surface<B> {
        &self.surface
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn set_visualization(&mut self, visualization: VisualizationParams) {
        self.visualization = visualization;
    }

    /// Compiles all programs and allocates the fields for the current drawable size.
    pub fn initialize(&mut self) -> SmokeResult<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Disposed => return Err(SmokeError::Disposed),
            state => {
                return Err(SmokeError::InvalidState {
                    operation: "initialize",
                    state,
                })
            }
        }

        let programs = self.surface.compile_all()?;
        let (width, height) = self.surface.drawable_size();
        let (field_width, field_height) = self.config.field_resolution(width, height);
        let fields = match self.surface.allocate_fields(field_width, field_height) {
            Ok(fields) => fields,
            Err(e) => {
                self.surface.release_programs(programs);
                return Err(e);
            }
        };

        self.programs = Some(programs);
        self.fields = Some(fields);
        self.state = SessionState::Ready;
        info!(
            "simulation initialized: drawable {}x{}, fields {}x{}",
            width, height, field_width, field_height
        );
        Ok(())
    }

    /// Adopts a new drawable size. Any change rebuilds every field; previous field handles
    /// become stale. On failure both the drawable and the fields keep their previous size.
    pub fn resize(&mut self, width: u32, height: u32) -> SmokeResult<()> {
        if self.state == SessionState::Disposed {
            return Err(SmokeError::Disposed);
        }
        if self.surface.drawable_size() == (width, height) {
            return Ok(());
        }

        if let Some(old_fields) = self.fields.take() {
            let (field_width, field_height) = self.config.field_resolution(width, height);
            let new_fields = match self.surface.allocate_fields(field_width, field_height) {
                Ok(fields) => fields,
                Err(e) => {
                    self.fields = Some(old_fields);
                    return Err(e);
                }
            };
            self.surface.resize_drawable(width, height);
            self.fields = Some(new_fields);
            self.surface.release_fields(old_fields)?;
        } else {
            self.surface.resize_drawable(width, height);
        }

        info!("drawable resized to {}x{}", width, height);
        Ok(())
    }

    /// Pointer position in drawable pixels, `y` pointing down. Ignored until initialized.
    pub fn on_pointer_move(&mut self, id: i32, x: f32, y: f32) {
        if self.is_live() {
            self.input.on_pointer_move(id, x, y);
        }
    }

    pub fn on_pointer_release(&mut self, id: i32) {
        self.input.on_pointer_release(id);
    }

    /// Queues an impulse for the next step, bypassing the pointer palette.
    pub fn splat_at(&mut self, x: f32, y: f32, dx: f32, dy: f32, color: V3) {
        if self.is_live() {
            self.input.queue_splat(Splat { x, y, dx, dy, color });
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::Stepping)
    }

    fn pass(&mut self, operation: &'static str) -> SmokeResult<Pass<'_, B>> {
        match self.state {
            SessionState::Disposed => return Err(SmokeError::Disposed),
            SessionState::Uninitialized => {
                return Err(SmokeError::InvalidState {
                    operation,
                    state: self.state,
                })
            }
            SessionState::Ready | SessionState::Stepping => {}
        }

        match (self.programs.as_ref(), self.fields.as_mut()) {
            (Some(programs), Some(fields)) => Ok(Pass {
                surface: &mut self.surface,
                programs,
                fields,
                config: &self.config,
            }),
            _ => Err(SmokeError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    /// Clamped time step for a frame starting at `now_seconds`. The first frame uses `max_dt`.
    fn frame_dt(&mut self, now_seconds: f64) -> f32 {
        let dt = match self.last_time {
            Some(last) => ((now_seconds - last) as f32).max(0.).min(self.config.max_dt),
            None => self.config.max_dt,
        };
        self.last_time = Some(now_seconds);
        dt
    }

    /// Runs one full frame of the pipeline and presents the result.
    pub fn step(&mut self, now_seconds: f64) -> SmokeResult<StepReport> {
        match self.state {
            SessionState::Disposed => return Err(SmokeError::Disposed),
            SessionState::Uninitialized => {
                return Err(SmokeError::InvalidState {
                    operation: "step",
                    state: self.state,
                })
            }
            SessionState::Ready => self.state = SessionState::Stepping,
            SessionState::Stepping => {}
        }

        let dt = self.frame_dt(now_seconds);
        let iterations = self.config.pressure_iterations;

        self.advect_velocity(dt)?;
        self.advect_density(dt)?;
        let splats = self.apply_splats()?;
        self.compute_curl()?;
        self.confine_vorticity(dt)?;
        self.compute_divergence()?;
        self.clear_pressure(dt)?;
        self.relax_pressure(iterations)?;
        self.subtract_gradient()?;
        self.present()?;

        self.frame += 1;
        debug!("frame {}: dt {:.4}s, {} splats", self.frame, dt, splats);

        Ok(StepReport {
            dt,
            splats,
            frame: self.frame,
        })
    }

    pub fn advect_velocity(&mut self, dt: f32) -> SmokeResult<()> {
        let pass = self.pass("advect_velocity")?;
        let velocity = pass.fields.velocity.read().texture;
        let dissipation = pass.config.dissipation_factor(pass.config.velocity_dissipation, dt);

        let mut binding = pass.programs.advection.bind();
        binding
            .set_uniform(U_TEXEL_SIZE, UniformValue::Vec2(pass.fields.velocity.read().texel_size()))?
            .set_uniform(U_VELOCITY, UniformValue::Sampler(velocity))?
            .set_uniform(U_SOURCE, UniformValue::Sampler(velocity))?
            .set_uniform(U_DT, UniformValue::Float(dt))?
            .set_uniform(U_DISSIPATION, UniformValue::Float(dissipation))?;
        pass.surface.blit(&binding, Some(pass.fields.velocity.write()))?;
        pass.fields.velocity.swap();
        Ok(())
    }

    pub fn advect_density(&mut self, dt: f32) -> SmokeResult<()> {
        let pass = self.pass("advect_density")?;
        let dissipation = pass.config.dissipation_factor(pass.config.density_dissipation, dt);

        let mut binding = pass.programs.advection.bind();
        binding
            .set_uniform(U_TEXEL_SIZE, UniformValue::Vec2(pass.fields.velocity.read().texel_size()))?
            .set_uniform(U_VELOCITY, UniformValue::Sampler(pass.fields.velocity.read().texture))?
            .set_uniform(U_SOURCE, UniformValue::Sampler(pass.fields.density.read().texture))?
            .set_uniform(U_DT, UniformValue::Float(dt))?
            .set_uniform(U_DISSIPATION, UniformValue::Float(dissipation))?;
        pass.surface.blit(&binding, Some(pass.fields.density.write()))?;
        pass.fields.density.swap();
        Ok(())
    }

    /// Injects every pending splat. Returns how many were applied; with none pending,
    /// no pass runs and no buffer is swapped.
    pub fn apply_splats(&mut self) -> SmokeResult<usize> {
        // checked before draining the input so a failing call keeps the splats queued
        self.pass("apply_splats")?;
        if !self.input.has_pending() {
            return Ok(0);
        }

        let splats = self.input.take_splats();
        for splat in &splats {
            self.apply_splat(splat)?;
        }
        Ok(splats.len())
    }

    fn apply_splat(&mut self, splat: &Splat) -> SmokeResult<()> {
        let pass = self.pass("apply_splats")?;
        let (width, height) = pass.surface.drawable_size();
        let (width, height) = (width.max(1) as f32, height.max(1) as f32);
        let point = [splat.x / width, 1. - splat.y / height];
        let aspect_ratio = width / height;
        let radius = pass.config.splat_radius;

        let mut binding = pass.programs.splat.bind();
        binding
            .set_uniform(U_TARGET, UniformValue::Sampler(pass.fields.velocity.read().texture))?
            .set_uniform(U_ASPECT_RATIO, UniformValue::Float(aspect_ratio))?
            .set_uniform(U_POINT, UniformValue::Vec2(point))?
            .set_uniform(U_COLOR, UniformValue::Vec3([splat.dx, -splat.dy, 1.]))?
            .set_uniform(U_RADIUS, UniformValue::Float(radius))?;
        pass.surface.blit(&binding, Some(pass.fields.velocity.write()))?;
        pass.fields.velocity.swap();

        binding
            .set_uniform(U_TARGET, UniformValue::Sampler(pass.fields.density.read().texture))?
            .set_uniform(U_COLOR, UniformValue::Vec3(splat.color.into()))?;
        pass.surface.blit(&binding, Some(pass.fields.density.write()))?;
        pass.fields.density.swap();
        Ok(())
    }

    pub fn compute_curl(&mut self) -> SmokeResult<()> {
        let pass = self.pass("compute_curl")?;
        let mut binding = pass.programs.curl.bind();
        binding
            .set_uniform(U_TEXEL_SIZE, UniformValue::Vec2(pass.fields.velocity.read().texel_size()))?
            .set_uniform(U_VELOCITY, UniformValue::Sampler(pass.fields.velocity.read().texture))?;
        pass.surface.blit(&binding, Some(&pass.fields.curl))
    }

    pub fn confine_vorticity(&mut self, dt: f32) -> SmokeResult<()> {
        let pass = self.pass("confine_vorticity")?;
        let mut binding = pass.programs.vorticity.bind();
        binding
            .set_uniform(U_TEXEL_SIZE, UniformValue::Vec2(pass.fields.velocity.read().texel_size()))?
            .set_uniform(U_VELOCITY, UniformValue::Sampler(pass.fields.velocity.read().texture))?
            .set_uniform(U_CURL_TEXTURE, UniformValue::Sampler(pass.fields.curl.texture))?
            .set_uniform(U_CURL_STRENGTH, UniformValue::Float(pass.config.curl_strength))?
            .set_uniform(U_DT, UniformValue::Float(dt))?;
        pass.surface.blit(&binding, Some(pass.fields.velocity.write()))?;
        pass.fields.velocity.swap();
        Ok(())
    }

    pub fn compute_divergence(&mut self) -> SmokeResult<()> {
        let pass = self.pass("compute_divergence")?;
        let mut binding = pass.programs.divergence.bind();
        binding
            .set_uniform(U_TEXEL_SIZE, UniformValue::Vec2(pass.fields.velocity.read().texel_size()))?
            .set_uniform(U_VELOCITY, UniformValue::Sampler(pass.fields.velocity.read().texture))?;
        pass.surface.blit(&binding, Some(&pass.fields.divergence))
    }

    /// Decays the previous pressure, which warm-starts the Jacobi solve.
    pub fn clear_pressure(&mut self, dt: f32) -> SmokeResult<()> {
        let pass = self.pass("clear_pressure")?;
        let value = pass.config.dissipation_factor(pass.config.pressure_dissipation, dt);

        let mut binding = pass.programs.clear.bind();
        binding
            .set_uniform(U_TEXTURE, UniformValue::Sampler(pass.fields.pressure.read().texture))?
            .set_uniform(U_VALUE, UniformValue::Float(value))?;
        pass.surface.blit(&binding, Some(pass.fields.pressure.write()))?;
        pass.fields.pressure.swap();
        Ok(())
    }

    /// Fixed number of Jacobi iterations; there is no convergence check.
    pub fn relax_pressure(&mut self, iterations: usize) -> SmokeResult<()> {
        let pass = self.pass("relax_pressure")?;
        let texel_size = pass.fields.pressure.read().texel_size();
        let divergence = pass.fields.divergence.texture;

        for _ in 0..iterations {
            let mut binding = pass.programs.pressure.bind();
            binding
                .set_uniform(U_TEXEL_SIZE, UniformValue::Vec2(texel_size))?
                .set_uniform(U_DIVERGENCE, UniformValue::Sampler(divergence))?
                .set_uniform(U_PRESSURE, UniformValue::Sampler(pass.fields.pressure.read().texture))?;
            pass.surface.blit(&binding, Some(pass.fields.pressure.write()))?;
            pass.fields.pressure.swap();
        }
        Ok(())
    }

    pub fn subtract_gradient(&mut self) -> SmokeResult<()> {
        let pass = self.pass("subtract_gradient")?;
        let mut binding = pass.programs.gradient_subtract.bind();
        binding
            .set_uniform(U_TEXEL_SIZE, UniformValue::Vec2(pass.fields.velocity.read().texel_size()))?
            .set_uniform(U_PRESSURE, UniformValue::Sampler(pass.fields.pressure.read().texture))?
            .set_uniform(U_VELOCITY, UniformValue::Sampler(pass.fields.velocity.read().texture))?;
        pass.surface.blit(&binding, Some(pass.fields.velocity.write()))?;
        pass.fields.velocity.swap();
        Ok(())
    }

    /// Draws the density, or the selected debug field, to the visible surface.
    pub fn present(&mut self) -> SmokeResult<()> {
        let visualization = self.visualization;
        let pass = self.pass("present")?;

        let source = match visualization.visualized_field {
            VisualizedField::Density => pass.fields.density.read(),
            VisualizedField::Velocity => pass.fields.velocity.read(),
            VisualizedField::Pressure => pass.fields.pressure.read(),
            VisualizedField::Divergence => &pass.fields.divergence,
            VisualizedField::Curl => &pass.fields.curl,
        }
        .texture;

        let mut binding = match visualization.visualized_field {
            VisualizedField::Density => pass.programs.display.bind(),
            _ => {
                let mut binding = pass.programs.visualize.bind();
                binding.set_uniform(U_SCALE, UniformValue::Float(visualization.display_scale))?;
                binding
            }
        };
        binding.set_uniform(U_TEXTURE, UniformValue::Sampler(source))?;
        pass.surface.blit(&binding, None)
    }

    pub fn read_field(&mut self, field: &Field) -> SmokeResult<Vec<Texel>> {
        self.surface.read_field(field)
    }

    pub fn write_field(&mut self, field: &Field, texels: &[Texel]) -> SmokeResult<()> {
        self.surface.write_field(field, texels)
    }

    /// Releases all GPU resources. Calling it again is a no-op.
    pub fn dispose(&mut self) -> SmokeResult<()> {
        if self.state == SessionState::Disposed {
            return Ok(());
        }
        self.state = SessionState::Disposed;

        if let Some(programs) = self.programs.take() {
            self.surface.release_programs(programs);
        }
        if let Some(fields) = self.fields.take() {
            self.surface.release_fields(fields)?;
        }
        info!("simulation disposed after {} frames", self.frame);
        Ok(())
    }
}

impl<B: GraphicsBackend> Drop for SimulationSession<B> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::error!("failed releasing simulation resources: {}", e);
        }
    }
}

pub fn is_approx_eq(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() <= tolerance
}

pub fn assert_approx_eq(a: f32, b: f32, tolerance: f32, s: impl FnOnce() -> String) {
    assert!(
        is_approx_eq(a, b, tolerance),
        "{}: {} != {} (tolerance {})",
        s(),
        a,
        b,
        tolerance
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::{GraphicsApi, GraphicsCapabilities, TexelPrecision};
    use crate::input_mapper::MOUSE_POINTER_ID;
    use crate::software_backend::SoftwareBackend;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn session_with(width: u32, height: u32, config: SimulationConfig) -> SimulationSession<SoftwareBackend> {
        let surface = Surface::acquire(SoftwareBackend::new(width, height)).unwrap();
        let input = InputMapper::with_rng(&config, SmallRng::seed_from_u64(42));
        SimulationSession::with_input(surface, config, input).unwrap()
    }

    fn ready_session(width: u32, height: u32) -> SimulationSession<SoftwareBackend> {
        let mut session = session_with(width, height, SimulationConfig::default());
        session.initialize().unwrap();
        session
    }

    fn current_fields(session: &SimulationSession<SoftwareBackend>) -> FieldSet {
        session.fields().unwrap().clone()
    }

    /// Texel with a smooth nonzero pattern, used to detect accidental writes.
    fn pattern(index: usize) -> Texel {
        let v = (index as f32 * 0.37).sin();
        Texel::new(v, -v * 0.5, v * 0.25, 1.)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let surface = Surface::acquire(SoftwareBackend::new(8, 8)).unwrap();
        let config = SimulationConfig {
            density_dissipation: 1.5,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            SimulationSession::new(surface, config),
            Err(SmokeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn step_requires_initialization() {
        let mut session = session_with(8, 8, SimulationConfig::default());
        assert_eq!(session.state(), SessionState::Uninitialized);
        match session.step(0.) {
            Err(SmokeError::InvalidState { operation, state }) => {
                assert_eq!(operation, "step");
                assert_eq!(state, SessionState::Uninitialized);
            }
            other => panic!("expected InvalidState, got {:?}", other),
        }
        assert!(matches!(session.compute_curl(), Err(SmokeError::InvalidState { .. })));

        session.initialize().unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(matches!(session.initialize(), Err(SmokeError::InvalidState { .. })));

        session.step(0.).unwrap();
        assert_eq!(session.state(), SessionState::Stepping);
    }

    #[test]
    fn dispose_releases_everything() {
        let mut session = ready_session(16, 16);
        session.step(0.).unwrap();
        assert_eq!(session.surface().backend().live_texture_count(), 8);

        session.dispose().unwrap();
        assert_eq!(session.state(), SessionState::Disposed);
        assert_eq!(session.surface().backend().live_texture_count(), 0);

        assert!(matches!(session.step(1.), Err(SmokeError::Disposed)));
        assert!(matches!(session.resize(4, 4), Err(SmokeError::Disposed)));
        session.dispose().unwrap();
    }

    #[test]
    fn dt_is_clamped() {
        let mut session = ready_session(8, 8);
        let max_dt = session.config().max_dt;

        assert_eq!(session.step(1.0).unwrap().dt, max_dt);
        assert_eq!(session.step(2.0).unwrap().dt, max_dt);
        assert_approx_eq(session.step(2.004).unwrap().dt, 0.004, 1e-6, || String::from("short frame"));
        assert_eq!(session.step(1.0).unwrap().dt, 0.);

        let report = session.step(1.5).unwrap();
        assert_eq!(report.dt, max_dt);
        assert_eq!(report.frame, 5);
    }

    #[test]
    fn no_op_splat_changes_nothing() {
        let mut session = ready_session(16, 12);
        let before = current_fields(&session);

        for field in [before.velocity.read(), before.density.read()] {
            let texels: Vec<Texel> = (0..field.texel_count()).map(pattern).collect();
            session.write_field(field, &texels).unwrap();
        }
        let velocity = session.read_field(before.velocity.read()).unwrap();
        let density = session.read_field(before.density.read()).unwrap();

        assert_eq!(session.apply_splats().unwrap(), 0);

        let after = current_fields(&session);
        assert_eq!(after, before);
        assert_eq!(session.read_field(after.velocity.read()).unwrap(), velocity);
        assert_eq!(session.read_field(after.density.read()).unwrap(), density);
    }

    #[test]
    fn zero_velocity_has_zero_divergence_and_curl() {
        let mut session = ready_session(20, 14);
        session.compute_curl().unwrap();
        session.compute_divergence().unwrap();

        let fields = current_fields(&session);
        let curl = session.read_field(&fields.curl).unwrap();
        let divergence = session.read_field(&fields.divergence).unwrap();
        assert_eq!(curl.len(), 70);
        assert!(curl.iter().all(|t| t.x == 0.));
        assert!(divergence.iter().all(|t| t.x == 0.));
    }

    #[test]
    fn zero_iterations_only_decay_pressure() {
        let config = SimulationConfig {
            pressure_iterations: 0,
            ..SimulationConfig::default()
        };
        let mut session = session_with(16, 16, config);
        session.initialize().unwrap();

        let fields = current_fields(&session);
        let previous: Vec<Texel> = (0..fields.pressure.read().texel_count()).map(pattern).collect();
        session.write_field(fields.pressure.read(), &previous).unwrap();

        session.clear_pressure(config.max_dt).unwrap();
        session.relax_pressure(0).unwrap();

        let fields = current_fields(&session);
        let pressure = session.read_field(fields.pressure.read()).unwrap();
        for (i, (p, old)) in pressure.iter().zip(&previous).enumerate() {
            assert_approx_eq(p.x, old.x * 0.8, 1e-6, || format!("texel {}", i));
        }
    }

    /// Max-norm of `L + R + T + B - 4p - div` with clamp-to-edge neighbors.
    fn jacobi_residual(pressure: &[Texel], divergence: &[Texel], width: usize, height: usize) -> f64 {
        let p = |i: isize, j: isize| {
            let i = i.clamp(0, width as isize - 1) as usize;
            let j = j.clamp(0, height as isize - 1) as usize;
            pressure[j * width + i].x as f64
        };

        let mut residual: f64 = 0.;
        for j in 0..height as isize {
            for i in 0..width as isize {
                let div = divergence[j as usize * width + i as usize].x as f64;
                let r = p(i - 1, j) + p(i + 1, j) + p(i, j - 1) + p(i, j + 1) - 4. * p(i, j) - div;
                residual = residual.max(r.abs());
            }
        }
        residual
    }

    #[test]
    fn jacobi_residual_does_not_increase() {
        let mut session = ready_session(32, 32);
        let fields = current_fields(&session);
        let (width, height) = (fields.width as usize, fields.height as usize);
        assert_eq!((width, height), (16, 16));

        let mut divergence = vec![Texel::new(0., 0., 0., 1.); width * height];
        divergence[8 * width + 8].x = 1.;
        session.write_field(&fields.divergence, &divergence).unwrap();

        let initial = jacobi_residual(
            &session.read_field(fields.pressure.read()).unwrap(),
            &divergence,
            width,
            height,
        );
        assert_eq!(initial, 1.);

        let mut residuals = vec![initial];
        for _ in 0..200 {
            session.relax_pressure(1).unwrap();
            let fields = current_fields(&session);
            let pressure = session.read_field(fields.pressure.read()).unwrap();
            residuals.push(jacobi_residual(&pressure, &divergence, width, height));
        }

        for (k, pair) in residuals.windows(2).enumerate() {
            assert!(
                pair[1] <= pair[0] + 1e-5,
                "residual grew at iteration {}: {} -> {}",
                k,
                pair[0],
                pair[1]
            );
        }
        let last = residuals[residuals.len() - 1];
        println!("residual after 200 iterations: {}", last);
        assert!(last < 0.1);
    }

    #[test]
    fn resize_rebuilds_fields() {
        let mut session = ready_session(32, 16);
        let old = current_fields(&session);
        assert_eq!((old.width, old.height), (16, 8));

        // same size keeps the fields
        session.resize(32, 16).unwrap();
        assert_eq!(current_fields(&session), old);

        session.resize(64, 34).unwrap();
        let new = current_fields(&session);
        assert_eq!((new.width, new.height), (32, 17));
        for field in new.all_fields() {
            assert_eq!((field.width, field.height), (32, 17));
            assert!(old.all_fields().iter().all(|f| f.texture != field.texture));
        }

        let stale = old.density.read();
        assert!(matches!(
            session.read_field(stale),
            Err(SmokeError::StaleTexture(t)) if t == stale.texture
        ));
        assert_eq!(session.surface().backend().live_texture_count(), 8);

        session.on_pointer_move(MOUSE_POINTER_ID, 10., 10.);
        session.on_pointer_move(MOUSE_POINTER_ID, 12., 11.);
        assert_eq!(session.step(0.).unwrap().splats, 1);
    }

    #[test]
    fn failed_resize_keeps_previous_size() {
        let capabilities = GraphicsCapabilities {
            api: GraphicsApi::Software,
            precision: TexelPrecision::Full,
            linear_filtering: true,
            max_texture_size: 32,
        };
        let surface = Surface::acquire(SoftwareBackend::with_capabilities(32, 32, capabilities)).unwrap();
        let config = SimulationConfig::default();
        let input = InputMapper::with_rng(&config, SmallRng::seed_from_u64(7));
        let mut session = SimulationSession::with_input(surface, config, input).unwrap();
        session.initialize().unwrap();
        let old = current_fields(&session);

        // 64x64 fields exceed the texture limit
        for _ in 0..2 {
            assert!(matches!(
                session.resize(128, 128),
                Err(SmokeError::Allocation { width: 64, height: 64, .. })
            ));
            assert_eq!(session.surface().drawable_size(), (32, 32));
            assert_eq!(current_fields(&session), old);
        }
        assert_eq!(session.surface().backend().live_texture_count(), 8);

        session.resize(64, 64).unwrap();
        let new = current_fields(&session);
        assert_eq!((new.width, new.height), config.field_resolution(64, 64));
        assert_eq!(session.surface().drawable_size(), (64, 64));
        session.step(0.).unwrap();
    }

    #[test]
    fn long_frame_advects_with_max_dt() {
        let config = SimulationConfig {
            density_dissipation: 1.,
            velocity_dissipation: 1.,
            curl_strength: 0.,
            pressure_iterations: 0,
            ..SimulationConfig::default()
        };
        let mut session = session_with(32, 16, config);
        session.initialize().unwrap();
        session.step(0.).unwrap();

        let fields = current_fields(&session);
        let (width, height) = (fields.width as usize, fields.height as usize);
        assert_eq!((width, height), (16, 8));

        // one texel to the right per max_dt
        let speed = 1. / config.max_dt;
        let velocity = vec![Texel::new(speed, 0., 0., 1.); width * height];
        session.write_field(fields.velocity.read(), &velocity).unwrap();
        let ramp: Vec<Texel> = (0..width * height)
            .map(|i| Texel::new((i % width) as f32, 0., 0., 1.))
            .collect();
        session.write_field(fields.density.read(), &ramp).unwrap();

        // ten seconds since the previous frame
        let report = session.step(10.).unwrap();
        assert_eq!(report.dt, config.max_dt);

        let fields = current_fields(&session);
        let density = session.read_field(fields.density.read()).unwrap();
        for j in 0..height {
            for i in 0..width {
                let expected = (i as f32 - 1.).max(0.);
                assert_approx_eq(density[j * width + i].x, expected, 1e-3, || {
                    format!("density at ({}, {})", i, j)
                });
            }
        }
    }

    #[test]
    fn centered_splat_produces_gaussian_bump() {
        let mut session = ready_session(66, 66);
        session.splat_at(33., 33., 50., 0., V3::new(1., 1., 1.));
        let report = session.step(0.).unwrap();
        assert_eq!(report.splats, 1);

        let fields = current_fields(&session);
        let (width, height) = (fields.width as usize, fields.height as usize);
        assert_eq!((width, height), (33, 33));

        let density = session.read_field(fields.density.read()).unwrap();
        let at = |i: usize, j: usize| density[j * width + i];

        let center = at(16, 16);
        assert_approx_eq(center.x, 1., 1e-4, || String::from("peak"));
        assert_approx_eq(center.z, 1., 1e-4, || String::from("peak"));
        // strictly decreasing near the peak, the tails underflow to zero
        for i in 16..width - 1 {
            let (inner, outer) = (at(i, 16).x, at(i + 1, 16).x);
            assert!(outer <= inner, "no falloff at column {}", i + 1);
            assert!(i > 20 || outer < inner, "no falloff at column {}", i + 1);
            assert_approx_eq(at(32 - i, 16).x, inner, 1e-5, || format!("asymmetric at column {}", 32 - i));
        }
        assert!(at(0, 0).x < 1e-6);
        assert!(at(width - 1, height - 1).x < 1e-6);

        // the impulse points to +x
        let velocity = session.read_field(fields.velocity.read()).unwrap();
        assert!(velocity[16 * width + 16].x > 0.);

        // presented density is visible in the middle of the surface
        let surface = session.surface().backend().surface_texels();
        assert!(surface[33 * 66 + 33].x > 0.5);
    }

    #[test]
    fn input_before_initialization_is_ignored() {
        let mut session = session_with(16, 16, SimulationConfig::default());
        session.on_pointer_move(MOUSE_POINTER_ID, 1., 1.);
        session.on_pointer_move(MOUSE_POINTER_ID, 5., 5.);
        session.splat_at(8., 8., 1., 1., V3::new(1., 0., 0.));

        session.initialize().unwrap();
        assert_eq!(session.step(0.).unwrap().splats, 0);

        // first sample after initialization only primes the pointer
        session.on_pointer_move(MOUSE_POINTER_ID, 5., 5.);
        assert_eq!(session.step(0.01).unwrap().splats, 0);
        session.on_pointer_move(MOUSE_POINTER_ID, 6., 5.);
        assert_eq!(session.step(0.02).unwrap().splats, 1);
    }

    #[test]
    fn debug_views_present_selected_field() {
        let mut session = ready_session(8, 8);
        session.set_visualization(VisualizationParams {
            visualized_field: VisualizedField::Pressure,
            display_scale: 1.,
        });

        let fields = current_fields(&session);
        let ones = vec![Texel::new(-2., 0., 0., 1.); fields.pressure.read().texel_count()];
        session.write_field(fields.pressure.read(), &ones).unwrap();
        session.present().unwrap();

        for texel in session.surface().backend().surface_texels() {
            assert_approx_eq(texel.x, 2., 1e-6, || String::from("abs of pressure"));
            assert_eq!(texel.w, 1.);
        }
    }
}
