use log::{info, warn};

use crate::error::{SmokeError, SmokeResult};
use crate::fields::{DoubleBuffer, Field, FieldKind, FieldSet};
use crate::graphics::{GraphicsApi, GraphicsBackend, GraphicsCapabilities, Texel};
use crate::shader_programs::{ProgramBinding, ProgramRole, Programs, ShaderProgram};

/// Owns the graphics context. Everything that touches GPU memory goes through here.
pub struct Surface<B: GraphicsBackend> {
    backend: B,
    capabilities: GraphicsCapabilities,
}

impl<B: GraphicsBackend> Surface<B> {
    /// Takes over an initialized context and freezes its capabilities.
    pub fn acquire(backend: B) -> SmokeResult<Self> {
        let capabilities = backend.capabilities();
        if capabilities.max_texture_size == 0 {
            return Err(SmokeError::UnsupportedPlatform(String::from(
                "context reports no renderable texture size",
            )));
        }

        info!(
            "acquired {:?} context: {:?} precision, max texture size {}",
            capabilities.api, capabilities.precision, capabilities.max_texture_size
        );
        if !capabilities.linear_filtering {
            warn!("linear filtering of float textures unavailable, falling back to nearest");
        }
        if capabilities.api == GraphicsApi::Software {
            info!("rendering with the CPU rasterizer");
        }

        Ok(Self { backend, capabilities })
    }

    pub fn capabilities(&self) -> &GraphicsCapabilities {
        &self.capabilities
    }

    pub fn drawable_size(&self) -> (u32, u32) {
        self.backend.drawable_size()
    }

    pub fn resize_drawable(&mut self, width: u32, height: u32) {
        self.backend.resize_drawable(width, height);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn compile(&mut self, role: ProgramRole) -> SmokeResult<ShaderProgram<B::Program>> {
        ShaderProgram::compile(&mut self.backend, role)
    }

    pub fn compile_all(&mut self) -> SmokeResult<Programs<B::Program>> {
        Programs::compile_all(&mut self.backend)
    }

    pub fn release_programs(&mut self, programs: Programs<B::Program>) {
        programs.release(&mut self.backend);
    }

    fn allocate_field(&mut self, kind: FieldKind, width: u32, height: u32) -> SmokeResult<Field> {
        let texture = self
            .backend
            .create_texture(&kind.descriptor(width, height, &self.capabilities))?;
        Ok(Field {
            kind,
            texture,
            width,
            height,
        })
    }

    /// Allocates every field at `width x height`. Either all fields are created or none
    /// stay alive.
    pub fn allocate_fields(&mut self, width: u32, height: u32) -> SmokeResult<FieldSet> {
        let mut allocated: Vec<Field> = Vec::with_capacity(8);
        let layout = [
            FieldKind::Velocity,
            FieldKind::Velocity,
            FieldKind::Density,
            FieldKind::Density,
            FieldKind::Pressure,
            FieldKind::Pressure,
            FieldKind::Divergence,
            FieldKind::Curl,
        ];

        for kind in layout {
            match self.allocate_field(kind, width, height) {
                Ok(field) => allocated.push(field),
                Err(e) => {
                    for field in allocated {
                        // the texture was just created, deleting it cannot be stale
                        let _ = self.backend.delete_texture(field.texture);
                    }
                    return Err(e);
                }
            }
        }

        info!("allocated fields at {}x{}", width, height);

        Ok(FieldSet {
            width,
            height,
            velocity: DoubleBuffer::new(allocated[0], allocated[1]),
            density: DoubleBuffer::new(allocated[2], allocated[3]),
            pressure: DoubleBuffer::new(allocated[4], allocated[5]),
            divergence: allocated[6],
            curl: allocated[7],
        })
    }

    pub fn release_fields(&mut self, fields: FieldSet) -> SmokeResult<()> {
        for field in fields.all_fields() {
            self.backend.delete_texture(field.texture)?;
        }
        Ok(())
    }

    /// Runs the bound program over the full-screen quad into `destination`, or into the
    /// visible surface for `None`.
    pub fn blit(&mut self, binding: &ProgramBinding<B::Program>, destination: Option<&Field>) -> SmokeResult<()> {
        if let Some(field) = destination {
            if let Some(texture) = binding.sampled_textures().find(|t| *t == field.texture) {
                return Err(SmokeError::FeedbackLoop {
                    role: binding.program().role(),
                    texture,
                });
            }
        }

        self.backend.draw_full_screen_quad(
            binding.program().handle(),
            binding.uniforms(),
            destination.map(|field| field.texture),
        )
    }

    pub fn read_field(&mut self, field: &Field) -> SmokeResult<Vec<Texel>> {
        self.backend.read_texels(field.texture)
    }

    pub fn write_field(&mut self, field: &Field, texels: &[Texel]) -> SmokeResult<()> {
        self.backend.write_texels(field.texture, texels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::{TexelPrecision, TextureFilter, UniformValue};
    use crate::shader_programs::{U_TEXTURE, U_VALUE};
    use crate::software_backend::SoftwareBackend;

    fn surface() -> Surface<SoftwareBackend> {
        Surface::acquire(SoftwareBackend::new(16, 8)).unwrap()
    }

    #[test]
    fn fields_have_requested_shape() {
        let mut surface = surface();
        let fields = surface.allocate_fields(8, 4).unwrap();
        assert_eq!(surface.backend().live_texture_count(), 8);

        for field in fields.all_fields() {
            assert_eq!((field.width, field.height), (8, 4));
        }
        assert_eq!(fields.velocity.read().kind, FieldKind::Velocity);
        assert_eq!(fields.curl.kind, FieldKind::Curl);

        let velocity = surface.read_field(fields.velocity.read()).unwrap();
        assert_eq!(velocity.len(), 32);
        assert!(velocity.iter().all(|t| t.x == 0. && t.y == 0.));

        surface.release_fields(fields).unwrap();
        assert_eq!(surface.backend().live_texture_count(), 0);
    }

    #[test]
    fn failed_allocation_leaves_nothing_behind() {
        let mut surface = surface();
        assert!(matches!(surface.allocate_fields(0, 4), Err(SmokeError::Allocation { .. })));
        assert!(surface.allocate_fields(100_000, 4).is_err());
        assert_eq!(surface.backend().live_texture_count(), 0);
    }

    #[test]
    fn nearest_fallback_without_linear_filtering() {
        let backend = SoftwareBackend::with_capabilities(
            4,
            4,
            GraphicsCapabilities {
                api: GraphicsApi::Software,
                precision: TexelPrecision::Half,
                linear_filtering: false,
                max_texture_size: 64,
            },
        );
        let surface = Surface::acquire(backend).unwrap();
        assert_eq!(
            FieldKind::Density.filter(surface.capabilities()),
            TextureFilter::Nearest
        );
    }

    #[test]
    fn blit_rejects_feedback_loop() {
        let mut surface = surface();
        let fields = surface.allocate_fields(4, 4).unwrap();
        let clear = surface.compile(ProgramRole::Clear).unwrap();

        let mut binding = clear.bind();
        binding
            .set_uniform(U_TEXTURE, UniformValue::Sampler(fields.pressure.read().texture))
            .unwrap()
            .set_uniform(U_VALUE, UniformValue::Float(0.8))
            .unwrap();

        match surface.blit(&binding, Some(fields.pressure.read())) {
            Err(SmokeError::FeedbackLoop { role, texture }) => {
                assert_eq!(role, ProgramRole::Clear);
                assert_eq!(texture, fields.pressure.read().texture);
            }
            other => panic!("expected FeedbackLoop, got {:?}", other.err()),
        }

        surface.blit(&binding, Some(fields.pressure.write())).unwrap();
    }

    #[test]
    fn blit_to_released_field_is_stale() {
        let mut surface = surface();
        let fields = surface.allocate_fields(4, 4).unwrap();
        let divergence = fields.divergence;
        surface.release_fields(fields).unwrap();

        let display = surface.compile(ProgramRole::Display).unwrap();
        let binding = display.bind();
        assert!(matches!(
            surface.blit(&binding, Some(&divergence)),
            Err(SmokeError::StaleTexture(t)) if t == divergence.texture
        ));
    }
}
