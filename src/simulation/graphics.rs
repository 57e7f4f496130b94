use nalgebra::Vector4;

use crate::error::SmokeResult;
use crate::shader_programs::ProgramSource;

/// One RGBA sample as the shaders see it. Formats with fewer channels read back as
/// `(r, g, 0, 1)` / `(r, 0, 0, 1)` like GL textures do.
pub type Texel = Vector4<f32>;

/// Handle of a texture-backed render target. Ids are never reused, so a handle kept
/// across a reallocation is detected as stale instead of aliasing a new texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsApi {
    WebGl2,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexelPrecision {
    Half,
    Full,
}

/// Computed once when the context is acquired and consumed read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsCapabilities {
    pub api: GraphicsApi,
    pub precision: TexelPrecision,
    // false if float textures can only be sampled with nearest filtering
    pub linear_filtering: bool,
    pub max_texture_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    R,
    Rg,
    Rgba,
}

impl TextureFormat {
    pub fn channels(self) -> usize {
        match self {
            TextureFormat::R => 1,
            TextureFormat::Rg => 2,
            TextureFormat::Rgba => 4,
        }
    }

    /// What a texel of this format reads back as after being written with `texel`.
    pub fn mask(self, texel: Texel) -> Texel {
        match self {
            TextureFormat::R => Texel::new(texel.x, 0., 0., 1.),
            TextureFormat::Rg => Texel::new(texel.x, texel.y, 0., 1.),
            TextureFormat::Rgba => texel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: TextureFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Sampler2D,
}

impl UniformKind {
    pub fn from_glsl_type(name: &str) -> Option<Self> {
        match name {
            "float" => Some(UniformKind::Float),
            "vec2" => Some(UniformKind::Vec2),
            "vec3" => Some(UniformKind::Vec3),
            "sampler2D" => Some(UniformKind::Sampler2D),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Sampler(TextureId),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Sampler(_) => UniformKind::Sampler2D,
        }
    }
}

/// A uniform reported active by the linker. The index in `CompiledProgram::uniforms`
/// is the binding slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    pub name: String,
    pub kind: UniformKind,
}

pub struct CompiledProgram<P> {
    pub handle: P,
    pub uniforms: Vec<ActiveUniform>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundUniform {
    pub slot: usize,
    pub value: UniformValue,
}

/// Everything the simulation needs from a graphics context. Implemented by the WebGL2
/// backend in the browser and by the CPU backend on desktop and in tests.
pub trait GraphicsBackend {
    type Program;

    fn capabilities(&self) -> GraphicsCapabilities;

    /// Pixel size of the visible surface.
    fn drawable_size(&self) -> (u32, u32);

    fn resize_drawable(&mut self, width: u32, height: u32);

    fn compile_program(&mut self, source: &ProgramSource) -> SmokeResult<CompiledProgram<Self::Program>>;

    fn delete_program(&mut self, program: Self::Program);

    /// Allocates a zero-initialized render target.
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> SmokeResult<TextureId>;

    fn delete_texture(&mut self, texture: TextureId) -> SmokeResult<()>;

    /// Rasterizes the full-screen quad with `program` into `destination`, or into the visible
    /// surface for `None`. The viewport covers the whole destination.
    fn draw_full_screen_quad(
        &mut self,
        program: &Self::Program,
        uniforms: &[BoundUniform],
        destination: Option<TextureId>,
    ) -> SmokeResult<()>;

    /// Row-major texels, bottom row first.
    fn read_texels(&mut self, texture: TextureId) -> SmokeResult<Vec<Texel>>;

    fn write_texels(&mut self, texture: TextureId, texels: &[Texel]) -> SmokeResult<()>;
}
