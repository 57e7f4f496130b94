use thiserror::Error;

use crate::graphics::{TextureId, UniformKind};
use crate::shader_programs::ProgramRole;
use crate::simulation::SessionState;

#[derive(Debug, Error)]
pub enum SmokeError {
    /// No usable graphics context or no renderable floating-point texture format.
    /// Capabilities are static for a session, so there is no retry.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to compile {role:?} program: {log}")]
    Compile { role: ProgramRole, log: String },

    #[error("failed to link {role:?} program: {log}")]
    Link { role: ProgramRole, log: String },

    #[error("failed to allocate {width}x{height} render target: {reason}")]
    Allocation { width: u32, height: u32, reason: String },

    #[error("{role:?} program has no active uniform `{name}`")]
    UnknownUniform { role: ProgramRole, name: String },

    #[error("uniform `{name}` of {role:?} program is a {expected:?}, got a {actual:?}")]
    UniformTypeMismatch {
        role: ProgramRole,
        name: String,
        expected: UniformKind,
        actual: UniformKind,
    },

    #[error("{role:?} pass samples its own destination texture {texture:?}")]
    FeedbackLoop { role: ProgramRole, texture: TextureId },

    #[error("texture {0:?} was released or never allocated")]
    StaleTexture(TextureId),

    #[error("texel buffer holds {actual} texels, texture needs {expected}")]
    TexelCount { expected: usize, actual: usize },

    #[error("operation `{operation}` is not allowed in state {state:?}")]
    InvalidState { operation: &'static str, state: SessionState },

    #[error("simulation session was disposed")]
    Disposed,

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error("failed parsing simulation config: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Errors reported by the host (DOM lookups, event registration).
    #[error("host error: {0}")]
    Host(String),
}

pub type SmokeResult<T> = Result<T, SmokeError>;
