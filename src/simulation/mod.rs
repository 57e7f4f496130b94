pub mod concurrency;
pub mod error;
pub mod fields;
pub mod graphics;
pub mod input_mapper;
pub mod properties_window;
pub mod shader_programs;
pub mod simulation;
pub mod simulation_parameters;
pub mod software_backend;
pub mod surface;

use nalgebra::SVector;

#[allow(dead_code)]
pub type V<FT, const D: usize> = SVector<FT, D>;

pub type V2 = V<f32, 2>;
pub type V3 = V<f32, 3>;

pub fn vec3f(x: f32, y: f32, z: f32) -> V3 {
    [x, y, z].into()
}

pub use simulation::*;
