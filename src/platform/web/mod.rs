mod web_loop;
mod webgl_backend;

pub use web_loop::SmokeCanvas;
