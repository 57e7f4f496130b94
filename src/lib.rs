/*!
Stable-fluids smoke driven by pointer input.

On `wasm32-unknown-unknown` the crate exports `SmokeCanvas`, which renders through WebGL2.
Native builds run the same passes on the CPU backend in an SDL2 window.
*/

mod platform;
mod simulation;

pub use simulation::*;

#[cfg(not(target_arch = "wasm32"))]
pub use platform::start;
