mod main_loop;
mod rendering;
mod snapshot;

pub use main_loop::start;
