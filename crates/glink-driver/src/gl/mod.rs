//! OpenGL implementation of [`Driver`](crate::Driver).
//!
//! Runs in the host's own GL context. Function pointers are loaded once per
//! process through `gl_loader`; every call must happen on the thread that owns
//! the context.

mod driver;
mod loader;
mod types;

pub use driver::GlDriver;
pub use loader::load_gl;
