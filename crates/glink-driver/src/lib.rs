//! Driver abstraction for the program link cache.
//!
//! [`Driver`] is the narrow set of shader, program, pipeline, reflection and
//! buffer calls the layers above need. Two implementations ship here:
//!
//! - [`GlDriver`] talks to the current OpenGL context.
//! - [`HeadlessDriver`] keeps everything in memory and records every call.

pub mod driver;
pub mod gl;
pub mod headless;

pub use driver::{
    ActiveBlock, ActiveUniform, AtomicCounterSlot, BlockKind, BlockMember, BufferTarget, Driver,
    DriverCapabilities, ProgramBinary,
};
pub use gl::{load_gl, GlDriver};
pub use headless::{DriverStats, HeadlessDriver, UniformUpload, UploadValues, HEADLESS_BINARY_FORMAT};
