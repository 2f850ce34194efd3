//! One-time loading of OpenGL function pointers.

use std::sync::Once;

use anyhow::{bail, Result};

static GL_INIT_ONCE: Once = Once::new();

/// Load GL function pointers for the current context.
///
/// Pointers are loaded exactly once via `gl_loader`; later calls only check
/// that the entry points this crate depends on resolved.
pub fn load_gl() -> Result<()> {
    GL_INIT_ONCE.call_once(|| {
        gl_loader::init_gl();
        gl::load_with(|s| gl_loader::get_proc_address(s).cast());
    });

    if !gl::CreateProgram::is_loaded() || !gl::LinkProgram::is_loaded() {
        bail!("OpenGL entry points not available; is a context current?");
    }
    Ok(())
}
