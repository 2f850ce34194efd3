//! [`GlDriver`]: the [`Driver`] implementation on the host's OpenGL context.

use std::ffi::{CStr, CString};

use anyhow::{anyhow, bail, Result};
use gl::types::{GLboolean, GLchar, GLenum, GLint, GLsizei, GLuint};
use glink_core::{BufferHandle, PipelineHandle, ProgramHandle, ShaderHandle, StageKind};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use super::loader::load_gl;
use super::types::{block_interface, buffer_target, constant_type, shader_type, stage_bit};
use crate::driver::{
    ActiveBlock, ActiveUniform, AtomicCounterSlot, BlockKind, BlockMember, BufferTarget, Driver,
    DriverCapabilities, ProgramBinary,
};

/// OpenGL driver bound to whatever context is current on this thread.
///
/// Uniform uploads use `glProgramUniform*` when separate shader objects are
/// available and fall back to `glUniform*` on the bound program otherwise.
pub struct GlDriver {
    caps: DriverCapabilities,
}

impl GlDriver {
    /// Load function pointers and query the context's capabilities.
    ///
    /// A context must be current on the calling thread.
    pub fn new() -> Result<Self> {
        load_gl()?;
        let caps = unsafe { query_capabilities() };
        debug!(?caps, "OpenGL driver ready");
        Ok(Self { caps })
    }

    /// Restrict capabilities below what the context offers, e.g. to force the
    /// monolithic path or disable binary caching on a buggy driver.
    pub fn with_capabilities(mut self, caps: DriverCapabilities) -> Self {
        self.caps = caps;
        self
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

unsafe fn query_capabilities() -> DriverCapabilities {
    let (mut major, mut minor) = (0, 0);
    gl::GetIntegerv(gl::MAJOR_VERSION, &mut major);
    gl::GetIntegerv(gl::MINOR_VERSION, &mut minor);

    let mut num_extensions = 0;
    gl::GetIntegerv(gl::NUM_EXTENSIONS, &mut num_extensions);
    let extensions: FxHashSet<String> = (0..num_extensions.max(0) as GLuint)
        .filter_map(|i| {
            let ptr = gl::GetStringi(gl::EXTENSIONS, i);
            (!ptr.is_null()).then(|| CStr::from_ptr(ptr.cast()).to_string_lossy().into_owned())
        })
        .collect();

    let at_least = |want: (GLint, GLint)| (major, minor) >= want;
    let has = |ext: &str| extensions.contains(ext);

    let mut binary_formats = 0;
    if at_least((4, 1)) || has("GL_ARB_get_program_binary") {
        gl::GetIntegerv(gl::NUM_PROGRAM_BINARY_FORMATS, &mut binary_formats);
    }

    let glsl_version = match (major, minor) {
        (3, 0) => 130,
        (3, 1) => 140,
        (3, 2) => 150,
        (major, minor) => (major * 100 + minor * 10).max(0) as u32,
    };

    DriverCapabilities {
        separate_shader_objects: at_least((4, 1)) || has("GL_ARB_separate_shader_objects"),
        program_binary: binary_formats > 0,
        uniform_blocks: at_least((3, 1)) || has("GL_ARB_uniform_buffer_object"),
        shader_storage_blocks: at_least((4, 3)) || has("GL_ARB_shader_storage_buffer_object"),
        atomic_counters: at_least((4, 2)) || has("GL_ARB_shader_atomic_counters"),
        glsl_version,
    }
}

/// Read an info log through the matching `Get*iv` / `Get*InfoLog` pair.
unsafe fn info_log(
    object: GLuint,
    get_iv: unsafe fn(GLuint, GLenum, *mut GLint),
    get_log: unsafe fn(GLuint, GLsizei, *mut GLsizei, *mut GLchar),
) -> String {
    let mut len = 0;
    get_iv(object, gl::INFO_LOG_LENGTH, &mut len);
    if len <= 1 {
        return String::new();
    }
    let mut buf = vec![0u8; len as usize];
    let mut written = 0;
    get_log(object, len, &mut written, buf.as_mut_ptr().cast());
    buf.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buf).into_owned()
}

fn name_from(buf: &[u8], len: GLsizei) -> String {
    String::from_utf8_lossy(&buf[..(len.max(0) as usize).min(buf.len())]).into_owned()
}

unsafe fn program_iv(program: GLuint, pname: GLenum) -> GLint {
    let mut value = 0;
    gl::GetProgramiv(program, pname, &mut value);
    value
}

unsafe fn clear_gl_errors() {
    while gl::GetError() != gl::NO_ERROR {}
}

fn element_count(len: usize, per_element: usize) -> GLsizei {
    (len / per_element.max(1)) as GLsizei
}

macro_rules! upload_vector {
    ($self:ident, $program:expr, $location:expr, $components:expr, $data:expr,
     [$($u:ident),+], [$($pu:ident),+]) => {{
        let count = element_count($data.len(), $components as usize);
        let ptr = $data.as_ptr();
        let separable = $self.caps.separate_shader_objects;
        let uniform_fns: [unsafe fn(GLint, GLsizei, *const _); 4] = [$(gl::$u),+];
        let program_fns: [unsafe fn(GLuint, GLint, GLsizei, *const _); 4] = [$(gl::$pu),+];
        let slot = ($components as usize).wrapping_sub(1);
        if count > 0 && slot < 4 {
            unsafe {
                if separable {
                    program_fns[slot]($program.raw(), $location, count, ptr);
                } else {
                    uniform_fns[slot]($location, count, ptr);
                }
            }
        }
    }};
}

macro_rules! upload_matrix {
    ($self:ident, $program:expr, $location:expr, $dims:expr, $transpose:expr, $data:expr,
     [$($u:ident),+], [$($pu:ident),+]) => {{
        let (cols, rows) = $dims;
        let count = element_count($data.len(), cols as usize * rows as usize);
        let ptr = $data.as_ptr();
        let transpose = if $transpose { gl::TRUE } else { gl::FALSE };
        // Ordered 2x2, 2x3, 2x4, 3x2, 3x3, 3x4, 4x2, 4x3, 4x4.
        let uniform_fns: [unsafe fn(GLint, GLsizei, GLboolean, *const _); 9] = [$(gl::$u),+];
        let program_fns: [unsafe fn(GLuint, GLint, GLsizei, GLboolean, *const _); 9] = [$(gl::$pu),+];
        let slot = if (2..=4).contains(&cols) && (2..=4).contains(&rows) {
            Some((cols as usize - 2) * 3 + (rows as usize - 2))
        } else {
            None
        };
        if let (Some(slot), true) = (slot, count > 0) {
            unsafe {
                if $self.caps.separate_shader_objects {
                    program_fns[slot]($program.raw(), $location, count, transpose, ptr);
                } else {
                    uniform_fns[slot]($location, count, transpose, ptr);
                }
            }
        }
    }};
}

// ---------------------------------------------------------------------------
// Driver implementation
// ---------------------------------------------------------------------------

impl Driver for GlDriver {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.caps
    }

    fn create_shader(&mut self, kind: StageKind) -> Result<ShaderHandle> {
        let name = unsafe { gl::CreateShader(shader_type(kind)) };
        if name == 0 {
            bail!("glCreateShader failed for {kind} stage");
        }
        Ok(ShaderHandle(name))
    }

    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> bool {
        let ptr = source.as_ptr().cast::<GLchar>();
        let len = source.len() as GLint;
        let mut status = 0;
        unsafe {
            gl::ShaderSource(shader.raw(), 1, &ptr, &len);
            gl::CompileShader(shader.raw());
            gl::GetShaderiv(shader.raw(), gl::COMPILE_STATUS, &mut status);
        }
        status == gl::TRUE as GLint
    }

    fn shader_info_log(&self, shader: ShaderHandle) -> String {
        unsafe { info_log(shader.raw(), gl::GetShaderiv, gl::GetShaderInfoLog) }
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        unsafe { gl::DeleteShader(shader.raw()) }
    }

    fn create_program(&mut self) -> Result<ProgramHandle> {
        let name = unsafe { gl::CreateProgram() };
        if name == 0 {
            bail!("glCreateProgram failed");
        }
        Ok(ProgramHandle(name))
    }

    fn set_program_separable(&mut self, program: ProgramHandle, separable: bool) {
        if self.caps.separate_shader_objects {
            let value = if separable { gl::TRUE } else { gl::FALSE };
            unsafe { gl::ProgramParameteri(program.raw(), gl::PROGRAM_SEPARABLE, value as GLint) }
        }
    }

    fn set_binary_retrievable(&mut self, program: ProgramHandle) {
        if self.caps.program_binary {
            unsafe {
                gl::ProgramParameteri(
                    program.raw(),
                    gl::PROGRAM_BINARY_RETRIEVABLE_HINT,
                    gl::TRUE as GLint,
                )
            }
        }
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        unsafe { gl::AttachShader(program.raw(), shader.raw()) }
    }

    fn link_program(&mut self, program: ProgramHandle) -> bool {
        unsafe {
            gl::LinkProgram(program.raw());
            program_iv(program.raw(), gl::LINK_STATUS) == gl::TRUE as GLint
        }
    }

    fn validate_program(&mut self, program: ProgramHandle) -> bool {
        unsafe {
            gl::ValidateProgram(program.raw());
            program_iv(program.raw(), gl::VALIDATE_STATUS) == gl::TRUE as GLint
        }
    }

    fn program_info_log(&self, program: ProgramHandle) -> String {
        unsafe { info_log(program.raw(), gl::GetProgramiv, gl::GetProgramInfoLog) }
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        unsafe { gl::DeleteProgram(program.raw()) }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        unsafe { gl::UseProgram(program.map_or(0, ProgramHandle::raw)) }
    }

    fn program_binary(&self, program: ProgramHandle) -> Option<ProgramBinary> {
        if !self.caps.program_binary {
            return None;
        }
        unsafe {
            let len = program_iv(program.raw(), gl::PROGRAM_BINARY_LENGTH);
            if len <= 0 {
                return None;
            }
            let mut bytes = vec![0u8; len as usize];
            let mut written = 0;
            let mut format: GLenum = 0;
            gl::GetProgramBinary(
                program.raw(),
                len,
                &mut written,
                &mut format,
                bytes.as_mut_ptr().cast(),
            );
            if written <= 0 {
                return None;
            }
            bytes.truncate(written as usize);
            Some(ProgramBinary { format, bytes })
        }
    }

    fn load_program_binary(&mut self, program: ProgramHandle, binary: &ProgramBinary) -> bool {
        if !self.caps.program_binary {
            return false;
        }
        unsafe {
            clear_gl_errors();
            gl::ProgramBinary(
                program.raw(),
                binary.format,
                binary.bytes.as_ptr().cast(),
                binary.bytes.len() as GLsizei,
            );
            // An unknown format raises GL_INVALID_ENUM instead of failing the link.
            let error = gl::GetError();
            error == gl::NO_ERROR && program_iv(program.raw(), gl::LINK_STATUS) == gl::TRUE as GLint
        }
    }

    fn create_pipeline(&mut self) -> Result<PipelineHandle> {
        let mut name = 0;
        unsafe { gl::GenProgramPipelines(1, &mut name) };
        if name == 0 {
            bail!("glGenProgramPipelines failed");
        }
        Ok(PipelineHandle(name))
    }

    fn use_program_stages(&mut self, pipeline: PipelineHandle, stage: StageKind, program: ProgramHandle) {
        unsafe { gl::UseProgramStages(pipeline.raw(), stage_bit(stage), program.raw()) }
    }

    fn validate_pipeline(&mut self, pipeline: PipelineHandle) -> bool {
        let mut status = 0;
        unsafe {
            gl::ValidateProgramPipeline(pipeline.raw());
            gl::GetProgramPipelineiv(pipeline.raw(), gl::VALIDATE_STATUS, &mut status);
        }
        status == gl::TRUE as GLint
    }

    fn pipeline_info_log(&self, pipeline: PipelineHandle) -> String {
        unsafe {
            info_log(
                pipeline.raw(),
                gl::GetProgramPipelineiv,
                gl::GetProgramPipelineInfoLog,
            )
        }
    }

    fn bind_pipeline(&mut self, pipeline: Option<PipelineHandle>) {
        unsafe { gl::BindProgramPipeline(pipeline.map_or(0, PipelineHandle::raw)) }
    }

    fn delete_pipeline(&mut self, pipeline: PipelineHandle) {
        unsafe { gl::DeleteProgramPipelines(1, &pipeline.raw()) }
    }

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform> {
        let p = program.raw();
        let mut uniforms = Vec::new();
        unsafe {
            let count = program_iv(p, gl::ACTIVE_UNIFORMS);
            let max_len = program_iv(p, gl::ACTIVE_UNIFORM_MAX_LENGTH).max(1);
            let mut buf = vec![0u8; max_len as usize];

            for index in 0..count.max(0) as GLuint {
                let (mut len, mut size, mut ty) = (0, 0, 0);
                gl::GetActiveUniform(p, index, max_len, &mut len, &mut size, &mut ty, buf.as_mut_ptr().cast());
                let name = name_from(&buf, len);

                let mut block_index = -1;
                gl::GetActiveUniformsiv(p, 1, &index, gl::UNIFORM_BLOCK_INDEX, &mut block_index);
                if block_index >= 0 {
                    // Reported through `active_blocks`.
                    continue;
                }

                let Some(const_type) = constant_type(ty) else {
                    trace!(name, ty, "skipping uniform of unsupported type");
                    continue;
                };

                let atomic = if ty == gl::UNSIGNED_INT_ATOMIC_COUNTER && self.caps.atomic_counters {
                    let (mut buffer_index, mut offset, mut binding) = (0, 0, 0);
                    gl::GetActiveUniformsiv(p, 1, &index, gl::UNIFORM_ATOMIC_COUNTER_BUFFER_INDEX, &mut buffer_index);
                    gl::GetActiveUniformsiv(p, 1, &index, gl::UNIFORM_OFFSET, &mut offset);
                    gl::GetActiveAtomicCounterBufferiv(
                        p,
                        buffer_index.max(0) as GLuint,
                        gl::ATOMIC_COUNTER_BUFFER_BINDING,
                        &mut binding,
                    );
                    Some(AtomicCounterSlot {
                        binding: binding.max(0) as u32,
                        offset: offset.max(0) as u32,
                    })
                } else {
                    None
                };

                let location = match (atomic, CString::new(name.as_str())) {
                    (None, Ok(cname)) => gl::GetUniformLocation(p, cname.as_ptr()),
                    _ => -1,
                };

                uniforms.push(ActiveUniform {
                    name,
                    const_type,
                    array_size: size.max(1) as usize,
                    location,
                    atomic,
                });
            }
        }
        uniforms
    }

    fn active_blocks(&self, program: ProgramHandle, kind: BlockKind) -> Vec<ActiveBlock> {
        let supported = match kind {
            BlockKind::Uniform => self.caps.uniform_blocks,
            BlockKind::Storage => self.caps.shader_storage_blocks,
        };
        if !supported {
            return Vec::new();
        }

        let p = program.raw();
        let interface = block_interface(kind);
        let variable_interface = match kind {
            BlockKind::Uniform => gl::UNIFORM,
            BlockKind::Storage => gl::BUFFER_VARIABLE,
        };
        let mut blocks = Vec::new();

        unsafe {
            let mut count = 0;
            gl::GetProgramInterfaceiv(p, interface, gl::ACTIVE_RESOURCES, &mut count);
            let mut max_len = 0;
            gl::GetProgramInterfaceiv(p, interface, gl::MAX_NAME_LENGTH, &mut max_len);
            let mut var_max_len = 0;
            gl::GetProgramInterfaceiv(p, variable_interface, gl::MAX_NAME_LENGTH, &mut var_max_len);
            let mut buf = vec![0u8; max_len.max(var_max_len).max(1) as usize];

            for index in 0..count.max(0) as GLuint {
                let mut len = 0;
                gl::GetProgramResourceName(p, interface, index, buf.len() as GLsizei, &mut len, buf.as_mut_ptr().cast());
                let name = name_from(&buf, len);

                let props = [gl::BUFFER_DATA_SIZE, gl::NUM_ACTIVE_VARIABLES];
                let mut values = [0; 2];
                gl::GetProgramResourceiv(p, interface, index, 2, props.as_ptr(), 2, std::ptr::null_mut(), values.as_mut_ptr());
                let [data_size, num_vars] = values;

                let mut var_indices = vec![0; num_vars.max(0) as usize];
                if !var_indices.is_empty() {
                    let prop = gl::ACTIVE_VARIABLES;
                    gl::GetProgramResourceiv(
                        p,
                        interface,
                        index,
                        1,
                        &prop,
                        var_indices.len() as GLsizei,
                        std::ptr::null_mut(),
                        var_indices.as_mut_ptr(),
                    );
                }

                let members = var_indices
                    .iter()
                    .map(|&var| {
                        let var = var as GLuint;
                        let mut len = 0;
                        gl::GetProgramResourceName(p, variable_interface, var, buf.len() as GLsizei, &mut len, buf.as_mut_ptr().cast());
                        let props = [gl::OFFSET, gl::ARRAY_STRIDE, gl::MATRIX_STRIDE];
                        let mut values = [0; 3];
                        gl::GetProgramResourceiv(
                            p,
                            variable_interface,
                            var,
                            3,
                            props.as_ptr(),
                            3,
                            std::ptr::null_mut(),
                            values.as_mut_ptr(),
                        );
                        let [offset, array_stride, matrix_stride] = values;
                        BlockMember {
                            name: name_from(&buf, len),
                            offset: offset.max(0) as u32,
                            array_stride: array_stride.max(0) as u32,
                            matrix_stride: matrix_stride.max(0) as u32,
                        }
                    })
                    .collect();

                blocks.push(ActiveBlock {
                    kind,
                    index,
                    name,
                    data_size: data_size.max(0) as usize,
                    members,
                });
            }
        }
        blocks
    }

    fn set_block_binding(&mut self, program: ProgramHandle, kind: BlockKind, index: u32, binding: u32) {
        unsafe {
            match kind {
                BlockKind::Uniform => gl::UniformBlockBinding(program.raw(), index, binding),
                BlockKind::Storage => gl::ShaderStorageBlockBinding(program.raw(), index, binding),
            }
        }
    }

    fn uniform_f32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[f32]) {
        upload_vector!(
            self, program, location, components, data,
            [Uniform1fv, Uniform2fv, Uniform3fv, Uniform4fv],
            [ProgramUniform1fv, ProgramUniform2fv, ProgramUniform3fv, ProgramUniform4fv]
        );
    }

    fn uniform_f64(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[f64]) {
        upload_vector!(
            self, program, location, components, data,
            [Uniform1dv, Uniform2dv, Uniform3dv, Uniform4dv],
            [ProgramUniform1dv, ProgramUniform2dv, ProgramUniform3dv, ProgramUniform4dv]
        );
    }

    fn uniform_i32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[i32]) {
        upload_vector!(
            self, program, location, components, data,
            [Uniform1iv, Uniform2iv, Uniform3iv, Uniform4iv],
            [ProgramUniform1iv, ProgramUniform2iv, ProgramUniform3iv, ProgramUniform4iv]
        );
    }

    fn uniform_u32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[u32]) {
        upload_vector!(
            self, program, location, components, data,
            [Uniform1uiv, Uniform2uiv, Uniform3uiv, Uniform4uiv],
            [ProgramUniform1uiv, ProgramUniform2uiv, ProgramUniform3uiv, ProgramUniform4uiv]
        );
    }

    fn uniform_matrix_f32(
        &mut self,
        program: ProgramHandle,
        location: i32,
        dims: (u8, u8),
        transpose: bool,
        data: &[f32],
    ) {
        upload_matrix!(
            self, program, location, dims, transpose, data,
            [
                UniformMatrix2fv, UniformMatrix2x3fv, UniformMatrix2x4fv,
                UniformMatrix3x2fv, UniformMatrix3fv, UniformMatrix3x4fv,
                UniformMatrix4x2fv, UniformMatrix4x3fv, UniformMatrix4fv
            ],
            [
                ProgramUniformMatrix2fv, ProgramUniformMatrix2x3fv, ProgramUniformMatrix2x4fv,
                ProgramUniformMatrix3x2fv, ProgramUniformMatrix3fv, ProgramUniformMatrix3x4fv,
                ProgramUniformMatrix4x2fv, ProgramUniformMatrix4x3fv, ProgramUniformMatrix4fv
            ]
        );
    }

    fn uniform_matrix_f64(
        &mut self,
        program: ProgramHandle,
        location: i32,
        dims: (u8, u8),
        transpose: bool,
        data: &[f64],
    ) {
        upload_matrix!(
            self, program, location, dims, transpose, data,
            [
                UniformMatrix2dv, UniformMatrix2x3dv, UniformMatrix2x4dv,
                UniformMatrix3x2dv, UniformMatrix3dv, UniformMatrix3x4dv,
                UniformMatrix4x2dv, UniformMatrix4x3dv, UniformMatrix4dv
            ],
            [
                ProgramUniformMatrix2dv, ProgramUniformMatrix2x3dv, ProgramUniformMatrix2x4dv,
                ProgramUniformMatrix3x2dv, ProgramUniformMatrix3dv, ProgramUniformMatrix3x4dv,
                ProgramUniformMatrix4x2dv, ProgramUniformMatrix4x3dv, ProgramUniformMatrix4dv
            ]
        );
    }

    fn create_buffer(&mut self, target: BufferTarget, size: usize) -> Result<BufferHandle> {
        let target = buffer_target(target);
        let mut name = 0;
        unsafe {
            clear_gl_errors();
            gl::GenBuffers(1, &mut name);
            gl::BindBuffer(target, name);
            gl::BufferData(target, size as isize, std::ptr::null(), gl::DYNAMIC_DRAW);
            gl::BindBuffer(target, 0);
            let error = gl::GetError();
            if name == 0 || error != gl::NO_ERROR {
                return Err(anyhow!("buffer creation failed (GL error {error:#x})"));
            }
        }
        Ok(BufferHandle(name))
    }

    fn buffer_sub_data(&mut self, target: BufferTarget, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let target = buffer_target(target);
        unsafe {
            clear_gl_errors();
            gl::BindBuffer(target, buffer.raw());
            gl::BufferSubData(target, offset as isize, data.len() as isize, data.as_ptr().cast());
            gl::BindBuffer(target, 0);
            let error = gl::GetError();
            if error != gl::NO_ERROR {
                bail!("glBufferSubData of {} bytes at {offset} failed (GL error {error:#x})", data.len());
            }
        }
        Ok(())
    }

    fn bind_buffer_base(&mut self, target: BufferTarget, binding: u32, buffer: BufferHandle) {
        unsafe { gl::BindBufferBase(buffer_target(target), binding, buffer.raw()) }
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        unsafe { gl::DeleteBuffers(1, &buffer.raw()) }
    }

    fn reset(&mut self) {
        unsafe {
            gl::UseProgram(0);
            if self.caps.separate_shader_objects {
                gl::BindProgramPipeline(0);
            }
        }
    }
}
