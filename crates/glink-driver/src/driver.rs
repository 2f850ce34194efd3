//! The driver-call layer everything above it is written against.

use anyhow::Result;
use glink_core::{BufferHandle, ConstantType, PipelineHandle, ProgramHandle, ShaderHandle, StageKind};

/// Feature set of the current context, queried once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Separable programs and program pipeline objects.
    pub separate_shader_objects: bool,
    /// Retrieving and reloading linked program binaries.
    pub program_binary: bool,
    pub uniform_blocks: bool,
    pub shader_storage_blocks: bool,
    pub atomic_counters: bool,
    /// Highest GLSL version, as written after `#version` (e.g. 450).
    pub glsl_version: u32,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            separate_shader_objects: true,
            program_binary: true,
            uniform_blocks: true,
            shader_storage_blocks: true,
            atomic_counters: true,
            glsl_version: 450,
        }
    }
}

/// Which kind of buffer-backed interface block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Uniform,
    Storage,
}

/// Indexed buffer binding targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Uniform,
    Storage,
    AtomicCounter,
}

impl From<BlockKind> for BufferTarget {
    fn from(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Uniform => BufferTarget::Uniform,
            BlockKind::Storage => BufferTarget::Storage,
        }
    }
}

/// Location of an atomic counter inside its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicCounterSlot {
    pub binding: u32,
    /// Byte offset within the buffer.
    pub offset: u32,
}

/// An active default-block uniform as reported by the driver.
///
/// Block members are not reported here; see [`ActiveBlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Possibly suffixed with `[0]` for arrays.
    pub name: String,
    pub const_type: ConstantType,
    pub array_size: usize,
    /// Negative when the uniform has no location (atomic counters).
    pub location: i32,
    pub atomic: Option<AtomicCounterSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    pub name: String,
    /// Byte offset within the block.
    pub offset: u32,
    /// Bytes between array elements; 0 for non-arrays.
    pub array_stride: u32,
    /// Bytes between matrix columns; 0 for non-matrices.
    pub matrix_stride: u32,
}

/// An active uniform or shader storage block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBlock {
    pub kind: BlockKind,
    /// Program-local block index.
    pub index: u32,
    pub name: String,
    pub data_size: usize,
    pub members: Vec<BlockMember>,
}

/// A driver-specific program binary and the format tag it was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinary {
    pub format: u32,
    pub bytes: Vec<u8>,
}

/// Every call the link cache and binders make against the graphics driver.
///
/// All methods must be called on the thread owning the context. Calls that
/// report pass/fail through driver status (compile, link, validate, binary
/// load) return `bool` and leave diagnostics in the matching info log.
pub trait Driver {
    /// Downcast to a concrete type.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable downcast to a concrete type.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    fn capabilities(&self) -> DriverCapabilities;

    // -- Shaders -------------------------------------------------------------

    fn create_shader(&mut self, kind: StageKind) -> Result<ShaderHandle>;

    /// Upload `source` and compile. Returns the compile status.
    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> bool;

    fn shader_info_log(&self, shader: ShaderHandle) -> String;

    fn delete_shader(&mut self, shader: ShaderHandle);

    // -- Programs ------------------------------------------------------------

    fn create_program(&mut self) -> Result<ProgramHandle>;

    fn set_program_separable(&mut self, program: ProgramHandle, separable: bool);

    /// Hint that the binary will be retrieved after linking.
    fn set_binary_retrievable(&mut self, program: ProgramHandle);

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle);

    /// Link and return the link status.
    fn link_program(&mut self, program: ProgramHandle) -> bool;

    fn validate_program(&mut self, program: ProgramHandle) -> bool;

    fn program_info_log(&self, program: ProgramHandle) -> String;

    fn delete_program(&mut self, program: ProgramHandle);

    /// Make `program` current for draws, or unbind with `None`.
    fn use_program(&mut self, program: Option<ProgramHandle>);

    /// Retrieve the linked binary. `None` if unsupported or unavailable.
    fn program_binary(&self, program: ProgramHandle) -> Option<ProgramBinary>;

    /// Load a binary and return the resulting link status.
    fn load_program_binary(&mut self, program: ProgramHandle, binary: &ProgramBinary) -> bool;

    // -- Pipelines -----------------------------------------------------------

    fn create_pipeline(&mut self) -> Result<PipelineHandle>;

    fn use_program_stages(&mut self, pipeline: PipelineHandle, stage: StageKind, program: ProgramHandle);

    fn validate_pipeline(&mut self, pipeline: PipelineHandle) -> bool;

    fn pipeline_info_log(&self, pipeline: PipelineHandle) -> String;

    /// Bind `pipeline` for draws, or unbind with `None`.
    fn bind_pipeline(&mut self, pipeline: Option<PipelineHandle>);

    fn delete_pipeline(&mut self, pipeline: PipelineHandle);

    // -- Reflection ----------------------------------------------------------

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform>;

    fn active_blocks(&self, program: ProgramHandle, kind: BlockKind) -> Vec<ActiveBlock>;

    fn set_block_binding(&mut self, program: ProgramHandle, kind: BlockKind, index: u32, binding: u32);

    // -- Uniform upload ------------------------------------------------------
    //
    // `components` is the vector arity; the element count is
    // `data.len() / components`. `program` is the program owning `location`.

    fn uniform_f32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[f32]);

    fn uniform_f64(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[f64]);

    fn uniform_i32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[i32]);

    fn uniform_u32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[u32]);

    /// `dims` is `(columns, rows)`.
    fn uniform_matrix_f32(
        &mut self,
        program: ProgramHandle,
        location: i32,
        dims: (u8, u8),
        transpose: bool,
        data: &[f32],
    );

    fn uniform_matrix_f64(
        &mut self,
        program: ProgramHandle,
        location: i32,
        dims: (u8, u8),
        transpose: bool,
        data: &[f64],
    );

    // -- Buffers -------------------------------------------------------------

    fn create_buffer(&mut self, target: BufferTarget, size: usize) -> Result<BufferHandle>;

    /// Write `data` at byte `offset`.
    fn buffer_sub_data(&mut self, target: BufferTarget, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<()>;

    fn bind_buffer_base(&mut self, target: BufferTarget, binding: u32, buffer: BufferHandle);

    fn delete_buffer(&mut self, buffer: BufferHandle);

    /// Unbind any program and pipeline.
    fn reset(&mut self);
}
