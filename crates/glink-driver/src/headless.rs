//! [`HeadlessDriver`]: an in-memory [`Driver`] with no GPU behind it.
//!
//! It behaves like a permissive GLSL driver closely enough to exercise the
//! link cache and binders:
//!
//! - a shader fails to compile iff its source contains an `#error` line;
//! - linking reflects `uniform` / `buffer` declarations from the attached
//!   sources, and drops uniforms never referenced outside their declaration
//!   (standing in for dead-code elimination);
//! - program binaries are the attached sources tagged with a format that can
//!   be changed to simulate a driver upgrade.
//!
//! Every call is counted in [`DriverStats`] so tests can assert exactly how
//! much work the layers above performed.

use std::cell::Cell;

use anyhow::{anyhow, bail, Result};
use glink_core::{
    BufferHandle, ConstantType, PerStage, PipelineHandle, ProgramHandle, ShaderHandle, StageKind,
};
use num_traits::FromPrimitive;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::driver::{
    ActiveBlock, ActiveUniform, AtomicCounterSlot, BlockKind, BlockMember, BufferTarget, Driver,
    DriverCapabilities, ProgramBinary,
};

/// Binary format tag produced by a fresh [`HeadlessDriver`].
pub const HEADLESS_BINARY_FORMAT: u32 = 0x4845_4144;

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub shaders_created: usize,
    pub shader_compiles: usize,
    pub programs_created: usize,
    pub program_links: usize,
    pub program_validations: usize,
    pub binary_retrievals: usize,
    pub binary_loads: usize,
    pub binary_rejects: usize,
    pub pipelines_created: usize,
    pub pipeline_validations: usize,
    pub reflection_queries: usize,
    pub uniform_uploads: usize,
    pub buffer_writes: usize,
    pub objects_deleted: usize,
}

/// Values passed to one uniform upload call.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadValues {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    U32(Vec<u32>),
}

/// One recorded uniform upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformUpload {
    pub program: ProgramHandle,
    pub location: i32,
    /// Vector arity, or `columns * rows` for matrices.
    pub components: u8,
    /// `(columns, rows)` for matrix uploads.
    pub matrix: Option<(u8, u8)>,
    pub transpose: bool,
    pub values: UploadValues,
}

#[derive(Debug)]
struct HeadlessShader {
    kind: StageKind,
    compiled: bool,
    source: String,
    log: String,
}

#[derive(Debug, Default)]
struct HeadlessProgram {
    shaders: Vec<ShaderHandle>,
    separable: bool,
    retrievable: bool,
    linked: bool,
    log: String,
    sources: Vec<(StageKind, String)>,
    uniforms: Vec<ActiveUniform>,
    blocks: Vec<ActiveBlock>,
    block_bindings: FxHashMap<(BlockKind, u32), u32>,
}

/// In-memory driver that records every call.
#[derive(Debug)]
pub struct HeadlessDriver {
    caps: DriverCapabilities,
    next_name: u32,
    shaders: FxHashMap<ShaderHandle, HeadlessShader>,
    programs: FxHashMap<ProgramHandle, HeadlessProgram>,
    pipelines: FxHashMap<PipelineHandle, (PerStage<Option<ProgramHandle>>, String)>,
    buffers: FxHashMap<BufferHandle, Vec<u8>>,
    bound_buffers: FxHashMap<(BufferTarget, u32), BufferHandle>,
    current_program: Option<ProgramHandle>,
    current_pipeline: Option<PipelineHandle>,
    binary_format: u32,
    fail_links: bool,
    fail_buffer_writes: bool,
    uploads: Vec<UniformUpload>,
    stats: Cell<DriverStats>,
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDriver {
    /// A driver advertising every capability.
    pub fn new() -> Self {
        Self {
            caps: DriverCapabilities::default(),
            next_name: 1,
            shaders: FxHashMap::default(),
            programs: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            buffers: FxHashMap::default(),
            bound_buffers: FxHashMap::default(),
            current_program: None,
            current_pipeline: None,
            binary_format: HEADLESS_BINARY_FORMAT,
            fail_links: false,
            fail_buffer_writes: false,
            uploads: Vec::new(),
            stats: Cell::new(DriverStats::default()),
        }
    }

    pub fn with_capabilities(mut self, caps: DriverCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Make every subsequent link fail.
    pub fn set_fail_links(&mut self, fail: bool) {
        self.fail_links = fail;
    }

    /// Make every subsequent buffer write fail.
    pub fn set_fail_buffer_writes(&mut self, fail: bool) {
        self.fail_buffer_writes = fail;
    }

    /// Change the binary format; binaries tagged with another format are rejected.
    pub fn set_binary_format(&mut self, format: u32) {
        self.binary_format = format;
    }

    pub fn stats(&self) -> DriverStats {
        self.stats.get()
    }

    pub fn uploads(&self) -> &[UniformUpload] {
        &self.uploads
    }

    pub fn take_uploads(&mut self) -> Vec<UniformUpload> {
        std::mem::take(&mut self.uploads)
    }

    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.current_program
    }

    pub fn current_pipeline(&self) -> Option<PipelineHandle> {
        self.current_pipeline
    }

    /// Program bound to `stage` of `pipeline`.
    pub fn pipeline_stage(&self, pipeline: PipelineHandle, stage: StageKind) -> Option<ProgramHandle> {
        self.pipelines.get(&pipeline).and_then(|(stages, _)| stages[stage])
    }

    pub fn is_linked(&self, program: ProgramHandle) -> bool {
        self.programs.get(&program).is_some_and(|p| p.linked)
    }

    pub fn block_binding(&self, program: ProgramHandle, kind: BlockKind, index: u32) -> Option<u32> {
        self.programs
            .get(&program)
            .and_then(|p| p.block_bindings.get(&(kind, index)).copied())
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn bound_buffer(&self, target: BufferTarget, binding: u32) -> Option<BufferHandle> {
        self.bound_buffers.get(&(target, binding)).copied()
    }

    /// Shaders, programs and pipelines not yet deleted.
    pub fn live_objects(&self) -> usize {
        self.shaders.len() + self.programs.len() + self.pipelines.len()
    }

    fn bump(&self, f: impl FnOnce(&mut DriverStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn next_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn record(&mut self, upload: UniformUpload) {
        self.bump(|s| s.uniform_uploads += 1);
        self.uploads.push(upload);
    }
}

// ---------------------------------------------------------------------------
// Source reflection
// ---------------------------------------------------------------------------

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while !rest.is_empty() {
        let line_comment = rest.find("//");
        let block_comment = rest.find("/*");
        match (line_comment, block_comment) {
            (Some(l), b) if b.map_or(true, |b| l < b) => {
                out.push_str(&rest[..l]);
                rest = rest[l..].find('\n').map_or("", |nl| &rest[l + nl..]);
            }
            (_, Some(b)) => {
                out.push_str(&rest[..b]);
                out.push(' ');
                rest = rest[b + 2..].find("*/").map_or("", |end| &rest[b + 2 + end + 2..]);
            }
            _ => {
                out.push_str(rest);
                rest = "";
            }
        }
    }
    out
}

/// Split into top-level statements, keeping `uniform`/`buffer` blocks whole.
fn statements(source: &str) -> Vec<String> {
    let code: String = source
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in code.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
                let head = current.trim_start();
                if depth == 0 && !(is_interface_head(head)) {
                    out.push(std::mem::take(&mut current));
                }
            }
            ';' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.into_iter()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_interface_head(head: &str) -> bool {
    let head = skip_layout(head).0;
    head.starts_with("uniform ") || head.starts_with("buffer ")
}

/// Strip a leading `layout(...)` and return the `binding` it names.
fn skip_layout(statement: &str) -> (&str, Option<u32>) {
    let trimmed = statement.trim_start();
    if !trimmed.starts_with("layout") {
        return (trimmed, None);
    }
    let (Some(open), Some(close)) = (trimmed.find('('), trimmed.find(')')) else {
        return (trimmed, None);
    };
    let binding = trimmed[open + 1..close].split(',').find_map(|q| {
        let (key, value) = q.split_once('=')?;
        (key.trim() == "binding").then(|| value.trim().parse().ok()).flatten()
    });
    (trimmed[close + 1..].trim_start(), binding)
}

fn split_array(declarator: &str) -> (&str, usize) {
    match declarator.find('[') {
        Some(open) => {
            let size = declarator[open..]
                .split(['[', ']'])
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse::<usize>().unwrap_or(1))
                .product();
            (declarator[..open].trim(), size)
        }
        None => (declarator.trim(), 1),
    }
}

fn count_identifier(text: &str, ident: &str) -> usize {
    let is_ident = |c: char| c == '_' || c.is_ascii_alphanumeric();
    text.match_indices(ident)
        .filter(|(at, _)| {
            let before = text[..*at].chars().next_back();
            let after = text[at + ident.len()..].chars().next();
            !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
        })
        .count()
}

/// Lay out one block member after `*end` under std140 rules and advance `*end`.
fn std140_member(name: String, ty: ConstantType, array_size: usize, end: &mut u32) -> BlockMember {
    let scalar = if ty.storage() == glink_core::Storage::Double { 8 } else { 4 };
    let round16 = |bytes: u32| bytes.div_ceil(16) * 16;

    let (align, element, matrix_stride) = match ty.matrix_dims() {
        Some((cols, rows)) => {
            let column = round16(rows as u32 * scalar);
            (column, cols as u32 * column, column)
        }
        None => {
            let components = ty.element_size() as u32;
            let vector = if components == 3 { 4 } else { components };
            (vector * scalar, components * scalar, 0)
        }
    };
    let (align, array_stride) = if array_size > 1 {
        (round16(align), round16(element))
    } else {
        (align, 0)
    };

    let offset = end.div_ceil(align) * align;
    *end = offset + if array_size > 1 { array_stride * array_size as u32 } else { element };
    BlockMember { name, offset, array_stride, matrix_stride }
}

fn reflect_sources(sources: &[(StageKind, String)]) -> (Vec<ActiveUniform>, Vec<ActiveBlock>) {
    let stripped: Vec<String> = sources.iter().map(|(_, s)| strip_comments(s)).collect();
    let all_text = stripped.join("\n");

    let mut uniforms: Vec<ActiveUniform> = Vec::new();
    let mut blocks: Vec<ActiveBlock> = Vec::new();
    let mut declarations: FxHashMap<String, usize> = FxHashMap::default();
    let mut atomic_offsets: FxHashMap<u32, u32> = FxHashMap::default();

    let mut pending = Vec::new();
    for text in &stripped {
        for statement in statements(text) {
            let (body, binding) = skip_layout(&statement);
            let (keyword, rest) = body.split_once(' ').unwrap_or((body, ""));
            if keyword != "uniform" && keyword != "buffer" {
                continue;
            }

            if let (Some(open), Some(close)) = (rest.find('{'), rest.rfind('}')) {
                let kind = if keyword == "buffer" { BlockKind::Storage } else { BlockKind::Uniform };
                let name = rest[..open].trim().to_owned();
                if blocks.iter().any(|b| b.kind == kind && b.name == name) {
                    continue;
                }
                let mut end = 0;
                let members = rest[open + 1..close]
                    .split(';')
                    .filter_map(|m| {
                        let mut words = m.split_whitespace().filter(|w| !matches!(*w, "lowp" | "mediump" | "highp"));
                        let ty = ConstantType::from_glsl(words.next()?)?;
                        let declarator: String = words.collect();
                        let (member, array_size) = split_array(&declarator);
                        Some(std140_member(format!("{name}.{member}"), ty, array_size, &mut end))
                    })
                    .collect();
                blocks.push(ActiveBlock {
                    kind,
                    index: blocks.iter().filter(|b| b.kind == kind).count() as u32,
                    name,
                    data_size: end.div_ceil(16) as usize * 16,
                    members,
                });
                continue;
            }

            if keyword != "uniform" {
                continue;
            }
            let mut words = rest.split_whitespace().filter(|w| !matches!(*w, "lowp" | "mediump" | "highp"));
            let Some(type_name) = words.next() else { continue };
            let Some(const_type) = ConstantType::from_glsl(type_name) else { continue };
            let declarators: String = words.collect::<Vec<_>>().join(" ");
            for declarator in declarators.split(',') {
                let declarator = declarator.split('=').next().unwrap_or_default();
                let (name, array_size) = split_array(declarator);
                if name.is_empty() {
                    continue;
                }
                *declarations.entry(name.to_owned()).or_default() += 1;
                pending.push((name.to_owned(), const_type, array_size, type_name == "atomic_uint", binding));
            }
        }
    }

    for (name, const_type, array_size, is_atomic, binding) in pending {
        if uniforms.iter().any(|u| u.name.trim_end_matches("[0]") == name) {
            continue;
        }
        if count_identifier(&all_text, &name) <= declarations.get(&name).copied().unwrap_or(0) {
            trace!(name, "uniform never referenced, eliminated");
            continue;
        }
        let reported = if array_size > 1 { format!("{name}[0]") } else { name };
        let atomic = is_atomic.then(|| {
            let binding = binding.unwrap_or(0);
            let offset = atomic_offsets.entry(binding).or_default();
            let slot = AtomicCounterSlot { binding, offset: *offset };
            *offset += 4 * array_size as u32;
            slot
        });
        let location = if atomic.is_some() {
            -1
        } else {
            uniforms.iter().filter(|u| u.location >= 0).count() as i32
        };
        uniforms.push(ActiveUniform {
            name: reported,
            const_type,
            array_size,
            location,
            atomic,
        });
    }

    (uniforms, blocks)
}

fn encode_binary(sources: &[(StageKind, String)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (kind, source) in sources {
        bytes.push(*kind as u8);
        bytes.extend_from_slice(&(source.len() as u32).to_le_bytes());
        bytes.extend_from_slice(source.as_bytes());
    }
    bytes
}

fn decode_binary(mut bytes: &[u8]) -> Option<Vec<(StageKind, String)>> {
    let mut sources = Vec::new();
    while !bytes.is_empty() {
        let kind = StageKind::from_u8(*bytes.first()?)?;
        let len = u32::from_le_bytes(bytes.get(1..5)?.try_into().ok()?) as usize;
        let source = std::str::from_utf8(bytes.get(5..5 + len)?).ok()?;
        sources.push((kind, source.to_owned()));
        bytes = &bytes[5 + len..];
    }
    Some(sources)
}

// ---------------------------------------------------------------------------
// Driver implementation
// ---------------------------------------------------------------------------

impl Driver for HeadlessDriver {
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
        self.bump(|s| s.shaders_created += 1);
        let handle = ShaderHandle(self.next_name());
        self.shaders.insert(
            handle,
            HeadlessShader {
                kind,
                compiled: false,
                source: String::new(),
                log: String::new(),
            },
        );
        Ok(handle)
    }

    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> bool {
        self.bump(|s| s.shader_compiles += 1);
        let Some(entry) = self.shaders.get_mut(&shader) else {
            return false;
        };
        entry.source = source.to_owned();
        let error = source
            .lines()
            .enumerate()
            .find(|(_, l)| l.trim_start().starts_with("#error"));
        match error {
            Some((line, text)) => {
                let message = text.trim_start().trim_start_matches("#error").trim();
                entry.log = format!("0:{}: error: {message}", line + 1);
                entry.compiled = false;
            }
            None => {
                entry.log.clear();
                entry.compiled = true;
            }
        }
        entry.compiled
    }

    fn shader_info_log(&self, shader: ShaderHandle) -> String {
        self.shaders.get(&shader).map(|s| s.log.clone()).unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        if self.shaders.remove(&shader).is_some() {
            self.bump(|s| s.objects_deleted += 1);
        }
    }

    fn create_program(&mut self) -> Result<ProgramHandle> {
        self.bump(|s| s.programs_created += 1);
        let handle = ProgramHandle(self.next_name());
        self.programs.insert(handle, HeadlessProgram::default());
        Ok(handle)
    }

    fn set_program_separable(&mut self, program: ProgramHandle, separable: bool) {
        if let Some(p) = self.programs.get_mut(&program) {
            p.separable = separable;
        }
    }

    fn set_binary_retrievable(&mut self, program: ProgramHandle) {
        if let Some(p) = self.programs.get_mut(&program) {
            p.retrievable = true;
        }
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let Some(p) = self.programs.get_mut(&program) {
            p.shaders.push(shader);
        }
    }

    fn link_program(&mut self, program: ProgramHandle) -> bool {
        self.bump(|s| s.program_links += 1);
        let fail_links = self.fail_links;
        let mut sources = Vec::new();
        let mut log = String::new();
        if let Some(p) = self.programs.get(&program) {
            for shader in &p.shaders {
                match self.shaders.get(shader) {
                    Some(s) if s.compiled => sources.push((s.kind, s.source.clone())),
                    _ => log = format!("error: attached shader {} is not compiled", shader.raw()),
                }
            }
        }
        if sources.is_empty() && log.is_empty() {
            log = "error: no shaders attached".to_owned();
        }
        if fail_links && log.is_empty() {
            log = "error: link rejected by driver".to_owned();
        }

        let Some(p) = self.programs.get_mut(&program) else {
            return false;
        };
        p.linked = log.is_empty();
        p.log = log;
        if p.linked {
            let (uniforms, blocks) = reflect_sources(&sources);
            p.uniforms = uniforms;
            p.blocks = blocks;
            p.sources = sources;
        }
        p.linked
    }

    fn validate_program(&mut self, program: ProgramHandle) -> bool {
        self.bump(|s| s.program_validations += 1);
        self.is_linked(program)
    }

    fn program_info_log(&self, program: ProgramHandle) -> String {
        self.programs.get(&program).map(|p| p.log.clone()).unwrap_or_default()
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            self.bump(|s| s.objects_deleted += 1);
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.current_program = program;
    }

    fn program_binary(&self, program: ProgramHandle) -> Option<ProgramBinary> {
        let p = self.programs.get(&program)?;
        if !self.caps.program_binary || !p.linked {
            return None;
        }
        self.bump(|s| s.binary_retrievals += 1);
        Some(ProgramBinary {
            format: self.binary_format,
            bytes: encode_binary(&p.sources),
        })
    }

    fn load_program_binary(&mut self, program: ProgramHandle, binary: &ProgramBinary) -> bool {
        self.bump(|s| s.binary_loads += 1);
        let decoded = (self.caps.program_binary && binary.format == self.binary_format)
            .then(|| decode_binary(&binary.bytes))
            .flatten();
        let Some(p) = self.programs.get_mut(&program) else {
            return false;
        };
        match decoded {
            Some(sources) => {
                let (uniforms, blocks) = reflect_sources(&sources);
                p.uniforms = uniforms;
                p.blocks = blocks;
                p.sources = sources;
                p.linked = true;
                p.log.clear();
                true
            }
            None => {
                p.linked = false;
                p.log = format!("error: binary format {:#x} not supported", binary.format);
                self.bump(|s| s.binary_rejects += 1);
                false
            }
        }
    }

    fn create_pipeline(&mut self) -> Result<PipelineHandle> {
        if !self.caps.separate_shader_objects {
            bail!("program pipelines are not supported");
        }
        self.bump(|s| s.pipelines_created += 1);
        let handle = PipelineHandle(self.next_name());
        self.pipelines.insert(handle, (PerStage::default(), String::new()));
        Ok(handle)
    }

    fn use_program_stages(&mut self, pipeline: PipelineHandle, stage: StageKind, program: ProgramHandle) {
        if let Some((stages, _)) = self.pipelines.get_mut(&pipeline) {
            stages[stage] = Some(program);
        }
    }

    fn validate_pipeline(&mut self, pipeline: PipelineHandle) -> bool {
        self.bump(|s| s.pipeline_validations += 1);
        let Some((stages, _)) = self.pipelines.get(&pipeline) else {
            return false;
        };
        let unlinked: Vec<StageKind> = stages
            .present()
            .filter(|(_, p)| !self.is_linked(**p))
            .map(|(k, _)| k)
            .collect();
        let ok = !stages.is_empty() && unlinked.is_empty();
        let log = if ok {
            String::new()
        } else if stages.is_empty() {
            "error: pipeline has no stages".to_owned()
        } else {
            format!("error: stages {unlinked:?} are not linked")
        };
        if let Some((_, slot)) = self.pipelines.get_mut(&pipeline) {
            *slot = log;
        }
        ok
    }

    fn pipeline_info_log(&self, pipeline: PipelineHandle) -> String {
        self.pipelines.get(&pipeline).map(|(_, log)| log.clone()).unwrap_or_default()
    }

    fn bind_pipeline(&mut self, pipeline: Option<PipelineHandle>) {
        self.current_pipeline = pipeline;
    }

    fn delete_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.pipelines.remove(&pipeline).is_some() {
            self.bump(|s| s.objects_deleted += 1);
        }
        if self.current_pipeline == Some(pipeline) {
            self.current_pipeline = None;
        }
    }

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform> {
        self.bump(|s| s.reflection_queries += 1);
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn active_blocks(&self, program: ProgramHandle, kind: BlockKind) -> Vec<ActiveBlock> {
        self.bump(|s| s.reflection_queries += 1);
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .map(|p| p.blocks.iter().filter(|b| b.kind == kind).cloned().collect())
            .unwrap_or_default()
    }

    fn set_block_binding(&mut self, program: ProgramHandle, kind: BlockKind, index: u32, binding: u32) {
        if let Some(p) = self.programs.get_mut(&program) {
            p.block_bindings.insert((kind, index), binding);
        }
    }

    fn uniform_f32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[f32]) {
        self.record(UniformUpload {
            program,
            location,
            components,
            matrix: None,
            transpose: false,
            values: UploadValues::F32(data.to_vec()),
        });
    }

    fn uniform_f64(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[f64]) {
        self.record(UniformUpload {
            program,
            location,
            components,
            matrix: None,
            transpose: false,
            values: UploadValues::F64(data.to_vec()),
        });
    }

    fn uniform_i32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[i32]) {
        self.record(UniformUpload {
            program,
            location,
            components,
            matrix: None,
            transpose: false,
            values: UploadValues::I32(data.to_vec()),
        });
    }

    fn uniform_u32(&mut self, program: ProgramHandle, location: i32, components: u8, data: &[u32]) {
        self.record(UniformUpload {
            program,
            location,
            components,
            matrix: None,
            transpose: false,
            values: UploadValues::U32(data.to_vec()),
        });
    }

    fn uniform_matrix_f32(
        &mut self,
        program: ProgramHandle,
        location: i32,
        dims: (u8, u8),
        transpose: bool,
        data: &[f32],
    ) {
        self.record(UniformUpload {
            program,
            location,
            components: dims.0 * dims.1,
            matrix: Some(dims),
            transpose,
            values: UploadValues::F32(data.to_vec()),
        });
    }

    fn uniform_matrix_f64(
        &mut self,
        program: ProgramHandle,
        location: i32,
        dims: (u8, u8),
        transpose: bool,
        data: &[f64],
    ) {
        self.record(UniformUpload {
            program,
            location,
            components: dims.0 * dims.1,
            matrix: Some(dims),
            transpose,
            values: UploadValues::F64(data.to_vec()),
        });
    }

    fn create_buffer(&mut self, _target: BufferTarget, size: usize) -> Result<BufferHandle> {
        let handle = BufferHandle(self.next_name());
        self.buffers.insert(handle, vec![0; size]);
        Ok(handle)
    }

    fn buffer_sub_data(&mut self, _target: BufferTarget, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        if self.fail_buffer_writes {
            bail!("buffer write rejected by driver");
        }
        let contents = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| anyhow!("unknown buffer {}", buffer.raw()))?;
        let range = contents
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| anyhow!("write of {} bytes at {offset} overruns buffer", data.len()))?;
        range.copy_from_slice(data);
        self.bump(|s| s.buffer_writes += 1);
        Ok(())
    }

    fn bind_buffer_base(&mut self, target: BufferTarget, binding: u32, buffer: BufferHandle) {
        self.bound_buffers.insert((target, binding), buffer);
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.bound_buffers.retain(|_, b| *b != buffer);
    }

    fn reset(&mut self) {
        self.current_program = None;
        self.current_pipeline = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn link(driver: &mut HeadlessDriver, stages: &[(StageKind, &str)]) -> ProgramHandle {
        let program = driver.create_program().unwrap();
        for (kind, source) in stages {
            let shader = driver.create_shader(*kind).unwrap();
            assert!(driver.compile_shader(shader, source));
            driver.attach_shader(program, shader);
        }
        assert!(driver.link_program(program));
        program
    }

    #[test]
    fn error_directive_fails_compile() {
        let mut driver = HeadlessDriver::new();
        let shader = driver.create_shader(StageKind::Fragment).unwrap();
        assert!(!driver.compile_shader(shader, "void main() {}\n#error missing input\n"));
        assert_eq!(driver.shader_info_log(shader), "0:2: error: missing input");
        assert_eq!(driver.stats().shader_compiles, 1);
    }

    #[test]
    fn unreferenced_uniforms_are_eliminated() {
        let mut driver = HeadlessDriver::new();
        let program = link(
            &mut driver,
            &[(
                StageKind::Fragment,
                "uniform vec4 tint;\nuniform float unused;\nuniform mat4 bones[4];\n\
                 void main() { gl_FragColor = tint * bones[1][0]; }",
            )],
        );
        let names: Vec<_> = driver
            .active_uniforms(program)
            .into_iter()
            .map(|u| (u.name, u.location, u.array_size))
            .collect();
        assert_eq!(
            names,
            vec![("tint".to_owned(), 0, 1), ("bones[0]".to_owned(), 1, 4)]
        );
    }

    #[test]
    fn blocks_and_atomic_counters_are_reflected() {
        let mut driver = HeadlessDriver::new();
        let program = link(
            &mut driver,
            &[(
                StageKind::Compute,
                "layout(binding = 2) uniform atomic_uint hits;\n\
                 layout(std140) uniform Frame { vec4 color; float time; } frame;\n\
                 buffer Particles { vec4 positions[64]; };\n\
                 void main() { atomicCounterIncrement(hits); }",
            )],
        );
        let uniforms = driver.active_uniforms(program);
        assert_eq!(uniforms.len(), 1);
        assert_eq!(uniforms[0].atomic, Some(AtomicCounterSlot { binding: 2, offset: 0 }));

        let blocks = driver.active_blocks(program, BlockKind::Uniform);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "Frame");
        assert_eq!(
            blocks[0].members,
            vec![
                BlockMember { name: "Frame.color".into(), offset: 0, array_stride: 0, matrix_stride: 0 },
                BlockMember { name: "Frame.time".into(), offset: 16, array_stride: 0, matrix_stride: 0 },
            ]
        );
        assert_eq!(driver.active_blocks(program, BlockKind::Storage)[0].data_size, 64 * 16);
    }

    #[test]
    fn block_members_follow_std140_strides() {
        let mut driver = HeadlessDriver::new();
        let program = link(
            &mut driver,
            &[(
                StageKind::Fragment,
                "layout(std140) uniform Shading { float weights[4]; mat3 basis; vec3 axis; float bias; vec2 uv; };
                 out vec4 o;
                 void main() { o = vec4(axis * basis, weights[1] + bias + uv.x); }",
            )],
        );

        let block = &driver.active_blocks(program, BlockKind::Uniform)[0];
        let layout: Vec<_> = block
            .members
            .iter()
            .map(|m| (m.name.as_str(), m.offset, m.array_stride, m.matrix_stride))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("Shading.weights", 0, 16, 0),
                ("Shading.basis", 64, 0, 16),
                ("Shading.axis", 112, 0, 0),
                ("Shading.bias", 124, 0, 0),
                ("Shading.uv", 128, 0, 0),
            ]
        );
        assert_eq!(block.data_size, 144);
    }

    #[test]
    fn binaries_are_rejected_after_format_change() {
        let mut driver = HeadlessDriver::new();
        let program = link(
            &mut driver,
            &[(StageKind::Vertex, "uniform mat4 mvp;\nvoid main() { gl_Position = mvp[0]; }")],
        );
        let binary = driver.program_binary(program).unwrap();

        let reloaded = driver.create_program().unwrap();
        assert!(driver.load_program_binary(reloaded, &binary));
        assert_eq!(driver.active_uniforms(reloaded).len(), 1);

        driver.set_binary_format(HEADLESS_BINARY_FORMAT + 1);
        let stale = driver.create_program().unwrap();
        assert!(!driver.load_program_binary(stale, &binary));
        assert_eq!(driver.stats().binary_rejects, 1);
    }
}
