//! Individually compiled shader stages.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use glink_core::{NamedConstants, ProgramHandle, ShaderHandle, StageKind};
use glink_driver::Driver;
use once_cell::unsync::OnceCell;
use tracing::{debug, error};

use crate::error::LinkError;
use crate::glsl;
use crate::preprocess::{self, Defines};
use crate::reflect;

static NEXT_STAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stage identity. Never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u64);

impl StageId {
    fn next() -> Self {
        Self(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({})", self.0)
    }
}

#[derive(Debug, Clone)]
enum CompileState {
    NotCompiled,
    Compiled(ShaderHandle),
    Failed(LinkError),
}

/// Per-stage program state, used only by separable linking.
#[derive(Debug, Clone)]
pub(crate) enum StageProgram {
    Unlinked,
    Linked(ProgramHandle),
    Failed(LinkError),
}

/// One shader stage: source, defines, and the driver objects built from them.
///
/// Shared as `Rc<Stage>` between the active stage set and the material layer.
/// Driver objects are created on first use and must be released through
/// [`LinkContext::release_stage`](crate::LinkContext::release_stage).
pub struct Stage {
    id: StageId,
    name: String,
    kind: StageKind,
    source: String,
    defines: Defines,
    column_major: bool,
    expanded: OnceCell<String>,
    constants: OnceCell<Rc<NamedConstants>>,
    compile: RefCell<CompileState>,
    separable: RefCell<StageProgram>,
    compiles: Cell<usize>,
}

impl Stage {
    pub fn new(kind: StageKind, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: StageId::next(),
            name: name.into(),
            kind,
            source: source.into(),
            defines: Defines::default(),
            column_major: true,
            expanded: OnceCell::new(),
            constants: OnceCell::new(),
            compile: RefCell::new(CompileState::NotCompiled),
            separable: RefCell::new(StageProgram::Unlinked),
            compiles: Cell::new(0),
        }
    }

    /// Set the define list, e.g. `"SHADOWS;QUALITY=2"`.
    pub fn with_defines(mut self, defines: &str) -> Self {
        self.defines = Defines::parse(defines);
        self
    }

    /// Whether this stage declares matrices column-major (the default).
    pub fn with_column_major(mut self, column_major: bool) -> Self {
        self.column_major = column_major;
        self
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn defines(&self) -> &Defines {
        &self.defines
    }

    pub fn column_major(&self) -> bool {
        self.column_major
    }

    /// The source after define expansion.
    pub fn expanded_source(&self) -> Result<&str, LinkError> {
        self.expanded
            .get_or_try_init(|| {
                preprocess::preprocess(&self.source, &self.defines).map_err(|source| LinkError::Preprocess {
                    stage: self.name.clone(),
                    kind: self.kind,
                    source,
                })
            })
            .map(String::as_str)
    }

    /// Constants declared by the expanded source, scanned once.
    pub fn named_constants(&self) -> Result<Rc<NamedConstants>, LinkError> {
        self.constants
            .get_or_try_init(|| {
                let constants = reflect::scan_source(self.expanded_source()?);
                debug!(stage = %self.name, count = constants.len(), "scanned stage constants");
                Ok(Rc::new(constants))
            })
            .cloned()
    }

    pub fn is_compiled(&self) -> bool {
        matches!(*self.compile.borrow(), CompileState::Compiled(_))
    }

    /// The failure recorded by the last compile attempt, if it failed.
    pub fn compile_error(&self) -> Option<LinkError> {
        match &*self.compile.borrow() {
            CompileState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Times this stage has been handed to the driver compiler.
    pub fn compile_count(&self) -> usize {
        self.compiles.get()
    }

    /// Compile once; later calls return the cached shader or the cached failure.
    pub(crate) fn compile(&self, driver: &mut dyn Driver, separable: bool) -> Result<ShaderHandle, LinkError> {
        match &*self.compile.borrow() {
            CompileState::Compiled(shader) => return Ok(*shader),
            CompileState::Failed(err) => return Err(err.clone()),
            CompileState::NotCompiled => {}
        }

        let result = self.compile_now(driver, separable);
        *self.compile.borrow_mut() = match &result {
            Ok(shader) => CompileState::Compiled(*shader),
            Err(err) => CompileState::Failed(err.clone()),
        };
        result
    }

    fn compile_now(&self, driver: &mut dyn Driver, separable: bool) -> Result<ShaderHandle, LinkError> {
        let expanded = self.expanded_source()?;
        let source = if separable {
            glsl::with_per_vertex_blocks(expanded, self.kind)
        } else {
            expanded.into()
        };

        let shader = driver.create_shader(self.kind).map_err(LinkError::driver)?;
        self.compiles.set(self.compiles.get() + 1);
        if driver.compile_shader(shader, &source) {
            debug!(stage = %self.name, kind = %self.kind, "compiled stage");
            return Ok(shader);
        }

        let log = driver.shader_info_log(shader);
        driver.delete_shader(shader);
        error!(stage = %self.name, kind = %self.kind, %log, "stage failed to compile");
        Err(LinkError::Compile {
            stage: self.name.clone(),
            kind: self.kind,
            log,
        })
    }

    pub(crate) fn separable_program(&self) -> StageProgram {
        self.separable.borrow().clone()
    }

    pub(crate) fn set_separable_program(&self, state: StageProgram) {
        *self.separable.borrow_mut() = state;
    }

    /// Delete driver objects and forget compile and link results.
    ///
    /// The next use compiles again from source.
    pub(crate) fn release(&self, driver: &mut dyn Driver) {
        if let CompileState::Compiled(shader) = self.compile.replace(CompileState::NotCompiled) {
            driver.delete_shader(shader);
        }
        if let StageProgram::Linked(program) = self.separable.replace(StageProgram::Unlinked) {
            driver.delete_program(program);
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("defines", &self.defines)
            .field("column_major", &self.column_major)
            .finish_non_exhaustive()
    }
}
