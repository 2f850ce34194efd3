//! Linked programs and the two strategies that produce them.
//!
//! A [`LinkedProgram`] is created for every distinct stage tuple the cache
//! sees and linked on its first activation. How the stages become a bindable
//! object is up to the [`LinkStrategy`]:
//!
//! - [`MonolithicLink`] attaches every stage to one program and links once.
//! - [`SeparableLink`] links each stage into its own separable program and
//!   assembles them in a program pipeline.
//!
//! Both produce [`ProgramHandles`]; everything downstream (reflection,
//! binders) works from those and never asks which strategy ran.

mod monolithic;
mod separable;

use std::rc::{Rc, Weak};

use glink_core::{PerStage, PipelineHandle, ProgramHandle, ProgramParameters, StageKind, StageMask};
use glink_driver::Driver;
use tracing::{debug, error};

use crate::binary_cache::BinaryCache;
use crate::blocks::BlockBindings;
use crate::config::BinaryCacheConfig;
use crate::error::LinkError;
use crate::key::{CacheKey, StageTuple};
use crate::reflect::{self, AtomicCounterReference, BlockReference, ProgramReferences, UniformReference};
use crate::stage::Stage;

pub use monolithic::MonolithicLink;
pub use separable::SeparableLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unlinked,
    Linking,
    Linked,
    /// Terminal until the cache is cleared.
    FailedToLink,
}

/// Driver objects owned by one linked program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProgramHandles {
    #[default]
    None,
    Monolithic(ProgramHandle),
    /// Stage programs belong to their stages; only the pipeline is owned here.
    Separable {
        pipeline: PipelineHandle,
        programs: PerStage<Option<ProgramHandle>>,
    },
}

impl ProgramHandles {
    /// The program that owns uniform locations for `stage`.
    pub fn program_for(&self, stage: StageKind) -> Option<ProgramHandle> {
        match self {
            ProgramHandles::None => None,
            ProgramHandles::Monolithic(program) => Some(*program),
            ProgramHandles::Separable { programs, .. } => programs[stage],
        }
    }

    /// Each program to reflect, with the stages its uniforms may belong to.
    pub(crate) fn reflection_units(&self, present: StageMask) -> Vec<(ProgramHandle, StageMask)> {
        match self {
            ProgramHandles::None => Vec::new(),
            ProgramHandles::Monolithic(program) => vec![(*program, present)],
            ProgramHandles::Separable { programs, .. } => programs
                .present()
                .map(|(kind, program)| (*program, StageMask::single(kind)))
                .collect(),
        }
    }

    fn delete(&self, driver: &mut dyn Driver) {
        match self {
            ProgramHandles::None => {}
            ProgramHandles::Monolithic(program) => driver.delete_program(*program),
            ProgramHandles::Separable { pipeline, .. } => driver.delete_pipeline(*pipeline),
        }
    }
}

/// Everything a strategy may touch while linking.
pub struct LinkEnv<'a> {
    pub driver: &'a mut dyn Driver,
    pub binaries: &'a mut BinaryCache,
    pub binary_config: &'a BinaryCacheConfig,
    pub block_bindings: &'a mut BlockBindings,
}

impl LinkEnv<'_> {
    pub(crate) fn load_binaries(&self) -> bool {
        self.binary_config.enabled && self.driver.capabilities().program_binary
    }

    pub(crate) fn save_binaries(&self) -> bool {
        self.binary_config.enabled && self.binary_config.save && self.driver.capabilities().program_binary
    }
}

/// Turns a set of stages into driver objects and makes them current.
pub trait LinkStrategy {
    fn name(&self) -> &'static str;

    fn is_separable(&self) -> bool;

    /// Link `stages`. On failure every object created here is deleted again.
    fn link(&self, env: &mut LinkEnv<'_>, stages: &PerStage<Option<Rc<Stage>>>) -> Result<ProgramHandles, LinkError>;

    /// Make `handles` the target of subsequent draws.
    fn bind(&self, driver: &mut dyn Driver, handles: &ProgramHandles);
}

/// `vertex+fragment` style label used in logs and errors.
pub(crate) fn program_label(stages: &PerStage<Option<Rc<Stage>>>) -> String {
    stages
        .present()
        .map(|(_, stage)| stage.name())
        .collect::<Vec<_>>()
        .join("+")
}

/// One cache entry: a stage tuple and what linking it produced.
#[derive(Debug)]
pub struct LinkedProgram {
    key: CacheKey,
    tuple: StageTuple,
    stages: PerStage<Option<Weak<Stage>>>,
    column_major: PerStage<Option<bool>>,
    label: String,
    state: LinkState,
    failure: Option<LinkError>,
    handles: ProgramHandles,
    references: Option<ProgramReferences>,
}

impl LinkedProgram {
    pub(crate) fn new(key: CacheKey, tuple: StageTuple, stages: &PerStage<Option<Rc<Stage>>>) -> Self {
        Self {
            key,
            tuple,
            stages: stages.map(|_, slot| slot.as_ref().map(Rc::downgrade)),
            column_major: stages.map(|_, slot| slot.as_ref().map(|s| s.column_major())),
            label: program_label(stages),
            state: LinkState::Unlinked,
            failure: None,
            handles: ProgramHandles::None,
            references: None,
        }
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn tuple(&self) -> &StageTuple {
        &self.tuple
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn failure(&self) -> Option<&LinkError> {
        self.failure.as_ref()
    }

    pub fn handles(&self) -> &ProgramHandles {
        &self.handles
    }

    pub fn references_built(&self) -> bool {
        self.references.is_some()
    }

    pub fn uniforms(&self) -> &[UniformReference] {
        match &self.references {
            Some(references) => &references.uniforms,
            None => &[],
        }
    }

    pub fn atomic_counters(&self) -> &[AtomicCounterReference] {
        match &self.references {
            Some(references) => &references.atomic_counters,
            None => &[],
        }
    }

    pub fn blocks(&self) -> &[BlockReference] {
        match &self.references {
            Some(references) => &references.blocks,
            None => &[],
        }
    }

    pub fn uses_stage(&self, stage: &Stage) -> bool {
        self.tuple.contains(stage.id())
    }

    /// Stages whose constant table `params` was created from.
    pub(crate) fn stages_owning(&self, params: &ProgramParameters) -> StageMask {
        self.stages
            .present()
            .filter(|(_, stage)| {
                stage
                    .upgrade()
                    .and_then(|stage| stage.named_constants().ok())
                    .is_some_and(|table| params.is_built_from(&table))
            })
            .map(|(kind, _)| kind)
            .collect()
    }

    /// Transpose flag for matrices uploaded through `stage`.
    ///
    /// Set unless some *other* stage in the program declares row-major
    /// matrices.
    pub fn transpose_for(&self, stage: StageKind) -> bool {
        self.column_major
            .present()
            .filter(|(kind, _)| *kind != stage)
            .all(|(_, column_major)| *column_major)
    }

    /// Link if needed, build references once, and bind.
    ///
    /// A program that failed before returns the same error without any
    /// driver call.
    pub(crate) fn activate(&mut self, strategy: &dyn LinkStrategy, env: &mut LinkEnv<'_>) -> Result<(), LinkError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let stages = self.upgrade_stages()?;

        if self.state == LinkState::Unlinked {
            self.state = LinkState::Linking;
            debug!(program = %self.label, strategy = strategy.name(), "linking program");
            match strategy.link(env, &stages) {
                Ok(handles) => {
                    self.handles = handles;
                    self.state = LinkState::Linked;
                }
                Err(err) => return Err(self.fail(err)),
            }
        }

        if self.references.is_none() {
            match reflect::build_references(env.driver, env.block_bindings, &self.handles, &stages) {
                Ok(references) => self.references = Some(references),
                Err(err) => return Err(self.fail(err)),
            }
        }

        strategy.bind(env.driver, &self.handles);
        Ok(())
    }

    fn fail(&mut self, err: LinkError) -> LinkError {
        error!(program = %self.label, %err, "program is unusable");
        self.state = LinkState::FailedToLink;
        self.failure = Some(err.clone());
        err
    }

    fn upgrade_stages(&self) -> Result<PerStage<Option<Rc<Stage>>>, LinkError> {
        let mut stages = PerStage::default();
        for (kind, id) in self.tuple.iter() {
            let stage = self.stages[kind]
                .as_ref()
                .and_then(Weak::upgrade)
                .ok_or(LinkError::StageReleased { id })?;
            stages[kind] = Some(stage);
        }
        Ok(stages)
    }

    /// Stages of this program that are still alive.
    pub(crate) fn live_stages(&self) -> Vec<Rc<Stage>> {
        self.stages.present().filter_map(|(_, stage)| stage.upgrade()).collect()
    }

    /// Delete owned driver objects and return to `Unlinked`.
    pub(crate) fn release(&mut self, driver: &mut dyn Driver) {
        self.handles.delete(driver);
        self.handles = ProgramHandles::None;
        self.references = None;
        self.failure = None;
        self.state = LinkState::Unlinked;
    }
}
