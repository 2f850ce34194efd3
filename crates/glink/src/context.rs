use std::rc::Rc;

use glink_core::{ProgramParameters, StageKind, Variability};
use glink_driver::{BlockKind, Driver};
use tracing::{debug, warn};

use crate::active::ActiveStageSet;
use crate::binary_cache::BinaryCache;
use crate::binder;
use crate::blocks::{self, BlockBindings};
use crate::cache::ProgramLinkCache;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::program::{LinkEnv, LinkStrategy, LinkedProgram};
use crate::stage::Stage;

/// Everything one rendering context needs to bind stages and draw.
///
/// Owns the driver, the active stage set and every cached program. Nothing
/// here is global: two contexts never share programs or binding points.
pub struct LinkContext<D: Driver> {
    driver: D,
    config: LinkConfig,
    strategy: Box<dyn LinkStrategy>,
    active: ActiveStageSet,
    cache: ProgramLinkCache,
    binaries: BinaryCache,
    block_bindings: BlockBindings,
}

impl<D: Driver> LinkContext<D> {
    /// Pick a strategy for `driver` and load the binary cache file, if any.
    ///
    /// An unreadable cache file is logged and replaced by an empty cache.
    pub fn new(driver: D, config: LinkConfig) -> Self {
        let caps = driver.capabilities();
        let strategy = config.strategy_for(&caps);

        let binaries = match config.binary_cache.path.as_deref() {
            Some(path) if config.binary_cache.enabled && path.exists() => match BinaryCache::load_from(path) {
                Ok(binaries) => {
                    debug!(path = %path.display(), entries = binaries.len(), "loaded binary cache");
                    binaries
                }
                Err(err) => {
                    warn!(path = %path.display(), "ignoring binary cache: {err:#}");
                    BinaryCache::new()
                }
            },
            _ => BinaryCache::new(),
        };

        debug!(strategy = strategy.name(), ?caps, "created link context");
        Self {
            driver,
            config,
            strategy,
            active: ActiveStageSet::new(),
            cache: ProgramLinkCache::new(),
            binaries,
            block_bindings: BlockBindings::new(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn is_separable(&self) -> bool {
        self.strategy.is_separable()
    }

    pub fn active(&self) -> &ActiveStageSet {
        &self.active
    }

    /// Put `stage` in `kind`'s slot, or empty it.
    ///
    /// Rebinding the stage a slot already holds keeps the current program.
    pub fn set_stage(&mut self, kind: StageKind, stage: Option<Rc<Stage>>) -> bool {
        let changed = self.active.set_stage(kind, stage);
        if changed {
            self.cache.invalidate_current();
        }
        changed
    }

    /// Bind `stage` to its own slot.
    pub fn bind(&mut self, stage: &Rc<Stage>) -> bool {
        self.set_stage(stage.kind(), Some(Rc::clone(stage)))
    }

    pub fn unbind(&mut self, kind: StageKind) -> bool {
        self.set_stage(kind, None)
    }

    /// Resolve the program for the bound stages, link it if needed, and make
    /// it current.
    ///
    /// Returns `Ok(false)` when no stage is bound; the driver is then left
    /// with nothing current.
    pub fn activate_current_program(&mut self) -> Result<bool, LinkError> {
        let Some(program) = self.cache.get_or_create(&self.active) else {
            self.driver.reset();
            return Ok(false);
        };
        let mut env = LinkEnv {
            driver: &mut self.driver,
            binaries: &mut self.binaries,
            binary_config: &self.config.binary_cache,
            block_bindings: &mut self.block_bindings,
        };
        program.activate(self.strategy.as_ref(), &mut env)?;
        Ok(true)
    }

    /// The program last resolved for the bound stages.
    pub fn current_program(&self) -> Option<&LinkedProgram> {
        self.cache.current()
    }

    pub fn update_uniforms(&mut self, params: &ProgramParameters, mask: Variability, stage: StageKind) {
        if let Some(program) = self.cache.current() {
            binder::update_uniforms(&mut self.driver, program, params, mask, stage);
        }
    }

    pub fn update_uniform_blocks(&mut self, params: &ProgramParameters, mask: Variability, stage: StageKind) {
        if let Some(program) = self.cache.current() {
            blocks::update_uniform_blocks(&mut self.driver, program, params, mask, stage);
        }
    }

    pub fn update_atomic_counters(&mut self, params: &ProgramParameters, mask: Variability, stage: StageKind) {
        if let Some(program) = self.cache.current() {
            blocks::update_atomic_counters(&mut self.driver, program, params, mask, stage);
        }
    }

    pub fn update_pass_iteration_uniforms(&mut self, params: &ProgramParameters) {
        if let Some(program) = self.cache.current() {
            binder::update_pass_iteration_uniforms(&mut self.driver, program, params);
        }
    }

    /// A parameter store sized for `stage`'s declared constants.
    ///
    /// Works before any program using the stage has been linked.
    pub fn create_parameters(&self, stage: &Stage) -> Result<ProgramParameters, LinkError> {
        Ok(ProgramParameters::new(stage.named_constants()?))
    }

    /// Drop every cached program that uses `stage`, then the stage's own
    /// driver objects. The stage is unbound if it was bound.
    pub fn release_stage(&mut self, stage: &Stage) {
        let removed = self.cache.remove_using(stage.id());
        debug!(stage = stage.name(), programs = removed.len(), "releasing stage");
        for mut program in removed {
            program.release(&mut self.driver);
        }

        let bound = self.active.get(stage.kind()).is_some_and(|s| s.id() == stage.id());
        if bound {
            self.active.set_stage(stage.kind(), None);
            self.cache.invalidate_current();
        }
        stage.release(&mut self.driver);
    }

    /// Forget every driver object, as after a context loss.
    ///
    /// Programs and stage compile results are discarded and the active set is
    /// emptied. The binary cache is kept so the next links can skip
    /// compilation.
    pub fn clear(&mut self) {
        let mut stages: Vec<Rc<Stage>> = self.active.stages().present().map(|(_, s)| Rc::clone(s)).collect();
        let programs = self.cache.drain();
        debug!(programs = programs.len(), "clearing link context");
        for mut program in programs {
            stages.extend(program.live_stages());
            program.release(&mut self.driver);
        }
        for stage in stages {
            stage.release(&mut self.driver);
        }

        self.active.clear();
        self.block_bindings.clear();
        self.driver.reset();
    }

    pub fn cache(&self) -> &ProgramLinkCache {
        &self.cache
    }

    pub fn binary_cache(&self) -> &BinaryCache {
        &self.binaries
    }

    pub fn binary_cache_mut(&mut self) -> &mut BinaryCache {
        &mut self.binaries
    }

    /// Write the binary cache to the configured path. No path, no write.
    pub fn save_binary_cache(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.config.binary_cache.path {
            self.binaries.save_to(path)?;
            debug!(path = %path.display(), entries = self.binaries.len(), "saved binary cache");
        }
        Ok(())
    }

    pub fn block_binding(&self, kind: BlockKind, name: &str) -> Option<u32> {
        self.block_bindings.get(kind, name)
    }
}
