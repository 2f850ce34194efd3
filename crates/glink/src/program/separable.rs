use std::rc::Rc;

use glink_core::{PerStage, ProgramHandle};
use glink_driver::Driver;
use tracing::{debug, error};

use super::{program_label, LinkEnv, LinkStrategy, ProgramHandles};
use crate::binary_cache::{self, BinaryKey};
use crate::error::LinkError;
use crate::stage::{Stage, StageProgram};

/// Each stage linked into its own separable program, assembled in a
/// program pipeline with no cross-stage link.
///
/// Stage programs are shared by every pipeline that uses the stage, and a
/// stage that fails to link fails every pipeline containing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeparableLink;

impl LinkStrategy for SeparableLink {
    fn name(&self) -> &'static str {
        "separable"
    }

    fn is_separable(&self) -> bool {
        true
    }

    fn link(&self, env: &mut LinkEnv<'_>, stages: &PerStage<Option<Rc<Stage>>>) -> Result<ProgramHandles, LinkError> {
        let pipeline = env.driver.create_pipeline().map_err(LinkError::driver)?;

        let mut programs = PerStage::default();
        for (kind, stage) in stages.present() {
            match link_stage(env, stage) {
                Ok(program) => programs[kind] = Some(program),
                Err(err) => {
                    env.driver.delete_pipeline(pipeline);
                    return Err(err);
                }
            }
        }

        for (kind, program) in programs.present() {
            env.driver.use_program_stages(pipeline, kind, *program);
        }

        if !env.driver.validate_pipeline(pipeline) {
            let label = program_label(stages);
            let log = env.driver.pipeline_info_log(pipeline);
            error!(program = %label, %log, "program pipeline failed validation");
            env.driver.delete_pipeline(pipeline);
            return Err(LinkError::Link { program: label, log });
        }

        Ok(ProgramHandles::Separable { pipeline, programs })
    }

    fn bind(&self, driver: &mut dyn Driver, handles: &ProgramHandles) {
        if let ProgramHandles::Separable { pipeline, .. } = handles {
            driver.use_program(None);
            driver.bind_pipeline(Some(*pipeline));
        }
    }
}

/// The stage's separable program, linking it on first use.
fn link_stage(env: &mut LinkEnv<'_>, stage: &Stage) -> Result<ProgramHandle, LinkError> {
    match stage.separable_program() {
        StageProgram::Linked(program) => return Ok(program),
        StageProgram::Failed(err) => return Err(err),
        StageProgram::Unlinked => {}
    }

    let result = link_stage_now(env, stage);
    stage.set_separable_program(match &result {
        Ok(program) => StageProgram::Linked(*program),
        Err(err) => StageProgram::Failed(err.clone()),
    });
    result
}

fn link_stage_now(env: &mut LinkEnv<'_>, stage: &Stage) -> Result<ProgramHandle, LinkError> {
    let (load, save) = (env.load_binaries(), env.save_binaries());
    let binary_key = if load || save {
        Some(BinaryKey::for_stage(stage)?)
    } else {
        None
    };

    let program = env.driver.create_program().map_err(LinkError::driver)?;
    env.driver.set_program_separable(program, true);
    if save {
        env.driver.set_binary_retrievable(program);
    }

    if let Some(key) = binary_key.as_ref().filter(|_| load) {
        if binary_cache::try_load(env.driver, env.binaries, key, program) {
            return Ok(program);
        }
    }

    let shader = match stage.compile(env.driver, true) {
        Ok(shader) => shader,
        Err(err) => {
            env.driver.delete_program(program);
            return Err(err);
        }
    };
    env.driver.attach_shader(program, shader);

    if !env.driver.link_program(program) {
        let log = env.driver.program_info_log(program);
        error!(stage = stage.name(), kind = %stage.kind(), %log, "separable stage failed to link");
        env.driver.delete_program(program);
        return Err(LinkError::Link {
            program: stage.name().to_owned(),
            log,
        });
    }
    debug!(stage = stage.name(), ?program, "linked separable stage");

    if let Some(key) = binary_key.filter(|_| save) {
        binary_cache::store(env.driver, env.binaries, key, program);
    }
    Ok(program)
}
