use std::rc::Rc;

use glink_core::{PerStage, ProgramHandle};
use glink_driver::Driver;
use tracing::{debug, error};

use super::{program_label, LinkEnv, LinkStrategy, ProgramHandles};
use crate::binary_cache::{self, BinaryKey};
use crate::error::LinkError;
use crate::stage::Stage;

/// Every stage attached to one program object, linked in a single step.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonolithicLink;

impl LinkStrategy for MonolithicLink {
    fn name(&self) -> &'static str {
        "monolithic"
    }

    fn is_separable(&self) -> bool {
        false
    }

    fn link(&self, env: &mut LinkEnv<'_>, stages: &PerStage<Option<Rc<Stage>>>) -> Result<ProgramHandles, LinkError> {
        let (load, save) = (env.load_binaries(), env.save_binaries());
        let binary_key = if load || save {
            Some(BinaryKey::for_program(stages.present().map(|(_, s)| s.as_ref()))?)
        } else {
            None
        };

        let program = env.driver.create_program().map_err(LinkError::driver)?;
        if save {
            env.driver.set_binary_retrievable(program);
        }

        if let Some(key) = binary_key.as_ref().filter(|_| load) {
            if binary_cache::try_load(env.driver, env.binaries, key, program) {
                validate(env.driver, program);
                return Ok(ProgramHandles::Monolithic(program));
            }
        }

        if let Err(err) = link_from_source(env.driver, program, stages) {
            env.driver.delete_program(program);
            return Err(err);
        }
        validate(env.driver, program);

        if let Some(key) = binary_key.filter(|_| save) {
            binary_cache::store(env.driver, env.binaries, key, program);
        }
        Ok(ProgramHandles::Monolithic(program))
    }

    fn bind(&self, driver: &mut dyn Driver, handles: &ProgramHandles) {
        if let ProgramHandles::Monolithic(program) = handles {
            driver.bind_pipeline(None);
            driver.use_program(Some(*program));
        }
    }
}

fn link_from_source(
    driver: &mut dyn Driver,
    program: ProgramHandle,
    stages: &PerStage<Option<Rc<Stage>>>,
) -> Result<(), LinkError> {
    for (_, stage) in stages.present() {
        let shader = stage.compile(driver, false)?;
        driver.attach_shader(program, shader);
    }

    if driver.link_program(program) {
        return Ok(());
    }
    let label = program_label(stages);
    let log = driver.program_info_log(program);
    error!(program = %label, %log, "program failed to link");
    Err(LinkError::Link { program: label, log })
}

fn validate(driver: &mut dyn Driver, program: ProgramHandle) {
    let valid = driver.validate_program(program);
    let log = driver.program_info_log(program);
    debug!(?program, valid, %log, "validated program");
}
