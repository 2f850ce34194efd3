use glink_core::StageKind;

use crate::preprocess::PreprocessError;
use crate::stage::StageId;

/// Why a program could not be made current.
///
/// `Clone` so a program that failed once can report the same failure on every
/// later activation without touching the driver again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("{kind} stage `{stage}` failed to compile:\n{log}")]
    Compile {
        stage: String,
        kind: StageKind,
        log: String,
    },
    #[error("program `{program}` failed to link:\n{log}")]
    Link { program: String, log: String },
    #[error("{kind} stage `{stage}` could not be preprocessed: {source}")]
    Preprocess {
        stage: String,
        kind: StageKind,
        #[source]
        source: PreprocessError,
    },
    #[error("stage {id:?} was released while a program still referenced it")]
    StageReleased { id: StageId },
    #[error("driver error: {0}")]
    Driver(String),
}

impl LinkError {
    pub(crate) fn driver(err: anyhow::Error) -> Self {
        LinkError::Driver(format!("{err:#}"))
    }
}
