use crate::constants::{ConstantType, Storage};

/// Expected, recoverable failures when reading or writing parameter values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("no constant named `{0}`")]
    UnknownConstant(String),
    #[error("constant `{name}` is {const_type:?}, which is not stored as {given:?}")]
    TypeMismatch {
        name: String,
        const_type: ConstantType,
        given: Storage,
    },
    #[error("{len} values at element {offset} overrun a {storage:?} buffer of {capacity}")]
    OutOfRange {
        storage: Storage,
        offset: usize,
        len: usize,
        capacity: usize,
    },
}
