//! Engine-side parameter model for linked shader programs.
//!
//! Nothing in this crate talks to a driver. It describes what a stage
//! declares and holds the host-side values the binder later uploads:
//!
//! - [`StageKind`] / [`PerStage`] name the six pipeline slots.
//! - [`ConstantType`] and [`NamedConstants`] describe declared uniforms and
//!   their physical layout.
//! - [`ProgramParameters`] stores per-stage values, written by name.
//! - [`SharedParameters`] stores values for named buffer blocks shared
//!   between programs, with per-member dirty tracking.
//! - [`Variability`] masks select which constants an update touches.

pub mod bytes;
pub mod constants;
pub mod error;
pub mod handle;
pub mod params;
pub mod shared;
pub mod stage;
pub mod variability;

pub use bytes::AsBytes;
pub use constants::{BaseType, ConstantDefinition, ConstantType, NamedConstants, Storage};
pub use error::ParamError;
pub use handle::{BufferHandle, PipelineHandle, ProgramHandle, ShaderHandle};
pub use params::{ConstantBuffers, ConstantData, ProgramParameters};
pub use shared::{SharedParameterRegistry, SharedParameters};
pub use stage::{PerStage, StageKind, StageMask};
pub use variability::Variability;
