//! Shader program link cache and uniform binding.
//!
//! Stages are compiled on their own and bound into six slots. This crate
//! turns each distinct combination of bound stages into one linked program,
//! keeps it for as long as the stages live, and uploads parameter values
//! into the slots that program exposes.
//!
//! # Overview
//!
//! - [`Stage`] is one shader stage: source, defines and its compile state.
//! - [`LinkContext`] owns the driver, the [`ActiveStageSet`] and the
//!   [`ProgramLinkCache`]; it is the entry point for binding, activating and
//!   updating.
//! - [`LinkStrategy`] decides how stages become a bindable object:
//!   [`MonolithicLink`] or [`SeparableLink`].
//! - [`BinaryCache`] keeps linked binaries, optionally on disk, so later
//!   links skip compilation.
//! - [`LinkConfig`] picks the strategy and the binary cache behaviour.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//!
//! use glink::{LinkConfig, LinkContext, Stage, StageKind, Variability};
//! use glink_driver::HeadlessDriver;
//!
//! let mut ctx = LinkContext::new(HeadlessDriver::new(), LinkConfig::default());
//! let vertex = Rc::new(Stage::new(StageKind::Vertex, "quad.vert", "#version 330\nvoid main() {}\n"));
//! let fragment = Rc::new(Stage::new(
//!     StageKind::Fragment,
//!     "tint.frag",
//!     "#version 330\nuniform vec4 tint;\nout vec4 color;\nvoid main() { color = tint; }\n",
//! ));
//!
//! ctx.bind(&vertex);
//! ctx.bind(&fragment);
//! ctx.activate_current_program()?;
//!
//! let mut params = ctx.create_parameters(&fragment)?;
//! params.set_named_constant("tint", &[1.0f32, 0.5, 0.25, 1.0])?;
//! ctx.update_uniforms(&params, Variability::ALL, StageKind::Fragment);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod active;
pub mod binary_cache;
pub mod binder;
pub mod blocks;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod glsl;
pub mod key;
pub mod logging;
pub mod preprocess;
pub mod program;
pub mod reflect;
pub mod stage;

pub use active::ActiveStageSet;
pub use binary_cache::{BinaryCache, BinaryKey};
pub use blocks::BlockBindings;
pub use cache::{CacheStats, ProgramLinkCache};
pub use config::{BinaryCacheConfig, LinkConfig, StrategyChoice};
pub use context::LinkContext;
pub use error::LinkError;
pub use key::{CacheKey, StageTuple};
pub use preprocess::{Defines, PreprocessError};
pub use program::{LinkState, LinkStrategy, LinkedProgram, MonolithicLink, ProgramHandles, SeparableLink};
pub use reflect::{AtomicCounterReference, BlockReference, ProgramReferences, UniformReference};
pub use stage::{Stage, StageId};

pub use glink_core::{ConstantType, ProgramParameters, SharedParameters, StageKind, Variability};
