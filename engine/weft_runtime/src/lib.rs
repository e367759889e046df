//! Weft runtime - shared execution semantics for the Weft template toolkit.
//!
//! Everything both execution backends must agree on lives here: the value
//! model and its formatting, the render policy ([`Config`]), scope frames
//! and export tracking ([`RuntimeState`]), loop contexts, the destructuring
//! engine, the block registry and template lookup ([`SharedInfo`]), and the
//! output buffer. Backends stay thin: they translate trees (or compiled
//! artifacts) into calls against this crate.

mod chain;
mod config;
mod error;
mod info;
mod loops;
mod output;
mod state;
mod unpack;
mod value;

pub use chain::ChainedLookup;
pub use config::{Config, FilterFn};
pub use error::{RuntimeError, RuntimeResult};
pub use info::{
    BlockExecutor, DeriveBehavior, SharedInfo, TemplateHandle, TemplateLookup, TemplateRef,
};
pub use loops::{LoopContext, LoopRef, LoopState};
pub use output::{Output, Rendered};
pub use state::RuntimeState;
pub use unpack::{make_undefined, unpack, TargetPattern, Unpacked};
pub use value::{NativeFunction, Value, ValueIter, ValueMap};
