//! Weft interp - tree-walking execution backend for the Weft toolkit.
//!
//! Walks `weft_ir` trees directly against the shared runtime. This backend
//! supports the full statement set, including template inheritance,
//! includes and imports; the lowering backend (`weft_lower`) trades those
//! for ahead-of-time compilation of the core subset.

mod interpreter;
mod loader;

pub use interpreter::Interpreter;
pub use loader::{InMemoryLoader, TemplateSource};
