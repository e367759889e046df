//! Weft lower - lowering and closure-compiling backend for the Weft toolkit.
//!
//! Covers the self-contained statement subset: output, conditionals, loops
//! with destructuring, scopes, blocks and filter regions. Templates using
//! inheritance, includes or imports are rejected at lowering time; the
//! tree-walking backend (`weft_interp`) handles those. Both backends share
//! `weft_runtime`, so rendering a supported template through either one
//! produces the same result.

mod compile;
mod lower;

pub use compile::{compile, compile_template, Executable};
pub use lower::{lower, CExpr, Code, Lowered};

use std::rc::Rc;

use weft_ir::Template;
use weft_runtime::{Config, Rendered, RuntimeResult, ValueMap};

/// The stages a template can be rendered from.
pub enum CodeInput<'a> {
    /// Lower, compile and render in one pass.
    Tree(&'a Template),
    /// Compile and render a lowered template.
    Lowered(&'a Lowered),
    /// Render an already compiled template.
    Compiled(&'a Executable),
}

/// Render a template at whatever stage it is in.
pub fn run(input: CodeInput<'_>, config: Rc<Config>, vars: ValueMap) -> RuntimeResult<Rendered> {
    match input {
        CodeInput::Tree(template) => compile_template(template)?.render(config, vars),
        CodeInput::Lowered(lowered) => compile(lowered).render(config, vars),
        CodeInput::Compiled(executable) => executable.render(config, vars),
    }
}
