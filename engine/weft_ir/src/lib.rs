//! Weft IR - Template syntax tree for the Weft toolkit.
//!
//! The tree produced by a template front-end and consumed by both execution
//! backends. This crate is pure data: nodes expose structure, nothing else.
//! All runtime semantics (scoping, unpacking, loop contexts, block dispatch)
//! live in `weft_runtime` and the backends that consume it.

mod nodes;

pub use nodes::{
    BinaryOp, CmpOp, Const, Expr, ImportItem, Operand, Stmt, Target, Template, UnaryOp,
};
