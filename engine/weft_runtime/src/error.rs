//! Runtime error taxonomy.
//!
//! Everything in this layer fails loudly with one of these variants; the only
//! silent paths are the two policy-driven lenient ones (lenient destructuring
//! and undefined-variable lookup), which produce values instead of errors.

use thiserror::Error;

/// Result of a runtime operation.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Typed failure surfaced to the caller driving a render.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// Strict destructuring saw a value whose element count does not match
    /// the target pattern. Raised by the caller's positional bind, not by
    /// the unpacking engine itself.
    #[error("cannot unpack {got} value(s) into {expected} target(s)")]
    ShapeMismatch { expected: usize, got: usize },

    /// A destructuring source could not be materialized into a sequence and
    /// the policy does not allow non-iterable unpacking.
    #[error("`{type_name}` is not iterable")]
    NotIterable { type_name: &'static str },

    /// Chained-namespace lookup found no matching key in any mapping.
    #[error("key `{key}` not found in any mapping")]
    KeyMissing { key: String },

    /// Block dispatch on a name with no registered executor.
    #[error("block `{name}` is not registered")]
    BlockNotFound { name: String },

    /// Block dispatch at a level beyond the registered override chain.
    #[error("block `{name}` has no executor at level {level}")]
    BlockLevelOverflow { name: String, level: usize },

    /// The template-lookup service could not resolve a name.
    #[error("template `{name}` not found")]
    TemplateNotFound { name: String },

    /// Malformed input to the lowering/compile step. Surfaces before any
    /// execution occurs.
    #[error("cannot compile template: {message}")]
    Compile { message: String },

    /// Call on a value that is not callable.
    #[error("`{type_name}` is not callable")]
    NotCallable { type_name: &'static str },

    /// Filter dispatch on an unregistered name.
    #[error("no filter named `{name}`")]
    UnknownFilter { name: String },

    /// Test dispatch on an unregistered name.
    #[error("no test named `{name}`")]
    UnknownTest { name: String },

    /// Integer or float division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Operation outside the value model's semantics (bad operand types,
    /// control statements outside a loop, and similar).
    #[error("unsupported operation: {message}")]
    Unsupported { message: String },
}

impl RuntimeError {
    /// Compile-phase failure with a formatted message.
    pub fn compile(message: impl Into<String>) -> Self {
        RuntimeError::Compile {
            message: message.into(),
        }
    }

    /// Unsupported-operation failure with a formatted message.
    pub fn unsupported(message: impl Into<String>) -> Self {
        RuntimeError::Unsupported {
            message: message.into(),
        }
    }
}
