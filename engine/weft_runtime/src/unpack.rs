//! Destructuring engine.
//!
//! Shared by both backends so lenient unpacking behaves identically
//! everywhere. The engine materializes the source, then aligns it with the
//! target pattern according to the policy; positional binding of the aligned
//! values to names is the caller's job.

use crate::config::Config;
use crate::error::{RuntimeError, RuntimeResult};
use crate::value::Value;

/// Shape of a destructuring target, decoupled from any syntax tree.
#[derive(Clone, Debug, PartialEq)]
pub enum TargetPattern {
    /// Single name.
    Leaf(String),
    /// Ordered group of sub-patterns.
    Group(Vec<TargetPattern>),
}

impl TargetPattern {
    pub fn leaf(name: &str) -> Self {
        TargetPattern::Leaf(name.to_owned())
    }
}

/// Result of running the engine against one source value.
#[derive(Clone, Debug, PartialEq)]
pub enum Unpacked {
    /// Strict mode: the materialized values, untouched. The caller checks
    /// the count against its targets and raises `ShapeMismatch` itself.
    Raw(Vec<Value>),
    /// Lenient mode: exactly one value per target, shortfalls padded with
    /// undefineds and excess dropped.
    Aligned(Vec<Value>),
}

/// Build the undefined stand-in for a whole pattern: a leaf becomes a single
/// undefined named after it, a group becomes a tuple of stand-ins.
pub fn make_undefined(config: &Config, pattern: &TargetPattern) -> Value {
    match pattern {
        TargetPattern::Leaf(name) => config.undefined_variable(name),
        TargetPattern::Group(items) => Value::tuple(
            items
                .iter()
                .map(|item| make_undefined(config, item))
                .collect(),
        ),
    }
}

/// Align one source value with a flat list of target patterns.
///
/// Materialization failure is resolved first: a non-iterable source either
/// fails the render or binds every target to an undefined, regardless of the
/// strictness flag.
pub fn unpack(
    config: &Config,
    value: &Value,
    targets: &[TargetPattern],
) -> RuntimeResult<Unpacked> {
    let values: Vec<Value> = match value.try_iter() {
        Ok(iter) => iter.collect(),
        Err(err @ RuntimeError::NotIterable { .. }) => {
            if !config.allow_noniter_unpacking {
                return Err(err);
            }
            tracing::debug!(targets = targets.len(), "non-iterable unpack, binding undefineds");
            return Ok(Unpacked::Aligned(
                targets
                    .iter()
                    .map(|target| make_undefined(config, target))
                    .collect(),
            ));
        }
        Err(err) => return Err(err),
    };

    if config.strict_tuple_unpacking {
        return Ok(Unpacked::Raw(values));
    }

    let mut values = values.into_iter();
    Ok(Unpacked::Aligned(
        targets
            .iter()
            .map(|target| {
                values
                    .next()
                    .unwrap_or_else(|| make_undefined(config, target))
            })
            .collect(),
    ))
}
