//! Render policy.
//!
//! A `Config` is built once by the embedding application and shared by every
//! render it drives. It owns the behavioral knobs (destructuring strictness,
//! loop accessor naming) and the extension points: the undefined factory,
//! the loop wrapper, and the filter/test/global registries.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::RuntimeResult;
use crate::loops::{LoopContext, LoopRef};
use crate::value::{Value, ValueIter, ValueMap};

/// A registered filter or test callable.
pub type FilterFn = Rc<dyn Fn(Value, &[Value]) -> RuntimeResult<Value>>;

type UndefinedFactory = Rc<dyn Fn(&str) -> Value>;
type LoopWrapper = Rc<dyn Fn(ValueIter, Option<Value>) -> LoopRef>;

/// Policy object governing a render.
#[derive(Clone)]
pub struct Config {
    /// Permit destructuring a non-iterable source: every target leaf binds
    /// to an undefined instead of the render failing.
    pub allow_noniter_unpacking: bool,
    /// Strict destructuring: the bind site must see exactly as many values
    /// as targets, and shape mismatches are errors.
    pub strict_tuple_unpacking: bool,
    /// Name the loop context is bound to inside `for` bodies.
    pub forloop_accessor: String,
    /// Expose the enclosing loop context as `parent` on nested loops.
    pub forloop_parent_access: bool,
    undefined: UndefinedFactory,
    wrap_loop: LoopWrapper,
    filters: FxHashMap<String, FilterFn>,
    tests: FxHashMap<String, FilterFn>,
    globals: ValueMap,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            allow_noniter_unpacking: false,
            strict_tuple_unpacking: false,
            forloop_accessor: "loop".to_owned(),
            forloop_parent_access: false,
            undefined: Rc::new(Value::undefined),
            wrap_loop: Rc::new(LoopContext::shared),
            filters: FxHashMap::default(),
            tests: FxHashMap::default(),
            globals: ValueMap::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Wrap into the shared form the runtime carries.
    pub fn shared(self) -> Rc<Config> {
        Rc::new(self)
    }

    /// Produce the value for a name no scope resolves.
    pub fn undefined_variable(&self, name: &str) -> Value {
        (self.undefined)(name)
    }

    /// Wrap an iteration source into a loop context handle.
    pub fn wrap_loop(&self, iter: ValueIter, parent: Option<Value>) -> LoopRef {
        (self.wrap_loop)(iter, parent)
    }

    /// Replace the undefined factory.
    pub fn set_undefined(&mut self, factory: impl Fn(&str) -> Value + 'static) {
        self.undefined = Rc::new(factory);
    }

    /// Replace the loop wrapper.
    pub fn set_wrap_loop(&mut self, wrapper: impl Fn(ValueIter, Option<Value>) -> LoopRef + 'static) {
        self.wrap_loop = Rc::new(wrapper);
    }

    pub fn add_filter(
        &mut self,
        name: &str,
        filter: impl Fn(Value, &[Value]) -> RuntimeResult<Value> + 'static,
    ) {
        self.filters.insert(name.to_owned(), Rc::new(filter));
    }

    pub fn add_test(
        &mut self,
        name: &str,
        test: impl Fn(Value, &[Value]) -> RuntimeResult<Value> + 'static,
    ) {
        self.tests.insert(name.to_owned(), Rc::new(test));
    }

    /// Register a value visible to every render as a last-resort scope.
    pub fn add_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_owned(), value);
    }

    pub fn filter(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn test(&self, name: &str) -> Option<&FilterFn> {
        self.tests.get(name)
    }

    pub fn globals(&self) -> &ValueMap {
        &self.globals
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("allow_noniter_unpacking", &self.allow_noniter_unpacking)
            .field("strict_tuple_unpacking", &self.strict_tuple_unpacking)
            .field("forloop_accessor", &self.forloop_accessor)
            .field("forloop_parent_access", &self.forloop_parent_access)
            .field("filters", &self.filters.len())
            .field("tests", &self.tests.len())
            .field("globals", &self.globals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert!(!config.allow_noniter_unpacking);
        assert!(!config.strict_tuple_unpacking);
        assert_eq!(config.forloop_accessor, "loop");
        assert!(!config.forloop_parent_access);
        assert!(config.undefined_variable("x").is_undefined());
    }

    #[test]
    fn test_custom_undefined_factory() {
        let mut config = Config::new();
        config.set_undefined(|name| Value::str(format!("<missing:{name}>")));
        assert_eq!(
            config.undefined_variable("x").to_string(),
            "<missing:x>"
        );
    }

    #[test]
    fn test_filter_registry() {
        let mut config = Config::new();
        config.add_filter("upper", |value, _args| {
            Ok(Value::str(value.to_string().to_uppercase()))
        });
        let filter = config.filter("upper").cloned().unwrap();
        assert_eq!(filter(Value::str("abc"), &[]), Ok(Value::str("ABC")));
        assert!(config.filter("lower").is_none());
    }

    #[test]
    fn test_globals_registry() {
        let mut config = Config::new();
        config.add_global("version", Value::Int(3));
        assert_eq!(config.globals().get("version"), Some(&Value::Int(3)));
    }
}
