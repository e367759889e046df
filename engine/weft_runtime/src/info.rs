//! Per-render bookkeeping: block registry, exports, template lookup.
//!
//! One `RenderInfo` exists per template participating in a render. Template
//! inheritance creates a derived info per parent template; the block
//! registry is copied across so overrides registered by children stay
//! visible while the parent renders.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::error::{RuntimeError, RuntimeResult};
use crate::state::RuntimeState;
use crate::value::{Value, ValueMap};

/// An opaque loaded template. Backends downcast through `as_any` to their
/// own concrete type.
pub trait TemplateRef {
    fn name(&self) -> Option<&str>;
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a loaded template.
pub type TemplateHandle = Rc<dyn TemplateRef>;

/// Template lookup service, supplied by the embedding application.
pub trait TemplateLookup {
    /// Resolve a template name, or `None` if no such template exists.
    fn resolve(&self, name: &str) -> Option<TemplateHandle>;
}

/// A block executor: renders one block body against the given variables and
/// returns the produced fragments.
pub type BlockExecutor = Rc<dyn Fn(SharedInfo, ValueMap) -> RuntimeResult<Vec<Rc<str>>>>;

/// How a derived render relates to the template deriving it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeriveBehavior {
    /// Parent template of an inheritance chain: block overrides carry over.
    Extends,
    /// Template rendered in place: fresh block registry.
    Include,
    /// Template rendered for its exports only.
    Import,
}

/// The mutable per-render record behind [`SharedInfo`].
pub struct RenderInfo {
    config: Rc<Config>,
    template_name: Option<String>,
    exports: ValueMap,
    /// Executors per block name, most derived first.
    blocks: FxHashMap<String, Vec<BlockExecutor>>,
    loader: Option<Rc<dyn TemplateLookup>>,
}

/// Shared handle to the render bookkeeping.
///
/// Cloning is cheap and every clone refers to the same record; block
/// executors receive a clone so nested renders observe registrations made
/// after they were bound.
#[derive(Clone)]
#[repr(transparent)]
pub struct SharedInfo(Rc<RefCell<RenderInfo>>);

impl SharedInfo {
    pub fn new(config: Rc<Config>, template_name: Option<String>) -> Self {
        SharedInfo(Rc::new(RefCell::new(RenderInfo {
            config,
            template_name,
            exports: ValueMap::default(),
            blocks: FxHashMap::default(),
            loader: None,
        })))
    }

    pub fn config(&self) -> Rc<Config> {
        self.0.borrow().config.clone()
    }

    pub fn template_name(&self) -> Option<String> {
        self.0.borrow().template_name.clone()
    }

    /// Attach the template lookup service used by `get_template`.
    pub fn set_loader(&self, loader: Rc<dyn TemplateLookup>) {
        self.0.borrow_mut().loader = Some(loader);
    }

    /// Register one more executor for a block name. Registration order is
    /// override order: the first registration is the most derived.
    pub fn register_block(&self, name: &str, executor: BlockExecutor) {
        self.0
            .borrow_mut()
            .blocks
            .entry(name.to_owned())
            .or_default()
            .push(executor);
    }

    /// Register a block whose executor runs against a fresh state built
    /// from the supplied variables.
    pub fn bind_block<F>(&self, name: &str, exec: F)
    where
        F: Fn(&mut RuntimeState) -> RuntimeResult<Vec<Rc<str>>> + 'static,
    {
        let exec = Rc::new(exec);
        self.register_block(
            name,
            Rc::new(move |info: SharedInfo, vars: ValueMap| {
                let mut state = RuntimeState::with_info(info, vars);
                exec(&mut state)
            }),
        );
    }

    /// Execute the block executor at `level` for `name`. Level 1 is the
    /// most derived override; level 2 the one it overrides, and so on.
    pub fn evaluate_block(
        &self,
        name: &str,
        level: usize,
        vars: ValueMap,
    ) -> RuntimeResult<Vec<Rc<str>>> {
        // clone the executor out before invoking so nested dispatch can
        // re-borrow the registry
        let executor = {
            let info = self.0.borrow();
            let chain = info
                .blocks
                .get(name)
                .ok_or_else(|| RuntimeError::BlockNotFound {
                    name: name.to_owned(),
                })?;
            if level == 0 || level > chain.len() {
                return Err(RuntimeError::BlockLevelOverflow {
                    name: name.to_owned(),
                    level,
                });
            }
            chain[level - 1].clone()
        };
        executor(self.clone(), vars)
    }

    /// Record a toplevel export.
    pub fn export(&self, name: &str, value: Value) {
        self.0.borrow_mut().exports.insert(name.to_owned(), value);
    }

    /// Snapshot of everything exported so far.
    pub fn exports(&self) -> ValueMap {
        self.0.borrow().exports.clone()
    }

    /// Resolve a template through the attached lookup service.
    pub fn get_template(&self, name: &str) -> RuntimeResult<TemplateHandle> {
        let loader = self.0.borrow().loader.clone();
        loader
            .and_then(|l| l.resolve(name))
            .ok_or_else(|| RuntimeError::TemplateNotFound {
                name: name.to_owned(),
            })
    }

    /// Derive the bookkeeping for a related render. Config and loader are
    /// shared; exports start fresh; `Extends` carries the block registry
    /// over so child overrides win while the parent renders.
    pub fn make_info(&self, behavior: DeriveBehavior, template_name: Option<String>) -> SharedInfo {
        let this = self.0.borrow();
        let blocks = match behavior {
            DeriveBehavior::Extends => this.blocks.clone(),
            DeriveBehavior::Include | DeriveBehavior::Import => FxHashMap::default(),
        };
        SharedInfo(Rc::new(RefCell::new(RenderInfo {
            config: this.config.clone(),
            template_name,
            exports: ValueMap::default(),
            blocks,
            loader: this.loader.clone(),
        })))
    }

    /// Package the exports as a module value for imports.
    pub fn make_module(&self) -> Value {
        let info = self.0.borrow();
        let mut entries = info.exports.clone();
        entries.insert(
            "__name__".to_owned(),
            info.template_name
                .as_deref()
                .map_or(Value::None, Value::str),
        );
        Value::map(entries)
    }

    /// Apply a registered filter to a value.
    pub fn call_filter(&self, name: &str, value: Value, args: &[Value]) -> RuntimeResult<Value> {
        let filter = self
            .config()
            .filter(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFilter {
                name: name.to_owned(),
            })?;
        filter(value, args)
    }

    /// Apply a registered test to a value, coercing the result to a bool.
    pub fn call_test(&self, name: &str, value: Value, args: &[Value]) -> RuntimeResult<Value> {
        let test = self
            .config()
            .test(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTest {
                name: name.to_owned(),
            })?;
        let result = test(value, args)?;
        Ok(Value::Bool(result.is_truthy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fresh() -> SharedInfo {
        SharedInfo::new(Config::new().shared(), Some("test.html".to_owned()))
    }

    fn const_executor(text: &str) -> BlockExecutor {
        let text: Rc<str> = Rc::from(text);
        Rc::new(move |_info, _vars| Ok(vec![text.clone()]))
    }

    #[test]
    fn test_block_levels_follow_registration_order() {
        let info = fresh();
        info.register_block("body", const_executor("child"));
        info.register_block("body", const_executor("parent"));

        let level1 = info.evaluate_block("body", 1, ValueMap::default()).unwrap();
        let level2 = info.evaluate_block("body", 2, ValueMap::default()).unwrap();
        assert_eq!(level1[0].as_ref(), "child");
        assert_eq!(level2[0].as_ref(), "parent");
    }

    #[test]
    fn test_block_dispatch_errors() {
        let info = fresh();
        assert_eq!(
            info.evaluate_block("nope", 1, ValueMap::default()),
            Err(RuntimeError::BlockNotFound {
                name: "nope".to_owned()
            })
        );
        info.register_block("body", const_executor("x"));
        assert_eq!(
            info.evaluate_block("body", 2, ValueMap::default()),
            Err(RuntimeError::BlockLevelOverflow {
                name: "body".to_owned(),
                level: 2
            })
        );
    }

    #[test]
    fn test_extends_carries_blocks_include_does_not() {
        let info = fresh();
        info.register_block("body", const_executor("child"));

        let parent = info.make_info(DeriveBehavior::Extends, Some("base.html".to_owned()));
        assert!(parent.evaluate_block("body", 1, ValueMap::default()).is_ok());

        let included = info.make_info(DeriveBehavior::Include, Some("part.html".to_owned()));
        assert_eq!(
            included.evaluate_block("body", 1, ValueMap::default()),
            Err(RuntimeError::BlockNotFound {
                name: "body".to_owned()
            })
        );
    }

    #[test]
    fn test_module_carries_exports_and_name() {
        let info = fresh();
        info.export("answer", Value::Int(42));
        let module = info.make_module();
        assert_eq!(module.get_attr("answer"), Value::Int(42));
        assert_eq!(module.get_attr("__name__"), Value::str("test.html"));
    }

    #[test]
    fn test_get_template_without_loader_fails() {
        let info = fresh();
        assert_eq!(
            info.get_template("other.html").err(),
            Some(RuntimeError::TemplateNotFound {
                name: "other.html".to_owned()
            })
        );
    }

    #[test]
    fn test_call_filter_and_test() {
        let mut config = Config::new();
        config.add_filter("upper", |v, _| Ok(Value::str(v.to_string().to_uppercase())));
        config.add_test("even", |v, _| match v {
            Value::Int(i) => Ok(Value::Bool(i % 2 == 0)),
            _ => Ok(Value::Bool(false)),
        });
        let info = SharedInfo::new(config.shared(), None);

        assert_eq!(
            info.call_filter("upper", Value::str("hi"), &[]),
            Ok(Value::str("HI"))
        );
        assert_eq!(info.call_test("even", Value::Int(4), &[]), Ok(Value::Bool(true)));
        assert_eq!(
            info.call_filter("nope", Value::None, &[]),
            Err(RuntimeError::UnknownFilter {
                name: "nope".to_owned()
            })
        );
    }
}
