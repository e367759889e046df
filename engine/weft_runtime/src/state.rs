//! Scope frames for one render.
//!
//! A `RuntimeState` starts with two frames: the variables the caller passed
//! in, and a working toplevel above them. Assignments while only those two
//! frames exist are toplevel assignments and double as exports; everything
//! deeper (loop bodies, conditionals, artificial scopes) is frame-local.

use std::rc::Rc;

use crate::chain::ChainedLookup;
use crate::config::Config;
use crate::error::RuntimeResult;
use crate::info::{DeriveBehavior, SharedInfo, TemplateHandle};
use crate::value::{Value, ValueMap};

pub struct RuntimeState {
    frames: Vec<ValueMap>,
    config: Rc<Config>,
    template_name: Option<String>,
    info: SharedInfo,
}

impl RuntimeState {
    /// Fresh state for a toplevel render.
    pub fn new(config: Rc<Config>, template_name: Option<String>, vars: ValueMap) -> Self {
        let info = SharedInfo::new(config.clone(), template_name.clone());
        RuntimeState {
            frames: vec![vars, ValueMap::default()],
            config,
            template_name,
            info,
        }
    }

    /// State sharing existing render bookkeeping, used for block executors
    /// and derived renders.
    pub fn with_info(info: SharedInfo, vars: ValueMap) -> Self {
        let config = info.config();
        let template_name = info.template_name();
        RuntimeState {
            frames: vec![vars, ValueMap::default()],
            config,
            template_name,
            info,
        }
    }

    pub fn config(&self) -> &Rc<Config> {
        &self.config
    }

    pub fn template_name(&self) -> Option<&str> {
        self.template_name.as_deref()
    }

    pub fn info(&self) -> &SharedInfo {
        &self.info
    }

    /// Enter a nested scope.
    pub fn push_frame(&mut self) {
        self.frames.push(ValueMap::default());
    }

    /// Leave the current scope. The two base frames never pop.
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 2 {
            self.frames.pop();
        }
    }

    fn at_toplevel(&self) -> bool {
        self.frames.len() == 2
    }

    /// Bind a name in the current frame. Toplevel bindings also export.
    pub fn assign_var(&mut self, name: &str, value: Value) {
        let export = self.at_toplevel();
        if export {
            self.info.export(name, value.clone());
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_owned(), value);
        }
    }

    /// Export a name without binding it, for from-imports.
    pub fn export_var(&self, name: &str, value: Value) {
        self.info.export(name, value);
    }

    /// Resolve a name: innermost frame outward, then policy globals, then
    /// the undefined factory. The miss value is never cached in a frame.
    pub fn lookup_var(&self, name: &str) -> Value {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return value.clone();
            }
        }
        if let Some(value) = self.config.globals().get(name) {
            return value.clone();
        }
        self.config.undefined_variable(name)
    }

    /// Dispatch a block through the render's registry, passing a snapshot
    /// of everything currently visible.
    pub fn evaluate_block(&self, name: &str, level: usize) -> RuntimeResult<Vec<Rc<str>>> {
        self.info.evaluate_block(name, level, self.capture())
    }

    pub fn get_template(&self, name: &str) -> RuntimeResult<TemplateHandle> {
        self.info.get_template(name)
    }

    /// Derive bookkeeping for a related render (see `SharedInfo::make_info`).
    pub fn derive_info(&self, behavior: DeriveBehavior, name: Option<String>) -> SharedInfo {
        self.info.make_info(behavior, name)
    }

    /// Chained view of all frames, innermost first.
    pub fn visible(&self) -> ChainedLookup<'_> {
        ChainedLookup::new(self.frames.iter().rev().collect())
    }

    /// Flatten everything visible into an owned mapping.
    pub fn capture(&self) -> ValueMap {
        self.visible().to_map()
    }
}
