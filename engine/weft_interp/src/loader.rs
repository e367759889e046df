//! Template storage for the tree-walking backend.

use std::any::Any;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use weft_ir::Template;
use weft_runtime::{TemplateHandle, TemplateLookup, TemplateRef};

/// A template tree behind the opaque lookup interface.
pub struct TemplateSource {
    name: Option<String>,
    template: Template,
}

impl TemplateSource {
    pub fn new(template: Template) -> Self {
        TemplateSource {
            name: template.name.clone(),
            template,
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }
}

impl TemplateRef for TemplateSource {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Name-keyed template store, the simplest lookup service.
#[derive(Default)]
pub struct InMemoryLoader {
    templates: FxHashMap<String, Rc<TemplateSource>>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        InMemoryLoader::default()
    }

    /// Store a template under a name, replacing any previous one.
    pub fn insert(&mut self, name: &str, template: Template) {
        self.templates
            .insert(name.to_owned(), Rc::new(TemplateSource::new(template)));
    }

    pub fn shared(self) -> Rc<InMemoryLoader> {
        Rc::new(self)
    }
}

impl TemplateLookup for InMemoryLoader {
    fn resolve(&self, name: &str) -> Option<TemplateHandle> {
        self.templates
            .get(name)
            .map(|source| source.clone() as TemplateHandle)
    }
}
