//! Output collection.
//!
//! A render appends string fragments to an `Output` and joins them once at
//! the end. Fragments are reference-counted so block executors can return
//! their production to the caller without copying.

use std::rc::Rc;

use crate::value::ValueMap;

/// Ordered fragment buffer for one render (or one nested region of it).
#[derive(Debug, Default)]
pub struct Output {
    fragments: Vec<Rc<str>>,
}

impl Output {
    pub fn new() -> Self {
        Output::default()
    }

    /// Append one fragment. Empty fragments are skipped.
    pub fn push(&mut self, fragment: impl AsRef<str>) {
        let fragment = fragment.as_ref();
        if !fragment.is_empty() {
            self.fragments.push(Rc::from(fragment));
        }
    }

    /// Append an already shared fragment without copying.
    pub fn push_shared(&mut self, fragment: Rc<str>) {
        if !fragment.is_empty() {
            self.fragments.push(fragment);
        }
    }

    /// Append every fragment of another production.
    pub fn extend(&mut self, fragments: impl IntoIterator<Item = Rc<str>>) {
        self.fragments.extend(fragments);
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[Rc<str>] {
        &self.fragments
    }

    pub fn into_fragments(self) -> Vec<Rc<str>> {
        self.fragments
    }

    /// Join all fragments into the final string.
    pub fn concat(&self) -> String {
        let cap = self.fragments.iter().map(|f| f.len()).sum();
        let mut out = String::with_capacity(cap);
        for fragment in &self.fragments {
            out.push_str(fragment);
        }
        out
    }
}

/// The final product of a render: the joined output plus the variables the
/// template exported at its top level.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rendered {
    pub output: String,
    pub exports: ValueMap,
}
