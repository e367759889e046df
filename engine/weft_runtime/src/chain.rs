//! Read-only view over a stack of name/value mappings.
//!
//! Used to expose a snapshot of everything visible at some point of a render
//! (for handing variables to a sub-template or a block executor) without
//! flattening eagerly. Earlier mappings shadow later ones.

use rustc_hash::FxHashSet;

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{Value, ValueMap};

/// Chained lookup over borrowed mappings, most specific first.
#[derive(Debug)]
pub struct ChainedLookup<'a> {
    mappings: Vec<&'a ValueMap>,
}

impl<'a> ChainedLookup<'a> {
    pub fn new(mappings: Vec<&'a ValueMap>) -> Self {
        ChainedLookup { mappings }
    }

    /// True if any mapping holds the key.
    pub fn contains(&self, key: &str) -> bool {
        self.mappings.iter().any(|m| m.contains_key(key))
    }

    /// First value for the key, scanning mappings in order.
    pub fn find(&self, key: &str) -> Option<&Value> {
        self.mappings.iter().find_map(|m| m.get(key))
    }

    /// Like [`find`](Self::find), but a miss is an error.
    pub fn get(&self, key: &str) -> RuntimeResult<&Value> {
        self.find(key).ok_or_else(|| RuntimeError::KeyMissing {
            key: key.to_owned(),
        })
    }

    /// All visible keys, deduplicated, in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        let mut seen = FxHashSet::default();
        self.mappings
            .iter()
            .flat_map(|m| m.keys())
            .filter(move |k| seen.insert(k.as_str()))
            .map(String::as_str)
    }

    /// Flatten into an owned mapping with shadowing applied.
    pub fn to_map(&self) -> ValueMap {
        let mut out = ValueMap::default();
        for mapping in self.mappings.iter().rev() {
            for (key, value) in *mapping {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }
}
