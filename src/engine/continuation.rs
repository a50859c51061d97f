//! Continuation contexts for non-deterministic foreign predicates
//!
//! A context is created fresh on the first call of a retryable predicate and
//! handed to the engine as an opaque token. The token is the context's heap
//! address and doubles as its key in the live table, so a Redo gets back the
//! very same instance. The context is dropped exactly once: when a call fails,
//! raises, or when the engine prunes the choice point.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use serde_json::Value as JsonValue;

/// Host state threaded through the calls of one non-deterministic predicate
/// invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ContinuationContext {
    #[default]
    Empty,
    Fields(BTreeMap<String, JsonValue>),
}

impl ContinuationContext {
    pub fn new() -> Self {
        Self::Empty
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ContinuationContext::Empty => true,
            ContinuationContext::Fields(fields) => fields.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ContinuationContext::Empty => 0,
            ContinuationContext::Fields(fields) => fields.len(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        match self {
            ContinuationContext::Empty => None,
            ContinuationContext::Fields(fields) => fields.get(key),
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(JsonValue::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(JsonValue::as_str)
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Option<JsonValue> {
        if let ContinuationContext::Empty = self {
            *self = ContinuationContext::Fields(BTreeMap::new());
        }
        match self {
            ContinuationContext::Fields(fields) => fields.insert(key.into(), value.into()),
            ContinuationContext::Empty => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        match self {
            ContinuationContext::Empty => None,
            ContinuationContext::Fields(fields) => fields.remove(key),
        }
    }

    pub fn clear(&mut self) {
        *self = ContinuationContext::Empty;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        let fields = match self {
            ContinuationContext::Empty => None,
            ContinuationContext::Fields(fields) => Some(fields),
        };
        fields.into_iter().flat_map(|f| f.iter())
    }
}

/// Contexts currently parked in the engine, keyed by token
#[derive(Default)]
pub(crate) struct ContinuationTable {
    live: RefCell<HashMap<usize, Box<ContinuationContext>>>,
}

impl ContinuationTable {
    /// Hand a context to the engine; returns its token
    pub(crate) fn park(&self, context: Box<ContinuationContext>) -> usize {
        let token = &*context as *const ContinuationContext as usize;
        self.live.borrow_mut().insert(token, context);
        token
    }

    /// Take back the context behind `token`, if the engine still holds it
    pub(crate) fn reclaim(&self, token: usize) -> Option<Box<ContinuationContext>> {
        self.live.borrow_mut().remove(&token)
    }

    pub(crate) fn len(&self) -> usize {
        self.live.borrow().len()
    }

    /// Drop every parked context; returns how many there were
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<_> = self.live.borrow_mut().drain().collect();
        drained.len()
    }
}
