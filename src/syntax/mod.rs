//! Engine-independent term values and their textual notation.
//!
//! [`OwnedTerm`] is a plain Rust value that outlives any engine frame or
//! query. It is what exception balls, recorded snapshots and JSON conversion
//! are expressed in. The writer renders it in canonical notation: quoted
//! atoms, standard operators in operator position, lists in bracket syntax.

pub mod ops;
mod writer;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

pub use writer::{format_float, quote_atom};

/// Functor name of a list cell
pub const LIST_FUNCTOR: &str = "[|]";

/// The empty list
pub const NIL: &str = "[]";

/// A term detached from the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OwnedTerm {
    /// An unbound variable, numbered in order of first occurrence
    Variable(usize),
    Atom(String),
    Integer(i64),
    Float(f64),
    String(String),
    Compound { name: String, args: Vec<OwnedTerm> },
}

// Long lists and deep nesting are torn down with an explicit stack
impl Drop for OwnedTerm {
    fn drop(&mut self) {
        let OwnedTerm::Compound { args, .. } = self else {
            return;
        };
        if !args.iter().any(|a| matches!(a, OwnedTerm::Compound { .. })) {
            return;
        }
        let mut pending = std::mem::take(args);
        while let Some(mut term) = pending.pop() {
            if let OwnedTerm::Compound { args, .. } = &mut term {
                pending.append(args);
            }
        }
    }
}

impl OwnedTerm {
    pub fn atom(name: impl Into<String>) -> Self {
        OwnedTerm::Atom(name.into())
    }

    pub fn string(text: impl Into<String>) -> Self {
        OwnedTerm::String(text.into())
    }

    pub fn compound(name: impl Into<String>, args: Vec<OwnedTerm>) -> Self {
        let name = name.into();
        if args.is_empty() {
            OwnedTerm::Atom(name)
        } else {
            OwnedTerm::Compound { name, args }
        }
    }

    pub fn nil() -> Self {
        OwnedTerm::Atom(NIL.to_string())
    }

    /// Build a proper list
    pub fn list(items: Vec<OwnedTerm>) -> Self {
        Self::partial_list(items, OwnedTerm::nil())
    }

    /// Build a list ending in `tail`
    pub fn partial_list(items: Vec<OwnedTerm>, tail: OwnedTerm) -> Self {
        items.into_iter().rev().fold(tail, |acc, item| OwnedTerm::Compound {
            name: LIST_FUNCTOR.to_string(),
            args: vec![item, acc],
        })
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, OwnedTerm::Atom(name) if name == NIL)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, OwnedTerm::Variable(_))
    }

    /// Functor name and arity; atomic terms have arity 0
    pub fn name_arity(&self) -> Option<(&str, usize)> {
        match self {
            OwnedTerm::Atom(name) => Some((name, 0)),
            OwnedTerm::Compound { name, args } => Some((name, args.len())),
            _ => None,
        }
    }

    /// Elements of a proper list
    pub fn as_list(&self) -> Option<Vec<&OwnedTerm>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                OwnedTerm::Compound { name, args } if name == LIST_FUNCTOR && args.len() == 2 => {
                    items.push(&args[0]);
                    cursor = &args[1];
                }
                t if t.is_nil() => return Some(items),
                _ => return None,
            }
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OwnedTerm::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OwnedTerm::Integer(i) => Some(*i as f64),
            OwnedTerm::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text of an atom or string
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OwnedTerm::Atom(s) | OwnedTerm::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value.
    ///
    /// - `true`/`false` atoms become booleans, `null` becomes null
    /// - numbers map to numbers, atoms and strings to strings
    /// - proper lists become arrays; a list of `Key:Value` pairs becomes an object
    /// - any other compound is rendered as canonical text
    pub fn to_json(&self) -> JsonValue {
        match self {
            OwnedTerm::Variable(_) => JsonValue::Null,
            OwnedTerm::Integer(i) => JsonValue::Number((*i).into()),
            OwnedTerm::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            OwnedTerm::String(s) => JsonValue::String(s.clone()),
            OwnedTerm::Atom(a) => match a.as_str() {
                "true" => JsonValue::Bool(true),
                "false" => JsonValue::Bool(false),
                "null" => JsonValue::Null,
                NIL => JsonValue::Array(vec![]),
                _ => JsonValue::String(a.clone()),
            },
            OwnedTerm::Compound { .. } => {
                if let Some(items) = self.as_list() {
                    if let Some(obj) = pairs_to_object(&items) {
                        return JsonValue::Object(obj);
                    }
                    return JsonValue::Array(items.into_iter().map(|t| t.to_json()).collect());
                }
                if let Some(obj) = pairs_to_object(&[self]) {
                    return JsonValue::Object(obj);
                }
                JsonValue::String(self.to_string())
            }
        }
    }

    /// Build a term from a JSON value, inverse of [`OwnedTerm::to_json`]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => OwnedTerm::atom("null"),
            JsonValue::Bool(b) => OwnedTerm::atom(if *b { "true" } else { "false" }),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => OwnedTerm::Integer(i),
                None => OwnedTerm::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => OwnedTerm::atom(s.clone()),
            JsonValue::Array(items) => {
                OwnedTerm::list(items.iter().map(OwnedTerm::from_json).collect())
            }
            JsonValue::Object(obj) => OwnedTerm::list(
                obj.iter()
                    .map(|(k, v)| {
                        OwnedTerm::compound(":", vec![OwnedTerm::atom(k.clone()), Self::from_json(v)])
                    })
                    .collect(),
            ),
        }
    }
}

fn pairs_to_object(items: &[&OwnedTerm]) -> Option<serde_json::Map<String, JsonValue>> {
    if items.is_empty() {
        return None;
    }
    let mut obj = serde_json::Map::new();
    for item in items {
        match item {
            OwnedTerm::Compound { name, args } if name == ":" && args.len() == 2 => {
                let key = args[0].as_text()?;
                obj.insert(key.to_string(), args[1].to_json());
            }
            _ => return None,
        }
    }
    Some(obj)
}

impl fmt::Display for OwnedTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        writer::write_term(&mut out, self, 1200);
        f.write_str(&out)
    }
}

impl From<i64> for OwnedTerm {
    fn from(value: i64) -> Self {
        OwnedTerm::Integer(value)
    }
}

impl From<f64> for OwnedTerm {
    fn from(value: f64) -> Self {
        OwnedTerm::Float(value)
    }
}

/// Text converts to an atom; use [`OwnedTerm::string`] for a string object
impl From<&str> for OwnedTerm {
    fn from(value: &str) -> Self {
        OwnedTerm::Atom(value.to_string())
    }
}

impl From<bool> for OwnedTerm {
    fn from(value: bool) -> Self {
        OwnedTerm::atom(if value { "true" } else { "false" })
    }
}
