//! Prolog engine backends
//!
//! The bridge treats the logic engine as a black box reached through the
//! [`Backend`] trait: term allocation and inspection, unification, frames,
//! query stepping, exception retrieval, records and foreign-predicate
//! registration. Two implementations are provided:
//!
//! - **SWI-Prolog** (`swipl` feature): the SWI-Prolog foreign language interface
//!   via the `swipl` crate
//! - **Memory** (`memory` feature, on by default): a small stand-in engine
//!   written in Rust, used by the test-suite and on hosts without libswipl
//!
//! ## Backend Selection
//!
//! ```toml
//! # SWI-Prolog only (requires libswipl.so)
//! prolog-bridge = { default-features = false, features = ["swipl"] }
//! ```
//!
//! ## Handles
//!
//! All handles are plain integers owned by the engine. They carry no lifetime
//! of their own: the bridge's scope stack decides when they may be used.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "swipl")]
pub mod swi;

use std::cmp::Ordering;
use std::rc::Rc;

#[cfg(feature = "memory")]
pub use memory::MemoryBackend;

#[cfg(feature = "swipl")]
pub use swi::SwiBackend;

/// Reference to a term slot in the engine's term arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawTerm(pub usize);

impl RawTerm {
    /// The `index`-th slot of a contiguous block starting at `self`
    pub fn offset(self, index: usize) -> RawTerm {
        RawTerm(self.0 + index)
    }
}

/// Engine frame handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawFrame(pub usize);

/// Engine query handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawQuery(pub usize);

/// Handle to a term recorded outside the term arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawRecord(pub usize);

/// Resolved predicate handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPredicate(pub usize);

/// Type tag of a term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Variable,
    Atom,
    /// The empty list `[]`
    Nil,
    Integer,
    Float,
    String,
    Compound,
    /// A list cell `[H|T]`
    ListPair,
}

impl TermKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermKind::Variable => "variable",
            TermKind::Atom => "atom",
            TermKind::Nil => "nil",
            TermKind::Integer => "integer",
            TermKind::Float => "float",
            TermKind::String => "string",
            TermKind::Compound => "compound",
            TermKind::ListPair => "list",
        }
    }
}

/// Text conversion mode for [`Backend::get_text`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMode {
    /// Any term, written with quoted atoms so it reads back unchanged
    Canonical,
    /// Atomic terms only, unquoted
    Plain,
}

/// Result of a single query step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A solution was found and more may follow
    Solution,
    /// A solution was found and no choice points remain
    Last,
    /// No (more) solutions
    Failed,
    /// An exception was raised; retrieve it with [`Backend::exception`]
    Exception,
}

/// How the engine is invoking a foreign predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignControl {
    FirstCall,
    /// Backtracking into the predicate; carries the token returned by the last call
    Redo(usize),
    /// The engine discarded the predicate's choice point
    Pruned(usize),
}

/// What a foreign predicate reports back to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignOutcome {
    Fail,
    Succeed,
    /// Succeed and leave a choice point; the token comes back on Redo or Pruned
    Retry(usize),
    /// Fail with the exception passed to [`Backend::raise_exception`]
    Raised,
}

/// The single variadic callback shape the engine dispatches to.
///
/// Arguments are `(first_arg, arity, control)`; the arguments occupy the
/// contiguous slots `first_arg .. first_arg + arity`.
pub type ForeignHandler = Rc<dyn Fn(RawTerm, usize, ForeignControl) -> ForeignOutcome>;

/// The engine primitives the bridge is built on.
///
/// Methods take `&self` because the engine is re-entrant: a foreign predicate
/// running inside [`Backend::next_solution`] may allocate terms, open frames
/// and run nested queries on the same engine. Handles passed in must be valid;
/// checking that is the bridge's job.
pub trait Backend {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    // Term allocation

    /// Allocate `count` contiguous slots, each holding a fresh variable
    fn new_term_refs(&self, count: usize) -> RawTerm;
    fn put_variable(&self, t: RawTerm);
    fn put_atom(&self, t: RawTerm, name: &str);
    fn put_nil(&self, t: RawTerm);
    fn put_integer(&self, t: RawTerm, value: i64);
    fn put_float(&self, t: RawTerm, value: f64);
    fn put_string(&self, t: RawTerm, text: &str);
    /// Make `dst` refer to the same term as `src`
    fn put_term(&self, dst: RawTerm, src: RawTerm);
    /// Build `name(args[0], .., args[arity-1])` in `t`
    fn cons_functor(&self, t: RawTerm, name: &str, args: RawTerm, arity: usize);
    fn cons_list(&self, t: RawTerm, head: RawTerm, tail: RawTerm);
    /// Parse `text` into `t`. On a syntax error returns false and leaves the
    /// exception term in `t`.
    fn put_parsed(&self, t: RawTerm, text: &str) -> bool;

    // Inspection

    fn kind(&self, t: RawTerm) -> TermKind;
    fn get_integer(&self, t: RawTerm) -> Option<i64>;
    fn get_float(&self, t: RawTerm) -> Option<f64>;
    fn get_text(&self, t: RawTerm, mode: TextMode) -> Option<String>;
    fn get_name_arity(&self, t: RawTerm) -> Option<(String, usize)>;
    /// Store argument `index` (1-based) of compound `t` in `out`
    fn get_arg(&self, index: usize, t: RawTerm, out: RawTerm) -> bool;
    fn unify(&self, a: RawTerm, b: RawTerm) -> bool;
    /// Standard order of terms
    fn compare(&self, a: RawTerm, b: RawTerm) -> Ordering;

    // Frames

    fn open_frame(&self) -> RawFrame;
    /// Reclaim slots created since the frame opened; bindings stay
    fn close_frame(&self, frame: RawFrame);
    /// Undo bindings and reclaim slots made since the frame opened; the frame stays open
    fn rewind_frame(&self, frame: RawFrame);
    /// Rewind, then close
    fn discard_frame(&self, frame: RawFrame);

    // Queries

    fn predicate(&self, module: &str, name: &str, arity: usize) -> RawPredicate;
    fn open_query(&self, module: &str, predicate: RawPredicate, args: RawTerm) -> RawQuery;
    fn next_solution(&self, query: RawQuery) -> Step;
    /// The pending exception of `query`, if its last step raised one
    fn exception(&self, query: RawQuery) -> Option<RawTerm>;
    /// Discard remaining choice points, keep bindings
    fn cut_query(&self, query: RawQuery);
    /// Discard remaining choice points and undo bindings
    fn close_query(&self, query: RawQuery);

    // Records

    fn record(&self, t: RawTerm) -> RawRecord;
    fn recorded(&self, record: RawRecord, t: RawTerm);
    fn erase(&self, record: RawRecord);

    // Foreign predicates

    fn register_foreign(
        &self,
        module: &str,
        name: &str,
        arity: usize,
        nondeterministic: bool,
        handler: ForeignHandler,
    ) -> Result<(), String>;

    /// Set the exception a foreign predicate reports with [`ForeignOutcome::Raised`]
    fn raise_exception(&self, t: RawTerm);

    /// Release engine-wide resources
    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_term_offset() {
        let base = RawTerm(10);
        assert_eq!(base.offset(0), RawTerm(10));
        assert_eq!(base.offset(3), RawTerm(13));
    }

    #[test]
    fn test_term_kind_names() {
        assert_eq!(TermKind::ListPair.as_str(), "list");
        assert_eq!(TermKind::Variable.as_str(), "variable");
    }
}
