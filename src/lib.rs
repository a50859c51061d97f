//! prolog-bridge - Embedding Bridge for Prolog Engines
//!
//! Drives a Prolog engine from Rust: build and inspect terms, scope them in
//! frames, enumerate query solutions lazily and expose Rust closures as
//! (optionally retryable) predicates.
//!
//! # Features
//!
//! - Term handles that fail cleanly once their frame or query is gone
//! - Lazy, forward-only queries with cut and close disciplines
//! - Foreign predicates of arity 0-8 from plain closures
//! - Non-deterministic predicates with per-call continuation state
//! - SWI-Prolog with the `swipl` feature; a pure-Rust stand-in engine with `memory`
//! - YAML configuration with environment overrides
//!
//! # Quick Start
//!
//! ```rust
//! use prolog_bridge::prelude::*;
//!
//! let rt = Runtime::new()?;
//! rt.consult_str(
//!     "
//!     edge(a, b). edge(b, c).
//!     path(X, Y) :- edge(X, Y).
//!     path(X, Z) :- edge(X, Y), path(Y, Z).
//!     ",
//! )?;
//! rt.register("shout", 2, |word: Term, out: Term| {
//!     out.unify_value(word.text()?.to_uppercase().as_str())
//! })?;
//!
//! let mut query = rt.query("path(a, Where)");
//! while query.next_solution()? {
//!     println!("{}", query.bindings()?.get("Where").unwrap());
//! }
//!
//! let loud = rt.solve_once("shout(hello, X)")?.unwrap();
//! assert_eq!(loud.get("X").unwrap().text()?, "HELLO");
//! # Ok::<(), BridgeError>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod prolog;
pub mod syntax;

// Re-exports
pub use config::{BackendKind, EngineOptions};
pub use engine::{
    Bindings, ContinuationContext, ForeignFn, Frame, IntoOutcome, NondetFn, PredicateKey, Query,
    QueryState, RecordedTerm, Runtime, Solution, Term, TermVector, MAX_ARITY,
};
pub use error::{BridgeError, BridgeResult, EngineException};
pub use prolog::TermKind;
pub use syntax::OwnedTerm;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Bindings, BridgeError, BridgeResult, ContinuationContext, EngineException, EngineOptions,
        Frame, OwnedTerm, Query, QueryState, Runtime, Solution, Term, TermKind, TermVector,
    };
}
