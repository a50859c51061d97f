//! The embedding bridge: runtime, term handles, frames, queries and foreign
//! predicates on top of a [`Backend`](crate::prolog::Backend)

pub mod continuation;
pub mod foreign;
pub mod frame;
pub mod query;
pub mod record;
pub mod runtime;
pub mod term;
mod text;

pub use continuation::ContinuationContext;
pub use foreign::{ForeignFn, IntoOutcome, NondetFn, PredicateKey, MAX_ARITY};
pub use frame::Frame;
pub use query::{Bindings, Query, QueryState};
pub use record::{RecordedTerm, Solution};
pub use runtime::Runtime;
pub use term::{Term, TermVector};
