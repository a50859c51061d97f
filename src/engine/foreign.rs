//! Foreign predicates
//!
//! Host closures registered here become predicates the engine can call. Every
//! registration goes through one variadic dispatcher; the typed adapters
//! [`ForeignFn`] and [`NondetFn`] only unpack the argument slice for closures
//! of 0 to [`MAX_ARITY`] [`Term`] parameters.
//!
//! ## Example
//!
//! ```
//! use prolog_bridge::{BridgeResult, Runtime, Term};
//!
//! let rt = Runtime::new()?;
//! rt.register("gt", 2, |a: Term, b: Term| -> BridgeResult<bool> { Ok(a.as_i64()? > b.as_i64()?) })?;
//! assert!(rt.contains("gt(2, 1)")?);
//! assert!(!rt.contains("gt(1, 2)")?);
//! # Ok::<(), prolog_bridge::BridgeError>(())
//! ```
//!
//! ## Errors raised by callbacks
//!
//! A callback returning `Err(BridgeError::Exception(e))` re-raises `e`'s term
//! in the engine. Any other error is raised as
//! `error(host_error(Message), context(Module:Name/Arity, _))`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::continuation::ContinuationContext;
use super::runtime::{Runtime, ScopeKind};
use super::term::Term;
use crate::error::{BridgeError, BridgeResult, EngineException};
use crate::prolog::{ForeignControl, ForeignHandler, ForeignOutcome, RawTerm};
use crate::syntax::OwnedTerm;

/// Highest arity a foreign predicate may have
pub const MAX_ARITY: usize = 8;

/// Return types a foreign callback may use
pub trait IntoOutcome {
    fn into_outcome(self) -> BridgeResult<bool>;
}

impl IntoOutcome for bool {
    fn into_outcome(self) -> BridgeResult<bool> {
        Ok(self)
    }
}

impl IntoOutcome for BridgeResult<bool> {
    fn into_outcome(self) -> BridgeResult<bool> {
        self
    }
}

/// A deterministic callback taking `ARITY` term arguments
pub trait ForeignFn<Args>: 'static {
    const ARITY: usize;

    fn invoke(&self, args: &[Term]) -> BridgeResult<bool>;
}

/// A retryable callback taking `ARITY` term arguments and a continuation context
pub trait NondetFn<Args>: 'static {
    const ARITY: usize;

    fn invoke(&self, args: &[Term], context: &mut ContinuationContext) -> BridgeResult<bool>;
}

fn arity_mismatch(expected: usize, found: usize) -> BridgeError {
    BridgeError::TypeMismatch {
        expected: "argument count matching the callback",
        found: format!("{} arguments for a callback of arity {}", found, expected),
    }
}

macro_rules! term_param {
    ($arg:ident) => {
        Term
    };
}

macro_rules! impl_adapters {
    ($arity:expr $(, $arg:ident)*) => {
        impl<F, R> ForeignFn<($(term_param!($arg),)*)> for F
        where
            F: Fn($(term_param!($arg)),*) -> R + 'static,
            R: IntoOutcome,
        {
            const ARITY: usize = $arity;

            fn invoke(&self, args: &[Term]) -> BridgeResult<bool> {
                match args {
                    [$($arg),*] => (self)($($arg.clone()),*).into_outcome(),
                    _ => Err(arity_mismatch($arity, args.len())),
                }
            }
        }

        impl<F, R> NondetFn<($(term_param!($arg),)*)> for F
        where
            F: Fn($(term_param!($arg),)* &mut ContinuationContext) -> R + 'static,
            R: IntoOutcome,
        {
            const ARITY: usize = $arity;

            fn invoke(&self, args: &[Term], context: &mut ContinuationContext) -> BridgeResult<bool> {
                match args {
                    [$($arg),*] => (self)($($arg.clone(),)* context).into_outcome(),
                    _ => Err(arity_mismatch($arity, args.len())),
                }
            }
        }
    };
}

impl_adapters!(0);
impl_adapters!(1, a1);
impl_adapters!(2, a1, a2);
impl_adapters!(3, a1, a2, a3);
impl_adapters!(4, a1, a2, a3, a4);
impl_adapters!(5, a1, a2, a3, a4, a5);
impl_adapters!(6, a1, a2, a3, a4, a5, a6);
impl_adapters!(7, a1, a2, a3, a4, a5, a6, a7);
impl_adapters!(8, a1, a2, a3, a4, a5, a6, a7, a8);

type DetCallback = Rc<dyn Fn(&[Term]) -> BridgeResult<bool>>;
type NondetCallback = Rc<dyn Fn(&[Term], &mut ContinuationContext) -> BridgeResult<bool>>;

#[derive(Clone)]
enum Callback {
    Deterministic(DetCallback),
    Nondeterministic(NondetCallback),
}

/// `Module:Name/Arity`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateKey {
    pub module: String,
    pub name: String,
    pub arity: usize,
}

impl PredicateKey {
    pub fn new(module: &str, name: &str, arity: usize) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            arity,
        }
    }
}

impl fmt::Display for PredicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.module, self.name, self.arity)
    }
}

struct Registration {
    nondeterministic: bool,
    // Retained for the runtime's lifetime: the engine may call back at any time
    _handler: ForeignHandler,
}

/// Registered predicates, keyed by `Module:Name/Arity`
#[derive(Default)]
pub(crate) struct ForeignTable {
    entries: RefCell<HashMap<PredicateKey, Registration>>,
}

impl ForeignTable {
    fn insert(&self, key: PredicateKey, registration: Registration) {
        self.entries.borrow_mut().insert(key, registration);
    }

    pub(crate) fn clear(&self) {
        // Handlers may be dropped here; don't hold the borrow while they are
        let entries: Vec<_> = self.entries.borrow_mut().drain().collect();
        drop(entries);
    }
}

impl Runtime {
    /// Register a deterministic predicate in the default module
    pub fn register<Args, F: ForeignFn<Args>>(&self, name: &str, arity: usize, callback: F) -> BridgeResult<()> {
        let module = self.default_module().to_string();
        self.register_in(&module, name, arity, callback)
    }

    pub fn register_in<Args, F: ForeignFn<Args>>(
        &self,
        module: &str,
        name: &str,
        arity: usize,
        callback: F,
    ) -> BridgeResult<()> {
        let key = PredicateKey::new(module, name, arity);
        check_signature(&key, F::ARITY)?;
        self.install(key, Callback::Deterministic(Rc::new(move |args: &[Term]| callback.invoke(args))))
    }

    /// Register a retryable predicate in the default module.
    ///
    /// The callback gets a fresh [`ContinuationContext`] on the first call and
    /// the same context on every retry. Returning `true` reports a solution
    /// and leaves a choice point; `false` ends the enumeration.
    pub fn register_nondet<Args, F: NondetFn<Args>>(&self, name: &str, arity: usize, callback: F) -> BridgeResult<()> {
        let module = self.default_module().to_string();
        self.register_nondet_in(&module, name, arity, callback)
    }

    pub fn register_nondet_in<Args, F: NondetFn<Args>>(
        &self,
        module: &str,
        name: &str,
        arity: usize,
        callback: F,
    ) -> BridgeResult<()> {
        let key = PredicateKey::new(module, name, arity);
        check_signature(&key, F::ARITY)?;
        self.install(
            key,
            Callback::Nondeterministic(Rc::new(move |args: &[Term], context: &mut ContinuationContext| {
                callback.invoke(args, context)
            })),
        )
    }

    /// Register a deterministic predicate whose callback takes the arguments as a slice
    pub fn register_variadic<F, R>(&self, module: &str, name: &str, arity: usize, callback: F) -> BridgeResult<()>
    where
        F: Fn(&[Term]) -> R + 'static,
        R: IntoOutcome,
    {
        let key = PredicateKey::new(module, name, arity);
        check_signature(&key, arity)?;
        self.install(
            key,
            Callback::Deterministic(Rc::new(move |args: &[Term]| callback(args).into_outcome())),
        )
    }

    /// Retryable counterpart of [`Runtime::register_variadic`]
    pub fn register_variadic_nondet<F, R>(
        &self,
        module: &str,
        name: &str,
        arity: usize,
        callback: F,
    ) -> BridgeResult<()>
    where
        F: Fn(&[Term], &mut ContinuationContext) -> R + 'static,
        R: IntoOutcome,
    {
        let key = PredicateKey::new(module, name, arity);
        check_signature(&key, arity)?;
        self.install(
            key,
            Callback::Nondeterministic(Rc::new(move |args: &[Term], context: &mut ContinuationContext| {
                callback(args, context).into_outcome()
            })),
        )
    }

    /// Whether `module:name/arity` was registered through this runtime
    pub fn is_registered(&self, module: &str, name: &str, arity: usize) -> bool {
        self.inner()
            .foreign
            .entries
            .borrow()
            .contains_key(&PredicateKey::new(module, name, arity))
    }

    /// Registered predicates with their determinism, sorted
    pub fn registered_predicates(&self) -> Vec<(PredicateKey, bool)> {
        let mut keys: Vec<_> = self
            .inner()
            .foreign
            .entries
            .borrow()
            .iter()
            .map(|(key, r)| (key.clone(), r.nondeterministic))
            .collect();
        keys.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
        keys
    }

    /// Number of continuation contexts currently held by the engine
    pub fn live_continuations(&self) -> usize {
        self.inner().continuations.len()
    }

    fn install(&self, key: PredicateKey, callback: Callback) -> BridgeResult<()> {
        self.inner().check_live()?;
        let nondeterministic = matches!(callback, Callback::Nondeterministic(_));

        let weak = self.downgrade();
        let dispatch_key = key.clone();
        let handler: ForeignHandler = Rc::new(move |base: RawTerm, arity: usize, control: ForeignControl| {
            match weak.upgrade() {
                Some(inner) => dispatch(&Runtime::from_inner(inner), &dispatch_key, &callback, base, arity, control),
                None => ForeignOutcome::Fail,
            }
        });

        self.backend()
            .register_foreign(&key.module, &key.name, key.arity, nondeterministic, handler.clone())
            .map_err(|reason| BridgeError::RegistrationFailure {
                predicate: key.to_string(),
                reason,
            })?;
        debug!(predicate = %key, nondeterministic, "Foreign predicate registered");
        self.inner().foreign.insert(
            key,
            Registration {
                nondeterministic,
                _handler: handler,
            },
        );
        Ok(())
    }
}

fn check_signature(key: &PredicateKey, callback_arity: usize) -> BridgeResult<()> {
    let reason = if key.name.is_empty() {
        "predicate name must not be empty".to_string()
    } else if key.arity > MAX_ARITY {
        format!("arity {} exceeds the supported maximum of {}", key.arity, MAX_ARITY)
    } else if callback_arity != key.arity {
        format!(
            "callback takes {} term arguments but the predicate has arity {}",
            callback_arity, key.arity
        )
    } else {
        return Ok(());
    };
    Err(BridgeError::RegistrationFailure {
        predicate: key.to_string(),
        reason,
    })
}

/// Entry point for every call the engine makes into a registered predicate
fn dispatch(
    rt: &Runtime,
    key: &PredicateKey,
    callback: &Callback,
    base: RawTerm,
    arity: usize,
    control: ForeignControl,
) -> ForeignOutcome {
    trace!(predicate = %key, ?control, "Foreign call");
    let inner = rt.inner();
    let scope = inner.push_scope(ScopeKind::Callback);
    let args: Vec<Term> = (0..arity).map(|i| Term::from_raw(rt, base.offset(i), scope)).collect();

    // A panic must not unwind into the engine; it is raised like any other callback error
    let result = panic::catch_unwind(AssertUnwindSafe(|| match callback {
        Callback::Deterministic(f) => match control {
            ForeignControl::FirstCall => f(&args).map(|ok| {
                if ok {
                    ForeignOutcome::Succeed
                } else {
                    ForeignOutcome::Fail
                }
            }),
            // A deterministic predicate never leaves a choice point behind
            ForeignControl::Redo(_) | ForeignControl::Pruned(_) => Ok(ForeignOutcome::Fail),
        },
        Callback::Nondeterministic(f) => step_nondet(rt, f.as_ref(), &args, control),
    }))
    .unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(predicate = %key, panic = %message, "Foreign predicate panicked");
        Err(BridgeError::CallbackPanic(message))
    });

    drop(args);
    inner.pop_callback(scope);
    match result {
        Ok(outcome) => outcome,
        Err(err) => raise(rt, key, err),
    }
}

fn step_nondet(
    rt: &Runtime,
    callback: &dyn Fn(&[Term], &mut ContinuationContext) -> BridgeResult<bool>,
    args: &[Term],
    control: ForeignControl,
) -> BridgeResult<ForeignOutcome> {
    let table = &rt.inner().continuations;
    let mut context = match control {
        ForeignControl::FirstCall => Box::new(ContinuationContext::new()),
        ForeignControl::Redo(token) => table.reclaim(token).ok_or_else(unknown_context)?,
        ForeignControl::Pruned(token) => {
            if table.reclaim(token).is_none() {
                warn!(token, "Pruned a continuation context that is not live");
            }
            return Ok(ForeignOutcome::Succeed);
        }
    };
    // On failure or error the context is dropped here, exactly once
    if callback(args, &mut context)? {
        Ok(ForeignOutcome::Retry(table.park(context)))
    } else {
        Ok(ForeignOutcome::Fail)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn unknown_context() -> BridgeError {
    let formal = OwnedTerm::compound("resource_error", vec![OwnedTerm::atom("continuation_context")]);
    EngineException::new(OwnedTerm::compound("error", vec![formal, OwnedTerm::Variable(0)])).into()
}

fn host_error(key: &PredicateKey, message: &str) -> OwnedTerm {
    // (Module:Name)/Arity, which is how `Module:Name/Arity` reads
    let qualified = OwnedTerm::compound(
        ":",
        vec![OwnedTerm::atom(key.module.as_str()), OwnedTerm::atom(key.name.as_str())],
    );
    let indicator = OwnedTerm::compound("/", vec![qualified, OwnedTerm::Integer(key.arity as i64)]);
    OwnedTerm::compound(
        "error",
        vec![
            OwnedTerm::compound("host_error", vec![OwnedTerm::string(message)]),
            OwnedTerm::compound("context", vec![indicator, OwnedTerm::Variable(0)]),
        ],
    )
}

/// Turn a callback error into the engine's pending exception
fn raise(rt: &Runtime, key: &PredicateKey, err: BridgeError) -> ForeignOutcome {
    let ball = match err {
        BridgeError::Exception(e) => e.term().clone(),
        other => host_error(key, &other.to_string()),
    };
    debug!(predicate = %key, exception = %ball, "Foreign predicate raised");
    let be = rt.backend();
    let t = be.new_term_refs(1);
    rt.inner().put_owned(t, &ball);
    be.raise_exception(t);
    ForeignOutcome::Raised
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::engine::runtime::testing;

    #[test]
    fn test_adapter_arity() {
        fn arity_of<Args, F: ForeignFn<Args>>(_: &F) -> usize {
            F::ARITY
        }
        assert_eq!(arity_of(&|| true), 0);
        assert_eq!(arity_of(&|_a: Term, _b: Term| true), 2);
        assert_eq!(
            arity_of(&|_: Term, _: Term, _: Term, _: Term, _: Term, _: Term, _: Term, _: Term| true),
            8
        );
    }

    #[test]
    fn test_signature_mismatch_is_rejected() {
        let rt = testing::runtime();
        let err = rt.register("p", 2, |_a: Term| true).unwrap_err();
        match err {
            BridgeError::RegistrationFailure { predicate, reason } => {
                assert_eq!(predicate, "user:p/2");
                assert!(reason.contains("arity 2"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!rt.is_registered("user", "p", 2));

        let err = rt.register_variadic("user", "wide", 9, |_: &[Term]| true).unwrap_err();
        assert!(err.to_string().contains("maximum"));
    }

    #[test]
    fn test_deterministic_dispatch() {
        let rt = testing::runtime();
        rt.register("gt", 2, |a: Term, b: Term| -> BridgeResult<bool> { Ok(a.as_i64()? > b.as_i64()?) })
            .unwrap();
        assert!(rt.is_registered("user", "gt", 2));
        assert!(rt.contains("gt(2, 1)").unwrap());
        assert!(!rt.contains("gt(1, 2)").unwrap());
        assert_eq!(rt.open_scopes(), 0);
    }

    #[test]
    fn test_callback_errors_become_exceptions() {
        let rt = testing::runtime();
        rt.register("typed", 1, |a: Term| a.as_i64().map(|_| true)).unwrap();
        let err = rt.contains("typed(abc)").unwrap_err();
        let exception = err.as_exception().unwrap();
        assert_eq!(exception.kind(), Some("host_error"));
        assert!(exception.message().contains("user:typed/1"));

        rt.register("thrower", 0, || -> BridgeResult<bool> {
            Err(EngineException::new(OwnedTerm::atom("custom_ball")).into())
        })
        .unwrap();
        let err = rt.contains("catch(thrower, B, true), B == custom_ball").unwrap();
        assert!(err);
    }

    #[test]
    fn test_nondeterministic_enumeration() {
        let rt = testing::runtime();
        rt.register_nondet("upto3", 1, |x: Term, ctx: &mut ContinuationContext| {
            let next = ctx.get_i64("next").unwrap_or(1);
            if next > 3 {
                return Ok(false);
            }
            ctx.insert("next", next + 1);
            x.unify_value(next)
        })
        .unwrap();

        let values: Vec<i64> = rt
            .solve_all("upto3(X)")
            .unwrap()
            .iter()
            .map(|s| s.get("X").unwrap().to_owned_term().unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(rt.live_continuations(), 0);
    }

    #[test]
    fn test_pruned_context_is_released() {
        let rt = testing::runtime();
        rt.register_nondet("forever", 1, |x: Term, ctx: &mut ContinuationContext| {
            let n = ctx.get_i64("n").unwrap_or(0);
            ctx.insert("n", n + 1);
            x.unify_value(n)
        })
        .unwrap();

        assert!(rt.contains("forever(X), X >= 2, !").unwrap());
        assert_eq!(rt.live_continuations(), 0);

        // A query abandoned mid-way prunes the choice point as well
        let mut query = rt.query("forever(X)");
        assert!(query.next_solution().unwrap());
        assert_eq!(rt.live_continuations(), 1);
        query.cut().unwrap();
        assert_eq!(rt.live_continuations(), 0);
    }
}
