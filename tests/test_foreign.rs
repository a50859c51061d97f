//! Integration tests for deterministic foreign predicates

#![cfg(feature = "memory")]

mod common;

use std::cell::Cell;
use std::rc::Rc;

use prolog_bridge::{BridgeError, BridgeResult, ContinuationContext, EngineException, OwnedTerm, Term};

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_gt_predicate() {
    let rt = common::runtime();
    rt.register("gt", 2, |a: Term, b: Term| -> BridgeResult<bool> { Ok(a.as_i64()? > b.as_i64()?) })
        .unwrap();
    assert!(rt.contains("gt(2, 1)").unwrap());
    assert!(!rt.contains("gt(1, 2)").unwrap());
}

#[test]
fn test_every_supported_arity() {
    let rt = common::runtime();
    rt.register("a0", 0, || true).unwrap();
    rt.register("a1", 1, |_: Term| true).unwrap();
    rt.register("a4", 4, |_: Term, _: Term, _: Term, d: Term| d.unify_value(4i64))
        .unwrap();
    rt.register(
        "a8",
        8,
        |_: Term, _: Term, _: Term, _: Term, _: Term, _: Term, _: Term, h: Term| h.unify_value("eight"),
    )
    .unwrap();

    assert!(rt.contains("a0").unwrap());
    assert!(rt.contains("a1(x)").unwrap());
    assert!(rt.contains("a4(_, _, _, 4)").unwrap());
    let bindings = rt.solve_once("a8(_, _, _, _, _, _, _, H)").unwrap().unwrap();
    assert_eq!(bindings.get("H").unwrap().text().unwrap(), "eight");
    assert_eq!(rt.registered_predicates().len(), 4);
}

#[test]
fn test_variadic_registration() {
    let rt = common::runtime();
    rt.register_variadic("user", "sum3", 4, |args: &[Term]| -> BridgeResult<bool> {
        let total: i64 = args[..3].iter().map(|t| t.as_i64()).sum::<BridgeResult<i64>>()?;
        args[3].unify_value(total)
    })
    .unwrap();
    let bindings = rt.solve_once("sum3(1, 2, 3, S)").unwrap().unwrap();
    assert_eq!(bindings.get("S").unwrap().as_i64().unwrap(), 6);
}

#[test]
fn test_registration_in_other_module() {
    let rt = common::runtime();
    rt.register_in("geo", "origin", 1, |p: Term| {
        p.unify_value(OwnedTerm::compound("point", vec![0i64.into(), 0i64.into()]))
    })
    .unwrap();
    assert!(rt.is_registered("geo", "origin", 1));
    assert!(!rt.is_registered("user", "origin", 1));
    let bindings = rt.solve_once("geo:origin(P)").unwrap().unwrap();
    assert_eq!(bindings.get("P").unwrap().to_text().unwrap(), "point(0,0)");
}

#[test]
fn test_registration_failures() {
    let rt = common::runtime();
    assert!(matches!(
        rt.register("", 0, || true),
        Err(BridgeError::RegistrationFailure { .. })
    ));
    assert!(matches!(
        rt.register("mismatch", 1, || true),
        Err(BridgeError::RegistrationFailure { .. })
    ));
    // Built-in control constructs cannot be redefined
    let err = rt.register("fail", 0, || true).unwrap_err();
    assert!(err.to_string().contains("user:fail/0"));
}

#[test]
fn test_reregistration_replaces_callback() {
    let rt = common::runtime();
    rt.register("answer", 1, |x: Term| x.unify_value(1i64)).unwrap();
    rt.register("answer", 1, |x: Term| x.unify_value(42i64)).unwrap();
    let bindings = rt.solve_once("answer(X)").unwrap().unwrap();
    assert_eq!(bindings.get("X").unwrap().as_i64().unwrap(), 42);
}

// ============================================================================
// Dispatch Behaviour
// ============================================================================

#[test]
fn test_callback_arguments_are_scoped_to_the_call() {
    let rt = common::runtime();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    rt.register("touch", 1, move |_: Term| {
        counter.set(counter.get() + 1);
        true
    })
    .unwrap();

    assert!(rt.contains("touch(a), touch(b), touch(c)").unwrap());
    assert_eq!(calls.get(), 3);
    assert_eq!(rt.open_scopes(), 0);
}

#[test]
fn test_callback_may_query_the_engine() {
    let rt = common::runtime();
    rt.consult_str("limit(10).").unwrap();
    rt.register("under_limit", 1, |x: Term| -> BridgeResult<bool> {
        let limit = x.runtime().solve_once("limit(L)")?.and_then(|b| b.get("L").cloned());
        match limit {
            Some(l) => Ok(x.as_i64()? < l.as_i64()?),
            None => Ok(false),
        }
    })
    .unwrap();

    assert!(rt.contains("under_limit(3)").unwrap());
    assert!(!rt.contains("under_limit(30)").unwrap());
    assert_eq!(rt.open_scopes(), 0);
}

#[test]
fn test_host_errors_are_catchable() {
    let rt = common::runtime();
    rt.register("needs_int", 1, |x: Term| x.as_i64().map(|_| true)).unwrap();

    let err = rt.contains("needs_int(abc)").unwrap_err();
    let exception = err.as_exception().unwrap();
    assert_eq!(exception.kind(), Some("host_error"));
    assert!(exception.message().contains("Type mismatch"));

    let caught = rt
        .solve_once("catch(needs_int(abc), error(host_error(M), _), true)")
        .unwrap();
    assert!(caught.is_some());
}

#[test]
fn test_engine_exceptions_keep_their_term() {
    let rt = common::runtime();
    rt.register("reject", 1, |x: Term| -> BridgeResult<bool> {
        let culprit = x.to_owned_term()?;
        Err(EngineException::new(OwnedTerm::compound(
            "error",
            vec![
                OwnedTerm::compound("domain_error", vec![OwnedTerm::atom("positive"), culprit]),
                OwnedTerm::Variable(0),
            ],
        ))
        .into())
    })
    .unwrap();

    let err = rt.contains("reject(-1)").unwrap_err();
    let formal = err.as_exception().unwrap().formal().unwrap().clone();
    assert_eq!(formal.to_string(), "domain_error(positive,-1)");
}

#[test]
fn test_panicking_callback_raises_host_error() {
    let rt = common::runtime();
    rt.register("explode", 1, |_: Term| -> bool { panic!("host bug") })
        .unwrap();

    let err = rt.contains("explode(x)").unwrap_err();
    let exception = err.as_exception().unwrap();
    assert_eq!(exception.kind(), Some("host_error"));
    assert!(exception.message().contains("host bug"));
    assert_eq!(rt.open_scopes(), 0);

    assert!(rt
        .contains("catch(explode(x), error(host_error(_), _), true)")
        .unwrap());
    assert!(rt.contains("true").unwrap());
}

#[test]
fn test_panicking_retryable_callback_frees_its_context() {
    let rt = common::runtime();
    rt.register_nondet("brittle", 1, |x: Term, ctx: &mut ContinuationContext| -> BridgeResult<bool> {
        let n = ctx.get_i64("n").unwrap_or(0);
        if n == 2 {
            panic!("gave up after {}", n);
        }
        ctx.insert("n", n + 1);
        x.unify_value(n)
    })
    .unwrap();

    let err = rt.solve_all("brittle(X)").unwrap_err();
    assert!(err.to_string().contains("gave up after 2"));
    assert_eq!(rt.live_continuations(), 0);
    assert_eq!(rt.open_scopes(), 0);
}
