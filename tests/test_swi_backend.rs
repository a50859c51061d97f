//! Integration tests against a native SWI-Prolog installation
//!
//! Run with: cargo test --features swipl

#![cfg(feature = "swipl")]

mod common;

use prolog_bridge::{BackendKind, BridgeResult, ContinuationContext, EngineOptions, Term};

fn swipl_options() -> EngineOptions {
    EngineOptions {
        backend: BackendKind::Swipl,
        ..EngineOptions::default()
    }
}

// ============================================================================
// SWI-Prolog Backend Tests
// ============================================================================

#[test]
fn test_swipl_queries_and_frames() {
    let rt = common::runtime_with(swipl_options());
    assert_eq!(rt.backend_name(), "swipl");

    rt.consult_str("p(1). p(2). p(3). p2(X) :- p(X), X >= 2.").unwrap();
    assert_eq!(common::ints(&rt.solve_all("p(X)").unwrap(), "X"), vec![1, 2, 3]);
    assert_eq!(common::ints(&rt.solve_all("p2(X)").unwrap(), "X"), vec![2, 3]);

    let frame = rt.open_frame().unwrap();
    let t = rt.parse("f(a, \"b\", 3)").unwrap();
    assert_eq!(t.get(0).unwrap().text().unwrap(), "f");
    frame.close().unwrap();
    assert!(!t.is_valid());
}

#[test]
fn test_swipl_foreign_predicates() {
    let rt = common::runtime_with(swipl_options());
    rt.register("gt", 2, |a: Term, b: Term| -> BridgeResult<bool> { Ok(a.as_i64()? > b.as_i64()?) })
        .unwrap();
    assert!(rt.contains("gt(2, 1)").unwrap());
    assert!(!rt.contains("gt(1, 2)").unwrap());

    rt.register_nondet("upto", 2, |n: Term, x: Term, ctx: &mut ContinuationContext| -> BridgeResult<bool> {
        let next = ctx.get_i64("next").unwrap_or(1);
        if next > n.as_i64()? {
            return Ok(false);
        }
        ctx.insert("next", next + 1);
        x.unify_value(next)
    })
    .unwrap();
    assert_eq!(common::ints(&rt.solve_all("upto(4, X)").unwrap(), "X"), vec![1, 2, 3, 4]);
    assert!(rt.contains("upto(100, X), X > 3, !").unwrap());
    assert_eq!(rt.live_continuations(), 0);
}

#[test]
fn test_swipl_exceptions() {
    let rt = common::runtime_with(swipl_options());
    let err = rt.contains("atom_length(X, _)").unwrap_err();
    assert_eq!(err.as_exception().unwrap().kind(), Some("instantiation_error"));
}
