//! Integration tests for retryable foreign predicates and continuation contexts

#![cfg(feature = "memory")]

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use prolog_bridge::{BridgeResult, ContinuationContext, Term};

const DATA: [i64; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

/// `data_item(X)` enumerates `DATA` with a counter kept in the context
fn register_data(rt: &prolog_bridge::Runtime) {
    rt.register_nondet("data_item", 1, |x: Term, ctx: &mut ContinuationContext| -> BridgeResult<bool> {
        let counter = ctx.get_i64("counter").unwrap_or(0) as usize;
        let Some(value) = DATA.get(counter) else {
            return Ok(false);
        };
        ctx.insert("counter", counter as i64 + 1);
        x.unify_value(*value)
    })
    .unwrap();
}

// ============================================================================
// Enumeration
// ============================================================================

#[test]
fn test_enumerates_all_items_in_order() {
    let rt = common::runtime();
    register_data(&rt);
    assert_eq!(common::ints(&rt.solve_all("data_item(X)").unwrap(), "X"), DATA.to_vec());
    assert_eq!(rt.live_continuations(), 0);
}

#[test]
fn test_each_query_gets_a_fresh_context() {
    let rt = common::runtime();
    register_data(&rt);

    let mut first = rt.query("data_item(X)");
    assert!(first.next_solution().unwrap());
    assert!(first.next_solution().unwrap());
    assert_eq!(first.bindings().unwrap().get("X").unwrap().as_i64().unwrap(), 2);
    first.cut().unwrap();

    // A new query starts over instead of resuming the first one's counter
    assert_eq!(common::ints(&rt.solve_all("data_item(X)").unwrap(), "X"), DATA.to_vec());
}

#[test]
fn test_nested_enumerations_do_not_share_state() {
    let rt = common::runtime();
    register_data(&rt);
    let pairs = rt.solve_all("data_item(X), X =< 2, data_item(Y), Y =< 2").unwrap();
    assert_eq!(pairs.len(), 4);
    assert_eq!(rt.live_continuations(), 0);
}

#[test]
fn test_findall_over_foreign_predicate() {
    let rt = common::runtime();
    register_data(&rt);
    let bindings = rt.solve_once("findall(X, (data_item(X), X mod 2 =:= 0), L)").unwrap().unwrap();
    assert_eq!(bindings.get("L").unwrap().to_text().unwrap(), "[2,4,6,8,10]");
}

// ============================================================================
// Pruning
// ============================================================================

#[test]
fn test_cut_in_goal_prunes_the_context() {
    let rt = common::runtime();
    register_data(&rt);
    let bindings = rt.solve_once("data_item(X), X > 3, !").unwrap().unwrap();
    assert_eq!(bindings.len(), 0);
    assert_eq!(rt.live_continuations(), 0);
    assert!(rt.contains("once((data_item(X), X =:= 5))").unwrap());
    assert_eq!(rt.live_continuations(), 0);
    // The first call only offers DATA[0]
    assert!(rt.contains("once(data_item(1))").unwrap());
    assert!(!rt.contains("once(data_item(5))").unwrap());
    assert_eq!(rt.live_continuations(), 0);
}

#[test]
fn test_closing_a_query_prunes_the_context() {
    let rt = common::runtime();
    register_data(&rt);
    let mut query = rt.query("data_item(X)");
    assert!(query.next_solution().unwrap());
    assert_eq!(rt.live_continuations(), 1);
    query.close().unwrap();
    assert_eq!(rt.live_continuations(), 0);
}

#[test]
fn test_exception_frees_the_context() {
    let rt = common::runtime();
    let dropped = Rc::new(RefCell::new(Vec::new()));
    let log = dropped.clone();
    rt.register_nondet("fragile", 1, move |x: Term, ctx: &mut ContinuationContext| -> BridgeResult<bool> {
        let step = ctx.get_i64("step").unwrap_or(0);
        log.borrow_mut().push(step);
        ctx.insert("step", step + 1);
        if step == 2 {
            return x.as_i64().map(|_| true);
        }
        x.unify_value(step)
    })
    .unwrap();

    let err = rt.solve_all("fragile(X), X > 5").unwrap_err();
    assert_eq!(err.as_exception().unwrap().kind(), Some("host_error"));
    assert_eq!(*dropped.borrow(), vec![0, 1, 2]);
    assert_eq!(rt.live_continuations(), 0);
}

#[test]
fn test_shutdown_frees_parked_contexts() {
    let rt = common::runtime();
    register_data(&rt);
    let mut query = rt.query("data_item(X)");
    assert!(query.next_solution().unwrap());
    assert_eq!(rt.live_continuations(), 1);
    rt.shutdown().unwrap();
    assert_eq!(rt.live_continuations(), 0);
    assert!(query.next_solution().is_err());
}
