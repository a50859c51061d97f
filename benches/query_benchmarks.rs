//! Performance benchmarks for the embedding bridge
//!
//! # Running benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! Only one runtime may be live per process, so every benchmark function
//! creates its own and drops it before returning.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use prolog_bridge::{BridgeResult, ContinuationContext, Runtime, Term};

// ============================================================================
// Runtime Benchmarks
// ============================================================================

fn bench_runtime_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("Runtime");

    group.bench_function("init_shutdown", |b| {
        b.iter(|| {
            let rt = Runtime::new().unwrap();
            rt.shutdown().unwrap();
            black_box(rt)
        })
    });

    group.finish();
}

// ============================================================================
// Term Benchmarks
// ============================================================================

fn bench_terms(c: &mut Criterion) {
    let mut group = c.benchmark_group("Terms");
    let rt = Runtime::new().unwrap();

    group.bench_function("build_compound_in_frame", |b| {
        b.iter(|| {
            rt.with_frame(|_| {
                let args = [rt.integer(1)?, rt.atom("b")?, rt.string("c")?];
                let t = rt.compound("f", &args)?;
                Ok(black_box(t.arity()?))
            })
            .unwrap()
        })
    });

    group.bench_function("parse_and_read_back", |b| {
        b.iter(|| {
            rt.with_frame(|_| {
                let t = rt.parse("point(1, [a, b, c], \"label\")")?;
                t.to_owned_term()
            })
            .unwrap()
        })
    });

    group.finish();
}

// ============================================================================
// Query Benchmarks
// ============================================================================

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("Queries");
    let rt = Runtime::new().unwrap();
    rt.consult_str(
        "
        nat(0).
        nat(N) :- nat(M), N is M + 1.
        fib(0, 0).
        fib(1, 1).
        fib(N, F) :- N > 1, A is N - 1, B is N - 2, fib(A, FA), fib(B, FB), F is FA + FB.
        ",
    )
    .unwrap();

    group.bench_function("contains_fact", |b| {
        b.iter(|| black_box(rt.contains("fib(1, 1)").unwrap()))
    });

    for n in [10usize, 100] {
        group.bench_with_input(BenchmarkId::new("lazy_enumeration", n), &n, |b, &n| {
            b.iter(|| {
                let mut query = rt.query("nat(X)");
                for _ in 0..n {
                    query.next_solution().unwrap();
                }
                query.cut().unwrap();
            })
        });
    }

    group.bench_function("solve_all_member", |b| {
        b.iter(|| black_box(rt.solve_all("member(X, [a, b, c, d, e])").unwrap().len()))
    });

    group.bench_function("fib_12", |b| {
        b.iter(|| black_box(rt.solve_once("fib(12, F)").unwrap().is_some()))
    });

    group.finish();
}

// ============================================================================
// Foreign Predicate Benchmarks
// ============================================================================

fn bench_foreign(c: &mut Criterion) {
    let mut group = c.benchmark_group("Foreign Predicates");
    let rt = Runtime::new().unwrap();
    rt.register("gt", 2, |a: Term, b: Term| -> BridgeResult<bool> { Ok(a.as_i64()? > b.as_i64()?) })
        .unwrap();
    rt.register_nondet("upto", 2, |limit: Term, x: Term, ctx: &mut ContinuationContext| -> BridgeResult<bool> {
        let next = ctx.get_i64("next").unwrap_or(1);
        if next > limit.as_i64()? {
            return Ok(false);
        }
        ctx.insert("next", next + 1);
        x.unify_value(next)
    })
    .unwrap();

    group.bench_function("deterministic_call", |b| {
        b.iter(|| black_box(rt.contains("gt(2, 1)").unwrap()))
    });

    group.bench_function("nondeterministic_100", |b| {
        b.iter(|| black_box(rt.solve_all("upto(100, X)").unwrap().len()))
    });

    group.finish();
}

criterion_group!(benches, bench_runtime_lifecycle, bench_terms, bench_queries, bench_foreign);
criterion_main!(benches);
