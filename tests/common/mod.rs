//! Shared helpers for integration tests
//!
//! Only one engine may run per process while test functions run on parallel
//! threads, so every test takes its runtime through [`runtime`].

#![allow(dead_code)]

use std::ops::Deref;

use parking_lot::{Mutex, MutexGuard};
use prolog_bridge::{EngineOptions, Runtime, Solution};

static LOCK: Mutex<()> = parking_lot::const_mutex(());

pub struct TestRuntime {
    // Dropped before the lock is released
    rt: Runtime,
    _lock: MutexGuard<'static, ()>,
}

impl Deref for TestRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Runtime {
        &self.rt
    }
}

pub fn runtime() -> TestRuntime {
    runtime_with(EngineOptions::default())
}

pub fn runtime_with(options: EngineOptions) -> TestRuntime {
    let lock = LOCK.lock();
    let rt = Runtime::init(options).expect("engine should start");
    TestRuntime { rt, _lock: lock }
}

/// Hold the engine slot without starting an engine
pub fn exclusive() -> MutexGuard<'static, ()> {
    LOCK.lock()
}

/// Integer binding `name` of every solution
pub fn ints(solutions: &[Solution], name: &str) -> Vec<i64> {
    solutions
        .iter()
        .map(|s| {
            s.get(name)
                .expect("binding present")
                .to_owned_term()
                .expect("readable")
                .as_i64()
                .expect("integer")
        })
        .collect()
}
