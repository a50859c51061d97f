//! Integration tests for engine configuration

#![cfg(feature = "memory")]

mod common;

use std::io::Write;

use prolog_bridge::config::{BACKEND_ENV, HOME_ENV};
use prolog_bridge::{BackendKind, BridgeError, EngineOptions, Runtime};

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "backend: memory\nprogram_name: demo\nquiet: false\nextra_args: [\"--traditional\"]\ndefault_module: app"
    )
    .unwrap();

    let options = EngineOptions::from_file(file.path()).unwrap();
    assert_eq!(options.backend, BackendKind::Memory);
    assert_eq!(options.program_name, "demo");
    assert!(!options.quiet);
    assert_eq!(options.default_module, "app");
    assert_eq!(options.engine_args(), vec!["demo", "--no-signals", "--traditional"]);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = EngineOptions::from_file("/no/such/engine.yaml").unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)));
}

#[test]
fn test_unknown_backend_is_rejected() {
    let err = EngineOptions::from_yaml_str("backend: prolog9000").unwrap_err();
    assert!(matches!(err, BridgeError::InvalidConfig(_)));
    assert!("prolog9000".parse::<BackendKind>().is_err());
    assert_eq!("SWI-Prolog".parse::<BackendKind>().unwrap(), BackendKind::Swipl);
}

#[test]
fn test_env_overrides() {
    // Environment is process-wide; hold the engine lock while changing it
    let _guard = common::exclusive();
    std::env::set_var(HOME_ENV, "/opt/swipl-test");
    std::env::set_var(BACKEND_ENV, "memory");
    let options = EngineOptions::default().apply_env().unwrap();
    std::env::remove_var(HOME_ENV);
    std::env::remove_var(BACKEND_ENV);

    assert_eq!(options.home.as_deref(), Some(std::path::Path::new("/opt/swipl-test")));
    assert_eq!(options.backend, BackendKind::Memory);
}

// ============================================================================
// Runtime Options
// ============================================================================

#[test]
fn test_default_module_is_used_for_registration() {
    let options = EngineOptions {
        default_module: "app".to_string(),
        ..EngineOptions::default()
    };
    let rt = common::runtime_with(options);
    assert_eq!(rt.default_module(), "app");
    rt.register("hello", 0, || true).unwrap();
    assert!(rt.is_registered("app", "hello", 0));
    assert!(rt.contains("app:hello").unwrap());
}

#[test]
fn test_library_can_be_disabled() {
    let options = EngineOptions {
        load_library: false,
        ..EngineOptions::default()
    };
    let rt = common::runtime_with(options);
    let err = rt.contains("member(a, [a])").unwrap_err();
    assert_eq!(err.as_exception().unwrap().kind(), Some("existence_error"));
}

#[test]
fn test_invalid_options_do_not_claim_the_engine() {
    let _guard = common::exclusive();
    let options = EngineOptions {
        default_module: String::new(),
        ..EngineOptions::default()
    };
    assert!(matches!(Runtime::init(options), Err(BridgeError::InvalidConfig(_))));
    assert!(!Runtime::is_engine_running());
}
