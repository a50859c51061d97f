//! Engine configuration.
//!
//! Options are plain serde structs so they can be embedded in a host
//! application's own configuration or loaded from a YAML file.
//!
//! # Example
//!
//! ```yaml
//! backend: swipl
//! program_name: my-app
//! home: /usr/lib/swi-prolog
//! quiet: true
//! extra_args: ["--stack-limit=1g"]
//! default_module: user
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, BridgeResult};

/// Environment variable overriding [`EngineOptions::home`]
pub const HOME_ENV: &str = "SWI_HOME_DIR";

/// Environment variable overriding [`EngineOptions::backend`]
pub const BACKEND_ENV: &str = "PLBRIDGE_BACKEND";

/// Which engine the runtime drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process stand-in engine (requires the `memory` feature)
    Memory,
    /// SWI-Prolog through `libswipl` (requires the `swipl` feature)
    Swipl,
}

impl Default for BackendKind {
    /// The memory engine when compiled in, SWI-Prolog otherwise
    fn default() -> Self {
        if cfg!(feature = "memory") {
            BackendKind::Memory
        } else {
            BackendKind::Swipl
        }
    }
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Swipl => "swipl",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "swipl" | "swi" | "swi-prolog" => Ok(BackendKind::Swipl),
            other => Err(BridgeError::InvalidConfig(format!("unknown backend '{}'", other))),
        }
    }
}

/// Runtime start-up options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Engine to start
    pub backend: BackendKind,

    /// `argv[0]` handed to the engine
    pub program_name: String,

    /// SWI-Prolog home directory (`--home=DIR`); `SWI_HOME_DIR` wins when set
    pub home: Option<PathBuf>,

    /// Suppress the engine's banner and informational messages
    pub quiet: bool,

    /// Additional engine command-line arguments
    pub extra_args: Vec<String>,

    /// Module queries and registrations use when none is given
    pub default_module: String,

    /// Load the list library into the memory backend
    pub load_library: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            program_name: "plbridge".to_string(),
            home: None,
            quiet: true,
            extra_args: Vec::new(),
            default_module: "user".to_string(),
            load_library: true,
        }
    }
}

impl EngineOptions {
    /// Parse options from YAML text
    pub fn from_yaml_str(yaml: &str) -> BridgeResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let options: Self = serde_yaml::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Apply `SWI_HOME_DIR` and `PLBRIDGE_BACKEND` overrides
    pub fn apply_env(mut self) -> BridgeResult<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            self.home = Some(PathBuf::from(home));
        }
        if let Ok(backend) = std::env::var(BACKEND_ENV) {
            if !backend.trim().is_empty() {
                self.backend = backend.parse()?;
            }
        }
        Ok(self)
    }

    /// Reject option combinations the runtime cannot honour
    pub fn validate(&self) -> BridgeResult<()> {
        if self.default_module.trim().is_empty() {
            return Err(BridgeError::InvalidConfig("default_module must not be empty".to_string()));
        }
        if self.program_name.is_empty() {
            return Err(BridgeError::InvalidConfig("program_name must not be empty".to_string()));
        }
        if self.backend == BackendKind::Swipl && !cfg!(feature = "swipl") {
            return Err(BridgeError::InvalidConfig(
                "backend 'swipl' requires building with the `swipl` feature".to_string(),
            ));
        }
        if self.backend == BackendKind::Memory && !cfg!(feature = "memory") {
            return Err(BridgeError::InvalidConfig(
                "backend 'memory' requires building with the `memory` feature".to_string(),
            ));
        }
        Ok(())
    }

    /// Command line handed to the engine at initialisation
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = vec![self.program_name.clone()];
        if let Some(home) = &self.home {
            args.push(format!("--home={}", home.display()));
        }
        if self.quiet {
            args.push("-q".to_string());
        }
        args.push("--no-signals".to_string());
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "memory")]
    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.backend, BackendKind::Memory);
        assert_eq!(options.default_module, "user");
        assert!(options.load_library);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let options = EngineOptions::from_yaml_str("quiet: false\ndefault_module: app\n").unwrap();
        assert!(!options.quiet);
        assert_eq!(options.default_module, "app");
        assert_eq!(options.program_name, "plbridge");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(EngineOptions::from_yaml_str("  \n").unwrap(), EngineOptions::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = EngineOptions::from_yaml_str("backend: [not, a, backend]").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)));

        let err = EngineOptions::from_yaml_str("default_module: ''").unwrap_err();
        assert!(err.to_string().contains("default_module"));
    }

    #[test]
    fn test_engine_args() {
        let options = EngineOptions {
            home: Some(PathBuf::from("/opt/swipl")),
            extra_args: vec!["--stack-limit=1g".to_string()],
            ..EngineOptions::default()
        };
        assert_eq!(
            options.engine_args(),
            vec!["plbridge", "--home=/opt/swipl", "-q", "--no-signals", "--stack-limit=1g"]
        );
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("SWI".parse::<BackendKind>().unwrap(), BackendKind::Swipl);
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("jvm".parse::<BackendKind>().is_err());
    }

    #[cfg(not(feature = "swipl"))]
    #[test]
    fn test_swipl_backend_requires_feature() {
        let err = EngineOptions::from_yaml_str("backend: swipl").unwrap_err();
        assert!(err.to_string().contains("swipl"));
    }

    #[cfg(not(feature = "memory"))]
    #[test]
    fn test_memory_backend_requires_feature() {
        assert_eq!(BackendKind::default(), BackendKind::Swipl);
        let err = EngineOptions::from_yaml_str("backend: memory").unwrap_err();
        assert!(err.to_string().contains("memory"));
    }
}
