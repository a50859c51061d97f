//! Error types for the Prolog bridge

use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

use crate::syntax::OwnedTerm;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    // Local contract violations
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("Index {index} out of bounds for term of arity {arity}")]
    Bounds { index: usize, arity: usize },

    // Engine errors
    #[error("{0}")]
    Exception(EngineException),

    #[error("Initialization failed: {0}")]
    InitializationFailure(String),

    #[error("Registration of {predicate} failed: {reason}")]
    RegistrationFailure { predicate: String, reason: String },

    #[error("Resource misuse: {0}")]
    ResourceMisuse(String),

    #[error("Callback panicked: {0}")]
    CallbackPanic(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for the bridge
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub(crate) fn misuse(message: impl Into<String>) -> Self {
        BridgeError::ResourceMisuse(message.into())
    }

    /// The engine exception carried by this error, if any
    pub fn as_exception(&self) -> Option<&EngineException> {
        match self {
            BridgeError::Exception(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineException> for BridgeError {
    fn from(err: EngineException) -> Self {
        BridgeError::Exception(err)
    }
}

impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        BridgeError::InvalidConfig(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

/// An exception term raised by the engine during resolution.
///
/// The ball is kept as an engine-independent [`OwnedTerm`], so the error stays
/// usable after the query that raised it has released its native resources.
/// The message is rendered on first use.
#[derive(Debug, Clone)]
pub struct EngineException {
    term: OwnedTerm,
    message: OnceLock<String>,
}

impl EngineException {
    pub fn new(term: OwnedTerm) -> Self {
        Self {
            term,
            message: OnceLock::new(),
        }
    }

    /// An exception whose message was already rendered by the engine
    pub fn with_message(term: OwnedTerm, message: String) -> Self {
        Self {
            term,
            message: OnceLock::from(message),
        }
    }

    /// The original exception term
    pub fn term(&self) -> &OwnedTerm {
        &self.term
    }

    /// The rendered exception, in the engine's canonical notation
    pub fn message(&self) -> &str {
        self.message.get_or_init(|| self.term.to_string())
    }

    /// Formal part of an ISO `error(Formal, Context)` term, if the ball has that shape
    pub fn formal(&self) -> Option<&OwnedTerm> {
        match &self.term {
            OwnedTerm::Compound { name, args } if name == "error" && args.len() == 2 => {
                Some(&args[0])
            }
            _ => None,
        }
    }

    /// Name of the formal error (`type_error`, `existence_error`, ...), or of the ball itself
    pub fn kind(&self) -> Option<&str> {
        match self.formal().unwrap_or(&self.term) {
            OwnedTerm::Atom(name) => Some(name.as_str()),
            OwnedTerm::Compound { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for EngineException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for EngineException {}
