//! Supervisory runtime for the Warden native resolution engine.
//!
//! This crate wraps the handle-based native engine from `warden-native` in a
//! process-wide `Environment` singleton. The environment lazily opens and
//! caches one native handle per capability (engine, config, config manager,
//! diagnostic, product), routes every call through an `ExecutionGate` that
//! counts in-flight work, and transparently heals config-sensitive
//! operations by reinitializing onto the repository's current default
//! configuration and retrying them once.

pub mod config;
pub mod environment;
pub mod error;
pub mod facade;
pub mod gate;
pub mod lifecycle;
mod registry;
pub mod retry;

pub use config::EnvironmentConfig;
pub use environment::{Environment, EnvironmentBuilder, DEFAULT_SETTINGS};
pub use error::{classify, handle_return_code, NativeError};
pub use facade::{Config, ConfigManager, Diagnostic, Engine, Product};
pub use gate::ExecutionGate;
pub use lifecycle::{validate_transition, Lifecycle};
pub use retry::{invoke_with_retry, OperationId};
pub use warden_native::{flags, ErrorKind};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("environment is not active")]
    NotActive,
    #[error("an environment is already active: {instance_name}")]
    SingletonViolation { instance_name: String },
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("native setup error: {0}")]
    Setup(#[from] warden_native::NativeSetupError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Classified kind of a native failure, `None` for runtime errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CoreError::Native(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Native status code of a native failure.
    pub fn native_code(&self) -> Option<i64> {
        match self {
            CoreError::Native(e) => Some(e.code),
            _ => None,
        }
    }
}
