//! Native handle boundary for the Warden environment runtime.
//!
//! This crate describes the contract of the stateful native resolution engine
//! that `warden-core` supervises: the handle traits (`NativeEngine`,
//! `NativeConfig`, `NativeConfigManager`, `NativeDiagnostic`, `NativeProduct`),
//! the `NativeProvider` factory that opens them, and the status-code catalog
//! used to classify failures. Every handle speaks in status codes and
//! out-parameters; `0` means success and anything else is explained by the
//! handle's last-exception pair.
//!
//! The `memory` module ships a complete in-process native implementation,
//! keyed by the `SQL.CONNECTION` entry of the settings document.

pub mod catalog;
pub mod handle;
pub mod memory;
pub mod provider;

pub use catalog::{codes, lookup, ErrorKind, CODE_RANGES};
pub use handle::{
    flags, HandleKind, NativeConfig, NativeConfigManager, NativeDiagnostic, NativeEngine,
    NativeHandle, NativeProduct,
};
pub use memory::InMemoryNative;
pub use provider::{select_provider, NativeProvider};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NativeSetupError {
    #[error("native provider '{0}' is not available")]
    ProviderUnavailable(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("settings JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
