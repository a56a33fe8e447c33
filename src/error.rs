//! Unified error handling for the filebalancer crate
//!
//! Each layer keeps its own error type ([`StoreError`], [`RegistryError`],
//! [`SchedulerError`]); [`Error`] wraps them so the service and the binary
//! can work with a single type.
//!
//! # Usage
//!
//! ```rust,ignore
//! use filebalancer::error::{BalancerErrorTrait, Error};
//!
//! fn handle_error(err: Error) {
//!     tracing::error!(
//!         category = err.category().as_str(),
//!         recoverable = err.is_recoverable(),
//!         error = %err,
//!         "Command failed"
//!     );
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::registry::RegistryError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::storage::StoreError;

/// Common trait for filebalancer error types
pub trait BalancerErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// State store and payload I/O
    Storage,
    /// Metadata registry
    Registry,
    /// Planning, migration and drain errors
    Scheduler,
    /// Configuration and validation errors
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Registry => "registry",
            Self::Scheduler => "scheduler",
            Self::Config => "config",
        }
    }
}

/// Unified error type for the filebalancer crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// State store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Metadata registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl BalancerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Store(StoreError::Poisoned) => false,
            Self::Store(_) => true,
            Self::Registry(_) => true,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(SchedulerError::UnknownNode { .. }) => ErrorCategory::Config,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Store(_) | Self::Io(_) | Self::Json(_) => ErrorCategory::Storage,
            Self::Registry(_) => ErrorCategory::Registry,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let store_err = Error::Store(StoreError::FileNotFound(1));
        assert_eq!(store_err.category(), ErrorCategory::Storage);

        let unknown: Error = SchedulerError::unknown_node("zk9", &[]).into();
        assert_eq!(unknown.category(), ErrorCategory::Config);

        let timeout = Error::Registry(RegistryError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(timeout.category(), ErrorCategory::Registry);
    }

    #[test]
    fn test_is_recoverable() {
        let registry_err = Error::Registry(RegistryError::Connection("refused".to_string()));
        assert!(registry_err.is_recoverable());

        let unknown: Error = SchedulerError::unknown_node("zk9", &[]).into();
        assert!(!unknown.is_recoverable());

        assert!(!Error::Store(StoreError::Poisoned).is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("nodes must not be empty");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert_eq!(err.category().as_str(), "config");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_drain_write_failure_is_recoverable_scheduler_error() {
        let err: Error = SchedulerError::store_write("set_node_state", StoreError::Poisoned).into();
        assert_eq!(err.category(), ErrorCategory::Scheduler);
        assert!(err.is_recoverable());
    }
}
