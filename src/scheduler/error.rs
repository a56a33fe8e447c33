//! Error types for the scheduler module

use std::fmt;
use std::time::Duration;

use crate::storage::StoreError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// The planned candidate is gone or no longer on the source node
    CandidateVanished {
        file_id: i64,
        expected_node: String,
    },

    /// The payload could not be moved to the target node
    MoveFailed {
        file_id: i64,
        from: String,
        to: String,
        reason: String,
    },

    /// The payload move did not finish in time
    MoveTimeout {
        file_id: i64,
        after: Duration,
    },

    /// The payload moved but the file record could not be updated
    StoreWriteFailed {
        file_id: i64,
        reason: String,
    },

    /// The metadata registry rejected or timed out a write
    RegistryWriteFailed {
        key: String,
        reason: String,
    },

    /// A drain request named a node outside the configured pool
    UnknownNode {
        node: String,
        valid_options: Vec<String>,
    },

    /// Reading state for a cycle failed
    StoreReadFailed {
        operation: String,
        reason: String,
    },

    /// Writing node state or an audit entry failed
    StateWriteFailed {
        operation: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CandidateVanished {
                file_id,
                expected_node,
            } => {
                write!(
                    f,
                    "Candidate file {} is no longer on node '{}'",
                    file_id, expected_node
                )
            }
            Self::MoveFailed {
                file_id,
                from,
                to,
                reason,
            } => {
                write!(
                    f,
                    "Failed to move file {} from '{}' to '{}': {}",
                    file_id, from, to, reason
                )
            }
            Self::MoveTimeout { file_id, after } => {
                write!(f, "Moving file {} timed out after {:?}", file_id, after)
            }
            Self::StoreWriteFailed { file_id, reason } => {
                write!(f, "Failed to update record for file {}: {}", file_id, reason)
            }
            Self::RegistryWriteFailed { key, reason } => {
                write!(f, "Registry write for '{}' failed: {}", key, reason)
            }
            Self::UnknownNode {
                node,
                valid_options,
            } => {
                write!(
                    f,
                    "Unknown node '{}'. Valid options: {}",
                    node,
                    valid_options.join(", ")
                )
            }
            Self::StoreReadFailed { operation, reason } => {
                write!(f, "State store read failed during '{}': {}", operation, reason)
            }
            Self::StateWriteFailed { operation, reason } => {
                write!(f, "State store write failed during '{}': {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an unknown node error
    pub fn unknown_node(node: impl Into<String>, valid_options: &[String]) -> Self {
        Self::UnknownNode {
            node: node.into(),
            valid_options: valid_options.to_vec(),
        }
    }

    /// Create a store read error with context
    pub fn store_read(operation: impl Into<String>, err: StoreError) -> Self {
        Self::StoreReadFailed {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Create a store write error with context
    pub fn store_write(operation: impl Into<String>, err: StoreError) -> Self {
        Self::StateWriteFailed {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::CandidateVanished { .. } => "candidate_vanished",
            Self::MoveFailed { .. } => "move_failed",
            Self::MoveTimeout { .. } => "move_timeout",
            Self::StoreWriteFailed { .. } => "store_write_failed",
            Self::RegistryWriteFailed { .. } => "registry_write_failed",
            Self::UnknownNode { .. } => "unknown_node",
            Self::StoreReadFailed { .. } => "store_read_failed",
            Self::StateWriteFailed { .. } => "state_write_failed",
        }
    }

    /// Check if the error is recoverable
    ///
    /// Everything except a bad node name clears up on a later cycle.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::UnknownNode { .. })
    }
}
