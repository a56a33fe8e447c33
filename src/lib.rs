//! filebalancer - Count-based file rebalancer
//!
//! Keeps demo files evenly spread across a fixed pool of storage nodes by
//! moving one file per cycle from the busiest to the quietest node, with
//! support for draining nodes out of service.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`storage`] - State store (SQLite, in-memory) and payload storage
//! - [`registry`] - Metadata registry mirror (Redis, in-memory)
//! - [`scheduler`] - Plan builder, migration executor, loop and drain
//! - [`service`] - Component wiring used by the binary
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use filebalancer::config::Config;
//! use filebalancer::service::BalancerService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let service = BalancerService::from_config(config).await?;
//!     let plan = service.diagnostics()?;
//!     println!("{}", plan.message);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{BalancerErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{FileRecord, NodeCounts, NodeState, OperationRecord};
    pub use crate::scheduler::{build_plan, CycleReport, PlanReason, SchedulerLoop, SchedulerPlan};
    pub use crate::service::BalancerService;
    pub use crate::storage::{SharedStateStore, StateStore};
}

// Direct re-exports for convenience
pub use models::{FileRecord, NodeCounts, NodeState, OperationRecord};
