//! File-count rebalancing
//!
//! The scheduler keeps demo files spread evenly across a fixed pool of
//! storage nodes. Every cycle it rebuilds a plan from the state store and,
//! when the busiest and quietest nodes differ by at least the configured
//! threshold, moves one file between them.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        SchedulerLoop                          │
//! │        timer tick ──┐                 ┌── run_once()          │
//! │                     ▼                 ▼                       │
//! │              ┌──────────────────────────────┐                 │
//! │              │  critical section (1 cycle)  │                 │
//! │              └──────────────┬───────────────┘                 │
//! │                             │                                 │
//! │          ┌──────────────────┼──────────────────┐              │
//! │          ▼                                     ▼              │
//! │   ┌─────────────┐                     ┌──────────────────┐    │
//! │   │ build_plan  │ ── SchedulerPlan ─▶ │MigrationExecutor │    │
//! │   └─────────────┘                     └──────────────────┘    │
//! └───────────────────────────────────────────────────────────────┘
//!          ▲                                  │        │
//!          │ files, node states               ▼        ▼
//!   ┌──────────────┐                  ┌────────────┐ ┌──────────┐
//!   │  StateStore  │ ◀── drain() ──   │  Payloads  │ │ Registry │
//!   └──────────────┘  DrainController └────────────┘ └──────────┘
//! ```
//!
//! # Modules
//!
//! - [`plan`] - Pure plan builder and plan types
//! - [`executor`] - Applies a plan to payloads, store, registry and audit log
//! - [`trigger`] - Timer-driven and on-demand cycles, one at a time
//! - [`drain`] - Node drain and undrain
//! - [`error`] - Scheduler error type
//!
//! # Quick Start
//!
//! ```ignore
//! use filebalancer::scheduler::{build_plan, PlanReason};
//!
//! let plan = build_plan(&files, &node_states, &nodes, 5);
//! if plan.reason == PlanReason::Ok {
//!     println!("{}", plan.message);
//! }
//! ```
//!
//! # Reason Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | `ok` | migration recommended |
//! | `no_candidate` | source node holds no file |
//! | `no_target` | no node distinct from the source |
//! | `below_threshold` | delta smaller than threshold |
//! | `single_target` | only one node configured |
//! | `store_unavailable` | state snapshot could not be read |

pub mod drain;
pub mod error;
pub mod executor;
pub mod plan;
pub mod trigger;

pub use drain::{DrainAck, DrainController, ACTION_DRAIN, ACTION_UNDRAIN};
pub use error::{SchedulerError, SchedulerResult};
pub use executor::{MigrationExecutor, MigrationResult, SCHEDULER_ACTOR};
pub use plan::{build_plan, least_loaded, tally, PlanReason, SchedulerPlan};
pub use trigger::{
    CycleEvent, CycleFailure, CycleReport, CycleTrigger, LoopSettings, LoopStatus, SchedulerLoop,
};
