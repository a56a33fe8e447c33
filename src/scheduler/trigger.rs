//! Scheduling loop
//!
//! Two entry points share one critical section: the timer-driven loop
//! started with [`SchedulerLoop::start`] and the on-demand
//! [`SchedulerLoop::run_once`]. Each cycle snapshots the state store,
//! builds a plan and, when the plan recommends it, executes the migration.
//! At most one cycle runs at a time; concurrent triggers wait their turn.
//!
//! Failures never escape a cycle. An unreadable state store or a failed
//! execution is logged with the plan that produced it, counted, published
//! as [`CycleEvent::Failed`] and returned inside the [`CycleReport`]; the
//! next tick starts fresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::error::{SchedulerError, SchedulerResult};
use super::executor::{MigrationExecutor, MigrationResult};
use super::plan::{build_plan, PlanReason, SchedulerPlan};
use crate::models::FileSummary;
use crate::storage::SharedStateStore;

// ============================================================================
// Loop Settings
// ============================================================================

/// Planning inputs that do not come from the state store
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Configured node ids, in tie-break order
    pub nodes: Vec<String>,

    /// Minimum delta that triggers a migration
    pub threshold: u32,

    /// Time between timer-driven cycles
    pub interval: Duration,
}

// ============================================================================
// Cycle Reports and Events
// ============================================================================

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleTrigger {
    Timer,
    Manual,
}

/// Error summary attached to a cycle report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub code: String,
    pub message: String,
}

impl From<&SchedulerError> for CycleFailure {
    fn from(err: &SchedulerError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one build-and-maybe-execute cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub trigger: CycleTrigger,
    pub executed: bool,
    /// Plan the cycle acted on
    pub before: SchedulerPlan,
    /// Plan rebuilt after the cycle
    pub after: SchedulerPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_file: Option<FileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CycleFailure>,
}

/// Events published after every cycle
#[derive(Debug, Clone)]
pub enum CycleEvent {
    /// A file was moved
    Migrated {
        file_id: i64,
        source: String,
        target: String,
        trigger: CycleTrigger,
    },

    /// The plan did not recommend a migration
    Idle {
        reason: PlanReason,
        trigger: CycleTrigger,
    },

    /// The cycle failed
    Failed {
        code: String,
        message: String,
        trigger: CycleTrigger,
    },
}

// ============================================================================
// Loop Status
// ============================================================================

#[derive(Debug, Clone, Default)]
struct LoopStats {
    cycles_run: u64,
    migrations: u64,
    failures: u64,
    last_run_at: Option<DateTime<Utc>>,
    last_outcome: Option<String>,
}

/// Snapshot of the loop's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStatus {
    pub is_running: bool,
    pub interval_secs: u64,
    pub threshold: u32,
    pub cycles_run: u64,
    pub migrations: u64,
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

impl LoopStatus {
    /// Format as display string
    pub fn display(&self) -> String {
        let mut output = String::from("Scheduler Status\n");
        output.push_str(&format!("{:-<40}\n", ""));
        output.push_str(&format!("Running: {}\n", self.is_running));
        output.push_str(&format!("Interval: {}s\n", self.interval_secs));
        output.push_str(&format!("Threshold: {}\n", self.threshold));
        output.push_str(&format!("Cycles: {}\n", self.cycles_run));
        output.push_str(&format!("Migrations: {}\n", self.migrations));
        output.push_str(&format!("Failures: {}\n", self.failures));
        if let Some(at) = self.last_run_at {
            output.push_str(&format!("Last Run: {}\n", at.to_rfc3339()));
        }
        if let Some(outcome) = &self.last_outcome {
            output.push_str(&format!("Last Outcome: {outcome}\n"));
        }
        output
    }
}

// ============================================================================
// Scheduler Loop
// ============================================================================

/// Timer-driven and on-demand rebalancing, one cycle at a time
pub struct SchedulerLoop {
    store: SharedStateStore,
    executor: MigrationExecutor,
    settings: LoopSettings,
    critical: Mutex<()>,
    event_sender: broadcast::Sender<CycleEvent>,
    shutdown: watch::Sender<bool>,
    is_running: Arc<RwLock<bool>>,
    stats: RwLock<LoopStats>,
}

impl SchedulerLoop {
    pub fn new(store: SharedStateStore, executor: MigrationExecutor, settings: LoopSettings) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        let (shutdown, _) = watch::channel(false);

        Self {
            store,
            executor,
            settings,
            critical: Mutex::new(()),
            event_sender,
            shutdown,
            is_running: Arc::new(RwLock::new(false)),
            stats: RwLock::new(LoopStats::default()),
        }
    }

    /// Subscribe to cycle events
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.event_sender.subscribe()
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Current plan, without executing anything
    pub fn diagnostics(&self) -> SchedulerResult<SchedulerPlan> {
        self.snapshot_plan()
    }

    /// Run one cycle on demand and report both plans
    pub async fn run_once(&self) -> CycleReport {
        self.run_cycle(CycleTrigger::Manual).await
    }

    /// Run one build-and-maybe-execute cycle
    ///
    /// Waits for any cycle already in progress. When the state store cannot
    /// be read, both plans carry [`PlanReason::StoreUnavailable`] and the
    /// report's `error` describes the read failure.
    pub async fn run_cycle(&self, trigger: CycleTrigger) -> CycleReport {
        let _guard = self.critical.lock().await;

        let before = match self.snapshot_plan() {
            Ok(plan) => plan,
            Err(err) => {
                error!(
                    trigger = ?trigger,
                    error = %err,
                    code = err.code(),
                    "Scheduler cycle could not read state"
                );
                let plan = SchedulerPlan::unavailable(
                    &self.settings.nodes,
                    self.settings.threshold,
                    format!("No plan computed: {err}"),
                );
                let report = CycleReport {
                    trigger,
                    executed: false,
                    before: plan.clone(),
                    after: plan,
                    migrated_file: None,
                    error: Some(CycleFailure::from(&err)),
                };
                self.finish(&report).await;
                return report;
            }
        };

        debug!(
            trigger = ?trigger,
            reason = %before.reason,
            source = ?before.source_node,
            target = ?before.target_node,
            delta = before.delta,
            "Built plan"
        );

        let outcome = if before.should_migrate {
            self.executor.execute(&before).await
        } else {
            Ok(MigrationResult::skipped())
        };

        let error = match &outcome {
            Err(err) => {
                warn!(
                    trigger = ?trigger,
                    error = %err,
                    code = err.code(),
                    recoverable = err.is_recoverable(),
                    source = ?before.source_node,
                    target = ?before.target_node,
                    candidate = ?before.candidate.as_ref().map(|c| c.id),
                    delta = before.delta,
                    "Migration cycle failed"
                );
                Some(CycleFailure::from(err))
            }
            Ok(_) => None,
        };

        let after = match self.snapshot_plan() {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "Could not rebuild plan after cycle");
                before.clone()
            }
        };

        let migration = outcome.as_ref().ok().filter(|m| m.executed);
        let report = CycleReport {
            trigger,
            executed: migration.is_some(),
            migrated_file: migration.and_then(|m| m.migrated_file.clone()),
            error,
            before,
            after,
        };

        self.finish(&report).await;
        report
    }

    /// Run the timer loop until [`stop`](Self::stop) is called
    ///
    /// The first cycle runs immediately. A cycle already in progress when
    /// stop is requested runs to completion. A stopped loop does not restart.
    pub async fn start(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }

        *self.is_running.write().await = true;
        info!(
            interval_secs = self.settings.interval.as_secs(),
            threshold = self.settings.threshold,
            nodes = ?self.settings.nodes,
            "Scheduler loop started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle(CycleTrigger::Timer).await;
                }
            }
        }

        *self.is_running.write().await = false;
        info!("Scheduler loop stopped");
    }

    /// Ask the timer loop to stop accepting ticks
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Check if the timer loop is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Get loop status
    pub async fn status(&self) -> LoopStatus {
        let stats = self.stats.read().await.clone();
        LoopStatus {
            is_running: self.is_running().await,
            interval_secs: self.settings.interval.as_secs(),
            threshold: self.settings.threshold,
            cycles_run: stats.cycles_run,
            migrations: stats.migrations,
            failures: stats.failures,
            last_run_at: stats.last_run_at,
            last_outcome: stats.last_outcome,
        }
    }

    fn snapshot_plan(&self) -> SchedulerResult<SchedulerPlan> {
        let files = self
            .store
            .get_files()
            .map_err(|e| SchedulerError::store_read("get_files", e))?;
        let node_states = self
            .store
            .get_node_states()
            .map_err(|e| SchedulerError::store_read("get_node_states", e))?;
        Ok(build_plan(
            &files,
            &node_states,
            &self.settings.nodes,
            self.settings.threshold,
        ))
    }

    // Internal: update counters and publish the cycle event
    async fn finish(&self, report: &CycleReport) {
        let trigger = report.trigger;
        let event = match (&report.error, &report.migrated_file) {
            (Some(failure), _) => CycleEvent::Failed {
                code: failure.code.clone(),
                message: failure.message.clone(),
                trigger,
            },
            (None, Some(file)) => CycleEvent::Migrated {
                file_id: file.id,
                source: report.before.source_node.clone().unwrap_or_default(),
                target: file.node.clone(),
                trigger,
            },
            (None, None) => CycleEvent::Idle {
                reason: report.before.reason,
                trigger,
            },
        };

        let outcome = match &event {
            CycleEvent::Migrated {
                file_id,
                source,
                target,
                ..
            } => format!("migrated file {file_id} from {source} to {target}"),
            CycleEvent::Idle { reason, .. } => format!("idle ({reason})"),
            CycleEvent::Failed { code, .. } => format!("failed ({code})"),
        };

        {
            let mut stats = self.stats.write().await;
            stats.cycles_run += 1;
            match &event {
                CycleEvent::Migrated { .. } => stats.migrations += 1,
                CycleEvent::Failed { .. } => stats.failures += 1,
                CycleEvent::Idle { .. } => {}
            }
            stats.last_run_at = Some(Utc::now());
            stats.last_outcome = Some(outcome);
        }

        let _ = self.event_sender.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================
