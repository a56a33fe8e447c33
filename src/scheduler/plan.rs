//! Plan builder
//!
//! [`build_plan`] turns a snapshot of the state store into a
//! [`SchedulerPlan`]. It is a pure function: the same files, node states,
//! node list and threshold always give the same plan, and nothing is read
//! or written elsewhere. Plans are rebuilt from scratch every cycle and are
//! never persisted.
//!
//! Selection rules:
//!
//! - A drained node that still holds files is always the source; among
//!   several, the fullest wins.
//! - Otherwise the fullest node overall is the source.
//! - The target is the emptiest node that is not drained. If every node is
//!   drained the emptiest node overall is used and the plan says so.
//! - Ties go to the node listed first in the configured order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{FileRecord, FileSummary, NodeCounts, NodeState};

/// Why a plan does or does not recommend a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// A migration is recommended
    Ok,
    /// The source node holds no file to move
    NoCandidate,
    /// No distinct target node exists
    NoTarget,
    /// The imbalance is smaller than the threshold
    BelowThreshold,
    /// Only one node is configured
    SingleTarget,
    /// The state store could not be read, so no plan was computed
    StoreUnavailable,
}

impl PlanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoCandidate => "no_candidate",
            Self::NoTarget => "no_target",
            Self::BelowThreshold => "below_threshold",
            Self::SingleTarget => "single_target",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one scheduling decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerPlan {
    /// File count per configured node, zero-filled, in configured order
    pub counts: NodeCounts,

    /// Administrative state of every configured node, in configured order
    pub node_states: Vec<NodeState>,

    /// Drained node ids, sorted
    pub drained_nodes: Vec<String>,

    /// Files on configured nodes
    pub total_files: usize,

    /// Files whose node is not in the configured pool
    pub unassigned_files: usize,

    pub source_node: Option<String>,
    pub target_node: Option<String>,

    /// True when the target is drained because every node is drained
    pub fallback_target: bool,

    pub candidate: Option<FileSummary>,

    /// Source count minus target count
    pub delta: i64,
    pub threshold: u32,
    pub should_migrate: bool,
    pub reason: PlanReason,
    pub message: String,
}

impl SchedulerPlan {
    /// Placeholder plan for a cycle whose state snapshot could not be read
    pub fn unavailable(configured_nodes: &[String], threshold: u32, message: impl Into<String>) -> Self {
        Self {
            counts: NodeCounts::zeroed(configured_nodes),
            node_states: Vec::new(),
            drained_nodes: Vec::new(),
            total_files: 0,
            unassigned_files: 0,
            source_node: None,
            target_node: None,
            fallback_target: false,
            candidate: None,
            delta: 0,
            threshold,
            should_migrate: false,
            reason: PlanReason::StoreUnavailable,
            message: message.into(),
        }
    }

    /// Count for `node`, zero when the node is not configured
    pub fn count(&self, node: &str) -> usize {
        self.counts.get(node).unwrap_or(0)
    }

    pub fn is_drained(&self, node: &str) -> bool {
        self.drained_nodes.iter().any(|n| n == node)
    }
}

/// Zero-filled per-node counts plus the number of files on unknown nodes
pub fn tally(files: &[FileRecord], configured_nodes: &[String]) -> (NodeCounts, usize) {
    let mut counts = NodeCounts::zeroed(configured_nodes);
    let unassigned = files
        .iter()
        .filter(|file| !counts.increment(&file.node))
        .count();
    (counts, unassigned)
}

/// Pick from `counts` using `better`, keeping the first node on ties
fn pick<'a, F>(counts: &'a NodeCounts, eligible: F, better: Ordering) -> Option<&'a str>
where
    F: Fn(&str, usize) -> bool,
{
    let mut best: Option<(&str, usize)> = None;
    for (node, count) in counts.iter().filter(|(n, c)| eligible(n, *c)) {
        match best {
            Some((_, best_count)) if count.cmp(&best_count) != better => {}
            _ => best = Some((node, count)),
        }
    }
    best.map(|(node, _)| node)
}

/// Emptiest node that is not drained, in configured order on ties
///
/// Returns `None` when every node is drained.
pub fn least_loaded<'a>(counts: &'a NodeCounts, drained: &[String]) -> Option<&'a str> {
    pick(counts, |n, _| !drained.iter().any(|d| d == n), Ordering::Less)
}

/// Build a plan from a state snapshot
///
/// `files` must be in store order (newest first); the candidate is the
/// first file found on the source node.
pub fn build_plan(
    files: &[FileRecord],
    node_states: &[NodeState],
    configured_nodes: &[String],
    threshold: u32,
) -> SchedulerPlan {
    let (counts, unassigned_files) = tally(files, configured_nodes);
    let total_files = counts.total();

    let node_states: Vec<NodeState> = counts
        .nodes()
        .map(|node| {
            node_states
                .iter()
                .find(|s| s.node == node)
                .cloned()
                .unwrap_or_else(|| NodeState::active(node))
        })
        .collect();

    let mut drained_nodes: Vec<String> = node_states
        .iter()
        .filter(|s| s.drained)
        .map(|s| s.node.clone())
        .collect();
    drained_nodes.sort();

    let is_drained = |node: &str| drained_nodes.iter().any(|d| d == node);

    let source = pick(&counts, |n, c| is_drained(n) && c > 0, Ordering::Greater)
        .or_else(|| pick(&counts, |_, _| true, Ordering::Greater));

    let (target, fallback_target) = match least_loaded(&counts, &drained_nodes) {
        Some(node) => (Some(node), false),
        None => (pick(&counts, |_, _| true, Ordering::Less), true),
    };

    let mut plan = SchedulerPlan {
        counts: counts.clone(),
        node_states,
        drained_nodes: drained_nodes.clone(),
        total_files,
        unassigned_files,
        source_node: None,
        target_node: None,
        fallback_target: false,
        candidate: None,
        delta: 0,
        threshold,
        should_migrate: false,
        reason: PlanReason::NoCandidate,
        message: String::new(),
    };

    let candidate = source.and_then(|src| files.iter().find(|f| f.node == src));
    let (Some(source), Some(candidate)) = (source, candidate) else {
        plan.message = if total_files == 0 {
            "Cluster holds no files; nothing to balance".to_string()
        } else {
            "Source node holds no file to move".to_string()
        };
        return plan;
    };

    let source_count = counts.get(source).unwrap_or(0) as i64;
    let target_count = target.and_then(|t| counts.get(t)).unwrap_or(0) as i64;

    plan.source_node = Some(source.to_string());
    plan.target_node = target.map(String::from);
    plan.fallback_target = fallback_target;
    plan.candidate = Some(candidate.summary());
    plan.delta = source_count - target_count;

    let (reason, message) = match target {
        _ if configured_nodes.len() == 1 => (
            PlanReason::SingleTarget,
            format!("Only one node ({source}) is configured; nowhere to migrate"),
        ),
        None => (PlanReason::NoTarget, "No target node available".to_string()),
        Some(target) if target == source => (
            PlanReason::NoTarget,
            format!("Source and target are both {source}; nothing to balance"),
        ),
        Some(target) if plan.delta < i64::from(threshold) => (
            PlanReason::BelowThreshold,
            format!(
                "Imbalance between {source} and {target} is {} files, below threshold {threshold}",
                plan.delta
            ),
        ),
        Some(target) => (
            PlanReason::Ok,
            format!(
                "Move file {} from {source} to {target} (delta {} >= threshold {threshold})",
                candidate.id, plan.delta
            ),
        ),
    };

    plan.should_migrate = reason == PlanReason::Ok;
    plan.reason = reason;
    plan.message = message;

    if fallback_target {
        if let Some(target) = target {
            plan.message.push_str(&format!(
                "; every node is drained, so {target} was chosen as a last-resort target"
            ));
        }
    }

    plan
}
