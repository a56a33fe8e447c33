//! Drain controller
//!
//! Draining a node marks it ineligible as a migration target and makes it
//! the preferred migration source until it is empty. The controller only
//! writes node state; nothing moves until the next scheduling cycle.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{SchedulerError, SchedulerResult};
use crate::models::{NodeState, OperationRecord, OperationStatus};
use crate::storage::SharedStateStore;

pub const ACTION_DRAIN: &str = "drain";
pub const ACTION_UNDRAIN: &str = "undrain";

/// Acknowledgement returned by drain and undrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainAck {
    pub node: String,
    pub drained: bool,
    pub reason: Option<String>,
    pub operation_id: i64,
}

/// Writes per-node administrative state
pub struct DrainController {
    store: SharedStateStore,
    configured_nodes: Vec<String>,
}

impl DrainController {
    pub fn new(store: SharedStateStore, configured_nodes: Vec<String>) -> Self {
        Self {
            store,
            configured_nodes,
        }
    }

    /// Mark `node` drained
    ///
    /// Blank reasons are stored as no reason.
    pub fn drain(&self, node: &str, reason: Option<&str>, actor: &str) -> SchedulerResult<DrainAck> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        self.set_state(node, true, reason, actor)
    }

    /// Return `node` to normal service
    pub fn undrain(&self, node: &str, actor: &str) -> SchedulerResult<DrainAck> {
        self.set_state(node, false, None, actor)
    }

    fn set_state(
        &self,
        node: &str,
        drained: bool,
        reason: Option<&str>,
        actor: &str,
    ) -> SchedulerResult<DrainAck> {
        let node = node.trim();
        if !self.configured_nodes.iter().any(|n| n == node) {
            return Err(SchedulerError::unknown_node(node, &self.configured_nodes));
        }

        let state: NodeState = self
            .store
            .set_node_state(node, drained, reason)
            .map_err(|e| SchedulerError::store_write("set_node_state", e))?;

        let action = if drained { ACTION_DRAIN } else { ACTION_UNDRAIN };
        let details = match (drained, reason) {
            (true, Some(reason)) => format!("Drained {node}: {reason}"),
            (true, None) => format!("Drained {node}"),
            (false, _) => format!("Returned {node} to service"),
        };
        let entry = OperationRecord::new(actor, action, OperationStatus::Success)
            .with_nodes([node])
            .with_details(details);
        let operation_id = self
            .store
            .record_operation(&entry)
            .map_err(|e| SchedulerError::store_write("record_operation", e))?;

        info!(node = %node, drained, reason = ?reason, actor = %actor, "Updated node state");

        Ok(DrainAck {
            node: state.node,
            drained: state.drained,
            reason: state.reason,
            operation_id,
        })
    }
}
