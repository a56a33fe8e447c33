// Core data structures for filebalancer

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// History action recorded when a file first lands on a node
pub const ACTION_UPLOAD: &str = "upload";

/// History/audit action recorded by the scheduler for a migration
pub const ACTION_AUTO_MIGRATE: &str = "auto_migrate";

/// One entry in a file's append-only history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub action: String,
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEvent {
    /// Entry for a file created directly on `node`
    pub fn created(action: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            from: None,
            to: node.into(),
            timestamp: Utc::now(),
        }
    }

    /// Entry for a move between two nodes
    pub fn moved(action: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            from: Some(from.into()),
            to: to.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A demo file tracked by the state store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Store-assigned identifier
    pub id: i64,
    /// Stable key used by the metadata registry
    pub uuid: String,
    pub filename: String,
    pub size_bytes: u64,
    /// Current owning node id
    pub node: String,
    /// Location of the payload on disk
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub history: Vec<HistoryEvent>,
}

impl FileRecord {
    /// Last history entry, if any
    pub fn last_event(&self) -> Option<&HistoryEvent> {
        self.history.last()
    }

    /// True when the last history entry agrees with `node`
    pub fn history_consistent(&self) -> bool {
        self.last_event().map_or(true, |e| e.to == self.node)
    }

    /// Compact view used in plans and migration results
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.id,
            uuid: self.uuid.clone(),
            filename: self.filename.clone(),
            node: self.node.clone(),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            last_action: self.last_event().map(|e| e.action.clone()),
            history_length: self.history.len(),
        }
    }
}

/// Fields for a file record that does not exist yet
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub uuid: String,
    pub filename: String,
    pub size_bytes: u64,
    pub node: String,
    pub path: String,
    pub history: Vec<HistoryEvent>,
}

/// Compact, display-oriented view of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: i64,
    pub uuid: String,
    pub filename: String,
    pub node: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_action: Option<String>,
    pub history_length: usize,
}

/// Administrative state of a storage node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub node: String,
    pub drained: bool,
    pub reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl NodeState {
    /// Default state for a configured node that was never touched
    pub fn active(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            drained: false,
            reason: None,
            updated_at: None,
        }
    }
}

/// Outcome of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "success" => Self::Success,
            _ => Self::Failed,
        })
    }
}

/// Immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Assigned by the store on insert; `None` before that
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    /// Nodes involved, primary node first
    pub nodes: Vec<String>,
    pub before_metrics: Option<NodeCounts>,
    pub after_metrics: Option<NodeCounts>,
    pub status: OperationStatus,
    pub details: Option<String>,
}

impl OperationRecord {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            nodes: Vec::new(),
            before_metrics: None,
            after_metrics: None,
            status,
            details: None,
        }
    }

    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metrics(mut self, before: Option<NodeCounts>, after: Option<NodeCounts>) -> Self {
        self.before_metrics = before;
        self.after_metrics = after;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Per-node file counts in configured node order
///
/// Serializes as a JSON object whose keys keep the configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCounts(Vec<(String, usize)>);

impl NodeCounts {
    /// One zero entry per node, duplicates ignored
    pub fn zeroed<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<(String, usize)> = Vec::new();
        for node in nodes {
            let node = node.as_ref();
            if !entries.iter().any(|(n, _)| n == node) {
                entries.push((node.to_string(), 0));
            }
        }
        Self(entries)
    }

    /// Increment `node`; returns false when the node is not tracked
    pub fn increment(&mut self, node: &str) -> bool {
        match self.0.iter_mut().find(|(n, _)| n == node) {
            Some((_, count)) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Decrement `node`, saturating at zero; returns false when not tracked
    pub fn decrement(&mut self, node: &str) -> bool {
        match self.0.iter_mut().find(|(n, _)| n == node) {
            Some((_, count)) => {
                *count = count.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, node: &str) -> Option<usize> {
        self.0.iter().find(|(n, _)| n == node).map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(n, c)| (n.as_str(), *c))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> usize {
        self.0.iter().map(|(_, c)| c).sum()
    }
}

impl Serialize for NodeCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (node, count) in &self.0 {
            map.serialize_entry(node, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NodeCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = NodeCounts;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of node id to file count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((node, count)) = access.next_entry::<String, usize>()? {
                    entries.push((node, count));
                }
                Ok(NodeCounts(entries))
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> FileRecord {
        FileRecord {
            id: 7,
            uuid: "abc123".to_string(),
            filename: "demo-abc123.bin".to_string(),
            size_bytes: 2048,
            node: "zk2".to_string(),
            path: "/data/zk2/demo-abc123.bin".to_string(),
            created_at: Utc::now(),
            history: vec![
                HistoryEvent::created(ACTION_UPLOAD, "zk1"),
                HistoryEvent::moved(ACTION_AUTO_MIGRATE, "zk1", "zk2"),
            ],
        }
    }

    #[test]
    fn test_node_counts_zeroed_keeps_order() {
        let counts = NodeCounts::zeroed(["zk3", "zk1", "zk2", "zk1"]);
        let nodes: Vec<_> = counts.nodes().collect();
        assert_eq!(nodes, vec!["zk3", "zk1", "zk2"]);
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn test_node_counts_increment_unknown() {
        let mut counts = NodeCounts::zeroed(["zk1"]);
        assert!(counts.increment("zk1"));
        assert!(!counts.increment("zk9"));
        assert_eq!(counts.get("zk1"), Some(1));
        assert_eq!(counts.get("zk9"), None);
    }

    #[test]
    fn test_node_counts_serialize_in_order() {
        let mut counts = NodeCounts::zeroed(["zk2", "zk1"]);
        counts.increment("zk1");
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, r#"{"zk2":0,"zk1":1}"#);

        let back: NodeCounts = serde_json::from_str(&json).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn test_file_summary() {
        let record = sample_record();
        let summary = record.summary();
        assert_eq!(summary.history_length, 2);
        assert_eq!(summary.last_action.as_deref(), Some(ACTION_AUTO_MIGRATE));
        assert!(record.history_consistent());
    }

    #[test]
    fn test_history_inconsistent() {
        let mut record = sample_record();
        record.node = "zk3".to_string();
        assert!(!record.history_consistent());
    }

    #[test]
    fn test_operation_status_from_str() {
        assert_eq!("success".parse::<OperationStatus>().unwrap(), OperationStatus::Success);
        assert_eq!("bogus".parse::<OperationStatus>().unwrap(), OperationStatus::Failed);
    }
}
