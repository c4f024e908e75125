//! Tracks tool invocations from selection through execution to completion.
//!
//! One record per tool-call id. Status advances monotonically
//! Preparing → Executing → Complete; completed records are retained until the
//! caller clears them (growth is the caller's responsibility). The reserved
//! thinking tool participates in this bookkeeping like any other tool — the
//! router, not the tracker, suppresses its notifications.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use confab_realtime_types::{NormalizedContent, THINKING_TOOL_NAME};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Preparing,
    Executing,
    Complete,
}

/// The lifecycle record for one tool invocation.
#[derive(Serialize, Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    /// Snapshot of the arguments as announced at selection time.
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<NormalizedContent>,
    pub started_at: DateTime<Utc>,
}

/// Compact per-tool line included in message-completion metadata.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolSummary {
    pub id: String,
    pub name: String,
}

/// O(1) counts over the active and completed sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolStats {
    pub preparing: usize,
    pub executing: usize,
    pub completed: usize,
}

#[derive(Default)]
pub struct ToolCallTracker {
    active: HashMap<String, ToolCallRecord>,
    completed: Vec<ToolCallRecord>,
    preparing_count: usize,
    executing_count: usize,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tool selection. Creates the record in Preparing with an
    /// argument snapshot; a duplicate selection refreshes the snapshot but
    /// never regresses a record that is already executing.
    pub fn on_select(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> ToolCallRecord {
        let id = id.into();
        let name = name.into();
        if let Some(existing) = self.active.get_mut(&id) {
            existing.arguments = arguments;
            existing.name = name;
            return existing.clone();
        }
        let record = ToolCallRecord {
            id: id.clone(),
            name,
            status: ToolStatus::Preparing,
            arguments,
            result: None,
            started_at: Utc::now(),
        };
        self.preparing_count += 1;
        self.active.insert(id, record.clone());
        record
    }

    /// Marks the call executing. Tools may skip the selection phase, so an
    /// unknown id creates a record directly in Executing.
    pub fn on_active(&mut self, id: impl Into<String>, name: Option<&str>) -> ToolCallRecord {
        let id = id.into();
        match self.active.get_mut(&id) {
            Some(record) => {
                if record.status == ToolStatus::Preparing {
                    record.status = ToolStatus::Executing;
                    self.preparing_count -= 1;
                    self.executing_count += 1;
                }
                record.clone()
            }
            None => {
                debug!(%id, "Tool became active without a prior selection");
                let record = ToolCallRecord {
                    id: id.clone(),
                    name: name.unwrap_or("tool").to_string(),
                    status: ToolStatus::Executing,
                    arguments: serde_json::Value::Null,
                    result: None,
                    started_at: Utc::now(),
                };
                self.executing_count += 1;
                self.active.insert(id, record.clone());
                record
            }
        }
    }

    /// Completes the call, attaching its result and moving the record from
    /// the active set to the completed set.
    pub fn on_complete(
        &mut self,
        id: &str,
        name: Option<&str>,
        result: Option<NormalizedContent>,
    ) -> ToolCallRecord {
        let mut record = match self.active.remove(id) {
            Some(record) => {
                match record.status {
                    ToolStatus::Preparing => self.preparing_count -= 1,
                    ToolStatus::Executing => self.executing_count -= 1,
                    ToolStatus::Complete => {}
                }
                record
            }
            None => {
                warn!(%id, "Completion for an unknown tool call; recording it anyway");
                ToolCallRecord {
                    id: id.to_string(),
                    name: name.unwrap_or("tool").to_string(),
                    status: ToolStatus::Executing,
                    arguments: serde_json::Value::Null,
                    result: None,
                    started_at: Utc::now(),
                }
            }
        };
        record.status = ToolStatus::Complete;
        record.result = result;
        self.completed.push(record.clone());
        record
    }

    /// Silently completes any active call with the reserved thinking name.
    /// Returns the record that was retired, if there was one.
    pub fn retire_thinking(&mut self) -> Option<ToolCallRecord> {
        let id = self
            .active
            .values()
            .find(|r| r.name == THINKING_TOOL_NAME)
            .map(|r| r.id.clone())?;
        Some(self.on_complete(&id, None, None))
    }

    /// All Preparing/Executing records, oldest first.
    pub fn active_notifications(&self) -> Vec<ToolCallRecord> {
        let mut records: Vec<ToolCallRecord> = self.active.values().cloned().collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    pub fn completed(&self) -> &[ToolCallRecord] {
        &self.completed
    }

    /// Summaries of the completed set, for message metadata.
    pub fn completed_summaries(&self) -> Vec<ToolSummary> {
        self.completed
            .iter()
            .map(|r| ToolSummary {
                id: r.id.clone(),
                name: r.name.clone(),
            })
            .collect()
    }

    pub fn clear_completed(&mut self) {
        self.completed.clear();
    }

    /// Drops all state, active and completed.
    pub fn reset(&mut self) {
        self.active.clear();
        self.completed.clear();
        self.preparing_count = 0;
        self.executing_count = 0;
    }

    pub fn stats(&self) -> ToolStats {
        ToolStats {
            preparing: self.preparing_count,
            executing: self.executing_count,
            completed: self.completed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_active_complete_lifecycle() {
        let mut tracker = ToolCallTracker::new();

        let record = tracker.on_select("t1", "search", serde_json::json!({"q": "rust"}));
        assert_eq!(record.status, ToolStatus::Preparing);

        let record = tracker.on_active("t1", None);
        assert_eq!(record.status, ToolStatus::Executing);
        assert_eq!(record.name, "search");

        let result = NormalizedContent::Text("42 matches".to_string());
        let record = tracker.on_complete("t1", None, Some(result.clone()));
        assert_eq!(record.status, ToolStatus::Complete);
        assert_eq!(record.result, Some(result));

        assert!(tracker.active_notifications().is_empty());
        assert_eq!(tracker.completed().len(), 1);
        assert_eq!(tracker.completed()[0].id, "t1");
    }

    #[test]
    fn test_active_without_selection_creates_executing_record() {
        let mut tracker = ToolCallTracker::new();
        let record = tracker.on_active("t2", Some("fetch"));
        assert_eq!(record.status, ToolStatus::Executing);
        assert_eq!(record.name, "fetch");
        assert_eq!(tracker.stats().executing, 1);
        assert_eq!(tracker.stats().preparing, 0);
    }

    #[test]
    fn test_duplicate_select_refreshes_arguments_without_regressing() {
        let mut tracker = ToolCallTracker::new();
        tracker.on_select("t1", "search", serde_json::json!({"q": "a"}));
        tracker.on_active("t1", None);

        let record = tracker.on_select("t1", "search", serde_json::json!({"q": "b"}));
        assert_eq!(record.status, ToolStatus::Executing);
        assert_eq!(record.arguments, serde_json::json!({"q": "b"}));
    }

    #[test]
    fn test_completion_for_unknown_id_is_recorded() {
        let mut tracker = ToolCallTracker::new();
        let record = tracker.on_complete("ghost", Some("mystery"), None);
        assert_eq!(record.status, ToolStatus::Complete);
        assert_eq!(tracker.completed().len(), 1);
    }

    #[test]
    fn test_completed_retained_until_cleared() {
        let mut tracker = ToolCallTracker::new();
        tracker.on_select("t1", "search", serde_json::Value::Null);
        tracker.on_complete("t1", None, None);
        tracker.on_select("t2", "fetch", serde_json::Value::Null);
        tracker.on_complete("t2", None, None);

        assert_eq!(tracker.completed().len(), 2);
        tracker.clear_completed();
        assert!(tracker.completed().is_empty());
    }

    #[test]
    fn test_retire_thinking_only_touches_reserved_name() {
        let mut tracker = ToolCallTracker::new();
        tracker.on_select("t1", "search", serde_json::Value::Null);
        tracker.on_select("t2", THINKING_TOOL_NAME, serde_json::Value::Null);

        let retired = tracker.retire_thinking().expect("thinking record");
        assert_eq!(retired.id, "t2");
        assert_eq!(tracker.active_notifications().len(), 1);
        assert!(tracker.retire_thinking().is_none());
    }

    #[test]
    fn test_stats_track_counts() {
        let mut tracker = ToolCallTracker::new();
        tracker.on_select("t1", "a", serde_json::Value::Null);
        tracker.on_select("t2", "b", serde_json::Value::Null);
        tracker.on_active("t2", None);
        tracker.on_complete("t1", None, None);

        assert_eq!(
            tracker.stats(),
            ToolStats {
                preparing: 0,
                executing: 1,
                completed: 1,
            }
        );
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut tracker = ToolCallTracker::new();
        tracker.on_select("t1", "a", serde_json::Value::Null);
        tracker.on_complete("t2", None, None);
        tracker.reset();

        assert!(tracker.active_notifications().is_empty());
        assert!(tracker.completed().is_empty());
        assert_eq!(tracker.stats().preparing, 0);
    }

    #[test]
    fn test_active_notifications_ordered_oldest_first() {
        let mut tracker = ToolCallTracker::new();
        tracker.on_select("t1", "a", serde_json::Value::Null);
        tracker.on_select("t2", "b", serde_json::Value::Null);
        let ids: Vec<String> = tracker
            .active_notifications()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["t1".to_string(), "t2".to_string()]);
    }
}
