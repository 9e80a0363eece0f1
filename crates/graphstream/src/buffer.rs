use graphcore::{ExecutionLog, LogFilter, LogLevel};
use std::collections::{BTreeMap, HashSet};

/// Client-side accumulation of one execution's logs.
///
/// A reconnecting stream replays history, so logs are keyed by id and a
/// replayed record is dropped.
#[derive(Debug, Default)]
pub struct LogBuffer {
    logs: Vec<ExecutionLog>,
    seen: HashSet<String>,
    filter: LogFilter,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: LogFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Returns false when the log id was already buffered.
    pub fn push(&mut self, log: ExecutionLog) -> bool {
        if !self.seen.insert(log.id.clone()) {
            return false;
        }
        self.logs.push(log);
        true
    }

    /// Number of logs actually added
    pub fn extend(&mut self, logs: impl IntoIterator<Item = ExecutionLog>) -> usize {
        let mut added = 0;
        for log in logs {
            if self.push(log) {
                added += 1;
            }
        }
        added
    }

    pub fn set_filter(&mut self, filter: LogFilter) {
        self.filter = filter;
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    pub fn all(&self) -> &[ExecutionLog] {
        &self.logs
    }

    /// Logs passing the current filter, in arrival order
    pub fn visible(&self) -> Vec<&ExecutionLog> {
        self.filter.apply(&self.logs)
    }

    pub fn matching(&self, filter: &LogFilter) -> Vec<&ExecutionLog> {
        filter.apply(&self.logs)
    }

    pub fn level_counts(&self) -> BTreeMap<LogLevel, usize> {
        let mut counts = BTreeMap::new();
        for log in &self.logs {
            *counts.entry(log.level).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn clear(&mut self) {
        self.logs.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replayed_logs_are_dropped() {
        let started = ExecutionLog::info("Workflow execution started");
        let node = ExecutionLog::info("Starting node: Query").for_node("q");

        let mut buffer = LogBuffer::new();
        assert_eq!(buffer.extend(vec![started.clone(), node.clone()]), 2);
        // reconnect replays everything, plus one new record
        let failed = ExecutionLog::error("Node execution failed: boom").for_node("llm");
        assert_eq!(buffer.extend(vec![started, node, failed]), 1);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.all()[2].level, LogLevel::Error);
    }

    #[test]
    fn test_filter_applies_to_existing_logs() {
        let mut buffer = LogBuffer::new();
        buffer.push(ExecutionLog::info("Starting node: Query").for_node("q"));
        buffer.push(ExecutionLog::error("Node execution failed: timeout").for_node("llm"));
        buffer.push(ExecutionLog::info("Node completed successfully").for_node("q"));
        assert_eq!(buffer.visible().len(), 3);

        buffer.set_filter(LogFilter {
            node_id: Some("q".into()),
            text: Some("COMPLETED".into()),
            ..Default::default()
        });
        let visible = buffer.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message, "Node completed successfully");

        let errors = buffer.matching(&LogFilter {
            level: Some(LogLevel::Error),
            ..Default::default()
        });
        assert_eq!(errors.len(), 1);
        assert_eq!(buffer.level_counts().get(&LogLevel::Info), Some(&2));
    }
}
