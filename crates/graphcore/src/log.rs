use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[serde(alias = "DEBUG")]
    Debug,
    #[serde(alias = "INFO")]
    Info,
    #[serde(alias = "WARNING", alias = "warn")]
    Warning,
    #[serde(alias = "ERROR")]
    Error,
    #[serde(alias = "CRITICAL")]
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// A user-facing log record of one execution. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ExecutionLog {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            node_id: None,
            metadata: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn for_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Client-side view over a log list. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub node_id: Option<NodeId>,
    pub text: Option<String>,
}

impl LogFilter {
    pub fn matches(&self, log: &ExecutionLog) -> bool {
        if let Some(level) = self.level {
            if log.level != level {
                return false;
            }
        }
        if let Some(node_id) = &self.node_id {
            if log.node_id.as_ref() != Some(node_id) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !needle.is_empty() && !log.message.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, logs: &'a [ExecutionLog]) -> Vec<&'a ExecutionLog> {
        logs.iter().filter(|log| self.matches(log)).collect()
    }
}

pub const MAX_PAGE_LIMIT: usize = 1000;
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Request of the paginated log history fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            level: None,
        }
    }
}

/// Response of the paginated log history fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    pub logs: Vec<ExecutionLog>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl LogPage {
    /// Filter by level, then slice. `total` counts the filtered list.
    pub fn paginate(logs: &[ExecutionLog], query: &LogQuery) -> Self {
        let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
        let filtered: Vec<&ExecutionLog> = logs
            .iter()
            .filter(|l| query.level.map_or(true, |level| l.level == level))
            .collect();
        let total = filtered.len();
        let logs = filtered
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .cloned()
            .collect();
        Self {
            logs,
            total,
            offset: query.offset,
            limit,
        }
    }
}
