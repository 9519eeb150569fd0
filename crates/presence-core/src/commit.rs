use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatestCommitNotice {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub url: String,
    pub timestamp: i64,
}

impl LatestCommitNotice {
    /// Served while no push event has been relayed yet.
    pub fn placeholder(now_ms: i64) -> Self {
        Self {
            sha: "0000000".to_string(),
            message: "No commits received by webhook yet.".to_string(),
            author: "—".to_string(),
            url: "#".to_string(),
            timestamp: now_ms,
        }
    }

    /// Extracts the head commit of a push event. Any other event, or a push
    /// without `head_commit`, yields `None`.
    pub fn from_push_event(event: &str, payload: &Value, now_ms: i64) -> Option<Self> {
        if event != "push" {
            return None;
        }
        let head = payload.get("head_commit").filter(|value| value.is_object())?;
        let text = |field: &str| {
            head.get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let author = head
            .get("author")
            .and_then(|author| author.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
            .to_string();
        let timestamp = head
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.timestamp_millis())
            .unwrap_or(now_ms);

        Some(Self {
            sha: text("id"),
            message: text("message"),
            author,
            url: text("url"),
            timestamp,
        })
    }
}
