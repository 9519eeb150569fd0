use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    Working,
    Break,
    #[default]
    Offline,
}

impl PresenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceMode::Working => "working",
            PresenceMode::Break => "break",
            PresenceMode::Offline => "offline",
        }
    }

    /// Working and break both count as present.
    pub fn is_online(&self) -> bool {
        matches!(self, PresenceMode::Working | PresenceMode::Break)
    }
}

impl fmt::Display for PresenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "working" => Ok(PresenceMode::Working),
            "break" => Ok(PresenceMode::Break),
            "offline" => Ok(PresenceMode::Offline),
            other => Err(format!("Unknown mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenure_ms: Option<i64>,
}

impl ProjectInfo {
    /// Placeholder used when neither the agent nor the stored snapshot named a project.
    pub fn unnamed(started_at: i64) -> Self {
        Self {
            name: Some(String::new()),
            started_at: Some(started_at),
            tenure_ms: Some(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EditorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl EditorInfo {
    pub fn unknown() -> Self {
        Self {
            version: Some(String::new()),
        }
    }
}

/// The single persisted presence document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub mode: PresenceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    #[serde(default)]
    pub last_update: i64,
    #[serde(default)]
    pub total_ms: i64,
    #[serde(default)]
    pub session_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<EditorInfo>,
}

impl Default for PresenceSnapshot {
    fn default() -> Self {
        Self {
            online: false,
            mode: PresenceMode::Offline,
            activity: Some(String::new()),
            scene: Some(String::new()),
            last_update: 0,
            total_ms: 0,
            session_ms: 0,
            project: Some(ProjectInfo::unnamed(0)),
            editor: Some(EditorInfo::unknown()),
        }
    }
}

impl PresenceSnapshot {
    /// Snapshot a client shows when the status endpoint cannot be reached.
    pub fn offline_at(now_ms: i64) -> Self {
        Self {
            online: false,
            mode: PresenceMode::Offline,
            activity: Some(String::new()),
            scene: Some(String::new()),
            last_update: now_ms,
            total_ms: 0,
            session_ms: 0,
            project: None,
            editor: None,
        }
    }
}

/// Body of a heartbeat write. Only `mode` is mandatory; `online` and
/// `lastUpdate` are accepted on the wire and ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartialPresenceSnapshot {
    pub mode: PresenceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<EditorInfo>,
}

impl PartialPresenceSnapshot {
    pub fn with_mode(mode: PresenceMode) -> Self {
        Self {
            mode,
            online: None,
            activity: None,
            scene: None,
            last_update: None,
            total_ms: None,
            session_ms: None,
            project: None,
            editor: None,
        }
    }
}
