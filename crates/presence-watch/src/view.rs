use crate::poller::PollUpdate;
use presence_core::format::{format_duration, format_staleness, STALE_MARKER};
use presence_core::{tenure_ms, PresenceMode};

/// Display state derived from the latest poll and the current time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceView {
    pub badge: &'static str,
    pub project: String,
    pub activity: String,
    pub scene: String,
    pub last_update: String,
    pub tenure: String,
    pub total: String,
    pub session: Option<String>,
    pub editor_version: Option<String>,
    /// How long ago the poller last heard back, successfully or not.
    pub checked: String,
    pub error: Option<String>,
}

fn or_placeholder(value: Option<&str>) -> String {
    match value {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => STALE_MARKER.to_string(),
    }
}

pub fn badge(mode: PresenceMode) -> &'static str {
    match mode {
        PresenceMode::Working => "🟢 Working",
        PresenceMode::Break => "🟡 Break",
        PresenceMode::Offline => "⚫ Offline",
    }
}

impl PresenceView {
    pub fn derive(update: &PollUpdate, now: i64) -> Self {
        let snapshot = &update.snapshot;
        Self {
            badge: badge(snapshot.mode),
            project: or_placeholder(
                snapshot
                    .project
                    .as_ref()
                    .and_then(|project| project.name.as_deref()),
            ),
            activity: or_placeholder(snapshot.activity.as_deref()),
            scene: or_placeholder(snapshot.scene.as_deref()),
            last_update: format_staleness(Some(snapshot.last_update), now),
            tenure: format_duration(Some(tenure_ms(snapshot, now))),
            total: format_duration(Some(snapshot.total_ms)),
            // The local fallback carries no session.
            session: (!update.is_fallback()).then(|| format_duration(Some(snapshot.session_ms))),
            editor_version: snapshot
                .editor
                .as_ref()
                .and_then(|editor| editor.version.clone())
                .filter(|version| !version.is_empty()),
            checked: format_staleness(Some(update.fetched_at_ms), now),
            error: update.error.clone(),
        }
    }
}

pub fn render_card(view: &PresenceView, endpoint: Option<&str>) -> Vec<String> {
    let mut lines = vec![format!("Editor status  {}", view.badge)];
    if let Some(error) = &view.error {
        lines.push(format!("! {error}"));
    }
    lines.push(format!("Project:           {}", view.project));
    lines.push(format!("Activity:          {}", view.activity));
    lines.push(format!("Scene:             {}", view.scene));
    lines.push(format!("Last update:       {}", view.last_update));
    lines.push(format!("Project duration:  {}", view.tenure));
    lines.push(format!("Total time worked: {}", view.total));
    if let Some(session) = &view.session {
        lines.push(format!("Current session:   {session}"));
    }
    if let Some(version) = &view.editor_version {
        lines.push(format!("Editor:            {version}"));
    }
    lines.push(format!("Checked:           {}", view.checked));
    if let Some(endpoint) = endpoint {
        lines.push(format!("Endpoint: {endpoint}"));
    }
    lines
}
