//! Turns a stream of point-in-time heartbeats into cumulative counters.
//!
//! Everything here is pure: the caller supplies the previous snapshot and the
//! server receive time, and persists whatever comes back.

use crate::presence::{
    EditorInfo, PartialPresenceSnapshot, PresenceMode, PresenceSnapshot, ProjectInfo,
};
use crate::PresenceError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorOptions {
    /// Treat a receive time earlier than the previous `lastUpdate` as zero
    /// elapsed instead of subtracting from the counters.
    pub clamp_negative_elapsed: bool,
}

/// Only a JSON object is a heartbeat. Serde would otherwise accept a sequence
/// as positional struct fields.
pub fn parse_heartbeat(body: &[u8]) -> Result<PartialPresenceSnapshot, PresenceError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| PresenceError::InvalidInput(err.to_string()))?;
    if !value.is_object() {
        return Err(PresenceError::InvalidInput(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|err| PresenceError::InvalidInput(err.to_string()))
}

/// Completes an incoming report into a full snapshot. Counters, project and
/// editor fall back to `previous`; `lastUpdate` is always the server time.
pub fn merge_defaults(
    incoming: &PartialPresenceSnapshot,
    previous: &PresenceSnapshot,
    now: i64,
) -> PresenceSnapshot {
    let project = incoming
        .project
        .clone()
        .or_else(|| previous.project.clone())
        .unwrap_or_else(|| ProjectInfo::unnamed(now));
    let editor = incoming
        .editor
        .clone()
        .or_else(|| previous.editor.clone())
        .unwrap_or_else(EditorInfo::unknown);

    PresenceSnapshot {
        online: incoming.mode.is_online(),
        mode: incoming.mode,
        activity: incoming.activity.clone(),
        scene: incoming.scene.clone(),
        last_update: now,
        total_ms: incoming.total_ms.unwrap_or(previous.total_ms),
        session_ms: incoming.session_ms.unwrap_or(previous.session_ms),
        project: Some(project),
        editor: Some(editor),
    }
}

pub fn accumulate(
    previous: &PresenceSnapshot,
    incoming: &PartialPresenceSnapshot,
    now: i64,
    options: AccumulatorOptions,
) -> PresenceSnapshot {
    let mut next = merge_defaults(incoming, previous, now);

    // The gate is "previous was online", so a break interval is counted
    // once the next working heartbeat arrives.
    if incoming.mode == PresenceMode::Working && previous.online {
        let mut elapsed = now.saturating_sub(previous.last_update);
        if options.clamp_negative_elapsed {
            elapsed = elapsed.max(0);
        }
        next.total_ms = previous.total_ms.saturating_add(elapsed);
        next.session_ms = previous.session_ms.saturating_add(elapsed);
    } else if incoming.mode == PresenceMode::Offline {
        next.session_ms = 0;
    }

    next
}

/// Time since the project started: the declared tenure when positive,
/// otherwise derived from `startedAt`.
pub fn tenure_ms(snapshot: &PresenceSnapshot, now: i64) -> i64 {
    let Some(project) = snapshot.project.as_ref() else {
        return 0;
    };
    if let Some(tenure) = project.tenure_ms.filter(|value| *value > 0) {
        return tenure;
    }
    match project.started_at.filter(|value| *value > 0) {
        Some(started) => now.saturating_sub(started).max(0),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_760_000_000_000;

    fn heartbeat(mode: PresenceMode) -> PartialPresenceSnapshot {
        PartialPresenceSnapshot::with_mode(mode)
    }

    fn online_snapshot(mode: PresenceMode, last_update: i64) -> PresenceSnapshot {
        PresenceSnapshot {
            online: mode.is_online(),
            mode,
            last_update,
            total_ms: 60_000,
            session_ms: 20_000,
            ..PresenceSnapshot::default()
        }
    }

    #[test]
    fn end_to_end_scenario_from_default_snapshot() {
        let options = AccumulatorOptions::default();
        let first = accumulate(
            &PresenceSnapshot::default(),
            &heartbeat(PresenceMode::Working),
            T0,
            options,
        );
        assert!(first.online);
        assert_eq!(first.total_ms, 0);
        assert_eq!(first.session_ms, 0);
        assert_eq!(first.last_update, T0);

        let second = accumulate(&first, &heartbeat(PresenceMode::Working), T0 + 5_000, options);
        assert_eq!(second.total_ms, 5_000);
        assert_eq!(second.session_ms, 5_000);

        let third = accumulate(&second, &heartbeat(PresenceMode::Offline), T0 + 8_000, options);
        assert!(!third.online);
        assert_eq!(third.session_ms, 0);
        assert_eq!(third.total_ms, 5_000);
    }

    #[test]
    fn working_after_online_adds_elapsed_to_both_counters() {
        let previous = online_snapshot(PresenceMode::Working, T0);
        let next = accumulate(
            &previous,
            &heartbeat(PresenceMode::Working),
            T0 + 12_345,
            AccumulatorOptions::default(),
        );
        assert_eq!(next.total_ms, previous.total_ms + 12_345);
        assert_eq!(next.session_ms, previous.session_ms + 12_345);
    }

    #[test]
    fn working_after_offline_carries_counters_unchanged() {
        let previous = PresenceSnapshot {
            total_ms: 42_000,
            session_ms: 0,
            last_update: T0,
            ..PresenceSnapshot::default()
        };
        let next = accumulate(
            &previous,
            &heartbeat(PresenceMode::Working),
            T0 + 90_000,
            AccumulatorOptions::default(),
        );
        assert_eq!(next.total_ms, 42_000);
        assert_eq!(next.session_ms, 0);
    }

    #[test]
    fn offline_resets_session_only_even_with_agent_counters() {
        let previous = online_snapshot(PresenceMode::Working, T0);
        let mut incoming = heartbeat(PresenceMode::Offline);
        incoming.session_ms = Some(999);
        let next = accumulate(&previous, &incoming, T0 + 1_000, AccumulatorOptions::default());
        assert_eq!(next.session_ms, 0);
        assert_eq!(next.total_ms, previous.total_ms);
    }

    #[test]
    fn entering_break_does_not_accumulate() {
        let previous = online_snapshot(PresenceMode::Working, T0);
        let next = accumulate(
            &previous,
            &heartbeat(PresenceMode::Break),
            T0 + 30_000,
            AccumulatorOptions::default(),
        );
        assert!(next.online);
        assert_eq!(next.total_ms, previous.total_ms);
        assert_eq!(next.session_ms, previous.session_ms);
    }

    // Open question: a break interval is counted as work once the next
    // working heartbeat arrives. This pins the current behavior.
    #[test]
    fn break_interval_counts_once_work_resumes() {
        let previous = online_snapshot(PresenceMode::Break, T0);
        let next = accumulate(
            &previous,
            &heartbeat(PresenceMode::Working),
            T0 + 600_000,
            AccumulatorOptions::default(),
        );
        assert_eq!(next.total_ms, previous.total_ms + 600_000);
        assert_eq!(next.session_ms, previous.session_ms + 600_000);
    }

    #[test]
    fn negative_elapsed_decreases_counters_unless_clamped() {
        let previous = online_snapshot(PresenceMode::Working, T0);
        let skewed = accumulate(
            &previous,
            &heartbeat(PresenceMode::Working),
            T0 - 5_000,
            AccumulatorOptions::default(),
        );
        assert_eq!(skewed.total_ms, previous.total_ms - 5_000);
        assert_eq!(skewed.session_ms, previous.session_ms - 5_000);

        let clamped = accumulate(
            &previous,
            &heartbeat(PresenceMode::Working),
            T0 - 5_000,
            AccumulatorOptions {
                clamp_negative_elapsed: true,
            },
        );
        assert_eq!(clamped.total_ms, previous.total_ms);
        assert_eq!(clamped.session_ms, previous.session_ms);
    }

    #[test]
    fn server_time_overrides_agent_fields() {
        let mut incoming = heartbeat(PresenceMode::Offline);
        incoming.online = Some(true);
        incoming.last_update = Some(1);
        let next = merge_defaults(&incoming, &PresenceSnapshot::default(), T0);
        assert!(!next.online);
        assert_eq!(next.last_update, T0);
    }

    #[test]
    fn merge_defaults_prefers_incoming_then_previous() {
        let previous = PresenceSnapshot {
            total_ms: 7_000,
            session_ms: 3_000,
            project: Some(ProjectInfo {
                name: Some("Arc".to_string()),
                started_at: Some(T0 - 1_000),
                tenure_ms: None,
            }),
            editor: Some(EditorInfo {
                version: Some("6000.0.1f1".to_string()),
            }),
            ..PresenceSnapshot::default()
        };
        let mut incoming = heartbeat(PresenceMode::Break);
        incoming.total_ms = Some(10_000);
        incoming.activity = Some("Lighting".to_string());

        let merged = merge_defaults(&incoming, &previous, T0);
        assert_eq!(merged.total_ms, 10_000);
        assert_eq!(merged.session_ms, 3_000);
        assert_eq!(merged.project, previous.project);
        assert_eq!(merged.editor, previous.editor);
        assert_eq!(merged.activity.as_deref(), Some("Lighting"));
        assert_eq!(merged.scene, None);
    }

    #[test]
    fn merge_defaults_starts_project_now_when_nothing_known() {
        let previous = PresenceSnapshot {
            project: None,
            editor: None,
            ..PresenceSnapshot::default()
        };
        let merged = merge_defaults(&heartbeat(PresenceMode::Working), &previous, T0);
        assert_eq!(merged.project, Some(ProjectInfo::unnamed(T0)));
        assert_eq!(merged.editor, Some(EditorInfo::unknown()));
    }

    #[test]
    fn parse_heartbeat_rejects_malformed_bodies() {
        let bodies: [&[u8]; 7] = [
            b"not json",
            b"[]",
            b"{}",
            b"{\"mode\":42}",
            br#"["working"]"#,
            br#"["offline", true]"#,
            b"\"working\"",
        ];
        for body in bodies {
            assert!(matches!(
                parse_heartbeat(body),
                Err(PresenceError::InvalidInput(_))
            ));
        }
        let parsed = parse_heartbeat(br#"{"mode":"working","totalMs":5}"#).expect("valid");
        assert_eq!(parsed.total_ms, Some(5));
    }

    #[test]
    fn tenure_prefers_declared_value_then_started_at() {
        let mut snapshot = PresenceSnapshot::default();
        snapshot.project = Some(ProjectInfo {
            name: None,
            started_at: Some(T0 - 10_000),
            tenure_ms: Some(500),
        });
        assert_eq!(tenure_ms(&snapshot, T0), 500);

        snapshot.project = Some(ProjectInfo {
            name: None,
            started_at: Some(T0 - 10_000),
            tenure_ms: Some(0),
        });
        assert_eq!(tenure_ms(&snapshot, T0), 10_000);

        snapshot.project = Some(ProjectInfo {
            name: None,
            started_at: Some(T0 + 10_000),
            tenure_ms: None,
        });
        assert_eq!(tenure_ms(&snapshot, T0), 0);

        snapshot.project = None;
        assert_eq!(tenure_ms(&snapshot, T0), 0);
    }
}
