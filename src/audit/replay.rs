//! Pure reconstruction of audit events.
//!
//! Nothing here touches the ledger: callers pass in history entries and record
//! documents, and every function is total over malformed input.

use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

use super::events::{AuditEvent, AuditEventKind, SkippedEntry};
use crate::custody::MedicalRecord;
use crate::ledger::HistoryEntry;

/// The only part of a profile the replay looks at.
#[derive(Deserialize)]
struct ConsentView {
    #[serde(default)]
    consents: BTreeSet<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfileReplay {
    pub events: Vec<AuditEvent>,
    pub skipped: Vec<SkippedEntry>,
}

fn skip(entry: &HistoryEntry, reason: String) -> SkippedEntry {
    warn!(
        "Skipping {} v{} during audit replay: {}",
        entry.key, entry.version, reason
    );
    SkippedEntry {
        key: entry.key.clone(),
        version: entry.version,
        reason,
    }
}

/// Replay a profile history (oldest first) into Registered / Granted / Revoked
/// events. Each parseable entry is diffed against the last parseable one;
/// unparseable entries and tombstones are skipped.
///
/// Within one entry, grants precede revokes and each group is ordered by
/// provider id.
pub fn replay_profile_history(subject_id: &str, entries: &[HistoryEntry]) -> ProfileReplay {
    let mut replay = ProfileReplay::default();
    let mut previous: Option<BTreeSet<String>> = None;

    for entry in entries {
        if entry.is_tombstone() {
            replay.skipped.push(skip(entry, "tombstone".to_string()));
            continue;
        }
        let current = match entry.json::<ConsentView>() {
            Ok(view) => view.consents,
            Err(e) => {
                replay.skipped.push(skip(entry, e));
                continue;
            }
        };

        let event = |kind: AuditEventKind| AuditEvent {
            timestamp: entry.timestamp,
            subject_id: subject_id.to_string(),
            actor_id: subject_id.to_string(),
            kind,
            tx_id: Some(entry.tx_id.clone()),
        };

        match &previous {
            None => {
                if entry.version == 1 {
                    replay.events.push(event(AuditEventKind::Registered));
                }
            }
            Some(prev) => {
                for provider_id in current.difference(prev) {
                    replay.events.push(event(AuditEventKind::ConsentGranted {
                        provider_id: provider_id.clone(),
                    }));
                }
                for provider_id in prev.difference(&current) {
                    replay.events.push(event(AuditEventKind::ConsentRevoked {
                        provider_id: provider_id.clone(),
                    }));
                }
            }
        }
        previous = Some(current);
    }

    replay
}

/// One Uploaded event plus one Viewed event per access-log entry.
pub fn record_events(record: &MedicalRecord) -> Vec<AuditEvent> {
    let mut events = Vec::with_capacity(record.access_log.len() + 1);
    events.push(AuditEvent {
        timestamp: record.created_at,
        subject_id: record.patient_id.clone(),
        actor_id: record.author_id.clone(),
        kind: AuditEventKind::RecordUploaded {
            record_id: record.record_id.clone(),
        },
        tx_id: None,
    });
    for access in &record.access_log {
        events.push(AuditEvent {
            timestamp: access.timestamp,
            subject_id: record.patient_id.clone(),
            actor_id: access.actor_id.clone(),
            kind: AuditEventKind::RecordViewed {
                record_id: record.record_id.clone(),
                actor_org: access.actor_org.clone(),
            },
            tx_id: None,
        });
    }
    events
}

/// Order events newest first. `events` must be in build order.
///
/// A view carries the clock reading the next commit would get, so at equal
/// timestamps views rank older than committed events. Remaining ties come out
/// in reverse build order.
pub fn merge_newest_first(mut events: Vec<AuditEvent>) -> Vec<AuditEvent> {
    events.sort_by_key(|e| {
        let committed = !matches!(e.kind, AuditEventKind::RecordViewed { .. });
        (e.timestamp, committed)
    });
    events.reverse();
    events
}
