use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized timeline event.
///
/// Every parser reduces its source records to this shape; sinks consume
/// it unchanged. Once constructed an event is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Instant on the UTC timeline. The Unix epoch is the sentinel for
    /// "source timestamp could not be resolved", never a guess.
    pub timestamp: DateTime<Utc>,
    /// Short label for the file of origin (usually the base name).
    pub source: String,
    /// Parser-assigned category, e.g. `Syslog`, `Sysmon:ProcessCreate`.
    /// Fallback records use the parser's `<type>Raw` variant.
    pub event_type: String,
    /// Intrinsic id from the source when one exists (Windows Event ID,
    /// ASA message id), otherwise the 1-based record ordinal.
    pub event_id: i64,
    pub user: String,
    pub host: String,
    /// Single-line human-readable summary assembled by the parser.
    pub message: String,
    /// Absolute path of the source file.
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "score_is_zero")]
    pub score: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

fn score_is_zero(score: &f64) -> bool {
    *score == 0.0
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        event_type: impl Into<String>,
        event_id: i64,
        user: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            source: source.into(),
            event_type: event_type.into(),
            event_id,
            user: user.into(),
            host: host.into(),
            message: message.into(),
            path: path.into(),
            tags: Vec::new(),
            score: 0.0,
            summary: String::new(),
        }
    }

    /// Fallback event for a record that could not be parsed. Carries the
    /// original line verbatim and the epoch-zero sentinel timestamp.
    pub fn raw(
        source: impl Into<String>,
        event_type: impl Into<String>,
        event_id: i64,
        line: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::new(
            DateTime::<Utc>::UNIX_EPOCH,
            source,
            event_type,
            event_id,
            "",
            "",
            line,
            path,
        )
    }

    /// True when the timestamp is the unparseable sentinel.
    pub fn has_sentinel_timestamp(&self) -> bool {
        self.timestamp == DateTime::<Utc>::UNIX_EPOCH
    }
}

/// Sort a per-file batch chronologically. The sort is stable, so records
/// with equal timestamps (including sentinel events) keep their original
/// emission order.
pub fn sort_chronologically(events: &mut [Event]) {
    events.sort_by_key(|e| e.timestamp);
}
