//! Persistence projections for async subagents: the full record written to
//! `results/<id>.json` and the lighter entry kept in `index.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{AsyncMode, AsyncStatus};

/// Full persisted record for one async subagent run (`results/<id>.json`).
///
/// Dates are RFC3339 (`chrono::DateTime<Utc>`), never numeric timestamps, per
/// the external interface contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AsyncSubagentRecord {
    pub id: String,
    pub name: String,
    pub mode: AsyncMode,
    pub status: AsyncStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub prompt: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub trigger_pattern: Option<String>,
}

/// One entry of `index.json`: enough to list history without opening every
/// per-record file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AsyncIndexEntry {
    pub id: String,
    pub name: String,
    pub status: AsyncStatus,
    pub start_time: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

impl From<&AsyncSubagentRecord> for AsyncIndexEntry {
    fn from(record: &AsyncSubagentRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            status: record.status,
            start_time: record.start_time,
            duration_ms: record.duration_ms,
        }
    }
}

/// Formats a millisecond duration for display as `Ns`, `NmSs`, or `NhMmSs`
/// depending on magnitude.
pub fn format_duration(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_seconds_only() {
        assert_eq!(format_duration(4_500), "4s");
    }

    #[test]
    fn format_duration_minutes_and_seconds() {
        assert_eq!(format_duration(65_000), "1m5s");
    }

    #[test]
    fn format_duration_hours_minutes_seconds() {
        assert_eq!(format_duration(3_661_000), "1h1m1s");
    }

    #[test]
    fn index_entry_projects_from_record() {
        let record = AsyncSubagentRecord {
            id: "abcd1234".to_string(),
            name: "researcher".to_string(),
            mode: AsyncMode::FireAndForget,
            status: AsyncStatus::Completed,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            duration_ms: Some(1_200),
            prompt: "find X".to_string(),
            result: Some("done".to_string()),
            error: None,
            trigger_pattern: None,
        };
        let entry: AsyncIndexEntry = (&record).into();
        assert_eq!(entry.id, "abcd1234");
        assert_eq!(entry.duration_ms, Some(1_200));
    }
}
