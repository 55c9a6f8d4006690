//! Job identifiers.
//!
//! ULID ベースの ID。
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 調整なしで複数プロセスで生成できる
//!
//! Display は `job-<ULID>`。結果ファイル名にもこの形式を使う。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ports::Clock;

const PREFIX: &str = "job-";

/// Identifier of an analysis job (submit/status/result unit).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Generate a new id whose timestamp part comes from `clock`.
    ///
    /// With a `ManualClock` the timestamp is deterministic; the random part still
    /// keeps ids unique.
    pub fn generate(clock: &dyn Clock) -> Self {
        let timestamp_ms = clock.now().timestamp_millis().max(0) as u64;
        Self(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Bare ULID text, as stored in the `analysis_jobs.id` column.
    pub fn to_storage_key(&self) -> String {
        self.0.to_string()
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Error returned when a job id string is not a valid ULID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0}")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    /// Accepts both `job-<ULID>` and the bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(JobId)
            .map_err(|_| ParseJobIdError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn display_has_job_prefix() {
        let id = JobId::generate(&SystemClock);
        assert!(id.to_string().starts_with("job-"));
        assert!(!id.to_storage_key().starts_with("job-"));
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let id = JobId::generate(&SystemClock);

        let with_prefix: JobId = id.to_string().parse().unwrap();
        let bare: JobId = id.to_storage_key().parse().unwrap();

        assert_eq!(with_prefix, id);
        assert_eq!(bare, id);
        assert!("job-not-a-ulid".parse::<JobId>().is_err());
    }

    #[test]
    fn manual_clock_fixes_timestamp_part() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(at);

        let id1 = JobId::generate(&clock);
        let id2 = JobId::generate(&clock);

        // ランダム部分があるので ID は異なるが、timestamp 部分は同じ
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }
}
