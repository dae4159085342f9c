//! Domain types for the ingestion pipeline.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Jobs ────────────────────────────────────────────────────────────

/// Lifecycle of an ingestion job.
///
/// A job is created `Processing` at upload time and takes exactly one
/// terminal transition: `Completed` on success, `Failed` on any error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => JobStatus::Queued,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Aggregate row counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u32,
    pub valid: u32,
    pub invalid: u32,
    pub duplicates: u32,
    pub suppressed: u32,
    pub expired: u32,
}

impl JobStats {
    /// Share of rows that passed every classification stage, as an integer
    /// percentage. Zero when the batch had no countable rows.
    pub fn confidence_score(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (f64::from(self.valid) / f64::from(self.total) * 100.0).round() as u8
    }
}

/// One ingestion batch in the job ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: String,
    pub filename: String,
    pub source: String,
    pub status: JobStatus,
    pub stats: JobStats,
    pub confidence_score: u8,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job in `Processing`, stamped as started now.
    pub fn new(owner_id: &str, filename: &str, source: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            filename: filename.to_string(),
            source: source.to_string(),
            status: JobStatus::Processing,
            stats: JobStats::default(),
            confidence_score: 0,
            error_message: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// One persisted input row, sanitized but otherwise as uploaded.
///
/// Written once per non-blank row regardless of how the row classifies;
/// never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub source: String,
    pub record_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A row that passed every classification stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub source: String,
    pub record_hash: String,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
}

// ── Suppression ─────────────────────────────────────────────────────

/// One do-not-contact entry. Externally maintained; the pipeline only
/// reads the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SuppressionEntry {
    pub fn new(email: Option<&str>, phone: Option<&str>, reason: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            reason: reason.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}

/// Normalized membership sets built once per batch from the suppression
/// list: lowercased emails and digits-only phones.
#[derive(Debug, Clone, Default)]
pub struct SuppressionSet {
    pub emails: HashSet<String>,
    pub phones: HashSet<String>,
}

impl SuppressionSet {
    /// True when the (already normalized) email or phone is suppressed.
    /// Empty values never match.
    pub fn contains(&self, email: &str, phone: &str) -> bool {
        (!email.is_empty() && self.emails.contains(email))
            || (!phone.is_empty() && self.phones.contains(phone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_score_rounds() {
        let stats = JobStats {
            total: 3,
            valid: 1,
            ..Default::default()
        };
        assert_eq!(stats.confidence_score(), 33);

        let stats = JobStats {
            total: 3,
            valid: 2,
            ..Default::default()
        };
        assert_eq!(stats.confidence_score(), 67);
    }

    #[test]
    fn confidence_score_bounds() {
        assert_eq!(JobStats::default().confidence_score(), 0);

        let all_valid = JobStats {
            total: 10,
            valid: 10,
            ..Default::default()
        };
        assert_eq!(all_valid.confidence_score(), 100);
    }

    #[test]
    fn status_round_trips() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn suppression_ignores_empty_values() {
        let mut set = SuppressionSet::default();
        set.emails.insert("a@b.com".into());
        assert!(set.contains("a@b.com", ""));
        assert!(!set.contains("", ""));
    }
}
