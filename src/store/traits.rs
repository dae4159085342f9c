//! Unified `Database` trait — single async interface for all persistence.
//!
//! Covers the job ledger, raw/clean records, the suppression list,
//! contacts, and conversation turns. Implemented by `LibSqlBackend`.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::consent::model::{ConsentStatus, Contact, ConversationTurn};
use crate::error::DatabaseError;
use crate::pipeline::types::{
    CleanRecord, Job, JobStats, RawRecord, SuppressionEntry, SuppressionSet,
};

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Job ledger ──────────────────────────────────────────────────

    /// Insert a new job row.
    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by ID.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// List an owner's jobs, most recent first.
    async fn list_jobs(&self, owner_id: &str, limit: usize) -> Result<Vec<Job>, DatabaseError>;

    /// Record the total row count once the batch has been parsed.
    async fn set_job_total(&self, id: Uuid, total: u32) -> Result<(), DatabaseError>;

    /// Terminal transition to `completed` with final stats.
    /// No-op if the job already left `processing`.
    async fn complete_job(
        &self,
        id: Uuid,
        stats: &JobStats,
        confidence_score: u8,
    ) -> Result<(), DatabaseError>;

    /// Terminal transition to `failed` with the captured error text.
    /// No-op if the job already left `processing`.
    async fn fail_job(&self, id: Uuid, message: &str) -> Result<(), DatabaseError>;

    // ── Working set ─────────────────────────────────────────────────

    /// Delete the owner's raw records, clean records, and prior jobs.
    /// The in-flight job row (`keep_job`) survives the reset.
    async fn reset_working_set(&self, owner_id: &str, keep_job: Uuid)
        -> Result<(), DatabaseError>;

    /// Batch-insert raw records.
    async fn insert_raw_records(&self, records: &[RawRecord]) -> Result<(), DatabaseError>;

    /// Batch-insert clean records.
    async fn insert_clean_records(&self, records: &[CleanRecord]) -> Result<(), DatabaseError>;

    /// List an owner's raw records (data-review reads).
    async fn list_raw_records(&self, owner_id: &str) -> Result<Vec<RawRecord>, DatabaseError>;

    /// List an owner's clean records.
    async fn list_clean_records(&self, owner_id: &str) -> Result<Vec<CleanRecord>, DatabaseError>;

    /// Snapshot of every persisted clean-record hash, taken once at batch
    /// start for cross-batch dedup.
    async fn clean_record_hashes(&self) -> Result<HashSet<String>, DatabaseError>;

    // ── Suppression list ────────────────────────────────────────────

    /// Add a do-not-contact entry (admin tooling; the pipeline only reads).
    async fn insert_suppression(&self, entry: &SuppressionEntry) -> Result<(), DatabaseError>;

    /// Normalized membership sets over the whole suppression list.
    async fn suppression_set(&self) -> Result<SuppressionSet, DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Upsert keyed on (phone, owner_id); conflict is a no-op on the
    /// existing row. Returns true when a new contact was created.
    async fn upsert_contact(&self, contact: &Contact) -> Result<bool, DatabaseError>;

    /// Get a contact by ID.
    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError>;

    /// Resolve an inbound sender's digits-only phone to a contact.
    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, DatabaseError>;

    /// List an owner's contacts, most recent first.
    async fn list_contacts(&self, owner_id: &str) -> Result<Vec<Contact>, DatabaseError>;

    /// Apply a consent transition: status, optional consent timestamp, and
    /// the raw text that drove it.
    async fn set_consent(
        &self,
        id: Uuid,
        status: ConsentStatus,
        consent_timestamp: Option<DateTime<Utc>>,
        latest_message: &str,
    ) -> Result<(), DatabaseError>;

    /// Update only the latest inbound message.
    async fn set_latest_message(&self, id: Uuid, message: &str) -> Result<(), DatabaseError>;

    // ── Conversation turns ──────────────────────────────────────────

    /// Append turns to the conversation log, in order.
    async fn append_turns(&self, turns: &[ConversationTurn]) -> Result<(), DatabaseError>;

    /// List a contact's turns, oldest first.
    async fn list_turns(&self, contact_id: Uuid) -> Result<Vec<ConversationTurn>, DatabaseError>;
}
