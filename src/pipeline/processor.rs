//! Ingestion pipeline — turns an uploaded batch into a scored,
//! deduplicated, suppression-checked working set.
//!
//! Flow per upload:
//! 1. job row inserted (`processing`), batch task spawned, job returned
//! 2. owner's prior working set reset (new upload supersedes, not merges)
//! 3. parse → classify each row (invalid → duplicate → suppressed → valid)
//! 4. raw records persisted for every non-blank row, clean records for
//!    valid rows, contacts upserted and consent requests triggered
//! 5. exactly one terminal transition: `completed` with stats or `failed`
//!    with the captured error

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::consent::model::Contact;
use crate::consent::{consent_request_text, ConversationTurn};
use crate::error::Error;
use crate::messaging::Notifier;
use crate::pipeline::csv::{parse_batch, ParsedRow};
use crate::pipeline::identity::{
    is_valid_email, is_valid_phone, normalize_phone, record_hash, sanitize_cell,
};
use crate::pipeline::types::{CleanRecord, Job, JobStats, RawRecord, SuppressionSet};
use crate::store::Database;

/// Classified output of one batch, ready to persist.
pub struct BatchOutcome {
    pub raw: Vec<RawRecord>,
    pub clean: Vec<CleanRecord>,
    pub stats: JobStats,
}

/// Ingestion pipeline with per-owner batch serialization.
pub struct IngestionPipeline {
    db: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
    /// One async lock per owner: a new upload waits for the owner's
    /// in-flight batch since both reset and repopulate the same working
    /// set. Jobs for different owners run in parallel.
    owner_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(db: Arc<dyn Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            notifier,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start ingesting an uploaded file.
    ///
    /// Inserts the job row and spawns the batch task; returns immediately
    /// with the job in `processing` plus the task handle as the completion
    /// signal. The handle can be dropped — the job row carries the state.
    pub async fn ingest(
        self: &Arc<Self>,
        bytes: Vec<u8>,
        filename: &str,
        source: &str,
        owner_id: &str,
    ) -> Result<(Job, JoinHandle<()>), Error> {
        let job = Job::new(owner_id, filename, source);
        self.db.insert_job(&job).await?;

        info!(job_id = %job.id, owner_id, filename, "Ingestion started");

        let pipeline = Arc::clone(self);
        let task_job = job.clone();
        let handle = tokio::spawn(async move {
            pipeline.run_batch(task_job, bytes).await;
        });

        Ok((job, handle))
    }

    /// Run one batch to its terminal state. Never panics the task: every
    /// error becomes a `failed` job.
    async fn run_batch(&self, job: Job, bytes: Vec<u8>) {
        let lock = self.owner_lock(&job.owner_id).await;
        let _guard = lock.lock().await;

        match self.run_batch_inner(&job, &bytes).await {
            Ok(stats) => {
                let confidence = stats.confidence_score();
                if let Err(e) = self.db.complete_job(job.id, &stats, confidence).await {
                    error!(job_id = %job.id, error = %e, "Failed to finalize job");
                    return;
                }
                info!(
                    job_id = %job.id,
                    total = stats.total,
                    valid = stats.valid,
                    invalid = stats.invalid,
                    duplicates = stats.duplicates,
                    suppressed = stats.suppressed,
                    confidence,
                    "Ingestion completed"
                );
            }
            Err(e) => {
                // Record the root cause, not the enum wrapper.
                let message = std::error::Error::source(&e)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| e.to_string());
                warn!(job_id = %job.id, error = %message, "Ingestion failed");
                if let Err(e) = self.db.fail_job(job.id, &message).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job failed");
                }
            }
        }
    }

    async fn run_batch_inner(&self, job: &Job, bytes: &[u8]) -> Result<JobStats, Error> {
        // A new upload supersedes the owner's prior working set; the
        // in-flight job row survives the reset.
        self.db.reset_working_set(&job.owner_id, job.id).await?;

        let rows = parse_batch(bytes)?;

        // Both snapshots are taken once per batch and never refreshed
        // mid-batch; later rows see earlier rows via the in-batch set.
        let suppression = self.db.suppression_set().await?;
        let existing_hashes = self.db.clean_record_hashes().await?;

        let outcome = classify_batch(
            job.id,
            &job.owner_id,
            &job.source,
            &rows,
            &existing_hashes,
            &suppression,
        );

        self.db.set_job_total(job.id, outcome.stats.total).await?;
        self.db.insert_raw_records(&outcome.raw).await?;
        self.db.insert_clean_records(&outcome.clean).await?;

        self.create_contacts(&job.owner_id, &outcome.clean).await?;

        Ok(outcome.stats)
    }

    /// Upsert a contact for every valid record bearing a phone number and
    /// trigger one consent request per newly created contact.
    async fn create_contacts(
        &self,
        owner_id: &str,
        clean: &[CleanRecord],
    ) -> Result<(), Error> {
        for record in clean {
            if normalize_phone(&record.phone).is_empty() {
                continue;
            }

            let contact =
                Contact::from_record(owner_id, &record.name, &record.email, &record.phone);
            let created = self.db.upsert_contact(&contact).await?;
            if created {
                self.send_consent_request(&contact).await;
            }
        }
        Ok(())
    }

    /// Fire-and-forget consent request: failures are logged only and never
    /// fail the job. The system turn is logged once the send goes out.
    async fn send_consent_request(&self, contact: &Contact) {
        let text = consent_request_text(contact);
        match self.notifier.send(&contact.phone, &text).await {
            Ok(sid) => {
                info!(contact_id = %contact.id, sid = %sid, "Consent request sent");
                if let Err(e) = self
                    .db
                    .append_turns(&[ConversationTurn::system(contact.id, &text)])
                    .await
                {
                    warn!(contact_id = %contact.id, error = %e, "Failed to log consent request");
                }
            }
            Err(e) => {
                warn!(contact_id = %contact.id, error = %e, "Consent request failed");
            }
        }
    }

    async fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.owner_locks.lock().await;
        locks.entry(owner_id.to_string()).or_default().clone()
    }
}

/// Classify every parsed row. First match wins, in this order: blank-skip,
/// invalid, duplicate, suppressed, valid.
pub fn classify_batch(
    job_id: Uuid,
    owner_id: &str,
    source: &str,
    rows: &[ParsedRow],
    existing_hashes: &HashSet<String>,
    suppression: &SuppressionSet,
) -> BatchOutcome {
    let mut stats = JobStats::default();
    let mut raw = Vec::new();
    let mut clean = Vec::new();
    let mut batch_hashes: HashSet<String> = HashSet::new();

    for row in rows {
        if row.blank {
            continue;
        }
        stats.total += 1;

        // The hash is computed over the trimmed input; sanitization only
        // affects what is stored.
        let hash = record_hash(&row.name, &row.email, &row.phone);
        let now = Utc::now();

        raw.push(RawRecord {
            id: Uuid::new_v4(),
            job_id,
            owner_id: owner_id.to_string(),
            name: sanitize_cell(&row.name),
            email: sanitize_cell(&row.email),
            phone: sanitize_cell(&row.phone),
            company: sanitize_cell(&row.company),
            source: source.to_string(),
            record_hash: hash.clone(),
            created_at: now,
        });

        // No usable contact method: neither the email nor the phone
        // passes its format check.
        if !is_valid_email(&row.email) && !is_valid_phone(&row.phone) {
            stats.invalid += 1;
            continue;
        }

        if batch_hashes.contains(&hash) || existing_hashes.contains(&hash) {
            stats.duplicates += 1;
            continue;
        }
        batch_hashes.insert(hash.clone());

        if suppression.contains(&row.email.to_lowercase(), &normalize_phone(&row.phone)) {
            stats.suppressed += 1;
            continue;
        }

        clean.push(CleanRecord {
            id: Uuid::new_v4(),
            job_id,
            owner_id: owner_id.to_string(),
            name: sanitize_cell(&row.name),
            email: sanitize_cell(&row.email),
            phone: sanitize_cell(&row.phone),
            company: sanitize_cell(&row.company),
            source: source.to_string(),
            record_hash: hash,
            is_expired: false,
            created_at: now,
        });
        stats.valid += 1;
    }

    BatchOutcome { raw, clean, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::model::TurnSender;
    use crate::error::MessagingError;
    use crate::pipeline::types::JobStatus;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingNotifier {
        sent: StdMutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, phone: &str, body: &str) -> Result<String, MessagingError> {
            if self.fail {
                return Err(MessagingError::SendFailed {
                    phone: phone.to_string(),
                    reason: "stub failure".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((phone.to_string(), body.to_string()));
            Ok("SM_stub".to_string())
        }
    }

    async fn pipeline() -> (Arc<IngestionPipeline>, Arc<LibSqlBackend>, Arc<RecordingNotifier>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::new());
        let pipeline = Arc::new(IngestionPipeline::new(db.clone(), notifier.clone()));
        (pipeline, db, notifier)
    }

    async fn ingest_and_wait(
        pipeline: &Arc<IngestionPipeline>,
        db: &Arc<LibSqlBackend>,
        csv: &[u8],
        owner: &str,
    ) -> Job {
        let (job, handle) = pipeline
            .ingest(csv.to_vec(), "upload.csv", "Manual Upload", owner)
            .await
            .unwrap();
        handle.await.unwrap();
        db.get_job(job.id).await.unwrap().unwrap()
    }

    const SCENARIO_A: &[u8] = b"Name,Email,Phone\n\
        John Doe,john@x.com,1234567890\n\
        John Doe,JOHN@X.COM,123-456-7890\n\
        Jane,bad-email,123\n";

    #[tokio::test]
    async fn scenario_a_counts_and_confidence() {
        let (pipeline, db, notifier) = pipeline().await;
        let job = ingest_and_wait(&pipeline, &db, SCENARIO_A, "owner-1").await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stats.total, 3);
        assert_eq!(job.stats.valid, 1);
        assert_eq!(job.stats.duplicates, 1);
        assert_eq!(job.stats.invalid, 1);
        assert_eq!(job.stats.suppressed, 0);
        assert_eq!(job.confidence_score, 33);
        assert!(job.completed_at.is_some());

        // Raw records exist for every non-blank row; clean only for valid.
        assert_eq!(db.list_raw_records("owner-1").await.unwrap().len(), 3);
        assert_eq!(db.list_clean_records("owner-1").await.unwrap().len(), 1);

        // One contact, one consent request.
        let contacts = db.list_contacts("owner-1").await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].phone, "1234567890");
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);

        // The consent request is logged as a system turn.
        let turns = db.list_turns(contacts[0].id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].sender, TurnSender::System);
        assert!(turns[0].message.contains("reply YES"));
    }

    #[tokio::test]
    async fn scenario_b_suppressed_phone_creates_no_contact() {
        let (pipeline, db, notifier) = pipeline().await;
        db.insert_suppression(&crate::pipeline::types::SuppressionEntry::new(
            None,
            Some("1234567890"),
            Some("opt-out"),
        ))
        .await
        .unwrap();

        let csv = b"Name,Email,Phone\nJohn Doe,john@x.com,1234567890\n";
        let job = ingest_and_wait(&pipeline, &db, csv, "owner-1").await;

        assert_eq!(job.stats.suppressed, 1);
        assert_eq!(job.stats.valid, 0);
        assert!(db.list_contacts("owner-1").await.unwrap().is_empty());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_file_fails_terminally() {
        let (pipeline, db, _) = pipeline().await;
        let job = ingest_and_wait(&pipeline, &db, b"", "owner-1").await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("CSV file is empty"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn missing_canonical_columns_fails() {
        let (pipeline, db, _) = pipeline().await;
        let job = ingest_and_wait(&pipeline, &db, b"Widget,Price\nfoo,12\n", "owner-1").await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .error_message
            .unwrap()
            .contains("at least one of the following columns"));
    }

    #[tokio::test]
    async fn blank_rows_are_skipped_entirely() {
        let (pipeline, db, _) = pipeline().await;
        let csv = b"Name,Email,Phone\nJohn,john@x.com,1234567890\n,,\n";
        let job = ingest_and_wait(&pipeline, &db, csv, "owner-1").await;

        assert_eq!(job.stats.total, 1);
        assert_eq!(db.list_raw_records("owner-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn formula_cells_are_sanitized_in_raw_records() {
        let (pipeline, db, _) = pipeline().await;
        let csv = b"Name,Email,Phone\n=2+2,john@x.com,1234567890\n";
        ingest_and_wait(&pipeline, &db, csv, "owner-1").await;

        let raw = db.list_raw_records("owner-1").await.unwrap();
        assert_eq!(raw[0].name, "'=2+2");
    }

    #[tokio::test]
    async fn reingestion_resets_working_set() {
        let (pipeline, db, notifier) = pipeline().await;
        let first = ingest_and_wait(&pipeline, &db, SCENARIO_A, "owner-1").await;
        let second = ingest_and_wait(&pipeline, &db, SCENARIO_A, "owner-1").await;

        // The new upload supersedes: prior job and records are gone.
        assert!(db.get_job(first.id).await.unwrap().is_none());
        let jobs = db.list_jobs("owner-1", 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, second.id);

        // The reset clears the dedup snapshot too, so the re-upload
        // classifies the same as the first run.
        assert_eq!(second.stats.valid, 1);
        assert_eq!(db.list_clean_records("owner-1").await.unwrap().len(), 1);

        // The contact upsert is a no-op the second time: one contact, one
        // consent request across both runs.
        assert_eq!(db.list_contacts("owner-1").await.unwrap().len(), 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn consent_trigger_failure_does_not_fail_the_job() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::failing());
        let pipeline = Arc::new(IngestionPipeline::new(db.clone(), notifier));

        let csv = b"Name,Email,Phone\nJohn,john@x.com,1234567890\n";
        let job = ingest_and_wait(&pipeline, &db, csv, "owner-1").await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stats.valid, 1);

        // Contact exists but no system turn was logged for the failed send.
        let contacts = db.list_contacts("owner-1").await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert!(db.list_turns(contacts[0].id).await.unwrap().is_empty());
    }

    // ── classify_batch unit tests ───────────────────────────────────

    fn row(name: &str, email: &str, phone: &str) -> ParsedRow {
        ParsedRow {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
            company: String::new(),
            blank: false,
        }
    }

    #[test]
    fn classification_precedence_invalid_first() {
        // This row is invalid on format, already known by hash, and
        // suppressed by email — it must count only as invalid.
        let bad = row("Bad", "bad-email", "123");
        let hash = record_hash("Bad", "bad-email", "123");

        let mut existing = HashSet::new();
        existing.insert(hash);
        let mut suppression = SuppressionSet::default();
        suppression.emails.insert("bad-email".into());

        let outcome = classify_batch(
            Uuid::new_v4(),
            "owner-1",
            "src",
            &[bad],
            &existing,
            &suppression,
        );
        assert_eq!(outcome.stats.invalid, 1);
        assert_eq!(outcome.stats.duplicates, 0);
        assert_eq!(outcome.stats.suppressed, 0);
        assert_eq!(outcome.raw.len(), 1);
        assert!(outcome.clean.is_empty());
    }

    #[test]
    fn classification_precedence_duplicate_before_suppressed() {
        let dup = row("John", "john@x.com", "1234567890");
        let mut existing = HashSet::new();
        existing.insert(record_hash("John", "john@x.com", "1234567890"));
        let mut suppression = SuppressionSet::default();
        suppression.emails.insert("john@x.com".into());

        let outcome = classify_batch(
            Uuid::new_v4(),
            "owner-1",
            "src",
            &[dup],
            &existing,
            &suppression,
        );
        assert_eq!(outcome.stats.duplicates, 1);
        assert_eq!(outcome.stats.suppressed, 0);
    }

    #[test]
    fn dedup_against_seeded_snapshot_marks_everything_duplicate() {
        let rows = vec![
            row("John Doe", "john@x.com", "1234567890"),
            row("Jane Roe", "jane@x.com", "0987654321"),
        ];
        let none = HashSet::new();
        let suppression = SuppressionSet::default();

        let first = classify_batch(Uuid::new_v4(), "o", "s", &rows, &none, &suppression);
        assert_eq!(first.stats.valid, 2);

        // Second run with the first run's clean hashes in the snapshot.
        let seeded: HashSet<String> = first
            .clean
            .iter()
            .map(|c| c.record_hash.clone())
            .collect();
        let second = classify_batch(Uuid::new_v4(), "o", "s", &rows, &seeded, &suppression);
        assert_eq!(second.stats.valid, 0);
        assert_eq!(second.stats.duplicates, 2);
    }

    #[test]
    fn name_only_rows_are_invalid() {
        let outcome = classify_batch(
            Uuid::new_v4(),
            "o",
            "s",
            &[row("Just A Name", "", "")],
            &HashSet::new(),
            &SuppressionSet::default(),
        );
        assert_eq!(outcome.stats.invalid, 1);
        assert_eq!(outcome.raw.len(), 1);
    }

    #[test]
    fn email_only_rows_are_valid_without_contact_phone() {
        let outcome = classify_batch(
            Uuid::new_v4(),
            "o",
            "s",
            &[row("", "only@mail.com", "")],
            &HashSet::new(),
            &SuppressionSet::default(),
        );
        assert_eq!(outcome.stats.valid, 1);
        assert!(outcome.clean[0].phone.is_empty());
    }

    #[test]
    fn in_batch_duplicates_collide_across_case_and_separators() {
        let rows = vec![
            row("John Doe", "john@x.com", "1234567890"),
            row("John Doe", "JOHN@X.COM", "123-456-7890"),
        ];
        let outcome = classify_batch(
            Uuid::new_v4(),
            "o",
            "s",
            &rows,
            &HashSet::new(),
            &SuppressionSet::default(),
        );
        assert_eq!(outcome.stats.valid, 1);
        assert_eq!(outcome.stats.duplicates, 1);
    }
}
