//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases; migrations run on open.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::consent::model::{ConsentStatus, Contact, ConversationTurn, TurnSender};
use crate::error::DatabaseError;
use crate::pipeline::identity::normalize_phone;
use crate::pipeline::types::{
    CleanRecord, Job, JobStats, JobStatus, RawRecord, SuppressionEntry, SuppressionSet,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Read a nullable text column.
fn opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

fn opt_datetime(row: &libsql::Row, idx: i32) -> Option<DateTime<Utc>> {
    opt_text(row, idx).map(|s| parse_datetime(&s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

const JOB_COLUMNS: &str = "id, owner_id, filename, source, status, total_records, \
     valid_records, invalid_records, duplicate_records, suppressed_records, \
     expired_records, confidence_score, error_message, created_at, started_at, completed_at";

fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let created: String = row.get(13)?;

    Ok(Job {
        id: parse_uuid(&id),
        owner_id: row.get(1)?,
        filename: row.get(2)?,
        source: row.get(3)?,
        status: JobStatus::parse(&status),
        stats: JobStats {
            total: row.get::<i64>(5)? as u32,
            valid: row.get::<i64>(6)? as u32,
            invalid: row.get::<i64>(7)? as u32,
            duplicates: row.get::<i64>(8)? as u32,
            suppressed: row.get::<i64>(9)? as u32,
            expired: row.get::<i64>(10)? as u32,
        },
        confidence_score: row.get::<i64>(11)? as u8,
        error_message: opt_text(row, 12),
        created_at: parse_datetime(&created),
        started_at: opt_datetime(row, 14),
        completed_at: opt_datetime(row, 15),
    })
}

const RECORD_COLUMNS: &str =
    "id, job_id, owner_id, name, email, phone, company, source, record_hash, created_at";

fn row_to_raw_record(row: &libsql::Row) -> Result<RawRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let job_id: String = row.get(1)?;
    let created: String = row.get(9)?;

    Ok(RawRecord {
        id: parse_uuid(&id),
        job_id: parse_uuid(&job_id),
        owner_id: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        company: row.get(6)?,
        source: row.get(7)?,
        record_hash: row.get(8)?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_clean_record(row: &libsql::Row) -> Result<CleanRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let job_id: String = row.get(1)?;
    let created: String = row.get(9)?;

    Ok(CleanRecord {
        id: parse_uuid(&id),
        job_id: parse_uuid(&job_id),
        owner_id: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        company: row.get(6)?,
        source: row.get(7)?,
        record_hash: row.get(8)?,
        created_at: parse_datetime(&created),
        is_expired: row.get::<i64>(10)? != 0,
    })
}

const CONTACT_COLUMNS: &str = "id, owner_id, first_name, last_name, phone, email, \
     consent_status, consent_timestamp, latest_message, created_at, updated_at";

fn row_to_contact(row: &libsql::Row) -> Result<Contact, libsql::Error> {
    let id: String = row.get(0)?;
    let status: String = row.get(6)?;
    let created: String = row.get(9)?;
    let updated: String = row.get(10)?;

    Ok(Contact {
        id: parse_uuid(&id),
        owner_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: opt_text(row, 3),
        phone: row.get(4)?,
        email: opt_text(row, 5),
        consent_status: ConsentStatus::parse(&status),
        consent_timestamp: opt_datetime(row, 7),
        latest_message: opt_text(row, 8),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_turn(row: &libsql::Row) -> Result<ConversationTurn, libsql::Error> {
    let id: String = row.get(0)?;
    let contact_id: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let created: String = row.get(5)?;

    Ok(ConversationTurn {
        id: parse_uuid(&id),
        contact_id: parse_uuid(&contact_id),
        sender: TurnSender::parse(&sender),
        message: row.get(3)?,
        agent_label: opt_text(row, 4),
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Job ledger ──────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO jobs (id, owner_id, filename, source, status, created_at, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job.id.to_string(),
                    job.owner_id.clone(),
                    job.filename.clone(),
                    job.source.clone(),
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                    job.started_at.map(|t| t.to_rfc3339()),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_job(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_jobs(&self, owner_id: &str, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = ?1
                     ORDER BY created_at DESC LIMIT ?2"
                ),
                params![owner_id, limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            jobs.push(row_to_job(&row).map_err(query_err)?);
        }
        Ok(jobs)
    }

    async fn set_job_total(&self, id: Uuid, total: u32) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE jobs SET total_records = ?1 WHERE id = ?2",
                params![i64::from(total), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn complete_job(
        &self,
        id: Uuid,
        stats: &JobStats,
        confidence_score: u8,
    ) -> Result<(), DatabaseError> {
        // Guarded on status so a job takes exactly one terminal transition.
        self.conn()
            .execute(
                "UPDATE jobs SET status = 'completed',
                     total_records = ?1, valid_records = ?2, invalid_records = ?3,
                     duplicate_records = ?4, suppressed_records = ?5, expired_records = ?6,
                     confidence_score = ?7, completed_at = ?8
                 WHERE id = ?9 AND status = 'processing'",
                params![
                    i64::from(stats.total),
                    i64::from(stats.valid),
                    i64::from(stats.invalid),
                    i64::from(stats.duplicates),
                    i64::from(stats.suppressed),
                    i64::from(stats.expired),
                    i64::from(confidence_score),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn fail_job(&self, id: Uuid, message: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE jobs SET status = 'failed', error_message = ?1, completed_at = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![message, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Working set ─────────────────────────────────────────────────

    async fn reset_working_set(
        &self,
        owner_id: &str,
        keep_job: Uuid,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM clean_records WHERE owner_id = ?1",
            params![owner_id],
        )
        .await
        .map_err(query_err)?;
        conn.execute(
            "DELETE FROM raw_records WHERE owner_id = ?1",
            params![owner_id],
        )
        .await
        .map_err(query_err)?;
        conn.execute(
            "DELETE FROM jobs WHERE owner_id = ?1 AND id != ?2",
            params![owner_id, keep_job.to_string()],
        )
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn insert_raw_records(&self, records: &[RawRecord]) -> Result<(), DatabaseError> {
        for record in records {
            self.conn()
                .execute(
                    "INSERT INTO raw_records
                         (id, job_id, owner_id, name, email, phone, company, source,
                          record_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.id.to_string(),
                        record.job_id.to_string(),
                        record.owner_id.clone(),
                        record.name.clone(),
                        record.email.clone(),
                        record.phone.clone(),
                        record.company.clone(),
                        record.source.clone(),
                        record.record_hash.clone(),
                        record.created_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(query_err)?;
        }
        Ok(())
    }

    async fn insert_clean_records(&self, records: &[CleanRecord]) -> Result<(), DatabaseError> {
        for record in records {
            self.conn()
                .execute(
                    "INSERT INTO clean_records
                         (id, job_id, owner_id, name, email, phone, company, source,
                          record_hash, status, is_expired, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'valid', ?10, ?11)",
                    params![
                        record.id.to_string(),
                        record.job_id.to_string(),
                        record.owner_id.clone(),
                        record.name.clone(),
                        record.email.clone(),
                        record.phone.clone(),
                        record.company.clone(),
                        record.source.clone(),
                        record.record_hash.clone(),
                        record.is_expired as i64,
                        record.created_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(query_err)?;
        }
        Ok(())
    }

    async fn list_raw_records(&self, owner_id: &str) -> Result<Vec<RawRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM raw_records
                     WHERE owner_id = ?1 ORDER BY rowid"
                ),
                params![owner_id],
            )
            .await
            .map_err(query_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            records.push(row_to_raw_record(&row).map_err(query_err)?);
        }
        Ok(records)
    }

    async fn list_clean_records(&self, owner_id: &str) -> Result<Vec<CleanRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS}, is_expired FROM clean_records
                     WHERE owner_id = ?1 ORDER BY rowid"
                ),
                params![owner_id],
            )
            .await
            .map_err(query_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            records.push(row_to_clean_record(&row).map_err(query_err)?);
        }
        Ok(records)
    }

    async fn clean_record_hashes(&self) -> Result<HashSet<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT record_hash FROM clean_records", ())
            .await
            .map_err(query_err)?;

        let mut hashes = HashSet::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            hashes.insert(row.get::<String>(0).map_err(query_err)?);
        }
        Ok(hashes)
    }

    // ── Suppression list ────────────────────────────────────────────

    async fn insert_suppression(&self, entry: &SuppressionEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO suppression_list (id, email, phone, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.id.to_string(),
                    entry.email.clone(),
                    entry.phone.clone(),
                    entry.reason.clone(),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn suppression_set(&self) -> Result<SuppressionSet, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT email, phone FROM suppression_list", ())
            .await
            .map_err(query_err)?;

        let mut set = SuppressionSet::default();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            if let Some(email) = opt_text(&row, 0) {
                let email = email.trim().to_lowercase();
                if !email.is_empty() {
                    set.emails.insert(email);
                }
            }
            if let Some(phone) = opt_text(&row, 1) {
                let phone = normalize_phone(&phone);
                if !phone.is_empty() {
                    set.phones.insert(phone);
                }
            }
        }
        Ok(set)
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn upsert_contact(&self, contact: &Contact) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT INTO contacts
                     (id, owner_id, first_name, last_name, phone, email,
                      consent_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (phone, owner_id) DO NOTHING",
                params![
                    contact.id.to_string(),
                    contact.owner_id.clone(),
                    contact.first_name.clone(),
                    contact.last_name.clone(),
                    contact.phone.clone(),
                    contact.email.clone(),
                    contact.consent_status.as_str(),
                    contact.created_at.to_rfc3339(),
                    contact.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_contact(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE phone = ?1 LIMIT 1"),
                params![phone],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_contact(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_contacts(&self, owner_id: &str) -> Result<Vec<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts
                     WHERE owner_id = ?1 ORDER BY created_at DESC"
                ),
                params![owner_id],
            )
            .await
            .map_err(query_err)?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            contacts.push(row_to_contact(&row).map_err(query_err)?);
        }
        Ok(contacts)
    }

    async fn set_consent(
        &self,
        id: Uuid,
        status: ConsentStatus,
        consent_timestamp: Option<DateTime<Utc>>,
        latest_message: &str,
    ) -> Result<(), DatabaseError> {
        // COALESCE keeps the existing timestamp when the transition
        // doesn't carry one (a denial leaves any prior consent time).
        self.conn()
            .execute(
                "UPDATE contacts SET consent_status = ?1,
                     consent_timestamp = COALESCE(?2, consent_timestamp),
                     latest_message = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    status.as_str(),
                    consent_timestamp.map(|t| t.to_rfc3339()),
                    latest_message,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn set_latest_message(&self, id: Uuid, message: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE contacts SET latest_message = ?1, updated_at = ?2 WHERE id = ?3",
                params![message, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Conversation turns ──────────────────────────────────────────

    async fn append_turns(&self, turns: &[ConversationTurn]) -> Result<(), DatabaseError> {
        for turn in turns {
            self.conn()
                .execute(
                    "INSERT INTO conversation_turns
                         (id, contact_id, sender, message, agent_label, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        turn.id.to_string(),
                        turn.contact_id.to_string(),
                        turn.sender.as_str(),
                        turn.message.clone(),
                        turn.agent_label.clone(),
                        turn.created_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(query_err)?;
        }
        Ok(())
    }

    async fn list_turns(&self, contact_id: Uuid) -> Result<Vec<ConversationTurn>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, contact_id, sender, message, agent_label, created_at
                 FROM conversation_turns WHERE contact_id = ?1
                 ORDER BY created_at, rowid",
                params![contact_id.to_string()],
            )
            .await
            .map_err(query_err)?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            turns.push(row_to_turn(&row).map_err(query_err)?);
        }
        Ok(turns)
    }
}
