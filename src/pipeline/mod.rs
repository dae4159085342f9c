//! Ingestion & cleaning pipeline.
//!
//! An uploaded batch flows through: parse → per-row classification
//! (invalid → duplicate → suppressed → valid) → persisted raw/clean
//! records → contact upserts with consent-request triggers → terminal
//! job ledger entry.

pub mod csv;
pub mod identity;
pub mod processor;
pub mod types;

pub use processor::{classify_batch, BatchOutcome, IngestionPipeline};
pub use types::{CleanRecord, Job, JobStats, JobStatus, RawRecord, SuppressionEntry, SuppressionSet};
