//! Error types for LeadFlow.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Consent error: {0}")]
    Consent(#[from] ConsentError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

/// Configuration-related errors. Raised only at process start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// File-shape errors raised by the ingestion pipeline.
///
/// These never cross the async task boundary — the batch task converts them
/// into a terminal `failed` job with the message preserved on the job row.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("CSV file is empty")]
    EmptyFile,

    #[error("Failed to parse CSV file: {0}")]
    Unparsable(String),

    #[error("No data found in CSV file")]
    NoDataRows,

    #[error("CSV must contain at least one of the following columns: name, email, phone")]
    NoCanonicalColumns,
}

/// Consent webhook errors.
#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("No contact found for phone {phone}")]
    ContactNotFound { phone: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Intent router / chat gateway errors.
///
/// Either of the router's two external calls failing is a single transient
/// error — the webhook caller sees a server error and no conversation state
/// is recorded.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Chat gateway request failed: {reason}")]
    Gateway { reason: String },

    #[error("Invalid response from chat gateway: {reason}")]
    InvalidResponse { reason: String },
}

/// Outbound messaging errors. Logged at call sites, never retried.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Failed to send message to {phone}: {reason}")]
    SendFailed { phone: String, reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
