//! HTTP surface — upload entrypoint, job ledger reads, consent webhook.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::consent::{ConsentEngine, InboundOutcome};
use crate::error::{ConsentError, Error};
use crate::pipeline::IngestionPipeline;
use crate::store::Database;

/// Default source label when the upload doesn't carry one.
const DEFAULT_SOURCE: &str = "Manual Upload";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub pipeline: Arc<IngestionPipeline>,
    pub consent: Arc<ConsentEngine>,
    /// Bearer token → owner id.
    pub api_tokens: Arc<HashMap<String, String>>,
}

/// Build the Axum router.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/uploads", post(upload))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/contacts", get(list_contacts))
        .route("/api/contacts/{id}/turns", get(list_turns))
        .route("/webhooks/whatsapp", post(inbound_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Resolve the request's bearer token to an owner id.
fn bearer_owner(tokens: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    tokens.get(token).cloned()
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Unauthorized"})),
    )
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
}

fn not_found(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": message})),
    )
}

fn server_error(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": message})),
    )
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "leadflow"
    }))
}

// ── Upload entrypoint ───────────────────────────────────────────────

/// POST /api/uploads
///
/// Multipart request with a `file` field and an optional `source` label.
/// Returns 202 with the job id immediately; the batch runs in the
/// background and the job ledger carries its progress.
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let Some(owner_id) = bearer_owner(&state.api_tokens, &headers) else {
        return unauthorized().into_response();
    };

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut source = DEFAULT_SOURCE.to_string();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(&format!("Malformed multipart body: {e}")).into_response(),
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .unwrap_or("upload.csv")
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((filename, bytes.to_vec())),
                    Err(e) => {
                        return bad_request(&format!("Failed to read file: {e}")).into_response()
                    }
                }
            }
            Some("source") => {
                if let Ok(text) = field.text().await {
                    if !text.trim().is_empty() {
                        source = text.trim().to_string();
                    }
                }
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return bad_request("No file provided").into_response();
    };

    info!(owner_id = %owner_id, filename = %filename, "Upload received");

    match state
        .pipeline
        .ingest(bytes, &filename, &source, &owner_id)
        .await
    {
        Ok((job, _handle)) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "message": "Processing started",
                "jobId": job.id,
            })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to start ingestion");
            server_error("Failed to create ingestion job").into_response()
        }
    }
}

// ── Job ledger reads ────────────────────────────────────────────────

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let Some(owner_id) = bearer_owner(&state.api_tokens, &headers) else {
        return unauthorized().into_response();
    };

    match state.db.get_job(id).await {
        Ok(Some(job)) if job.owner_id == owner_id => Json(job).into_response(),
        Ok(_) => not_found("Job not found").into_response(),
        Err(e) => server_error(&e.to_string()).into_response(),
    }
}

/// GET /api/jobs
async fn list_jobs(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(owner_id) = bearer_owner(&state.api_tokens, &headers) else {
        return unauthorized().into_response();
    };

    match state.db.list_jobs(&owner_id, 50).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => server_error(&e.to_string()).into_response(),
    }
}

// ── Contact reads ───────────────────────────────────────────────────

/// GET /api/contacts
async fn list_contacts(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(owner_id) = bearer_owner(&state.api_tokens, &headers) else {
        return unauthorized().into_response();
    };

    match state.db.list_contacts(&owner_id).await {
        Ok(contacts) => Json(contacts).into_response(),
        Err(e) => server_error(&e.to_string()).into_response(),
    }
}

/// GET /api/contacts/{id}/turns
async fn list_turns(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let Some(owner_id) = bearer_owner(&state.api_tokens, &headers) else {
        return unauthorized().into_response();
    };

    match state.db.get_contact(id).await {
        Ok(Some(contact)) if contact.owner_id == owner_id => {
            match state.db.list_turns(id).await {
                Ok(turns) => Json(turns).into_response(),
                Err(e) => server_error(&e.to_string()).into_response(),
            }
        }
        Ok(_) => not_found("Contact not found").into_response(),
        Err(e) => server_error(&e.to_string()).into_response(),
    }
}

// ── Inbound message webhook ─────────────────────────────────────────

/// Form-encoded webhook payload from the messaging gateway.
#[derive(Debug, Deserialize)]
struct InboundForm {
    #[serde(rename = "From")]
    from: Option<String>,
    #[serde(rename = "Body")]
    body: Option<String>,
}

/// POST /webhooks/whatsapp
///
/// One inbound message per invocation, handled synchronously.
async fn inbound_webhook(
    State(state): State<AppState>,
    Form(payload): Form<InboundForm>,
) -> impl IntoResponse {
    let from = payload.from.unwrap_or_default();
    let body = payload.body.unwrap_or_default();

    // The gateway prefixes the sender with the channel scheme.
    let phone = from.strip_prefix("whatsapp:").unwrap_or(&from);

    if phone.trim().is_empty() || body.trim().is_empty() {
        return bad_request("Invalid request").into_response();
    }

    match state.consent.handle_inbound(phone, &body).await {
        Ok(outcome) => {
            let mut ack = serde_json::json!({"status": outcome.as_str()});
            if let InboundOutcome::AgentReplied { agent } = &outcome {
                ack["agent"] = serde_json::Value::String(agent.clone());
            }
            Json(ack).into_response()
        }
        Err(Error::Consent(ConsentError::ContactNotFound { .. })) => {
            not_found("Contact not found").into_response()
        }
        Err(e) => {
            error!(error = %e, "Webhook handling failed");
            server_error(&e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_parsing_requires_prefix_and_known_token() {
        let mut tokens = HashMap::new();
        tokens.insert("secret".to_string(), "owner-1".to_string());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert_eq!(bearer_owner(&tokens, &headers), Some("owner-1".to_string()));

        headers.insert("authorization", HeaderValue::from_static("secret"));
        assert_eq!(bearer_owner(&tokens, &headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert_eq!(bearer_owner(&tokens, &headers), None);

        assert_eq!(bearer_owner(&tokens, &HeaderMap::new()), None);
    }
}
