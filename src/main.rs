use std::sync::Arc;

use leadflow::agents::IntentRouter;
use leadflow::config::Config;
use leadflow::consent::ConsentEngine;
use leadflow::llm::HttpChatGateway;
use leadflow::messaging::TwilioWhatsApp;
use leadflow::pipeline::IngestionPipeline;
use leadflow::routes::{app_routes, AppState};
use leadflow::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📇 LeadFlow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Bind: http://{}", config.bind_addr);
    eprintln!("   Upload API: POST /api/uploads");
    eprintln!("   Webhook: POST /webhooks/whatsapp");
    eprintln!("   Gateway model: {}", config.chat_gateway.model);

    // ── Database ─────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await.unwrap_or_else(
        |e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        },
    ));
    eprintln!("   Database: {}", config.db_path);

    // ── Components ───────────────────────────────────────────────────
    let notifier = Arc::new(TwilioWhatsApp::new(config.messaging.clone()));
    let gateway = Arc::new(HttpChatGateway::new(config.chat_gateway.clone()));

    let pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&db), notifier.clone()));
    let consent = Arc::new(ConsentEngine::new(
        Arc::clone(&db),
        notifier,
        IntentRouter::new(gateway),
    ));

    eprintln!("   Owners: {} token(s) configured\n", config.api_tokens.len());

    // ── HTTP server ──────────────────────────────────────────────────
    let state = AppState {
        db,
        pipeline,
        consent,
        api_tokens: Arc::new(config.api_tokens.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "LeadFlow server started");
    axum::serve(listener, app_routes(state)).await?;

    Ok(())
}
