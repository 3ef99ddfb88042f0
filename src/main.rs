use std::sync::Arc;

use reply_relay::api::{ApiState, api_routes};
use reply_relay::channels::{ChatTransport, TelegramTransport};
use reply_relay::config::RelayConfig;
use reply_relay::conversation::{ConversationStore, SystemClock};
use reply_relay::ingest::{UpdatePoller, spawn_poller};
use reply_relay::reply::{
    DisabledDraftStore, DraftStore, ImapDraftStore, LlmReplyGenerator, ReplyOrchestrator,
};
use reply_relay::router::MessageRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env()?;

    eprintln!("📨 Reply Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Register API: http://0.0.0.0:{}/api/conversations", config.http_port);
    eprintln!(
        "   Telegram: allowed {}",
        if config.telegram.allowed_users.iter().any(|u| u == "*") {
            "everyone".to_string()
        } else {
            config.telegram.allowed_users.join(", ")
        }
    );

    // ── Collaborators ───────────────────────────────────────────────────
    let transport: Arc<dyn ChatTransport> =
        Arc::new(TelegramTransport::new(config.telegram.bot_token.clone()));
    let generator = Arc::new(LlmReplyGenerator::new(&config.llm)?);
    eprintln!("   Model: {}", generator.model_name());
    let drafts: Arc<dyn DraftStore> = match config.imap.clone() {
        Some(imap) => {
            eprintln!("   Drafts: IMAP {} → {}", imap.host, imap.drafts_folder);
            // Leave headroom under the orchestrator's own draft timeout.
            Arc::new(ImapDraftStore::new(imap).with_timeout(config.collaborator_timeout * 3 / 4))
        }
        None => {
            eprintln!("   Drafts: disabled (EMAIL_IMAP_HOST not set)");
            Arc::new(DisabledDraftStore)
        }
    };

    // ── Core ────────────────────────────────────────────────────────────
    let store = ConversationStore::with_clock(Arc::new(SystemClock), config.state_ttl);
    let orchestrator = Arc::new(
        ReplyOrchestrator::new(Arc::clone(&store), Arc::clone(&transport), generator, drafts)
            .with_timeout(config.collaborator_timeout),
    );
    let router = Arc::new(MessageRouter::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        orchestrator,
        config.telegram.allowed_users.clone(),
    ));

    // ── Registration inlet ──────────────────────────────────────────────
    let app = api_routes(ApiState {
        store: Arc::clone(&store),
        transport: Arc::clone(&transport),
        send_timeout: config.collaborator_timeout,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tracing::info!(port = config.http_port, "Registration API started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Registration API stopped");
        }
    });

    // ── Ingestion ───────────────────────────────────────────────────────
    let poller = UpdatePoller::new(transport, router, config.poller.clone());
    let handle = spawn_poller(poller);

    tokio::select! {
        _ = handle => {
            eprintln!("Update poller stood down; restart the process to resume polling.");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
