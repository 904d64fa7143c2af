use color_eyre::Result;
use forge_server::auth::AuthService;
use forge_server::config::ServerConfig;
use forge_server::registry::SessionRegistry;
use forge_server::session::SessionCommand;
use forge_server::store::SledStore;
use forge_server::{AppState, Metrics, http};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Activates error tracing, opens the store, spawns the idle sweep for
/// abandoned sessions, then serves HTTP and WebSocket traffic on PORT.
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let store = Arc::new(SledStore::open(&config.database_path)?);
    let registry = Arc::new(SessionRegistry::default());
    let auth = AuthService::new(&config);
    let port = config.port;
    let state = Arc::new(AppState {
        config,
        store,
        auth,
        registry,
        metrics: Metrics::default(),
    });

    // Periodic sweep: every session checks its own idle clock. Sessions end
    // themselves after ten minutes without a single connected member.
    let sweep = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            for handle in sweep.registry.handles().await {
                // A full queue means the session is busy, not idle.
                let _ = handle.commands.try_send(SessionCommand::IdleCheck);
            }
        }
    });

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "rune forge server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
