use std::sync::Arc;

use onboarding_engine::config::ServerConfig;
use onboarding_engine::error::Result;
use onboarding_engine::onboarding::{
    NormalizerRegistry, OnboardingRouteState, SessionManager, onboarding_routes,
};
use onboarding_engine::store::LibSqlBackend;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;

    eprintln!("Onboarding engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/onboarding", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(LibSqlBackend::open(&config.db_path, config.busy_timeout).await?);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Lock wait bound: {:?}", config.busy_timeout);

    // ── Normalizers ──────────────────────────────────────────────────────
    let normalizers = NormalizerRegistry::from_stringify_pairs(&config.stringify_fields);
    if !normalizers.is_empty() {
        eprintln!("   Normalizers: {:?}", normalizers);
    }

    // ── HTTP ─────────────────────────────────────────────────────────────
    let manager = Arc::new(SessionManager::new(Arc::clone(&db), normalizers));
    let app = onboarding_routes(OnboardingRouteState { manager });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Onboarding server started");
    axum::serve(listener, app).await?;

    Ok(())
}
