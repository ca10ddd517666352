use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use video_share::{router, system_info, AppState, Config, LazyDatastore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("video_share=debug,tower_http=debug")),
        )
        .init();

    // Load configuration
    let config = Config::from_env();

    // Print system info at startup
    system_info::print_startup_info(&config);

    // Connects on first use, so a database that is down at boot does not stop the server.
    let datastore = Arc::new(LazyDatastore::new(config.database_url.clone()));
    let app_state = Arc::new(AppState::new(config.clone(), datastore));

    let app = router(app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("{}", "=".repeat(60));
    println!("✅ Server running on http://0.0.0.0:{}", config.port);
    println!("✅ Server accessible at http://localhost:{}", config.port);
    println!("{}", "=".repeat(60));

    info!("✅ Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
