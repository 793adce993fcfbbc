use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod error;
mod extract;
mod http;
mod middleware;

#[cfg(test)]
mod tests;

#[derive(Parser)]
#[command(name = "arbiter-gateway", about = "Hardened LLM chat gateway")]
struct Cli {
    /// Path to arbiter.toml (default: ~/.arbiter/arbiter.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arbiter_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // Fail fast: a short session secret, a missing upstream key, or a bad
    // threshold list refuses to boot rather than degrading.
    let config = arbiter_core::config::ArbiterConfig::load(cli.config.as_deref())?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(&config.database.path)?;

    let provider = Arc::new(arbiter_agent::AnthropicProvider::new(
        config.upstream.key.clone(),
        Some(config.upstream.base.clone()),
    ));

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(app::AppState::new(config, conn, provider)?);
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!(model = %state.config.upstream.model, "Arbiter gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
