use anyhow::Context;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use dashboard::backend::{Backend, MemoryBackend, RestBackend};
use dashboard::config::AppConfig;
use dashboard::web::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    let backend = build_backend(&config);

    let state = AppState::new(backend, config.clone());
    state.sessions.init();
    let app = web::app(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid HOST/PORT: {}:{}", config.host, config.port))?;

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            let fallback: SocketAddr = format!("{}:{}", config.host, config.port.saturating_add(1))
                .parse()
                .context("invalid fallback address")?;
            warn!("Could not bind {}: {}. Trying {}", addr, e, fallback);
            tokio::net::TcpListener::bind(fallback)
                .await
                .with_context(|| format!("could not bind fallback {}", fallback))?
        }
    };

    let bound_addr = listener.local_addr()?;
    info!("Dashboard listening on http://{}", bound_addr);
    info!("Sign in at http://{}/login", bound_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.sessions.teardown().await;
    info!("Dashboard stopped");
    Ok(())
}

fn build_backend(config: &AppConfig) -> Arc<dyn Backend> {
    if !config.is_offline() {
        info!(url = %config.backend_url, "Using hosted backend");
        return Arc::new(RestBackend::new(
            &config.backend_url,
            &config.backend_anon_key,
        ));
    }

    warn!("BACKEND_URL not set, running against the in-memory backend");
    let memory = MemoryBackend::new();
    match (&config.demo_email, &config.demo_password) {
        (Some(email), Some(password)) => {
            memory.add_user(email, password);
        }
        _ => warn!("DEMO_EMAIL/DEMO_PASSWORD not set; nobody can sign in"),
    }
    Arc::new(memory)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
