use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deploy_hook::config::{Config, ENV_SECRET};
use deploy_hook::git::GitRepository;
use deploy_hook::server::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_hook=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    check_config(&config);

    let repo = GitRepository::new(&config.repo_path, config.git.clone());
    let app = build_router(AppState::from_config(&config, repo));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(
        addr = %config.listen,
        route = %config.route,
        repo = %config.repo_path.display(),
        audit_log = %config.audit_log.display(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down");
    Ok(())
}

/// Warns about configuration that is valid but almost certainly a mistake.
fn check_config(config: &Config) {
    if config.secret.is_empty() {
        warn!("{} is not set; every delivery will be rejected", ENV_SECRET);
    }
    if !config.repo_path.join(".git").exists() {
        warn!(
            repo = %config.repo_path.display(),
            "repository path is not a git checkout; synchronizations will fault"
        );
    }
    if config.audit_log.starts_with(&config.repo_path) {
        warn!(
            audit_log = %config.audit_log.display(),
            "audit log is inside the working copy and will be stashed as drift"
        );
    }
}

/// Resolves on Ctrl-C or SIGTERM. In-flight deliveries are allowed to finish.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
