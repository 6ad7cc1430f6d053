use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use email_workers::config::EngineConfig;
use email_workers::llm::create_provider;
use email_workers::store::LibSqlWorkerStore;
use email_workers::worker::routes::{WorkerRouteState, worker_routes};
use email_workers::worker::ticker::spawn_due_ticker;
use email_workers::worker::{ConfigurationGenerator, Worker, WorkerLifecycleManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = EngineConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing: stderr always, plus a daily file when a log dir is set
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "email-workers.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    eprintln!("📬 Email Workers v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api/workers", config.http_port);
    eprintln!("   Due sweep: every {}s", config.sweep_interval.as_secs());

    // ── LLM + Generator ─────────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("Failed to create LLM provider")?;
    let generator = ConfigurationGenerator::new(llm, config.generator.clone());

    // ── Database ─────────────────────────────────────────────────────────
    let store = LibSqlWorkerStore::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

    let manager = Arc::new(WorkerLifecycleManager::new(generator, Arc::new(store)));

    // ── Due Sweep ────────────────────────────────────────────────────────
    let (due_tx, mut due_rx) = tokio::sync::mpsc::channel::<Worker>(256);
    let _ticker_handle = spawn_due_ticker(Arc::clone(&manager), config.sweep_interval, due_tx);

    // The executor pulls from GET /api/executor/due; the in-process channel
    // only records what the sweep handed out.
    tokio::spawn(async move {
        while let Some(worker) = due_rx.recv().await {
            tracing::info!(
                worker_id = %worker.id,
                user_id = %worker.user_id,
                worker_type = %worker.worker_type,
                next_scheduled_at = ?worker.next_scheduled_at,
                "Worker due"
            );
        }
    });

    // ── HTTP ─────────────────────────────────────────────────────────────
    if config.executor_token.is_none() {
        tracing::warn!("EMAIL_WORKERS_EXECUTOR_TOKEN not set, /api/executor/due will refuse all requests");
    }
    let app = worker_routes(WorkerRouteState {
        manager,
        executor_token: config.executor_token.clone(),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Worker API started");
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
