use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use rent_assist::channels::CliChannel;
use rent_assist::config::{BackendConfig, FlowConfig};
use rent_assist::jobs::{HttpBackend, JobManager};
use rent_assist::routes::{AppState, conversation_routes};
use rent_assist::survey::{ConversationController, QuestionGraph};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to a file so the REPL on stdout stays readable.
    let log_dir = std::env::var("RENT_ASSIST_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "rent-assist.log");
    let (log_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_writer)
        .init();

    let http_port: u16 = std::env::var("RENT_ASSIST_HTTP_PORT")
        .unwrap_or_else(|_| "8090".to_string())
        .parse()
        .unwrap_or(8090);

    let flow_config = FlowConfig::from_env().context("invalid flow configuration")?;
    let backend_config = BackendConfig::from_env().context("invalid backend configuration")?;

    eprintln!("🏠 Rent Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Analysis backend: {}", backend_config.base_url);
    eprintln!("   REST API: http://0.0.0.0:{}/api/conversation", http_port);
    eprintln!("   Logs: {}/rent-assist.log", log_dir);
    eprintln!("   Answer by number or text. /new restarts, /retry resubmits.\n");

    let graph = Arc::new(QuestionGraph::rental_survey().context("survey definition is broken")?);
    let backend = Arc::new(HttpBackend::new(backend_config).context("failed to build HTTP client")?);
    let (jobs, job_events) = JobManager::new(backend, flow_config.clone());
    let controller = ConversationController::new(graph, jobs.clone(), flow_config);

    tokio::spawn(controller.clone().run_job_events(job_events));

    let app = conversation_routes(AppState {
        controller: controller.clone(),
        jobs,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port))
        .await
        .with_context(|| format!("failed to bind port {http_port}"))?;
    tracing::info!(port = http_port, "REST server started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("REST server stopped: {e}");
        }
    });

    controller.start().await;
    CliChannel::new(controller).run().await;

    tracing::info!("Shutting down");
    Ok(())
}
