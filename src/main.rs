use std::{process, sync::Arc};

use courier::{
    application::{Orchestrator, error::AppError},
    config,
    infra::{error::InfraError, http, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig => {
            describe_settings(&settings);
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let orchestrator = Arc::new(Orchestrator::build(&settings)?);
    let router = http::build_router(Arc::clone(&orchestrator));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Serving health endpoint");

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    let drained = orchestrator
        .shutdown(settings.server.graceful_shutdown)
        .await;
    if drained {
        info!("Orchestrator drained");
    } else {
        warn!(
            grace_secs = settings.server.graceful_shutdown.as_secs(),
            "Orchestrator shut down with work still pending"
        );
    }

    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn describe_settings(settings: &config::Settings) {
    info!(
        addr = %settings.server.addr,
        graceful_shutdown_secs = settings.server.graceful_shutdown.as_secs(),
        log_level = %settings.logging.level,
        "server"
    );
    info!(
        max_entries = settings.cache.max_entries.get(),
        sweep_interval_ms = settings.cache.sweep_interval.as_millis() as u64,
        analysis_ttl_secs = settings.cache.analysis_ttl.as_secs(),
        metadata_ttl_secs = settings.cache.metadata_ttl.as_secs(),
        "cache"
    );
    info!(
        max_entries = settings.recorder.max_entries.get(),
        summary_window_secs = settings.recorder.summary_window.as_secs(),
        "recorder"
    );
    for (name, queue) in [
        ("analysis", &settings.queues.analysis),
        ("sheets", &settings.queues.sheets),
        ("webhook", &settings.queues.webhook),
    ] {
        info!(
            queue = name,
            concurrency = queue.concurrency.get(),
            call_timeout_ms = queue.call_timeout.as_millis() as u64,
            max_retries = queue.max_retries,
            backoff_base_ms = queue.backoff_base.as_millis() as u64,
            "queue"
        );
    }
    info!(
        batch_size = settings.batcher.batch_size.get(),
        max_wait_ms = settings.batcher.max_wait.as_millis() as u64,
        "batcher"
    );
    info!(
        analysis_url = %settings.services.analysis_url,
        analysis_api_key = settings.services.analysis_api_key.is_some(),
        sheets_url = %settings.services.sheets_url,
        sheets_api_key = settings.services.sheets_api_key.is_some(),
        "services"
    );
}
