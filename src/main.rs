use std::{process, sync::Arc, time::Duration};

use pressroom::{
    application::{
        error::AppError,
        generator::PdfGenerator,
        render::{Cluster, ClusterOptions, FontInliner},
    },
    config,
    domain::options::{GenerationOptions, Orientation},
    infra::{
        chrome::{ChromeLauncher, ChromeOptions},
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::{signal, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const EVENT_FLUSH_WINDOW: Duration = Duration::from_secs(1);
/// Time left for closing browsers once in-flight jobs had their grace.
const WORKER_CLOSE_WINDOW: Duration = Duration::from_secs(10);

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
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

fn build_cluster(
    settings: &config::Settings,
    options: ClusterOptions,
) -> Result<Cluster, AppError> {
    let launcher = ChromeLauncher::new(ChromeOptions {
        executable: settings.browser.executable.clone(),
        idle_timeout: settings.browser.idle_timeout,
        extra_args: settings.browser.extra_args.clone(),
        page_timeout: options.worker_timeout,
        navigation_timeout: options.navigation_timeout,
    });
    let fonts = FontInliner::new(settings.fonts.download_timeout)
        .map_err(|err| InfraError::browser(format!("failed to build font client: {err}")))?;

    Ok(Cluster::new(options, Arc::new(launcher), fonts))
}

fn cluster_options(settings: &config::ClusterSettings) -> ClusterOptions {
    ClusterOptions {
        max_workers: settings.max_workers.get() as usize,
        max_concurrent_jobs: settings.max_concurrent_jobs.get() as usize,
        worker_timeout: settings.worker_timeout,
        navigation_timeout: settings.navigation_timeout,
        shutdown_grace: settings.shutdown_grace,
        event_capacity: settings.event_capacity.get() as usize,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cluster = build_cluster(&settings, cluster_options(&settings.cluster))?;
    let event_logger = telemetry::spawn_event_logger(cluster.subscribe());

    let workers = cluster
        .init()
        .await
        .map_err(|err| InfraError::browser(format!("render cluster failed to start: {err}")))?;

    let state = HttpState {
        generator: PdfGenerator::new(cluster.clone()),
    };
    let max_request_bytes = settings.http.max_request_bytes.get() as usize;
    let router = http::build_router(state, max_request_bytes);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "pressroom::serve",
        addr = %settings.server.addr,
        workers,
        "Listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    close_cluster(
        &cluster,
        close_deadline(
            settings.server.graceful_shutdown,
            settings.cluster.shutdown_grace,
        ),
    )
    .await;
    drop(cluster);
    stop_event_logger(event_logger).await;

    served
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let html = tokio::fs::read_to_string(&args.input)
        .await
        .map_err(InfraError::from)?;

    let options = ClusterOptions {
        max_workers: 1,
        max_concurrent_jobs: 1,
        ..cluster_options(&settings.cluster)
    };
    let cluster = build_cluster(&settings, options)?;
    let event_logger = telemetry::spawn_event_logger(cluster.subscribe());
    cluster
        .init()
        .await
        .map_err(|err| InfraError::browser(format!("render cluster failed to start: {err}")))?;

    let generation = GenerationOptions {
        timeout: args.timeout_ms,
        format: args.format,
        orientation: args.landscape.then_some(Orientation::Landscape),
        ..GenerationOptions::default()
    };
    let result = PdfGenerator::new(cluster.clone())
        .generate_from_template(html, generation)
        .await;

    close_cluster(
        &cluster,
        close_deadline(
            settings.server.graceful_shutdown,
            settings.cluster.shutdown_grace,
        ),
    )
    .await;
    drop(cluster);
    stop_event_logger(event_logger).await;

    let pdf = result?;
    tokio::fs::write(&args.output, &pdf)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "pressroom::render",
        input = %args.input.display(),
        output = %args.output.display(),
        pdf_bytes = pdf.len(),
        "PDF written"
    );
    Ok(())
}

/// `Cluster::close` waits up to `shutdown_grace` for running jobs before it
/// closes the workers, so the outer bound has to outlast that wait.
fn close_deadline(server_grace: Duration, shutdown_grace: Duration) -> Duration {
    server_grace.max(shutdown_grace.saturating_add(WORKER_CLOSE_WINDOW))
}

async fn close_cluster(cluster: &Cluster, deadline: Duration) {
    match tokio::time::timeout(deadline, cluster.close()).await {
        Ok(Ok(report)) => info!(
            target = "pressroom::shutdown",
            workers = report.workers,
            pending_jobs = report.pending_jobs,
            "Render cluster closed"
        ),
        Ok(Err(err)) => warn!(
            target = "pressroom::shutdown",
            error = %err,
            "Render cluster closed with errors"
        ),
        Err(_) => warn!(
            target = "pressroom::shutdown",
            timeout_secs = deadline.as_secs(),
            "Render cluster did not close in time"
        ),
    }
}

/// Gives the logger a moment to record the final `close` event.
async fn stop_event_logger(mut handle: JoinHandle<()>) {
    if tokio::time::timeout(EVENT_FLUSH_WINDOW, &mut handle)
        .await
        .is_err()
    {
        handle.abort();
        let _ = handle.await;
    }
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(
            target = "pressroom::shutdown",
            error = %err,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "pressroom::shutdown", "Shutdown signal received");
}
