use std::sync::Once;

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, histogram};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::render::ClusterEvent,
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

const EVENT_TARGET: &str = "pressroom::render::events";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_jobs_completed_total",
            Unit::Count,
            "Total number of render jobs that produced a PDF."
        );
        describe_counter!(
            "pressroom_jobs_failed_total",
            Unit::Count,
            "Total number of render jobs that failed, labelled by error kind."
        );
        describe_histogram!(
            "pressroom_render_ms",
            Unit::Milliseconds,
            "Time a worker spent on a single render job."
        );
        describe_gauge!(
            "pressroom_queue_depth",
            Unit::Count,
            "Jobs waiting for a free worker."
        );
        describe_counter!(
            "pressroom_worker_launch_failures_total",
            Unit::Count,
            "Total number of browser launches that failed during init."
        );
    });
}

/// Forward cluster events into the log and the metrics recorder until the
/// cluster drops its sender.
pub fn spawn_event_logger(mut events: broadcast::Receiver<ClusterEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => record_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target = EVENT_TARGET,
                        skipped, "event logger fell behind; events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn record_event(event: &ClusterEvent) {
    let name = event.name();
    match event {
        ClusterEvent::Initialized { workers } => {
            info!(target = EVENT_TARGET, event = name, workers, "cluster ready");
        }
        ClusterEvent::WorkerCreated { worker_id } => {
            debug!(target = EVENT_TARGET, event = name, worker_id, "worker launched");
        }
        ClusterEvent::WorkerError { worker_id, error } => {
            counter!("pressroom_worker_launch_failures_total").increment(1);
            warn!(
                target = EVENT_TARGET,
                event = name,
                worker_id,
                error = %error,
                "worker failed to launch"
            );
        }
        ClusterEvent::Execute { job_id, queued } => {
            debug!(
                target = EVENT_TARGET,
                event = name,
                job_id = %job_id,
                queued,
                "job queued"
            );
        }
        ClusterEvent::Completed {
            job_id,
            worker_id,
            elapsed,
            bytes,
        } => {
            counter!("pressroom_jobs_completed_total").increment(1);
            histogram!("pressroom_render_ms").record(elapsed.as_secs_f64() * 1000.0);
            info!(
                target = EVENT_TARGET,
                event = name,
                job_id = %job_id,
                worker_id,
                elapsed_ms = elapsed.as_millis() as u64,
                bytes,
                "job completed"
            );
        }
        ClusterEvent::Error {
            job_id,
            worker_id,
            kind,
            error,
        } => {
            if job_id.is_some() {
                counter!("pressroom_jobs_failed_total", "kind" => *kind).increment(1);
            }
            warn!(
                target = EVENT_TARGET,
                event = name,
                job_id = ?job_id,
                worker_id,
                error_kind = *kind,
                error = %error,
                "cluster error"
            );
        }
        ClusterEvent::Idle => {
            debug!(target = EVENT_TARGET, event = name, "queue drained");
        }
        ClusterEvent::Close {
            workers,
            pending_jobs,
        } => {
            info!(
                target = EVENT_TARGET,
                event = name,
                workers,
                pending_jobs,
                "cluster closed"
            );
        }
    }
}
