//! Bounded browser pool that turns HTML documents into PDF bytes.
//!
//! A [`Cluster`] owns a fixed set of [`Worker`]s, each wrapping one long-lived
//! browser session, and feeds them jobs from a FIFO queue. The engine itself
//! sits behind the traits in [`engine`].

mod cluster;
pub mod engine;
mod events;
mod fonts;
mod job;
mod pool;
mod template;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

pub use cluster::{
    CloseReport, Cluster, ClusterError, ClusterOptions, ClusterPhase, ClusterStats,
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_MAX_WORKERS,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_WORKER_TIMEOUT,
};
pub use events::ClusterEvent;
pub use fonts::{FontError, FontInliner};
pub use job::{PendingRender, RenderRequest};
pub use template::{TemplateError, TemplateParts, extract_templates};
pub use worker::{Worker, WorkerContext, WorkerError};
