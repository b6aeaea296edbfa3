use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::domain::options::PdfOptions;

use super::cluster::ClusterError;

type Reply = Result<Bytes, ClusterError>;

/// What a caller asks the cluster to render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub html: String,
    pub options: PdfOptions,
    /// Overrides the cluster's default worker timeout for this job.
    pub timeout: Option<Duration>,
}

impl RenderRequest {
    pub fn new(html: impl Into<String>, options: PdfOptions) -> Self {
        Self {
            html: html.into(),
            options,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A queued render. Consumed by exactly one of [`Job::resolve`] or [`Job::reject`].
#[derive(Debug)]
pub(crate) struct Job {
    id: Uuid,
    request: RenderRequest,
    enqueued_at: Instant,
    reply: oneshot::Sender<Reply>,
}

impl Job {
    pub(crate) fn new(request: RenderRequest) -> (Self, PendingRender) {
        let id = Uuid::new_v4();
        let (reply, receiver) = oneshot::channel();
        let job = Self {
            id,
            request,
            enqueued_at: Instant::now(),
            reply,
        };
        (job, PendingRender { id, receiver })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn request(&self) -> &RenderRequest {
        &self.request
    }

    pub(crate) fn queued_for(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    pub(crate) fn resolve(self, pdf: Bytes) {
        // The caller may have dropped its future; nothing left to notify.
        let _ = self.reply.send(Ok(pdf));
    }

    pub(crate) fn reject(self, error: ClusterError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Caller side of a job. Resolves once the job has been rendered or rejected.
#[derive(Debug)]
pub struct PendingRender {
    id: Uuid,
    receiver: oneshot::Receiver<Reply>,
}

impl PendingRender {
    /// A future that is already settled with `error`.
    pub(crate) fn rejected(error: ClusterError) -> Self {
        let (job, pending) = Job::new(RenderRequest::new(String::new(), PdfOptions::default()));
        job.reject(error);
        pending
    }

    pub fn job_id(&self) -> Uuid {
        self.id
    }
}

impl Future for PendingRender {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ClusterError::Abandoned)))
    }
}
