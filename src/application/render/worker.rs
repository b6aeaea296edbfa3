use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::FutureExt;
use thiserror::Error;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    engine::{
        BrowserLauncher, BrowserSession, ConsoleListener, ConsoleMessage, EngineError, RenderPage,
    },
    fonts::{FontError, FontInliner},
    job::RenderRequest,
    template::{TemplateError, extract_templates},
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to launch browser")]
    Launch(#[source] EngineError),
    #[error("failed to load document content")]
    Navigation(#[source] EngineError),
    #[error("failed to render document")]
    Render(#[source] EngineError),
    #[error("{stage} did not finish within {after:?}")]
    Timeout { stage: &'static str, after: Duration },
    #[error("failed to prepare header/footer templates")]
    Template(#[from] TemplateError),
    #[error("failed to inline template font")]
    Font(#[from] FontError),
    #[error("render panicked: {0}")]
    Panicked(String),
    #[error("failed to close browser")]
    Shutdown(#[source] EngineError),
    #[error("worker is closing")]
    Closing,
}

impl WorkerError {
    /// Coarse fault category used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Launch(_) => "launch",
            WorkerError::Navigation(_)
            | WorkerError::Render(_)
            | WorkerError::Timeout { .. }
            | WorkerError::Template(_)
            | WorkerError::Panicked(_) => "render",
            WorkerError::Font(_) => "font",
            WorkerError::Shutdown(_) => "shutdown",
            WorkerError::Closing => "closing",
        }
    }
}

/// Collaborators every worker shares.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub fonts: FontInliner,
    /// Bound on loading content into a page.
    pub navigation_timeout: Duration,
}

/// One browser process executing at most one job at a time.
pub struct Worker {
    id: usize,
    launcher: Arc<dyn BrowserLauncher>,
    session: Option<Box<dyn BrowserSession>>,
    closing: bool,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("has_session", &self.session.is_some())
            .field("closing", &self.closing)
            .finish()
    }
}

impl Worker {
    pub async fn launch(id: usize, launcher: Arc<dyn BrowserLauncher>) -> Result<Self, WorkerError> {
        let session = launcher.launch().await.map_err(WorkerError::Launch)?;
        info!(
            target = "pressroom::render::worker",
            op = "worker::launch",
            result = "ok",
            worker_id = id,
            "Browser worker launched"
        );
        Ok(Self {
            id,
            launcher,
            session: Some(session),
            closing: false,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    async fn ensure_session(&mut self) -> Result<&dyn BrowserSession, WorkerError> {
        let connected = match &self.session {
            Some(session) => session.is_connected().await,
            None => false,
        };

        if !connected {
            warn!(
                target = "pressroom::render::worker",
                op = "worker::ensure_session",
                result = "relaunch",
                worker_id = self.id,
                had_session = self.session.is_some(),
                "Browser session missing or disconnected; relaunching"
            );
            if let Some(mut stale) = self.session.take() {
                let _ = stale.close().await;
            }
            let session = self.launcher.launch().await.map_err(WorkerError::Launch)?;
            self.session = Some(session);
        }

        self.session
            .as_deref()
            .ok_or(WorkerError::Launch(EngineError::Disconnected))
    }

    /// Renders one job on a fresh page. The page is closed in every outcome.
    pub async fn handle(
        &mut self,
        job_id: Uuid,
        request: &RenderRequest,
        timeout: Duration,
        ctx: &WorkerContext,
    ) -> Result<Bytes, WorkerError> {
        if self.closing {
            return Err(WorkerError::Closing);
        }

        let worker_id = self.id;
        let session = self.ensure_session().await?;
        let mut page = session.new_page().await.map_err(WorkerError::Render)?;

        let outcome = AssertUnwindSafe(render_on(
            page.as_mut(),
            worker_id,
            job_id,
            request,
            timeout,
            ctx,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(panic.as_ref()))));

        if let Err(err) = page.close().await {
            warn!(
                target = "pressroom::render::worker",
                op = "worker::handle",
                result = "page_close_failed",
                worker_id,
                job_id = %job_id,
                error = %err,
                "Failed to close page after render"
            );
        }

        outcome
    }

    pub async fn close(&mut self) -> Result<(), WorkerError> {
        self.closing = true;
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.close().await.map_err(WorkerError::Shutdown)?;
        debug!(
            target = "pressroom::render::worker",
            op = "worker::close",
            result = "ok",
            worker_id = self.id,
            "Browser worker closed"
        );
        Ok(())
    }
}

async fn render_on(
    page: &mut dyn RenderPage,
    worker_id: usize,
    job_id: Uuid,
    request: &RenderRequest,
    timeout: Duration,
    ctx: &WorkerContext,
) -> Result<Bytes, WorkerError> {
    page.on_console(console_listener(worker_id, job_id))
        .await
        .map_err(WorkerError::Render)?;

    let parts = extract_templates(&request.html)?;
    let mut options = request.options.clone();
    let content = if parts.has_templates() {
        let styles = ctx.fonts.inline_first_face(&parts.styles).await?;
        options.display_header_footer = true;
        options.header_template = Some(parts.header_template(&styles));
        options.footer_template = Some(parts.footer_template(&styles));
        debug!(
            target = "pressroom::render::worker",
            op = "worker::handle",
            path = "template",
            worker_id,
            job_id = %job_id,
            has_header = parts.header.is_some(),
            has_footer = parts.footer.is_some(),
            "Rendering with extracted header/footer templates"
        );
        parts.body
    } else {
        request.html.clone()
    };

    time::timeout(ctx.navigation_timeout, page.set_content(&content))
        .await
        .map_err(|_| WorkerError::Timeout {
            stage: "content load",
            after: ctx.navigation_timeout,
        })?
        .map_err(WorkerError::Navigation)?;

    time::timeout(timeout, page.pdf(&options))
        .await
        .map_err(|_| WorkerError::Timeout {
            stage: "render",
            after: timeout,
        })?
        .map_err(WorkerError::Render)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn console_listener(worker_id: usize, job_id: Uuid) -> ConsoleListener {
    Arc::new(move |message: ConsoleMessage| {
        debug!(
            target = "pressroom::console",
            worker_id,
            job_id = %job_id,
            level = %message.level,
            text = %message.text,
            "page console"
        );
    })
}
