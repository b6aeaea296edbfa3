//! In-memory rendering engine used by the render tests.
//!
//! Document markers steer the fake: `FAIL` makes the pdf call fail, `SLOW`
//! makes it hang for an hour (so only a timeout ends it) and `PANIC` panics
//! inside the render. `STALL` hangs while the content loads.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{self, Instant};

use super::{
    engine::{
        BrowserLauncher, BrowserSession, ConsoleListener, ConsoleMessage, EngineError, RenderPage,
    },
    fonts::FontInliner,
    worker::WorkerContext,
};
use crate::domain::options::PdfOptions;

pub(crate) fn worker_context() -> WorkerContext {
    WorkerContext {
        fonts: FontInliner::new(Duration::from_secs(5)).expect("font client"),
        navigation_timeout: Duration::from_secs(5),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RenderCall {
    pub content: String,
    pub options: PdfOptions,
    pub started_at: Instant,
}

#[derive(Default)]
struct FakeState {
    launches: AtomicUsize,
    failing_launches: AtomicUsize,
    generation: AtomicUsize,
    sessions_closed: AtomicUsize,
    fail_session_close: AtomicBool,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    render_delay_ms: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    renders: Mutex<Vec<RenderCall>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    state: Arc<FakeState>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_render_delay(self, delay: Duration) -> Self {
        self.state
            .render_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// The next `count` launches fail.
    pub(crate) fn with_failing_launches(self, count: usize) -> Self {
        self.state.failing_launches.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_failing_session_close(self) -> Self {
        self.state.fail_session_close.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        Arc::new(FakeLauncher {
            state: Arc::clone(&self.state),
        })
    }

    /// Every session launched so far reports itself disconnected.
    pub(crate) fn disconnect_all(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn pages_opened(&self) -> usize {
        self.state.pages_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn pages_closed(&self) -> usize {
        self.state.pages_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent_renders(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn renders(&self) -> Vec<RenderCall> {
        self.state.renders.lock().expect("renders lock").clone()
    }

    pub(crate) fn last_render(&self) -> Option<RenderCall> {
        self.renders().pop()
    }
}

struct FakeLauncher {
    state: Arc<FakeState>,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, EngineError> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .state
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(EngineError::Launch("fake launch failure".into()));
        }
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
            closed: false,
        }))
    }
}

struct FakeSession {
    state: Arc<FakeState>,
    generation: usize,
    closed: bool,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError> {
        if !self.is_connected().await {
            return Err(EngineError::Disconnected);
        }
        self.state.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            state: Arc::clone(&self.state),
            content: String::new(),
            listener: None,
        }))
    }

    async fn is_connected(&self) -> bool {
        !self.closed && self.state.generation.load(Ordering::SeqCst) == self.generation
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.closed = true;
        if self.state.fail_session_close.load(Ordering::SeqCst) {
            return Err(EngineError::Close("fake close failure".into()));
        }
        self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePage {
    state: Arc<FakeState>,
    content: String,
    listener: Option<ConsoleListener>,
}

struct ActiveGuard<'a>(&'a FakeState);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderPage for FakePage {
    async fn on_console(&mut self, listener: ConsoleListener) -> Result<(), EngineError> {
        self.listener = Some(listener);
        Ok(())
    }

    async fn set_content(&mut self, html: &str) -> Result<(), EngineError> {
        if html.contains("STALL") {
            time::sleep(Duration::from_secs(3600)).await;
        }
        self.content = html.to_string();
        if let Some(listener) = &self.listener {
            listener(ConsoleMessage {
                level: "log".into(),
                text: "content loaded".into(),
            });
        }
        Ok(())
    }

    async fn pdf(&mut self, options: &PdfOptions) -> Result<Bytes, EngineError> {
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.state);
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        self.state
            .renders
            .lock()
            .expect("renders lock")
            .push(RenderCall {
                content: self.content.clone(),
                options: options.clone(),
                started_at: Instant::now(),
            });

        if self.content.contains("PANIC") {
            panic!("fake engine panic");
        }

        let delay = if self.content.contains("SLOW") {
            Duration::from_secs(3600)
        } else {
            Duration::from_millis(self.state.render_delay_ms.load(Ordering::SeqCst))
        };
        if !delay.is_zero() {
            time::sleep(delay).await;
        }

        if self.content.contains("FAIL") {
            return Err(EngineError::Pdf("fake render failure".into()));
        }
        Ok(Bytes::from(format!("%PDF-1.7 {}", self.content)))
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.listener = None;
        self.state.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
