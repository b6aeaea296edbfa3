//! Seam between the worker pool and the rendering engine.
//!
//! A [`BrowserLauncher`] starts long-lived [`BrowserSession`]s; each session
//! hands out isolated [`RenderPage`]s that live for exactly one job. The
//! production implementation drives Chromium (see `infra::chrome`); tests use
//! an in-memory engine.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::options::PdfOptions;

/// Console output produced by a page while it renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
}

pub type ConsoleListener = Arc<dyn Fn(ConsoleMessage) + Send + Sync>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("page operation failed: {0}")]
    Page(String),
    #[error("content load failed: {0}")]
    Navigation(String),
    #[error("pdf generation failed: {0}")]
    Pdf(String),
    #[error("browser shutdown failed: {0}")]
    Close(String),
    #[error("browser session disconnected")]
    Disconnected,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, EngineError>;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Opens a page in a fresh, isolated browsing context.
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError>;

    /// Whether the underlying browser process is still reachable.
    async fn is_connected(&self) -> bool;

    async fn close(&mut self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait RenderPage: Send {
    /// Forwards console output to `listener` until the page is closed.
    async fn on_console(&mut self, listener: ConsoleListener) -> Result<(), EngineError>;

    /// Loads `html` into the page and waits until the document is ready.
    async fn set_content(&mut self, html: &str) -> Result<(), EngineError>;

    async fn pdf(&mut self, options: &PdfOptions) -> Result<Bytes, EngineError>;

    /// Releases the page and its browsing context.
    async fn close(&mut self) -> Result<(), EngineError>;
}
