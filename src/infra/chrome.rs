//! Chromium engine driven through `headless_chrome`.
//!
//! `headless_chrome` is a blocking client, so every call into it runs on the
//! blocking thread pool.

use std::{
    ffi::OsStr,
    io::Write,
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use headless_chrome::{
    Browser, LaunchOptions, Tab,
    protocol::cdp::{Page, Target, types::Event},
    types::PrintToPdfOptions,
};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::task;
use tracing::{info, warn};
use url::Url;

use crate::{
    application::render::engine::{
        BrowserLauncher, BrowserSession, ConsoleListener, ConsoleMessage, EngineError, RenderPage,
    },
    domain::options::{CssLength, PdfOptions},
};

/// Flags every browser is started with. Tuned for containers, where
/// `/dev/shm` is small and there is no GPU or user namespace for the sandbox.
pub const HARDENED_ARGS: &[&str] = &[
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--export-tagged-pdf",
    "--font-render-hinting=none",
];

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// Browser binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    /// Browser exits after this long without CDP traffic.
    pub idle_timeout: Duration,
    pub extra_args: Vec<String>,
    /// Upper bound for a single blocking CDP call.
    pub page_timeout: Duration,
    /// How long a loaded document may take to reach network idle.
    pub navigation_timeout: Duration,
}

pub struct ChromeLauncher {
    options: ChromeOptions,
}

impl ChromeLauncher {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

pub(crate) fn launch_args(extra: &[String]) -> Vec<String> {
    HARDENED_ARGS
        .iter()
        .map(|arg| (*arg).to_string())
        .chain(extra.iter().cloned())
        .collect()
}

fn describe(err: impl std::fmt::Display) -> String {
    format!("{err:#}")
}

async fn blocking<T, F>(call: F, to_error: fn(String) -> EngineError) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(call)
        .await
        .map_err(|err| to_error(describe(err)))?
        .map_err(to_error)
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, EngineError> {
        let options = self.options.clone();
        let started_at = Instant::now();
        let browser = blocking(
            move || {
                let args = launch_args(&options.extra_args);
                let launch = LaunchOptions::default_builder()
                    .headless(true)
                    .sandbox(false)
                    .path(options.executable.clone())
                    .idle_browser_timeout(options.idle_timeout)
                    .args(args.iter().map(OsStr::new).collect())
                    .build()
                    .map_err(describe)?;
                Browser::new(launch).map_err(describe)
            },
            EngineError::Launch,
        )
        .await?;

        info!(
            target = "pressroom::infra::chrome",
            op = "chrome::launch",
            result = "ok",
            pid = browser.get_process_id().unwrap_or_default(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Chromium started"
        );

        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            page_timeout: self.options.page_timeout,
            navigation_timeout: self.options.navigation_timeout,
        }))
    }
}

struct ChromeSession {
    browser: Option<Browser>,
    page_timeout: Duration,
    navigation_timeout: Duration,
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError> {
        let browser = self.browser.clone().ok_or(EngineError::Disconnected)?;
        let page_timeout = self.page_timeout;
        let (tab, context_id) = blocking(
            move || {
                let context = browser.new_context().map_err(describe)?;
                let context_id = context.get_id().to_string();
                let tab = context.new_tab().map_err(describe)?;
                tab.set_default_timeout(page_timeout);
                Ok((tab, context_id))
            },
            EngineError::Page,
        )
        .await?;

        Ok(Box::new(ChromePage {
            tab,
            context_id,
            navigation_timeout: self.navigation_timeout,
            detach_console: None,
            document: None,
        }))
    }

    async fn is_connected(&self) -> bool {
        let Some(browser) = self.browser.clone() else {
            return false;
        };
        blocking(
            move || browser.get_version().map(|_| ()).map_err(describe),
            EngineError::Page,
        )
        .await
        .is_ok()
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        let Some(browser) = self.browser.take() else {
            return Ok(());
        };
        // Dropping the last handle terminates the browser process.
        blocking(
            move || {
                drop(browser);
                Ok(())
            },
            EngineError::Close,
        )
        .await
    }
}

type DetachConsole = Box<dyn FnOnce(&Tab) + Send>;

struct ChromePage {
    tab: Arc<Tab>,
    /// Browser context owning the tab; disposed with the page.
    context_id: String,
    navigation_timeout: Duration,
    detach_console: Option<DetachConsole>,
    /// Backing file of the loaded document; removed when the page closes.
    document: Option<NamedTempFile>,
}

#[async_trait]
impl RenderPage for ChromePage {
    async fn on_console(&mut self, listener: ConsoleListener) -> Result<(), EngineError> {
        let tab = Arc::clone(&self.tab);
        let detach = blocking(
            move || {
                tab.enable_runtime().map_err(describe)?;
                let registered = tab
                    .add_event_listener(Arc::new(move |event: &Event| {
                        if let Event::RuntimeConsoleAPICalled(called) = event
                            && let Ok(params) = serde_json::to_value(&called.params)
                        {
                            listener(console_message(&params));
                        }
                    }))
                    .map_err(describe)?;
                let detach: DetachConsole = Box::new(move |tab: &Tab| {
                    let _ = tab.remove_event_listener(&registered);
                });
                Ok(detach)
            },
            EngineError::Page,
        )
        .await?;
        self.detach_console = Some(detach);
        Ok(())
    }

    async fn set_content(&mut self, html: &str) -> Result<(), EngineError> {
        let tab = Arc::clone(&self.tab);
        let html = html.to_string();
        let wait = self.navigation_timeout;
        let document = blocking(
            move || {
                let mut file = tempfile::Builder::new()
                    .prefix("pressroom-")
                    .suffix(".html")
                    .tempfile()
                    .map_err(describe)?;
                file.write_all(html.as_bytes()).map_err(describe)?;
                file.flush().map_err(describe)?;

                let url = Url::from_file_path(file.path())
                    .map_err(|_| format!("invalid document path {}", file.path().display()))?;
                load_until_network_idle(&tab, url.as_str(), wait)?;
                Ok(file)
            },
            EngineError::Navigation,
        )
        .await?;
        self.document = Some(document);
        Ok(())
    }

    async fn pdf(&mut self, options: &PdfOptions) -> Result<Bytes, EngineError> {
        let tab = Arc::clone(&self.tab);
        let print = print_options(options);
        let pdf = blocking(
            move || tab.print_to_pdf(Some(print)).map_err(describe),
            EngineError::Pdf,
        )
        .await?;
        Ok(Bytes::from(pdf))
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        let tab = Arc::clone(&self.tab);
        let context_id = self.context_id.clone();
        let detach = self.detach_console.take();
        let document = self.document.take();

        blocking(
            move || {
                if let Some(detach) = detach {
                    detach(&tab);
                }
                let released = release_page(tab.as_ref(), &context_id);
                if let Some(document) = document
                    && let Err(err) = document.close()
                {
                    warn!(
                        target = "pressroom::infra::chrome",
                        op = "chrome::close_page",
                        result = "document_cleanup_failed",
                        error = %err,
                        "Failed to remove rendered document file"
                    );
                }
                released
            },
            EngineError::Page,
        )
        .await
    }
}

const NETWORK_IDLE: &str = "networkIdle";

/// Navigates to `url` and blocks until Chromium reports network idle for
/// that navigation.
fn load_until_network_idle(tab: &Tab, url: &str, wait: Duration) -> Result<(), String> {
    let (idle_tx, idle_rx) = mpsc::channel();
    let registered = tab
        .add_event_listener(Arc::new(move |event: &Event| {
            if let Event::PageLifecycleEvent(lifecycle) = event
                && lifecycle.params.name == NETWORK_IDLE
            {
                let _ = idle_tx.send(lifecycle.params.loader_id.clone());
            }
        }))
        .map_err(describe)?;

    let outcome = navigate_and_wait(tab, url, &idle_rx, wait);
    let _ = tab.remove_event_listener(&registered);
    outcome
}

fn navigate_and_wait(
    tab: &Tab,
    url: &str,
    idle: &mpsc::Receiver<String>,
    wait: Duration,
) -> Result<(), String> {
    tab.call_method(Page::SetLifecycleEventsEnabled { enabled: true })
        .map_err(describe)?;
    let navigated = tab
        .call_method(Page::Navigate {
            url: url.to_string(),
            referrer: None,
            transition_Type: None,
            frame_id: None,
            referrer_policy: None,
        })
        .map_err(describe)?;
    if let Some(error) = navigated.error_text {
        return Err(format!("navigation to {url} failed: {error}"));
    }

    match navigated.loader_id {
        Some(loader_id) => wait_for_network_idle(idle, &loader_id, wait),
        // Same-document navigation: nothing new to fetch.
        None => tab.wait_until_navigated().map(|_| ()).map_err(describe),
    }
}

/// Waits for the `networkIdle` lifecycle event of `loader_id`. Events from
/// earlier documents in the same tab are skipped.
pub(crate) fn wait_for_network_idle(
    idle: &mpsc::Receiver<String>,
    loader_id: &str,
    wait: Duration,
) -> Result<(), String> {
    let deadline = Instant::now() + wait;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match idle.recv_timeout(left) {
            Ok(idle_loader) if idle_loader == loader_id => return Ok(()),
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => {
                return Err(format!("network did not go idle within {wait:?}"));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err("lifecycle event stream ended before network idle".to_string());
            }
        }
    }
}

/// Teardown steps of a rendered page.
pub(crate) trait PageTarget {
    /// Disposes the page's browser context, which also closes its tabs.
    fn dispose_context(&self, context_id: &str) -> Result<(), String>;

    fn close_tab(&self) -> Result<(), String>;
}

impl PageTarget for Tab {
    fn dispose_context(&self, context_id: &str) -> Result<(), String> {
        self.call_method(Target::DisposeBrowserContext {
            browser_context_id: context_id.to_string(),
        })
        .map(|_| ())
        .map_err(describe)
    }

    fn close_tab(&self) -> Result<(), String> {
        self.close(false).map(|_| ()).map_err(describe)
    }
}

/// Disposes the job's browser context. When that fails the tab is still
/// closed, and the leftover context is reported as an error.
pub(crate) fn release_page(target: &impl PageTarget, context_id: &str) -> Result<(), String> {
    let Err(dispose) = target.dispose_context(context_id) else {
        return Ok(());
    };
    target
        .close_tab()
        .map_err(|close| format!("{dispose}; closing the tab failed too: {close}"))?;
    Err(format!("browser context {context_id} was not disposed: {dispose}"))
}

fn inches(length: Option<CssLength>) -> f64 {
    length.map(CssLength::to_inches).unwrap_or(0.0)
}

/// Maps render options onto the CDP print parameters (all sizes in inches).
pub(crate) fn print_options(options: &PdfOptions) -> PrintToPdfOptions {
    let (paper_width, paper_height) = options.paper_size_in();
    PrintToPdfOptions {
        landscape: Some(options.landscape),
        display_header_footer: Some(options.display_header_footer),
        print_background: Some(options.print_background),
        paper_width: Some(paper_width),
        paper_height: Some(paper_height),
        margin_top: Some(inches(options.margin.top)),
        margin_right: Some(inches(options.margin.right)),
        margin_bottom: Some(inches(options.margin.bottom)),
        margin_left: Some(inches(options.margin.left)),
        header_template: options.header_template.clone(),
        footer_template: options.footer_template.clone(),
        ..PrintToPdfOptions::default()
    }
}

/// Builds a console message from serialized `Runtime.consoleAPICalled` params.
pub(crate) fn console_message(params: &Value) -> ConsoleMessage {
    let level = params
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("log")
        .to_string();
    let text = params
        .get("args")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .filter_map(|arg| match arg.get("value") {
                    Some(Value::String(text)) => Some(text.clone()),
                    Some(Value::Null) | None => arg
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    Some(other) => Some(other.to_string()),
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    ConsoleMessage { level, text }
}
