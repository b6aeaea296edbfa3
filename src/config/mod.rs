//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{BrowserOverrides, CliArgs, Command, RenderArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_WORKERS: u32 = 2;
const DEFAULT_MAX_CONCURRENT_JOBS: u32 = 4;
const DEFAULT_WORKER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
const DEFAULT_EVENT_CAPACITY: u32 = 256;
const DEFAULT_BROWSER_IDLE_TIMEOUT_SECS: u64 = 86_400;
const DEFAULT_FONT_DOWNLOAD_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cluster: ClusterSettings,
    pub browser: BrowserSettings,
    pub fonts: FontSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub max_workers: NonZeroU32,
    pub max_concurrent_jobs: NonZeroU32,
    pub worker_timeout: Duration,
    /// Falls back to `worker_timeout` when not configured.
    pub navigation_timeout: Duration,
    pub shutdown_grace: Duration,
    pub event_capacity: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub idle_timeout: Duration,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FontSettings {
    pub download_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("PRESSROOM")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("browser.extra_args")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_browser_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cluster: RawClusterSettings,
    browser: RawBrowserSettings,
    fonts: RawFontSettings,
    http: RawHttpSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(count) = overrides.cluster_max_workers {
            self.cluster.max_workers = Some(count.into());
        }
        if let Some(count) = overrides.cluster_max_concurrent_jobs {
            self.cluster.max_concurrent_jobs = Some(count.into());
        }
        if let Some(millis) = overrides.cluster_worker_timeout_ms {
            self.cluster.worker_timeout_ms = Some(millis);
        }
        if let Some(limit) = overrides.http_max_request_bytes {
            self.http.max_request_bytes = Some(limit);
        }

        self.apply_browser_overrides(&overrides.browser);
    }

    fn apply_browser_overrides(&mut self, overrides: &BrowserOverrides) {
        if let Some(path) = overrides.browser_executable.as_ref() {
            self.browser.executable = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cluster,
            browser,
            fonts,
            http,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cluster: build_cluster_settings(cluster)?,
            browser: build_browser_settings(browser)?,
            fonts: build_font_settings(fonts)?,
            http: build_http_settings(http)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cluster_settings(cluster: RawClusterSettings) -> Result<ClusterSettings, LoadError> {
    let max_workers = non_zero_u32(
        cluster.max_workers.unwrap_or(DEFAULT_MAX_WORKERS.into()),
        "cluster.max_workers",
    )?;
    let max_concurrent_jobs = non_zero_u32(
        cluster
            .max_concurrent_jobs
            .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS.into()),
        "cluster.max_concurrent_jobs",
    )?;
    let event_capacity = non_zero_u32(
        cluster
            .event_capacity
            .unwrap_or(DEFAULT_EVENT_CAPACITY.into()),
        "cluster.event_capacity",
    )?;

    let worker_timeout = positive_millis(
        cluster
            .worker_timeout_ms
            .unwrap_or(DEFAULT_WORKER_TIMEOUT_MS),
        "cluster.worker_timeout_ms",
    )?;
    let navigation_timeout = match cluster.navigation_timeout_ms {
        Some(millis) => positive_millis(millis, "cluster.navigation_timeout_ms")?,
        None => worker_timeout,
    };

    let grace_secs = cluster
        .shutdown_grace_seconds
        .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS);
    if grace_secs == 0 {
        return Err(LoadError::invalid(
            "cluster.shutdown_grace_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ClusterSettings {
        max_workers,
        max_concurrent_jobs,
        worker_timeout,
        navigation_timeout,
        shutdown_grace: Duration::from_secs(grace_secs),
        event_capacity,
    })
}

fn build_browser_settings(browser: RawBrowserSettings) -> Result<BrowserSettings, LoadError> {
    let executable = browser
        .executable
        .filter(|path| !path.as_os_str().is_empty());

    let idle_secs = browser
        .idle_timeout_seconds
        .unwrap_or(DEFAULT_BROWSER_IDLE_TIMEOUT_SECS);
    if idle_secs == 0 {
        return Err(LoadError::invalid(
            "browser.idle_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let extra_args = browser
        .extra_args
        .into_iter()
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect::<Vec<_>>();
    if let Some(arg) = extra_args.iter().find(|arg| !arg.starts_with("--")) {
        return Err(LoadError::invalid(
            "browser.extra_args",
            format!("`{arg}` is not a `--flag`"),
        ));
    }

    Ok(BrowserSettings {
        executable,
        idle_timeout: Duration::from_secs(idle_secs),
        extra_args,
    })
}

fn build_font_settings(fonts: RawFontSettings) -> Result<FontSettings, LoadError> {
    let download_timeout = positive_millis(
        fonts
            .download_timeout_ms
            .unwrap_or(DEFAULT_FONT_DOWNLOAD_TIMEOUT_MS),
        "fonts.download_timeout_ms",
    )?;
    Ok(FontSettings { download_timeout })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let value = http.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(value)
        .ok_or_else(|| LoadError::invalid("http.max_request_bytes", "must be greater than zero"))?;
    usize::try_from(value).map_err(|_| {
        LoadError::invalid(
            "http.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(HttpSettings { max_request_bytes })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClusterSettings {
    max_workers: Option<u64>,
    max_concurrent_jobs: Option<u64>,
    worker_timeout_ms: Option<u64>,
    navigation_timeout_ms: Option<u64>,
    shutdown_grace_seconds: Option<u64>,
    event_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    executable: Option<PathBuf>,
    idle_timeout_seconds: Option<u64>,
    extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFontSettings {
    download_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    max_request_bytes: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}
