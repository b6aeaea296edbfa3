use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::options::PaperFormat;

/// Command-line arguments for the Pressroom binary.
#[derive(Debug, Parser)]
#[command(
    name = "pressroom",
    version,
    about = "HTML to PDF rendering on a pool of headless browsers"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the PDF HTTP service.
    Serve(Box<ServeArgs>),
    /// Convert a single HTML file and exit.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: BrowserOverrides,

    /// HTML document to convert.
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Where to write the PDF.
    #[arg(value_name = "OUTPUT", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Paper format (A3, A4, A5, Legal, Letter, Tabloid).
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<PaperFormat>,

    /// Print in landscape orientation.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub landscape: bool,

    /// Render timeout for this document.
    #[arg(long = "timeout-ms", value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BrowserOverrides {
    /// Override the browser executable.
    #[arg(long = "browser-executable", value_name = "PATH")]
    pub browser_executable: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub browser: BrowserOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the number of browser workers.
    #[arg(long = "cluster-max-workers", value_name = "COUNT")]
    pub cluster_max_workers: Option<u32>,

    /// Override the in-flight job ceiling.
    #[arg(long = "cluster-max-concurrent-jobs", value_name = "COUNT")]
    pub cluster_max_concurrent_jobs: Option<u32>,

    /// Override the default render timeout.
    #[arg(long = "cluster-worker-timeout-ms", value_name = "MILLIS")]
    pub cluster_worker_timeout_ms: Option<u64>,

    /// Override the maximum request size in bytes.
    #[arg(long = "http-max-request-bytes", value_name = "BYTES")]
    pub http_max_request_bytes: Option<u64>,
}
