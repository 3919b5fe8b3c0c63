use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the courier binary.
#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "Request orchestration service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "COURIER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the health endpoint and the orchestration layer.
    Serve(Box<ServeArgs>),
    /// Resolve and validate configuration, then print it.
    #[command(name = "check-config")]
    CheckConfig,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the analysis service endpoint.
    #[arg(long = "analysis-url", value_name = "URL")]
    pub analysis_url: Option<String>,

    /// Override the spreadsheet service base URL.
    #[arg(long = "sheets-url", value_name = "URL")]
    pub sheets_url: Option<String>,

    /// Override the analysis queue concurrency.
    #[arg(long = "analysis-concurrency", value_name = "COUNT")]
    pub analysis_concurrency: Option<u64>,

    /// Override the spreadsheet queue concurrency.
    #[arg(long = "sheets-concurrency", value_name = "COUNT")]
    pub sheets_concurrency: Option<u64>,

    /// Override the webhook queue concurrency.
    #[arg(long = "webhook-concurrency", value_name = "COUNT")]
    pub webhook_concurrency: Option<u64>,

    /// Override the spreadsheet batch size.
    #[arg(long = "batch-size", value_name = "COUNT")]
    pub batch_size: Option<u64>,

    /// Override the spreadsheet batch maximum wait.
    #[arg(long = "batch-max-wait-ms", value_name = "MILLISECONDS")]
    pub batch_max_wait_ms: Option<u64>,

    /// Override the expiring cache capacity.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,
}
