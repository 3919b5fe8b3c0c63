//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "courier";
const ENV_PREFIX: &str = "COURIER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 1_000;
const DEFAULT_CACHE_SWEEP_INTERVAL_MS: u64 = 60_000;
const DEFAULT_ANALYSIS_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_METADATA_TTL_SECS: u64 = 5 * 60;
const DEFAULT_RECORDER_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_RECORDER_SUMMARY_WINDOW_SECS: u64 = 300;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BATCH_SIZE: u64 = 10;
const DEFAULT_BATCH_MAX_WAIT_MS: u64 = 3_000;
const DEFAULT_ANALYSIS_URL: &str = "http://127.0.0.1:8081/v1/categorize";
const DEFAULT_SHEETS_URL: &str = "http://127.0.0.1:8082/v1/";

/// Per-collaborator defaults: (concurrency, call timeout in ms).
const ANALYSIS_QUEUE_DEFAULTS: (u64, u64) = (2, 30_000);
const SHEETS_QUEUE_DEFAULTS: (u64, u64) = (3, 15_000);
const WEBHOOK_QUEUE_DEFAULTS: (u64, u64) = (5, 10_000);

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub recorder: RecorderSettings,
    pub queues: QueuesSettings,
    pub batcher: BatcherSettings,
    pub services: ServicesSettings,
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
pub struct CacheSettings {
    pub max_entries: NonZeroUsize,
    pub sweep_interval: Duration,
    pub analysis_ttl: Duration,
    pub metadata_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub max_entries: NonZeroUsize,
    pub summary_window: Duration,
}

#[derive(Debug, Clone)]
pub struct QueuesSettings {
    pub analysis: QueueSettings,
    pub sheets: QueueSettings,
    pub webhook: QueueSettings,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub concurrency: NonZeroUsize,
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

#[derive(Debug, Clone)]
pub struct BatcherSettings {
    pub batch_size: NonZeroUsize,
    pub max_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct ServicesSettings {
    pub analysis_url: Url,
    pub analysis_api_key: Option<String>,
    pub sheets_url: Url,
    pub sheets_api_key: Option<String>,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::CheckConfig) | None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

impl Settings {
    /// Resolve settings from a TOML document alone, without files, env or CLI.
    pub fn from_toml(source: &str) -> Result<Self, LoadError> {
        let raw: RawSettings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            recorder,
            queues,
            batcher,
            services,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            recorder: build_recorder_settings(recorder)?,
            queues: QueuesSettings {
                analysis: build_queue_settings(
                    queues.analysis,
                    ANALYSIS_QUEUE_DEFAULTS,
                    QueueKeys::ANALYSIS,
                )?,
                sheets: build_queue_settings(queues.sheets, SHEETS_QUEUE_DEFAULTS, QueueKeys::SHEETS)?,
                webhook: build_queue_settings(
                    queues.webhook,
                    WEBHOOK_QUEUE_DEFAULTS,
                    QueueKeys::WEBHOOK,
                )?,
            },
            batcher: build_batcher_settings(batcher)?,
            services: build_services_settings(services)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    recorder: RawRecorderSettings,
    queues: RawQueuesSettings,
    batcher: RawBatcherSettings,
    services: RawServicesSettings,
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
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.analysis_url.as_ref() {
            self.services.analysis_url = Some(url.clone());
        }
        if let Some(url) = overrides.sheets_url.as_ref() {
            self.services.sheets_url = Some(url.clone());
        }
        if let Some(value) = overrides.analysis_concurrency {
            self.queues.analysis.concurrency = Some(value);
        }
        if let Some(value) = overrides.sheets_concurrency {
            self.queues.sheets.concurrency = Some(value);
        }
        if let Some(value) = overrides.webhook_concurrency {
            self.queues.webhook.concurrency = Some(value);
        }
        if let Some(value) = overrides.batch_size {
            self.batcher.batch_size = Some(value);
        }
        if let Some(value) = overrides.batch_max_wait_ms {
            self.batcher.max_wait_ms = Some(value);
        }
        if let Some(value) = overrides.cache_max_entries {
            self.cache.max_entries = Some(value);
        }
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        max_entries: non_zero_usize(
            cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            "cache.max_entries",
        )?,
        sweep_interval: positive_millis(
            cache
                .sweep_interval_ms
                .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_MS),
            "cache.sweep_interval_ms",
        )?,
        analysis_ttl: positive_secs(
            cache.analysis_ttl_secs.unwrap_or(DEFAULT_ANALYSIS_TTL_SECS),
            "cache.analysis_ttl_secs",
        )?,
        metadata_ttl: positive_secs(
            cache.metadata_ttl_secs.unwrap_or(DEFAULT_METADATA_TTL_SECS),
            "cache.metadata_ttl_secs",
        )?,
    })
}

fn build_recorder_settings(recorder: RawRecorderSettings) -> Result<RecorderSettings, LoadError> {
    Ok(RecorderSettings {
        max_entries: non_zero_usize(
            recorder.max_entries.unwrap_or(DEFAULT_RECORDER_MAX_ENTRIES),
            "recorder.max_entries",
        )?,
        summary_window: positive_secs(
            recorder
                .summary_window_secs
                .unwrap_or(DEFAULT_RECORDER_SUMMARY_WINDOW_SECS),
            "recorder.summary_window_secs",
        )?,
    })
}

/// Config keys for one queue table, kept static for [`LoadError::Invalid`].
struct QueueKeys {
    concurrency: &'static str,
    call_timeout_ms: &'static str,
    backoff_base_ms: &'static str,
}

impl QueueKeys {
    const ANALYSIS: Self = Self {
        concurrency: "queues.analysis.concurrency",
        call_timeout_ms: "queues.analysis.call_timeout_ms",
        backoff_base_ms: "queues.analysis.backoff_base_ms",
    };
    const SHEETS: Self = Self {
        concurrency: "queues.sheets.concurrency",
        call_timeout_ms: "queues.sheets.call_timeout_ms",
        backoff_base_ms: "queues.sheets.backoff_base_ms",
    };
    const WEBHOOK: Self = Self {
        concurrency: "queues.webhook.concurrency",
        call_timeout_ms: "queues.webhook.call_timeout_ms",
        backoff_base_ms: "queues.webhook.backoff_base_ms",
    };
}

fn build_queue_settings(
    queue: RawQueueSettings,
    (default_concurrency, default_timeout_ms): (u64, u64),
    keys: QueueKeys,
) -> Result<QueueSettings, LoadError> {
    Ok(QueueSettings {
        concurrency: non_zero_usize(
            queue.concurrency.unwrap_or(default_concurrency),
            keys.concurrency,
        )?,
        call_timeout: positive_millis(
            queue.call_timeout_ms.unwrap_or(default_timeout_ms),
            keys.call_timeout_ms,
        )?,
        max_retries: queue.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        backoff_base: positive_millis(
            queue.backoff_base_ms.unwrap_or(DEFAULT_BACKOFF_BASE_MS),
            keys.backoff_base_ms,
        )?,
    })
}

fn build_batcher_settings(batcher: RawBatcherSettings) -> Result<BatcherSettings, LoadError> {
    Ok(BatcherSettings {
        batch_size: non_zero_usize(
            batcher.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            "batcher.batch_size",
        )?,
        max_wait: positive_millis(
            batcher.max_wait_ms.unwrap_or(DEFAULT_BATCH_MAX_WAIT_MS),
            "batcher.max_wait_ms",
        )?,
    })
}

fn build_services_settings(services: RawServicesSettings) -> Result<ServicesSettings, LoadError> {
    let analysis_url = parse_url(
        services.analysis_url.as_deref().unwrap_or(DEFAULT_ANALYSIS_URL),
        "services.analysis_url",
    )?;
    let sheets_url = parse_url(
        services.sheets_url.as_deref().unwrap_or(DEFAULT_SHEETS_URL),
        "services.sheets_url",
    )?;

    Ok(ServicesSettings {
        analysis_url,
        analysis_api_key: non_empty(services.analysis_api_key),
        sheets_url,
        sheets_api_key: non_empty(services.sheets_api_key),
    })
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
struct RawCacheSettings {
    max_entries: Option<u64>,
    sweep_interval_ms: Option<u64>,
    analysis_ttl_secs: Option<u64>,
    metadata_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRecorderSettings {
    max_entries: Option<u64>,
    summary_window_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueuesSettings {
    analysis: RawQueueSettings,
    sheets: RawQueueSettings,
    webhook: RawQueueSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    concurrency: Option<u64>,
    call_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBatcherSettings {
    batch_size: Option<u64>,
    max_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServicesSettings {
    analysis_url: Option<String>,
    analysis_api_key: Option<String>,
    sheets_url: Option<String>,
    sheets_api_key: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(url)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}
