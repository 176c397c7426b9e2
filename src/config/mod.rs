//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheKeyGenerator;
use crate::domain::{ProcessorSpec, processors};

mod cli;

pub use cli::{CacheOverrides, CliArgs, Command, KeyArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pixcache";
const ENV_PREFIX: &str = "PIXCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_DIR: &str = "is-cache";
const DEFAULT_MAX_BROWSER_CACHE_DAYS: u32 = 7;
const DEFAULT_MAX_CACHE_DAYS: u32 = 365;
const MAX_AGE_DAYS: u32 = 36_500;
const DEFAULT_FOLDER_DEPTH: usize = 2;
const MAX_FOLDER_DEPTH: usize = 8;
const DEFAULT_SOURCE_ROOT: &str = "wwwroot";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_TRANSFORM_CLI_PATH: &str = "pixcache-transform";
const DEFAULT_TRANSFORM_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub sources: SourceSettings,
    pub processors: ProcessorSettings,
    pub transform: TransformSettings,
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
    pub directory: PathBuf,
    pub max_browser_cache_days: u32,
    pub max_cache_days: u32,
    pub cached_name_length: usize,
    pub folder_depth: usize,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// In precedence order.
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    FileSystem {
        root: PathBuf,
    },
    Remote {
        prefix: String,
        base_url: String,
        timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub enabled: Vec<&'static ProcessorSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformEngine {
    Passthrough,
    Cli,
}

#[derive(Debug, Clone)]
pub struct TransformSettings {
    pub engine: TransformEngine,
    pub cli_path: PathBuf,
    pub cli_args: Vec<String>,
    pub timeout: Duration,
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
        Some(Command::Key(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
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
    cache: RawCacheSettings,
    sources: RawSourceSettings,
    processors: RawProcessorSettings,
    transform: RawTransformSettings,
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
        if let Some(days) = overrides.cache_max_browser_cache_days {
            self.cache.max_browser_cache_days = Some(days);
        }
        if let Some(days) = overrides.cache_max_cache_days {
            self.cache.max_cache_days = Some(days);
        }
        if let Some(engine) = overrides.transform_engine.as_ref() {
            self.transform.engine = Some(engine.clone());
        }
        if let Some(path) = overrides.transform_cli_path.as_ref() {
            self.transform.cli_path = Some(path.clone());
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(length) = overrides.cache_cached_name_length {
            self.cache.cached_name_length = Some(length);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            sources,
            processors,
            transform,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            sources: build_source_settings(sources)?,
            processors: build_processor_settings(processors)?,
            transform: build_transform_settings(transform)?,
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    let max_cache_days = cache.max_cache_days.unwrap_or(DEFAULT_MAX_CACHE_DAYS);
    if !(1..=MAX_AGE_DAYS).contains(&max_cache_days) {
        return Err(LoadError::invalid(
            "cache.max_cache_days",
            format!("must be between 1 and {MAX_AGE_DAYS}"),
        ));
    }

    let max_browser_cache_days = cache
        .max_browser_cache_days
        .unwrap_or(DEFAULT_MAX_BROWSER_CACHE_DAYS);
    if max_browser_cache_days > MAX_AGE_DAYS {
        return Err(LoadError::invalid(
            "cache.max_browser_cache_days",
            format!("must not exceed {MAX_AGE_DAYS}"),
        ));
    }

    let cached_name_length = cache
        .cached_name_length
        .unwrap_or(CacheKeyGenerator::DEFAULT_LENGTH);
    if !(CacheKeyGenerator::MIN_LENGTH..=CacheKeyGenerator::MAX_LENGTH)
        .contains(&cached_name_length)
    {
        return Err(LoadError::invalid(
            "cache.cached_name_length",
            format!(
                "must be between {} and {}",
                CacheKeyGenerator::MIN_LENGTH,
                CacheKeyGenerator::MAX_LENGTH
            ),
        ));
    }

    let folder_depth = cache.folder_depth.unwrap_or(DEFAULT_FOLDER_DEPTH);
    if folder_depth > MAX_FOLDER_DEPTH {
        return Err(LoadError::invalid(
            "cache.folder_depth",
            format!("must not exceed {MAX_FOLDER_DEPTH}"),
        ));
    }

    Ok(CacheSettings {
        directory,
        max_browser_cache_days,
        max_cache_days,
        cached_name_length,
        folder_depth,
    })
}

fn build_source_settings(sources: RawSourceSettings) -> Result<SourceSettings, LoadError> {
    let Some(raw_providers) = sources.providers else {
        return Ok(SourceSettings {
            providers: vec![ProviderSettings::FileSystem {
                root: PathBuf::from(DEFAULT_SOURCE_ROOT),
            }],
        });
    };

    if raw_providers.is_empty() {
        return Err(LoadError::invalid(
            "sources.providers",
            "at least one provider is required",
        ));
    }

    let providers = raw_providers
        .into_iter()
        .map(|provider| match provider {
            RawProvider::Filesystem { root } => {
                let root = root.unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_ROOT));
                if root.as_os_str().is_empty() {
                    return Err(LoadError::invalid(
                        "sources.providers.root",
                        "path must not be empty",
                    ));
                }
                Ok(ProviderSettings::FileSystem { root })
            }
            RawProvider::Remote {
                prefix,
                base_url,
                timeout_seconds,
            } => {
                let prefix = prefix.unwrap_or_default();
                if prefix.trim_matches('/').is_empty() {
                    return Err(LoadError::invalid(
                        "sources.providers.prefix",
                        "remote providers need a non-root path prefix",
                    ));
                }
                let base_url = base_url.ok_or_else(|| {
                    LoadError::invalid("sources.providers.base_url", "is required")
                })?;
                url::Url::parse(&base_url).map_err(|err| {
                    LoadError::invalid(
                        "sources.providers.base_url",
                        format!("invalid URL `{base_url}`: {err}"),
                    )
                })?;
                let timeout_seconds = timeout_seconds.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS);
                if timeout_seconds == 0 {
                    return Err(LoadError::invalid(
                        "sources.providers.timeout_seconds",
                        "must be greater than zero",
                    ));
                }
                Ok(ProviderSettings::Remote {
                    prefix,
                    base_url,
                    timeout: Duration::from_secs(timeout_seconds),
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SourceSettings { providers })
}

fn build_processor_settings(
    raw: RawProcessorSettings,
) -> Result<ProcessorSettings, LoadError> {
    let Some(names) = raw.enabled else {
        return Ok(ProcessorSettings {
            enabled: processors::BUILTIN_PROCESSORS.to_vec(),
        });
    };

    let mut enabled: Vec<&'static ProcessorSpec> = Vec::with_capacity(names.len());
    for name in names {
        let spec = processors::builtin(name.trim()).ok_or_else(|| {
            LoadError::invalid(
                "processors.enabled",
                format!("unknown processor `{name}`"),
            )
        })?;
        if !enabled.iter().any(|existing| existing.name == spec.name) {
            enabled.push(spec);
        }
    }

    Ok(ProcessorSettings { enabled })
}

fn build_transform_settings(
    transform: RawTransformSettings,
) -> Result<TransformSettings, LoadError> {
    let engine = match transform
        .engine
        .as_deref()
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        None | Some("passthrough") => TransformEngine::Passthrough,
        Some("cli") => TransformEngine::Cli,
        Some(other) => {
            return Err(LoadError::invalid(
                "transform.engine",
                format!("unknown engine `{other}` (expected passthrough or cli)"),
            ));
        }
    };

    let cli_path = transform
        .cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TRANSFORM_CLI_PATH));
    if cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "transform.cli_path",
            "path must not be empty",
        ));
    }

    let timeout_seconds = transform
        .timeout_seconds
        .unwrap_or(DEFAULT_TRANSFORM_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "transform.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(TransformSettings {
        engine,
        cli_path,
        cli_args: transform.cli_args.unwrap_or_default(),
        timeout: Duration::from_secs(timeout_seconds),
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
    directory: Option<PathBuf>,
    max_browser_cache_days: Option<u32>,
    max_cache_days: Option<u32>,
    cached_name_length: Option<usize>,
    folder_depth: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourceSettings {
    providers: Option<Vec<RawProvider>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawProvider {
    Filesystem {
        root: Option<PathBuf>,
    },
    Remote {
        prefix: Option<String>,
        base_url: Option<String>,
        timeout_seconds: Option<u64>,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProcessorSettings {
    enabled: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTransformSettings {
    engine: Option<String>,
    cli_path: Option<PathBuf>,
    cli_args: Option<Vec<String>>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
