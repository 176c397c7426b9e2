use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pixcache binary.
#[derive(Debug, Parser)]
#[command(name = "pixcache", version, about = "Derived image cache server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PIXCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve derived images over HTTP.
    Serve(Box<ServeArgs>),
    /// Print the cache key a request would be served under.
    Key(KeyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Logical image path, e.g. `/photo.jpg`.
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Raw query string, e.g. `width=300&format=webp`.
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache directory.
    #[arg(long = "cache-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_directory: Option<PathBuf>,

    /// Override the length of derived cache keys.
    #[arg(long = "cache-cached-name-length", value_name = "LENGTH")]
    pub cache_cached_name_length: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

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

    /// Override the browser cache ceiling in days.
    #[arg(long = "cache-max-browser-cache-days", value_name = "DAYS")]
    pub cache_max_browser_cache_days: Option<u32>,

    /// Override the store cache ceiling in days.
    #[arg(long = "cache-max-cache-days", value_name = "DAYS")]
    pub cache_max_cache_days: Option<u32>,

    /// Override the transform engine (passthrough|cli).
    #[arg(long = "transform-engine", value_name = "ENGINE")]
    pub transform_engine: Option<String>,

    /// Override the external transformer executable.
    #[arg(long = "transform-cli-path", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub transform_cli_path: Option<PathBuf>,
}
