use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the placecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "placecache",
    version,
    about = "Geospatial cache in front of a paid nearby-places provider"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PLACECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public query API and the admin listener.
    Serve(Box<ServeArgs>),
    /// Refresh one batch of stale places and exit.
    Refresh(RefreshArgs),
    /// Print the call ledger cost report.
    #[command(name = "ledger-report")]
    LedgerReport(LedgerReportArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ProviderOverrides {
    /// Override the provider API key.
    #[arg(long = "provider-api-key", env = "PLACECACHE_PROVIDER_API_KEY", value_name = "KEY")]
    pub api_key: Option<String>,

    /// Override the provider base URL.
    #[arg(long = "provider-base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Override the per-call provider timeout.
    #[arg(long = "provider-timeout-ms", value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub provider: ProviderOverrides,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Toggle the cache path (the rollout kill switch).
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the percentage of sessions routed through the cache path.
    #[arg(long = "rollout-percentage", value_name = "PERCENT")]
    pub rollout_percentage: Option<u8>,

    /// Override the stale refresh interval; zero disables the background task.
    #[arg(long = "refresh-interval-seconds", value_name = "SECONDS")]
    pub refresh_interval_seconds: Option<u64>,

    /// Override the API rate limit window size.
    #[arg(long = "api-rate-limit-window-seconds", value_name = "SECONDS")]
    pub api_rate_limit_window_seconds: Option<u64>,

    /// Override the API rate limit request ceiling.
    #[arg(long = "api-rate-limit-max-requests", value_name = "COUNT")]
    pub api_rate_limit_max_requests: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RefreshArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub provider: ProviderOverrides,

    /// Override how many stale places are refreshed in this run.
    #[arg(long = "batch-limit", value_name = "COUNT")]
    pub batch_limit: Option<u32>,

    /// Override the age after which a place counts as stale.
    #[arg(long = "max-age-days", value_name = "DAYS")]
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct LedgerReportArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Number of calendar days to include, today included.
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=366))]
    pub days: u32,

    /// Emit the report as JSON instead of a table.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}
