//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CliArgs, Command, DatabaseOverride, LedgerReportArgs, ProviderOverrides, RefreshArgs,
    ServeArgs, ServeOverrides,
};

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "placecache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
pub(crate) const DEFAULT_PROVIDER_BASE_URL: &str = "https://places.googleapis.com/v1";
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PROVIDER_UNIT_COST: f64 = 0.032;
const DEFAULT_PROVIDER_MAX_RESULTS: u32 = 20;
const DEFAULT_MAX_AGE_DAYS: u32 = 30;
const MAX_AGE_DAYS_LIMIT: u32 = 3_650;
const DEFAULT_MIN_COVERAGE: u32 = 1;
const DEFAULT_COALESCE_PRECISION: u32 = 4;
const MAX_COALESCE_PRECISION: u32 = 8;
const DEFAULT_ROLLOUT_PERCENTAGE: u8 = 0;
const DEFAULT_SESSION_CAPACITY: u64 = 100_000;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 0;
const DEFAULT_REFRESH_MAX_AGE_DAYS: u32 = 7;
const DEFAULT_REFRESH_BATCH_LIMIT: u32 = 100;
const DEFAULT_REFRESH_PACING_MS: u64 = 100;
const DEFAULT_API_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_API_RATE_LIMIT_MAX_REQUESTS: u64 = 120;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub provider: ProviderSettings,
    pub cache: CacheSettings,
    pub rollout: RolloutSettings,
    pub refresh: RefreshSettings,
    pub api_rate_limit: ApiRateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
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
pub struct DatabaseSettings {
    /// Without a URL the service runs on the in-memory store.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub unit_cost: f64,
    pub max_results: NonZeroU32,
    pub included_types: Vec<String>,
    pub region_code: Option<String>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("unit_cost", &self.unit_cost)
            .field("max_results", &self.max_results)
            .field("included_types", &self.included_types)
            .field("region_code", &self.region_code)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Kill switch: when off every session takes the legacy path.
    pub enabled: bool,
    pub default_max_age_days: u32,
    pub min_coverage: NonZeroUsize,
    pub coalesce_precision: u32,
}

#[derive(Debug, Clone)]
pub struct RolloutSettings {
    pub percentage: u8,
    pub session_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// `None` disables the background refresh task inside `serve`.
    pub interval: Option<Duration>,
    pub max_age_days: u32,
    pub batch_limit: NonZeroU32,
    pub pacing: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiRateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
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
        Environment::with_prefix("PLACECACHE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("provider.included_types")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Refresh(args)) => raw.apply_refresh_overrides(args),
        Some(Command::LedgerReport(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    provider: RawProviderSettings,
    cache: RawCacheSettings,
    rollout: RawRolloutSettings,
    refresh: RawRefreshSettings,
    api_rate_limit: RawApiRateLimitSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(percentage) = overrides.rollout_percentage {
            self.rollout.percentage = Some(u64::from(percentage));
        }
        if let Some(interval) = overrides.refresh_interval_seconds {
            self.refresh.interval_seconds = Some(interval);
        }
        if let Some(window) = overrides.api_rate_limit_window_seconds {
            self.api_rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.api_rate_limit_max_requests {
            self.api_rate_limit.max_requests = Some(max);
        }

        self.apply_provider_overrides(&overrides.provider);
    }

    fn apply_refresh_overrides(&mut self, args: &RefreshArgs) {
        self.apply_database_override(&args.database);
        self.apply_provider_overrides(&args.provider);
        if let Some(limit) = args.batch_limit {
            self.refresh.batch_limit = Some(limit);
        }
        if let Some(days) = args.max_age_days {
            self.refresh.max_age_days = Some(days);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_provider_overrides(&mut self, overrides: &ProviderOverrides) {
        if let Some(key) = overrides.api_key.as_ref() {
            self.provider.api_key = Some(key.clone());
        }
        if let Some(url) = overrides.base_url.as_ref() {
            self.provider.base_url = Some(url.clone());
        }
        if let Some(timeout) = overrides.timeout_ms {
            self.provider.timeout_ms = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            provider,
            cache,
            rollout,
            refresh,
            api_rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            provider: build_provider_settings(provider)?,
            cache: build_cache_settings(cache)?,
            rollout: build_rollout_settings(rollout)?,
            refresh: build_refresh_settings(refresh)?,
            api_rate_limit: build_api_rate_limit_settings(api_rate_limit)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "admin listener must not share the public address",
        ));
    }

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
        public_addr,
        admin_addr,
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_provider_settings(provider: RawProviderSettings) -> Result<ProviderSettings, LoadError> {
    let base_url = provider
        .base_url
        .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string());
    let parsed = url::Url::parse(&base_url)
        .map_err(|err| LoadError::invalid("provider.base_url", err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "provider.base_url",
            "scheme must be http or https",
        ));
    }

    let timeout_ms = provider.timeout_ms.unwrap_or(DEFAULT_PROVIDER_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "provider.timeout_ms",
            "must be greater than zero",
        ));
    }

    let unit_cost = provider.unit_cost.unwrap_or(DEFAULT_PROVIDER_UNIT_COST);
    if !unit_cost.is_finite() || unit_cost < 0.0 {
        return Err(LoadError::invalid(
            "provider.unit_cost",
            "must be a finite, non-negative amount",
        ));
    }

    let max_results = non_zero_u32(
        provider
            .max_results
            .unwrap_or(DEFAULT_PROVIDER_MAX_RESULTS)
            .into(),
        "provider.max_results",
    )?;

    let included_types = provider
        .included_types
        .unwrap_or_default()
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();

    Ok(ProviderSettings {
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key: non_blank(provider.api_key),
        timeout: Duration::from_millis(timeout_ms),
        unit_cost,
        max_results,
        included_types,
        region_code: non_blank(provider.region_code),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let min_coverage = cache.min_coverage.unwrap_or(DEFAULT_MIN_COVERAGE);
    let min_coverage = usize::try_from(min_coverage)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.min_coverage", "must be greater than zero"))?;

    let coalesce_precision = cache
        .coalesce_precision
        .unwrap_or(DEFAULT_COALESCE_PRECISION);
    if coalesce_precision > MAX_COALESCE_PRECISION {
        return Err(LoadError::invalid(
            "cache.coalesce_precision",
            format!("must be at most {MAX_COALESCE_PRECISION} decimal places"),
        ));
    }

    let default_max_age_days = age_days(
        cache.default_max_age_days.unwrap_or(DEFAULT_MAX_AGE_DAYS),
        "cache.default_max_age_days",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_max_age_days,
        min_coverage,
        coalesce_precision,
    })
}

fn build_rollout_settings(rollout: RawRolloutSettings) -> Result<RolloutSettings, LoadError> {
    let percentage = rollout
        .percentage
        .unwrap_or(u64::from(DEFAULT_ROLLOUT_PERCENTAGE));
    let percentage = u8::try_from(percentage)
        .ok()
        .filter(|value| *value <= 100)
        .ok_or_else(|| LoadError::invalid("rollout.percentage", "must be within [0, 100]"))?;

    let capacity = rollout
        .session_capacity
        .unwrap_or(DEFAULT_SESSION_CAPACITY);
    let session_capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("rollout.session_capacity", "must be greater than zero")
        })?;

    Ok(RolloutSettings {
        percentage,
        session_capacity,
    })
}

fn build_refresh_settings(refresh: RawRefreshSettings) -> Result<RefreshSettings, LoadError> {
    let interval_seconds = refresh
        .interval_seconds
        .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);
    let interval = (interval_seconds > 0).then(|| Duration::from_secs(interval_seconds));

    let batch_limit = non_zero_u32(
        refresh
            .batch_limit
            .unwrap_or(DEFAULT_REFRESH_BATCH_LIMIT)
            .into(),
        "refresh.batch_limit",
    )?;

    let max_age_days = age_days(
        refresh.max_age_days.unwrap_or(DEFAULT_REFRESH_MAX_AGE_DAYS),
        "refresh.max_age_days",
    )?;

    Ok(RefreshSettings {
        interval,
        max_age_days,
        batch_limit,
        pacing: Duration::from_millis(refresh.pacing_ms.unwrap_or(DEFAULT_REFRESH_PACING_MS)),
    })
}

fn age_days(value: u32, key: &'static str) -> Result<u32, LoadError> {
    if value > MAX_AGE_DAYS_LIMIT {
        return Err(LoadError::invalid(
            key,
            format!("must be at most {MAX_AGE_DAYS_LIMIT} days"),
        ));
    }
    Ok(value)
}

fn build_api_rate_limit_settings(
    rate_limit: RawApiRateLimitSettings,
) -> Result<ApiRateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_API_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "api_rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_API_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "api_rate_limit.max_requests")?;

    Ok(ApiRateLimitSettings {
        window_seconds,
        max_requests,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
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
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProviderSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    unit_cost: Option<f64>,
    max_results: Option<u32>,
    included_types: Option<Vec<String>>,
    region_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_max_age_days: Option<u32>,
    min_coverage: Option<u32>,
    coalesce_precision: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRolloutSettings {
    percentage: Option<u64>,
    session_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRefreshSettings {
    interval_seconds: Option<u64>,
    max_age_days: Option<u32>,
    batch_limit: Option<u32>,
    pacing_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
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

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
