//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.

use std::time::Duration;

use crate::application::services::{RequestPlan, SubscribeMode};
use crate::domain::selection::{DEFAULT_ALLOW_LIST, DEFAULT_MIN_PAYOUT, SelectionPolicy};
use crate::infrastructure::broadcast::BroadcastConfig;
use crate::infrastructure::upstream::{
    AuthError, Credentials, HeartbeatConfig, ReconnectConfig, SsidAuthStrategy,
    UpstreamSessionConfig,
};

/// Default broker endpoint.
pub const DEFAULT_UPSTREAM_URL: &str =
    "wss://api.pocketoption.com:8085/socket.io/?EIO=3&transport=websocket";

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port for HTTP routes and the downstream WebSocket.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Broker WebSocket URL.
    pub url: String,
    /// Optional `Origin` handshake header.
    pub origin: Option<String>,
    /// Initial credentials.
    pub credentials: Credentials,
    /// How a session token is presented.
    pub ssid_auth: SsidAuthStrategy,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Keepalive interval.
    pub heartbeat_interval: Duration,
    /// Delay before reconnecting after reconfiguration.
    pub settle_delay: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            origin: None,
            credentials: Credentials::None,
            ssid_auth: SsidAuthStrategy::Header,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 0,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
            settle_delay: Duration::from_millis(1000),
        }
    }
}

impl UpstreamSettings {
    /// Session configuration for these settings.
    #[must_use]
    pub fn session_config(&self) -> UpstreamSessionConfig {
        UpstreamSessionConfig {
            url: self.url.clone(),
            origin: self.origin.clone(),
            credentials: self.credentials.clone(),
            ssid_auth: self.ssid_auth,
            reconnect: ReconnectConfig::fixed(self.reconnect_delay)
                .with_max_attempts(self.max_reconnect_attempts),
            heartbeat: HeartbeatConfig::new(self.heartbeat_interval),
            connect_timeout: self.connect_timeout,
            settle_delay: self.settle_delay,
        }
    }
}

/// Asset selection settings.
#[derive(Debug, Clone)]
pub struct SelectionSettings {
    /// Active policy.
    pub policy: SelectionPolicy,
    /// Period of the `assets_status` refresh.
    pub refresh_interval: Duration,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::default(),
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Broker connection settings.
    pub upstream: UpstreamSettings,
    /// Asset selection settings.
    pub selection: SelectionSettings,
    /// Per-asset request plan.
    pub requests: RequestPlan,
    /// Subscriber queue settings.
    pub broadcast: BroadcastConfig,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid enumerated values or incomplete
    /// credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let server = ServerSettings {
            port: env.parse("PORT", ServerSettings::default().port),
        };

        let defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            url: env.string("UPSTREAM_URL").unwrap_or(defaults.url),
            origin: env.string("UPSTREAM_ORIGIN"),
            credentials: credentials(&env)?,
            ssid_auth: match env.string("UPSTREAM_SSID_AUTH") {
                None => defaults.ssid_auth,
                Some(v) => parse_ssid_auth(&v)?,
            },
            reconnect_delay: env.nonzero_secs(
                "UPSTREAM_RECONNECT_DELAY_SECS",
                defaults.reconnect_delay,
            )?,
            max_reconnect_attempts: env.parse(
                "UPSTREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            connect_timeout: env.nonzero_secs(
                "UPSTREAM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
            heartbeat_interval: env.nonzero_secs(
                "UPSTREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            )?,
            settle_delay: env.millis("UPSTREAM_SETTLE_DELAY_MS", defaults.settle_delay),
        };

        let selection = SelectionSettings {
            policy: selection_policy(&env)?,
            refresh_interval: env.nonzero_secs(
                "ASSET_REFRESH_INTERVAL_SECS",
                SelectionSettings::default().refresh_interval,
            )?,
        };

        let plan = RequestPlan::default();
        let requests = RequestPlan {
            timeframe: env.parse("CANDLE_TIMEFRAME_SECS", plan.timeframe),
            count: env.parse("CANDLE_COUNT", plan.count),
            subscribe: match env.string("ASSET_SUBSCRIBE_EVENT") {
                None => plan.subscribe,
                Some(v) => parse_subscribe_mode(&v)?,
            },
            max_jitter: env.millis("ASSET_REQUEST_JITTER_MS", plan.max_jitter),
        };

        let broadcast = BroadcastConfig {
            subscriber_capacity: env.parse(
                "SUBSCRIBER_QUEUE_CAPACITY",
                BroadcastConfig::default().subscriber_capacity,
            ),
        };

        Ok(Self {
            server,
            upstream,
            selection,
            requests,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has a value outside its accepted set.
    #[error("invalid value for {key}: {value:?} (expected {expected})")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Value found.
        value: String,
        /// Accepted values.
        expected: &'static str,
    },
    /// A variable requires another that is not set.
    #[error("{0} is set but {1} is missing")]
    MissingCompanion(&'static str, &'static str),
    /// Credentials were rejected.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] AuthError),
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Non-empty, trimmed value.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Whole seconds that must be positive. Unparsable values fall back.
    fn nonzero_secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        match self.string(key).and_then(|v| v.parse::<u64>().ok()) {
            None => Ok(default),
            Some(0) => Err(ConfigError::InvalidValue {
                key,
                value: "0".to_string(),
                expected: "a positive number of seconds",
            }),
            Some(secs) => Ok(Duration::from_secs(secs)),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn credentials<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<Credentials, ConfigError> {
    if let Some(ssid) = env.string("POCKET_SSID") {
        return Ok(Credentials::session_token(ssid)?);
    }
    match (env.string("POCKET_EMAIL"), env.string("POCKET_PASSWORD")) {
        (Some(email), Some(password)) => Ok(Credentials::email_password(email, password)?),
        (Some(_), None) => Err(ConfigError::MissingCompanion("POCKET_EMAIL", "POCKET_PASSWORD")),
        (None, Some(_)) => Err(ConfigError::MissingCompanion("POCKET_PASSWORD", "POCKET_EMAIL")),
        (None, None) => Ok(Credentials::None),
    }
}

fn selection_policy<F: Fn(&str) -> Option<String>>(
    env: &Env<F>,
) -> Result<SelectionPolicy, ConfigError> {
    let name = env
        .string("ASSET_POLICY")
        .unwrap_or_else(|| "allow-list".to_string());
    match name.to_lowercase().as_str() {
        "allow-list" | "allowlist" => {
            let symbols = env.string("ASSET_ALLOW_LIST").map_or_else(
                || DEFAULT_ALLOW_LIST.iter().map(|s| (*s).to_string()).collect(),
                |list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                },
            );
            Ok(SelectionPolicy::AllowList { symbols })
        }
        "ranked" => Ok(SelectionPolicy::Ranked {
            otc_limit: env.parse("ASSET_OTC_LIMIT", 5),
            standard_limit: env.parse("ASSET_STANDARD_LIMIT", 5),
            min_payout: env.parse("ASSET_MIN_PAYOUT", DEFAULT_MIN_PAYOUT),
        }),
        _ => Err(ConfigError::InvalidValue {
            key: "ASSET_POLICY",
            value: name,
            expected: "allow-list or ranked",
        }),
    }
}

fn parse_ssid_auth(value: &str) -> Result<SsidAuthStrategy, ConfigError> {
    match value.to_lowercase().as_str() {
        "header" | "cookie" => Ok(SsidAuthStrategy::Header),
        "login" => Ok(SsidAuthStrategy::LoginEvent),
        _ => Err(ConfigError::InvalidValue {
            key: "UPSTREAM_SSID_AUTH",
            value: value.to_string(),
            expected: "header or login",
        }),
    }
}

fn parse_subscribe_mode(value: &str) -> Result<SubscribeMode, ConfigError> {
    match value.to_lowercase().as_str() {
        "subscribe" => Ok(SubscribeMode::Subscribe),
        "tick-subscribe" | "tick_subscribe" => Ok(SubscribeMode::TickSubscribe),
        "none" => Ok(SubscribeMode::None),
        _ => Err(ConfigError::InvalidValue {
            key: "ASSET_SUBSCRIBE_EVENT",
            value: value.to_string(),
            expected: "subscribe, tick-subscribe or none",
        }),
    }
}
