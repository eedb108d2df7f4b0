//! Adapter Configuration Settings
//!
//! Configuration types for the broker stream adapter, loaded from environment
//! variables (after `.env` has been applied by the binary).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::ports::BrokerCredentials;
use crate::domain::streaming::Mode;

/// Upstream feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Bound on the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after a ping before the socket is considered dead.
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnect delay.
    pub reconnect_delay_max: Duration,
    /// Backoff multiplier.
    pub reconnect_delay_multiplier: f64,
    /// Reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the wire event channel feeding the supervisor.
    pub event_channel_capacity: usize,
    /// Capacity of the link's outbound frame queue.
    pub outbound_capacity: usize,
    /// How long a retired token route keeps resolving.
    pub route_grace: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(20),
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
            event_channel_capacity: 4_096,
            outbound_capacity: 256,
            route_grace: Duration::from_secs(5),
        }
    }
}

/// Publish bus settings.
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Interface TCP subscribers connect to.
    pub host: String,
    /// First port tried when binding a publisher (0 = in-process only).
    pub base_port: u16,
    /// Number of ports scanned from `base_port`.
    pub port_range: u16,
    /// Capacity of the in-process broadcast channels.
    pub channel_capacity: usize,
    /// Also publish on the topic without broker prefix.
    pub legacy_topics: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 5555,
            port_range: 100,
            channel_capacity: 10_000,
            legacy_topics: true,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Subscription requested at startup: `EXCHANGE:SYMBOL:MODE[:DEPTH]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Canonical exchange.
    pub exchange: String,
    /// Canonical symbol.
    pub symbol: String,
    /// Mode.
    pub mode: Mode,
    /// Depth level for depth mode.
    pub depth: Option<u8>,
}

impl FromStr for SubscriptionSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSubscription(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').map(str::trim).collect();
        let (exchange, symbol, mode, depth) = match parts.as_slice() {
            [exchange, symbol, mode] => (exchange, symbol, mode, None),
            [exchange, symbol, mode, depth] => (exchange, symbol, mode, Some(depth)),
            _ => return Err(invalid()),
        };
        if exchange.is_empty() || symbol.is_empty() {
            return Err(invalid());
        }
        let mode = mode.parse::<Mode>().map_err(|_| invalid())?;
        let depth = depth
            .map(|d| d.parse::<u8>().map_err(|_| invalid()))
            .transpose()?;

        Ok(Self {
            exchange: exchange.to_ascii_uppercase(),
            symbol: (*symbol).to_string(),
            mode,
            depth,
        })
    }
}

/// Complete adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Broker to stream from.
    pub broker: String,
    /// Owning user, for logs and publisher naming.
    pub user_id: String,
    /// Broker credentials.
    pub credentials: BrokerCredentials,
    /// Instrument master JSON file.
    pub symbol_master_path: Option<PathBuf>,
    /// Subscriptions applied after connecting.
    pub subscriptions: Vec<SubscriptionSpec>,
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Publish bus settings.
    pub bus: BusSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl AdapterConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BROKER_NAME` is missing or a startup subscription
    /// is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let broker = lookup("BROKER_NAME")
            .ok_or_else(|| ConfigError::MissingEnvVar("BROKER_NAME".to_string()))?
            .trim()
            .to_ascii_lowercase();
        if broker.is_empty() {
            return Err(ConfigError::EmptyValue("BROKER_NAME".to_string()));
        }

        let user_id = lookup("BROKER_USER_ID").unwrap_or_else(|| "default".to_string());

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let credentials = BrokerCredentials {
            api_key: non_empty("BROKER_API_KEY"),
            api_secret: non_empty("BROKER_API_SECRET"),
            auth_token: non_empty("BROKER_AUTH_TOKEN"),
            feed_token: non_empty("BROKER_FEED_TOKEN"),
            client_id: non_empty("BROKER_CLIENT_ID"),
        };

        let subscriptions = non_empty("FEED_SUBSCRIPTIONS")
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(SubscriptionSpec::from_str)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "FEED_CONNECT_TIMEOUT_SECS",
                feed_defaults.connect_timeout,
            ),
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "FEED_HEARTBEAT_INTERVAL_SECS",
                feed_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                &lookup,
                "FEED_HEARTBEAT_TIMEOUT_SECS",
                feed_defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                &lookup,
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                &lookup,
                "FEED_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env(
                &lookup,
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env(
                &lookup,
                "FEED_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
            event_channel_capacity: parse_env(
                &lookup,
                "FEED_EVENT_CHANNEL_CAPACITY",
                feed_defaults.event_channel_capacity,
            ),
            ..feed_defaults
        };

        let bus_defaults = BusSettings::default();
        let bus = BusSettings {
            host: lookup("BUS_HOST").unwrap_or(bus_defaults.host),
            base_port: parse_env(&lookup, "BUS_BASE_PORT", bus_defaults.base_port),
            port_range: parse_env(&lookup, "BUS_PORT_RANGE", bus_defaults.port_range),
            channel_capacity: parse_env(
                &lookup,
                "BUS_CHANNEL_CAPACITY",
                bus_defaults.channel_capacity,
            ),
            legacy_topics: lookup("BUS_LEGACY_TOPICS")
                .map_or(bus_defaults.legacy_topics, |v| parse_bool(&v)),
        };

        let server = ServerSettings {
            health_port: parse_env(
                &lookup,
                "FEED_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            broker,
            user_id,
            credentials,
            symbol_master_path: non_empty("SYMBOL_MASTER_PATH").map(PathBuf::from),
            subscriptions,
            feed,
            bus,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Startup subscription does not parse.
    #[error("invalid subscription '{0}', expected EXCHANGE:SYMBOL:MODE[:DEPTH]")]
    InvalidSubscription(String),
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn feed_settings_defaults() {
        let settings = FeedSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(15));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_secs(5));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(60));
        assert_eq!(settings.max_reconnect_attempts, 10);
        assert_eq!(settings.route_grace, Duration::from_secs(5));
    }

    #[test]
    fn missing_broker_name_fails() {
        let err = AdapterConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(k) if k == "BROKER_NAME"));
    }

    #[test]
    fn blank_broker_name_fails() {
        let err = AdapterConfig::from_lookup(lookup(&[("BROKER_NAME", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn full_config_from_lookup() {
        let config = AdapterConfig::from_lookup(lookup(&[
            ("BROKER_NAME", "Zerodha"),
            ("BROKER_USER_ID", "u1"),
            ("BROKER_API_KEY", "key"),
            ("BROKER_AUTH_TOKEN", "token"),
            ("BROKER_FEED_TOKEN", ""),
            ("FEED_SUBSCRIPTIONS", "NSE:RELIANCE:2, nse:INFY:DEPTH:20"),
            ("FEED_MAX_RECONNECT_ATTEMPTS", "3"),
            ("FEED_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("BUS_BASE_PORT", "0"),
            ("BUS_LEGACY_TOPICS", "false"),
            ("FEED_HEALTH_PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(config.broker, "zerodha");
        assert_eq!(config.user_id, "u1");
        assert_eq!(config.credentials.api_key.as_deref(), Some("key"));
        assert!(config.credentials.feed_token.is_none());
        assert_eq!(config.feed.max_reconnect_attempts, 3);
        assert_eq!(config.feed.reconnect_delay_initial, Duration::from_millis(250));
        assert_eq!(config.bus.base_port, 0);
        assert!(!config.bus.legacy_topics);
        assert_eq!(config.server.health_port, 9000);
        assert_eq!(
            config.subscriptions,
            vec![
                SubscriptionSpec {
                    exchange: "NSE".to_string(),
                    symbol: "RELIANCE".to_string(),
                    mode: Mode::Quote,
                    depth: None,
                },
                SubscriptionSpec {
                    exchange: "NSE".to_string(),
                    symbol: "INFY".to_string(),
                    mode: Mode::Depth,
                    depth: Some(20),
                },
            ]
        );
    }

    #[test]
    fn malformed_subscription_is_rejected() {
        let err = AdapterConfig::from_lookup(lookup(&[
            ("BROKER_NAME", "angel"),
            ("FEED_SUBSCRIPTIONS", "NSE:RELIANCE"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSubscription(_)));

        assert!("NSE:RELIANCE:9".parse::<SubscriptionSpec>().is_err());
        assert!("NSE::1".parse::<SubscriptionSpec>().is_err());
        assert!("NSE:X:3:deep".parse::<SubscriptionSpec>().is_err());
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let config = AdapterConfig::from_lookup(lookup(&[
            ("BROKER_NAME", "dhan"),
            ("FEED_CONNECT_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap();
        assert_eq!(config.feed.connect_timeout, Duration::from_secs(15));
        assert!(config.bus.legacy_topics);
    }
}
