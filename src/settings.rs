use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use sqlx::postgres::PgSslMode;
use thiserror::Error;

const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_USER: &str = "orders_user";
const DEFAULT_DB_PASSWORD: &str = "orders_password";
const DEFAULT_DB_NAME: &str = "orders_db";
const DEFAULT_DB_SSLMODE: &str = "disable";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";
const DEFAULT_KAFKA_TOPIC: &str = "orders";
const DEFAULT_KAFKA_GROUP_ID: &str = "order-service";
const DEFAULT_KAFKA_CLAIM_BUFFER: usize = 64;
const KAFKA_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const KAFKA_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_KAFKA_JOIN_TIMEOUT_SECS: u64 = 10;

const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
const DEFAULT_SERVER_PORT: u16 = 8081;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

const DEFAULT_LOG_FILTER: &str = "info,order_cache=debug";

/// Fully-resolved settings after defaults and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub kafka: KafkaSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

// Hand-written so the password never ends up in a log line.
impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    /// Messages buffered per partition claim before the router waits.
    pub claim_buffer: usize,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How long joining waits for the broker to answer a metadata request.
    pub join_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// `EnvFilter` directives.
    pub filter: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl SettingsError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl Settings {
    /// Reads the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(Environment::default())
    }

    fn load_from(environment: Environment) -> Result<Self, SettingsError> {
        let raw: RawSettings = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            database: build_database_settings(&raw)?,
            kafka: build_kafka_settings(&raw)?,
            server: build_server_settings(&raw)?,
            logging: build_logging_settings(&raw)?,
        })
    }
}

/// Flat view of the environment. Keys arrive lower-cased (`DB_HOST` → `db_host`).
/// Numbers stay strings here so a blank value can fall back to its default.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    db_host: Option<String>,
    db_port: Option<String>,
    db_user: Option<String>,
    db_password: Option<String>,
    db_name: Option<String>,
    db_sslmode: Option<String>,
    db_max_connections: Option<String>,

    kafka_brokers: Option<String>,
    kafka_topic: Option<String>,
    kafka_group_id: Option<String>,
    kafka_claim_buffer: Option<String>,
    kafka_join_timeout_secs: Option<String>,

    server_host: Option<String>,
    server_port: Option<String>,
    server_shutdown_grace_secs: Option<String>,

    log_format: Option<String>,
    rust_log: Option<String>,
}

/// Unset and blank values both fall back to the default.
fn or_default(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn number_or_default<T>(
    value: &Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|err| SettingsError::invalid(key, format!("`{v}`: {err}"))),
    }
}

fn build_database_settings(raw: &RawSettings) -> Result<DatabaseSettings, SettingsError> {
    let port = number_or_default(&raw.db_port, "DB_PORT", DEFAULT_DB_PORT)?;
    if port == 0 {
        return Err(SettingsError::invalid("DB_PORT", "port must be greater than zero"));
    }

    let ssl_mode = or_default(&raw.db_sslmode, DEFAULT_DB_SSLMODE);
    PgSslMode::from_str(&ssl_mode)
        .map_err(|err| SettingsError::invalid("DB_SSLMODE", err.to_string()))?;

    let max_connections = number_or_default(
        &raw.db_max_connections,
        "DB_MAX_CONNECTIONS",
        DEFAULT_DB_MAX_CONNECTIONS,
    )?;
    if max_connections == 0 {
        return Err(SettingsError::invalid(
            "DB_MAX_CONNECTIONS",
            "must be greater than zero",
        ));
    }

    Ok(DatabaseSettings {
        host: or_default(&raw.db_host, DEFAULT_DB_HOST),
        port,
        user: or_default(&raw.db_user, DEFAULT_DB_USER),
        password: or_default(&raw.db_password, DEFAULT_DB_PASSWORD),
        name: or_default(&raw.db_name, DEFAULT_DB_NAME),
        ssl_mode,
        max_connections,
        connect_timeout: DB_CONNECT_TIMEOUT,
    })
}

fn build_kafka_settings(raw: &RawSettings) -> Result<KafkaSettings, SettingsError> {
    let brokers: Vec<String> = or_default(&raw.kafka_brokers, DEFAULT_KAFKA_BROKERS)
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();
    if brokers.is_empty() {
        return Err(SettingsError::invalid(
            "KAFKA_BROKERS",
            "at least one broker address is required",
        ));
    }

    let claim_buffer = number_or_default(
        &raw.kafka_claim_buffer,
        "KAFKA_CLAIM_BUFFER",
        DEFAULT_KAFKA_CLAIM_BUFFER,
    )?;
    if claim_buffer == 0 {
        return Err(SettingsError::invalid(
            "KAFKA_CLAIM_BUFFER",
            "must be greater than zero",
        ));
    }

    let join_timeout_secs = number_or_default(
        &raw.kafka_join_timeout_secs,
        "KAFKA_JOIN_TIMEOUT_SECS",
        DEFAULT_KAFKA_JOIN_TIMEOUT_SECS,
    )?;
    if join_timeout_secs == 0 {
        return Err(SettingsError::invalid(
            "KAFKA_JOIN_TIMEOUT_SECS",
            "must be greater than zero",
        ));
    }

    Ok(KafkaSettings {
        brokers,
        topic: or_default(&raw.kafka_topic, DEFAULT_KAFKA_TOPIC),
        group_id: or_default(&raw.kafka_group_id, DEFAULT_KAFKA_GROUP_ID),
        claim_buffer,
        session_timeout: KAFKA_SESSION_TIMEOUT,
        heartbeat_interval: KAFKA_HEARTBEAT_INTERVAL,
        join_timeout: Duration::from_secs(join_timeout_secs),
    })
}

fn build_server_settings(raw: &RawSettings) -> Result<ServerSettings, SettingsError> {
    let host = or_default(&raw.server_host, DEFAULT_SERVER_HOST);
    let port = number_or_default(&raw.server_port, "SERVER_PORT", DEFAULT_SERVER_PORT)?;
    let addr = resolve_socket_addr(&host, port)
        .map_err(|reason| SettingsError::invalid("SERVER_HOST", reason))?;

    let grace_secs = number_or_default(
        &raw.server_shutdown_grace_secs,
        "SERVER_SHUTDOWN_GRACE_SECS",
        DEFAULT_SHUTDOWN_GRACE_SECS,
    )?;
    if grace_secs == 0 {
        return Err(SettingsError::invalid(
            "SERVER_SHUTDOWN_GRACE_SECS",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        shutdown_grace: Duration::from_secs(grace_secs),
    })
}

fn build_logging_settings(raw: &RawSettings) -> Result<LoggingSettings, SettingsError> {
    let format = match or_default(&raw.log_format, "pretty").to_ascii_lowercase().as_str() {
        "pretty" | "text" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        other => {
            return Err(SettingsError::invalid(
                "LOG_FORMAT",
                format!("expected `pretty` or `json`, got `{other}`"),
            ))
        }
    };

    Ok(LoggingSettings {
        filter: or_default(&raw.rust_log, DEFAULT_LOG_FILTER),
        format,
    })
}

/// Accepts IP literals and host names; a name binds its first resolved address.
fn resolve_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    (host, port)
        .to_socket_addrs()
        .map_err(|err| format!("cannot resolve `{host}:{port}`: {err}"))?
        .next()
        .ok_or_else(|| format!("`{host}:{port}` resolved to no addresses"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    #[test]
    fn defaults_match_local_compose_setup() {
        let settings = Settings::from_raw(RawSettings::default()).unwrap();

        assert_eq!(settings.database.host, "localhost");
        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.database.user, "orders_user");
        assert_eq!(settings.database.name, "orders_db");
        assert_eq!(settings.database.ssl_mode, "disable");
        assert_eq!(settings.kafka.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(settings.kafka.topic, "orders");
        assert_eq!(settings.kafka.group_id, "order-service");
        assert_eq!(settings.kafka.session_timeout, Duration::from_secs(10));
        assert_eq!(settings.kafka.join_timeout, Duration::from_secs(10));
        assert_eq!(settings.server.addr.port(), 8081);
        assert_eq!(settings.server.shutdown_grace, Duration::from_secs(30));
        assert_eq!(settings.logging.format, LogFormat::Pretty);
        assert_eq!(settings.logging.filter, "info,order_cache=debug");
    }

    #[test]
    fn environment_values_override_defaults() {
        let settings = Settings::load_from(env(&[
            ("DB_HOST", "postgres"),
            ("DB_PORT", "6543"),
            ("KAFKA_BROKERS", "kafka-1:9092, kafka-2:9092"),
            ("KAFKA_GROUP_ID", "orders-replay"),
            ("SERVER_PORT", "9000"),
            ("SERVER_SHUTDOWN_GRACE_SECS", "5"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(settings.database.host, "postgres");
        assert_eq!(settings.database.port, 6543);
        assert_eq!(
            settings.kafka.brokers,
            vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()]
        );
        assert_eq!(settings.kafka.group_id, "orders-replay");
        assert_eq!(settings.server.addr.port(), 9000);
        assert_eq!(settings.server.shutdown_grace, Duration::from_secs(5));
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let mut raw = RawSettings::default();
        raw.db_user = Some("   ".to_string());
        raw.kafka_topic = Some(String::new());

        let settings = Settings::from_raw(raw).unwrap();

        assert_eq!(settings.database.user, "orders_user");
        assert_eq!(settings.kafka.topic, "orders");
    }

    #[test]
    fn empty_broker_list_is_rejected() {
        let mut raw = RawSettings::default();
        raw.kafka_brokers = Some(" , ,".to_string());

        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "KAFKA_BROKERS", .. }));
    }

    #[test]
    fn zero_grace_is_rejected() {
        let mut raw = RawSettings::default();
        raw.server_shutdown_grace_secs = Some("0".to_string());

        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "SERVER_SHUTDOWN_GRACE_SECS",
                ..
            }
        ));
    }

    #[test]
    fn unknown_ssl_mode_and_log_format_are_rejected() {
        let mut raw = RawSettings::default();
        raw.db_sslmode = Some("sometimes".to_string());
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.log_format = Some("xml".to_string());
        assert!(matches!(
            Settings::from_raw(raw).unwrap_err(),
            SettingsError::Invalid { key: "LOG_FORMAT", .. }
        ));
    }

    #[test]
    fn blank_numbers_fall_back_to_defaults() {
        let settings = Settings::load_from(env(&[
            ("DB_PORT", ""),
            ("DB_MAX_CONNECTIONS", " "),
            ("SERVER_PORT", ""),
            ("SERVER_SHUTDOWN_GRACE_SECS", ""),
        ]))
        .unwrap();

        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.database.max_connections, 10);
        assert_eq!(settings.server.addr.port(), 8081);
        assert_eq!(settings.server.shutdown_grace, Duration::from_secs(30));
    }

    #[test]
    fn non_numeric_port_names_its_key() {
        let err = Settings::load_from(env(&[("DB_PORT", "five")])).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "DB_PORT", .. }));
    }

    #[test]
    fn server_host_accepts_a_host_name() {
        let settings = Settings::load_from(env(&[
            ("SERVER_HOST", "localhost"),
            ("SERVER_PORT", "9001"),
        ]))
        .unwrap();

        assert!(settings.server.addr.ip().is_loopback());
        assert_eq!(settings.server.addr.port(), 9001);
    }

    #[test]
    fn debug_output_redacts_password() {
        let settings = Settings::from_raw(RawSettings::default()).unwrap();
        let rendered = format!("{:?}", settings.database);

        assert!(!rendered.contains("orders_password"));
        assert!(rendered.contains("<redacted>"));
    }
}
