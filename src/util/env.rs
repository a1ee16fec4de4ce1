//! Service configuration, read from the process environment (and `.env` via [`dotenvy`]).
//!
//! Values are deserialized straight into [`Env`] with serde; the small map deserializer below
//! parses numeric and boolean variables so the struct can carry real types instead of strings.

use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, IntoDeserializer};
use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);
pub async fn env() -> EnvResult<&'static Env> {
    ENV_VARS.get_or_try_init(|| async { Env::new() }).await
}

/// Reads a single field from the cached [`Env`], e.g. `var!(server_api_port).await?`
#[macro_export]
macro_rules! var {
    ($field:ident) => {
        async {
            $crate::util::env::env()
                .await
                .map(|vars| &vars.$field)
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    #[serde(default = "default_backend")]
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    /// JSON list of members loaded into the memory backend at startup
    pub memory_seed_file: Option<String>,

    #[serde(default = "default_port")]
    pub server_api_port: u16,
    #[serde(default)]
    pub internal_post_token: String,
    #[serde(default = "default_cors")]
    pub cors_allow_origins: String,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: i64,
    #[serde(default = "default_leaderboard_max_limit")]
    pub leaderboard_max_limit: i64,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        from_iter(dotenvy::vars())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

const fn default_backend() -> StorageBackend {
    StorageBackend::Postgres
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_true() -> bool {
    true
}

const fn default_port() -> u16 {
    3000
}

fn default_cors() -> String {
    String::from("*")
}

const fn default_timeout_ms() -> u64 {
    5000
}

const fn default_leaderboard_limit() -> i64 {
    crate::constants::DEFAULT_LEADERBOARD_LIMIT
}

const fn default_leaderboard_max_limit() -> i64 {
    crate::constants::MAX_LEADERBOARD_LIMIT
}

fn default_log_filter() -> String {
    String::from("eduhub_points=debug,tower_http=debug,axum=debug,sqlx=warn,info")
}

const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_service_name() -> String {
    String::from("eduhub-points")
}

// ---
//  Deserializer implementation
// ---

/// A single environment value, tagged with the variable it came from for error messages.
struct Val(String, String);

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.trim().parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' (variable: {})",
                        e, self.1, self.0
                    )))
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_enum(self.1.to_lowercase().into_deserializer())
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
    }

    serde::forward_to_deserialize_any! {
        u8 i8 i16 f32 f64 char str string unit bytes byte_buf map seq
        unit_struct tuple_struct identifier tuple ignored_any struct
    }
}

pub fn from_iter<Iter, T>(iter: Iter) -> EnvResult<T>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let vars = iter.into_iter().map(|(k, v)| (k.clone(), Val(k, v)));
    let deserializer: MapDeserializer<'_, _, EnvDeserializeError> = MapDeserializer::new(vars);

    Ok(T::deserialize(deserializer)?)
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing environment variable '{0}'")]
    MissingValue(String),
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_from_empty_env() {
        let env: Env = from_iter(vars(&[("PATH", "/usr/bin")])).unwrap();

        assert_eq!(env.storage_backend, StorageBackend::Postgres);
        assert_eq!(env.server_api_port, 3000);
        assert_eq!(env.leaderboard_limit, 50);
        assert_eq!(env.leaderboard_max_limit, 100);
        assert_eq!(env.log_format, LogFormat::Pretty);
        assert!(env.run_migrations);
        assert!(env.database_url.is_none());
        assert!(env.memory_seed_file.is_none());
        assert!(env.otel_exporter_otlp_endpoint.is_none());
    }

    #[test]
    fn test_parses_typed_values() {
        let env: Env = from_iter(vars(&[
            ("STORAGE_BACKEND", "Memory"),
            ("DATABASE_URL", "postgres://localhost/eduhub"),
            ("SERVER_API_PORT", "8081"),
            ("RUN_MIGRATIONS", "false"),
            ("REQUEST_TIMEOUT_MS", "250"),
            ("LEADERBOARD_LIMIT", "25"),
            ("LOG_FORMAT", "json"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", ""),
        ]))
        .unwrap();

        assert_eq!(env.storage_backend, StorageBackend::Memory);
        assert_eq!(
            env.database_url.as_deref(),
            Some("postgres://localhost/eduhub")
        );
        assert_eq!(env.server_api_port, 8081);
        assert!(!env.run_migrations);
        assert_eq!(env.request_timeout(), Duration::from_millis(250));
        assert_eq!(env.leaderboard_limit, 25);
        assert_eq!(env.log_format, LogFormat::Json);
        assert!(env.otel_exporter_otlp_endpoint.is_none());
    }

    #[test]
    fn test_rejects_malformed_port() {
        let result: EnvResult<Env> = from_iter(vars(&[("SERVER_API_PORT", "eighty")]));
        let err = result.unwrap_err().to_string();

        assert!(err.contains("SERVER_API_PORT"), "{err}");
    }
}
