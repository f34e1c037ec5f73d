use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use mirrorline_core::AppError;
use tracing_subscriber::EnvFilter;

const MIN_SHARED_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub database_url: String,
    pub api_host: String,
    pub api_port: u16,
    pub public_base_url: String,
    pub internal_shared_secret: String,
    pub credential_encryption_key: String,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub vendor_http_timeout_seconds: u64,
    pub backfill_max_retries: u32,
    pub backfill_retry_backoff_ms: u64,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
        Self::from_lookup(migrate_only, |name| env::var(name).ok())
    }

    pub fn from_lookup(
        migrate_only: bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let api_host = lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".to_owned());
        let api_port = parse_or(&lookup, "API_PORT", 3001_u16)?;
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3001".to_owned())
            .trim_end_matches('/')
            .to_owned();

        let internal_shared_secret = required(&lookup, "INTERNAL_SHARED_SECRET")?;
        if internal_shared_secret.len() < MIN_SHARED_SECRET_LENGTH {
            return Err(AppError::Validation(format!(
                "INTERNAL_SHARED_SECRET must be at least {MIN_SHARED_SECRET_LENGTH} characters"
            )));
        }
        let credential_encryption_key = required(&lookup, "CREDENTIAL_ENCRYPTION_KEY")?;

        let redis_url = lookup("REDIS_URL").filter(|value| !value.trim().is_empty());
        let redis_key_prefix =
            lookup("REDIS_KEY_PREFIX").unwrap_or_else(|| "mirrorline".to_owned());
        let vendor_http_timeout_seconds = parse_or(&lookup, "VENDOR_HTTP_TIMEOUT_SECONDS", 20)?;
        if vendor_http_timeout_seconds == 0 {
            return Err(AppError::Validation(
                "VENDOR_HTTP_TIMEOUT_SECONDS must be greater than zero".to_owned(),
            ));
        }
        let backfill_max_retries = parse_or(&lookup, "BACKFILL_MAX_RETRIES", 2)?;
        let backfill_retry_backoff_ms = parse_or(&lookup, "BACKFILL_RETRY_BACKOFF_MS", 500)?;

        Ok(Self {
            migrate_only,
            database_url,
            api_host,
            api_port,
            public_base_url,
            internal_shared_secret,
            credential_encryption_key,
            redis_url,
            redis_key_prefix,
            vendor_http_timeout_seconds,
            backfill_max_retries,
            backfill_retry_backoff_ms,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, AppError> {
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
