use std::{env::VarError, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_hours: i64,
    pub refresh_ttl_days: i64,
}

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.access_ttl_hours > 0, "JWT_ACCESS_TTL_HOURS must be positive");
        anyhow::ensure!(self.refresh_ttl_days > 0, "JWT_REFRESH_TTL_DAYS must be positive");
        anyhow::ensure!(
            self.refresh_ttl_days * 24 > self.access_ttl_hours,
            "refresh token lifetime must exceed access token lifetime"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub length: usize,
    pub alphabet: String,
    pub ttl_seconds: u64,
    pub rate_window_seconds: u64,
    /// Sends allowed per receiver inside one rate window.
    pub rate_limit: i64,
    /// Lifetime cap per (receiver, type); 0 disables it.
    pub max_per_receiver: i64,
}

impl OtpConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.length > 0, "OTP_LENGTH must be positive");
        anyhow::ensure!(!self.alphabet.is_empty(), "OTP_CHARSET must not be empty");
        anyhow::ensure!(self.ttl_seconds > 0, "OTP_TTL_SECONDS must be positive");
        anyhow::ensure!(
            self.rate_window_seconds > 0,
            "OTP_RATE_LIMIT_SECONDS must be positive"
        );
        anyhow::ensure!(self.rate_limit > 0, "OTP_RATE_LIMIT_COUNT must be positive");
        anyhow::ensure!(
            self.max_per_receiver >= 0,
            "OTP_MAX_PER_RECEIVER must not be negative"
        );
        Ok(())
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            length: 6,
            alphabet: "0123456789".into(),
            ttl_seconds: 120,
            rate_window_seconds: 60,
            rate_limit: 1,
            max_per_receiver: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Noop,
    Log,
    Kavenegar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    pub kind: DeliveryKind,
    pub kavenegar_api_key: String,
    pub kavenegar_sender: String,
    pub kavenegar_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub delivery: DeliveryConfig,
    pub directory_cache_ttl_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        let jwt = JwtConfig {
            private_key_path: env_or("JWT_PRIVATE_KEY_PATH", "private.key"),
            public_key_path: env_or("JWT_PUBLIC_KEY_PATH", "public.key"),
            issuer: env_or("JWT_ISSUER", "gatehouse"),
            audience: env_or("JWT_AUDIENCE", "gatehouse-users"),
            access_ttl_hours: env_parse("JWT_ACCESS_TTL_HOURS", 24)?,
            refresh_ttl_days: env_parse("JWT_REFRESH_TTL_DAYS", 7)?,
        };
        jwt.validate()?;

        let defaults = OtpConfig::default();
        let otp = OtpConfig {
            length: env_parse("OTP_LENGTH", defaults.length)?,
            alphabet: env_or("OTP_CHARSET", &defaults.alphabet),
            ttl_seconds: env_parse("OTP_TTL_SECONDS", defaults.ttl_seconds)?,
            rate_window_seconds: env_parse("OTP_RATE_LIMIT_SECONDS", defaults.rate_window_seconds)?,
            rate_limit: env_parse("OTP_RATE_LIMIT_COUNT", defaults.rate_limit)?,
            max_per_receiver: env_parse("OTP_MAX_PER_RECEIVER", defaults.max_per_receiver)?,
        };
        otp.validate()?;

        let kind = match env_or("OTP_PROVIDER", "noop").to_lowercase().as_str() {
            "" | "noop" => DeliveryKind::Noop,
            "log" => DeliveryKind::Log,
            "kavenegar" => DeliveryKind::Kavenegar,
            other => anyhow::bail!("unknown OTP_PROVIDER: {other}"),
        };
        let delivery = DeliveryConfig {
            kind,
            kavenegar_api_key: env_or("KAVENEGAR_API_KEY", ""),
            kavenegar_sender: env_or("KAVENEGAR_SENDER", ""),
            kavenegar_base_url: env_or("KAVENEGAR_BASE_URL", "https://api.kavenegar.com"),
        };
        if delivery.kind == DeliveryKind::Kavenegar {
            anyhow::ensure!(
                !delivery.kavenegar_api_key.is_empty(),
                "KAVENEGAR_API_KEY is required for the kavenegar provider"
            );
        }

        Ok(Self {
            database_url,
            jwt,
            otp,
            delivery,
            directory_cache_ttl_seconds: env_parse("DIRECTORY_CACHE_TTL_SECONDS", 300)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Falls back to `default` only when `key` is unset; a value that does not
/// parse is a startup error.
fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} is not a valid value: {raw:?}")),
        Err(VarError::NotPresent) => Ok(default),
        Err(e) => Err(e).with_context(|| format!("{key} is not a valid value")),
    }
}
