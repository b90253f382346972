use std::env;
use std::str::FromStr;

use jsonwebtoken::Algorithm;

/// Default access token lifetime: 30 minutes.
pub const DEFAULT_ACCESS_EXPIRY_SECS: u64 = 30 * 60;
/// Default refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_EXPIRY_SECS: u64 = 7 * 86_400;
/// Longest accepted token lifetime: 10 years.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 86_400;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub jwt_access_expiry_secs: u64,
    pub jwt_refresh_expiry_secs: u64,
    pub host: String,
    pub port: u16,
    pub app_name: String,
    // SMTP (optional)
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_algorithm: parse_algorithm(&optional("JWT_ALGORITHM").unwrap_or_else(|| "HS256".into()))?,
            jwt_access_expiry_secs: match optional("JWT_ACCESS_TOKEN_EXPIRES_TIME") {
                Some(v) => parse_duration(&v)?,
                None => DEFAULT_ACCESS_EXPIRY_SECS,
            },
            jwt_refresh_expiry_secs: match optional("JWT_REFRESH_TOKEN_EXPIRES_TIME") {
                Some(v) => parse_duration(&v)?,
                None => DEFAULT_REFRESH_EXPIRY_SECS,
            },
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_name: optional("APP_NAME").unwrap_or_else(|| "Meeting Room Booking".into()),
            smtp_host: optional("SMTP_HOST"),
            smtp_port: env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()),
            smtp_username: optional("SMTP_USERNAME"),
            smtp_password: optional("SMTP_PASSWORD"),
            smtp_from: optional("SMTP_FROM"),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    optional(key).ok_or_else(|| anyhow::anyhow!("Missing required env var: {}", key))
}

/// Empty values are treated the same as unset ones.
fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Only the HMAC family is accepted: the signing key is a shared secret.
pub fn parse_algorithm(value: &str) -> anyhow::Result<Algorithm> {
    let alg = Algorithm::from_str(value.trim())
        .map_err(|_| anyhow::anyhow!("Unknown JWT algorithm: {value}"))?;
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(alg),
        other => anyhow::bail!("JWT algorithm {other:?} needs a key pair; use HS256, HS384 or HS512"),
    }
}

/// Parses `"90"`, `"90s"`, `"30m"`, `"12h"` or `"7d"` into seconds.
pub fn parse_duration(value: &str) -> anyhow::Result<u64> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => value.split_at(idx),
        None => (value, ""),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid duration: {value:?}"))?;
    let factor = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => anyhow::bail!("Invalid duration unit in {value:?}"),
    };
    amount
        .checked_mul(factor)
        .filter(|secs| *secs <= MAX_DURATION_SECS)
        .ok_or_else(|| anyhow::anyhow!("Duration out of range (max 10 years): {value:?}"))
}
