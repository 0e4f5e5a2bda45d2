use std::env;
use std::net::{IpAddr, SocketAddr};

use chrono::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::payment::{BankInfo, DEFAULT_CURRENCY};
use crate::signing::KeyRing;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_RESERVATION_TTL_MINS: i64 = 15;
const DEFAULT_INTENT_TTL_MINS: i64 = 10;
const DEFAULT_QR_KEY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Timing and currency knobs for the booking services.
#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub reservation_ttl: Duration,
    pub intent_ttl: Duration,
    pub currency: String,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::minutes(DEFAULT_RESERVATION_TTL_MINS),
            intent_ttl: Duration::minutes(DEFAULT_INTENT_TTL_MINS),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub environment: Environment,
    pub cors_allowed_origins: Option<String>,
    pub booking: BookingSettings,
    pub qr_keys: KeyRing,
    pub bank: Option<BankInfo>,
    /// Interval of the background expiry sweep; `None` disables it.
    pub expiry_sweep: Option<std::time::Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let environment = match get("RUST_ENV") {
            Some(v) if v.eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Development,
        };

        let host = get("HOST")
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
            .parse()
            .map_err(|e| invalid("HOST", e))?;
        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;

        let booking = BookingSettings {
            reservation_ttl: Duration::minutes(parse_or(
                "RESERVATION_TTL_MINS",
                get("RESERVATION_TTL_MINS"),
                DEFAULT_RESERVATION_TTL_MINS,
            )?),
            intent_ttl: Duration::minutes(parse_or(
                "INTENT_TTL_MINS",
                get("INTENT_TTL_MINS"),
                DEFAULT_INTENT_TTL_MINS,
            )?),
            currency: DEFAULT_CURRENCY.to_string(),
        };
        if booking.reservation_ttl <= Duration::zero() || booking.intent_ttl <= Duration::zero() {
            return Err(ConfigError::Invalid {
                key: "RESERVATION_TTL_MINS/INTENT_TTL_MINS",
                reason: "must be positive".to_string(),
            });
        }

        let sweep_secs: u64 = parse_or("EXPIRY_SWEEP_SECS", get("EXPIRY_SWEEP_SECS"), 0)?;
        let expiry_sweep = (sweep_secs > 0).then(|| std::time::Duration::from_secs(sweep_secs));

        let qr_keys = key_ring(
            environment,
            get("QR_SECRET"),
            parse_or("QR_KEY_VERSION", get("QR_KEY_VERSION"), DEFAULT_QR_KEY_VERSION)?,
            get("QR_PREVIOUS_SECRETS"),
        )?;

        let bank = match (get("BANK_NAME"), get("BANK_ACCOUNT_NUMBER")) {
            (Some(bank_name), Some(account_number)) => Some(BankInfo {
                bank_name,
                account_number,
                account_name: get("BANK_ACCOUNT_NAME").unwrap_or_default(),
                branch: get("BANK_BRANCH"),
            }),
            _ => None,
        };

        Ok(Self {
            host,
            port,
            database_url: get("DATABASE_URL"),
            environment,
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS"),
            booking,
            qr_keys,
            bank,
            expiry_sweep,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn invalid(key: &'static str, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: err.to_string(),
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e| invalid(key, e)),
        None => Ok(default),
    }
}

/// The current key plus any retired ones from `QR_PREVIOUS_SECRETS`
/// (`version:secret` pairs separated by commas).
fn key_ring(
    environment: Environment,
    secret: Option<String>,
    version: u32,
    previous: Option<String>,
) -> Result<KeyRing, ConfigError> {
    let secret = match secret {
        Some(secret) => secret,
        None if environment.is_production() => return Err(ConfigError::Missing("QR_SECRET")),
        None => {
            tracing::warn!(
                "QR_SECRET not set, using an ephemeral signing key; QR codes will not survive a restart"
            );
            format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        }
    };

    let mut ring = KeyRing::new(version, secret);
    for pair in previous.iter().flat_map(|p| p.split(',')) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (ver, old) = pair.split_once(':').ok_or_else(|| ConfigError::Invalid {
            key: "QR_PREVIOUS_SECRETS",
            reason: format!("expected version:secret, got '{pair}'"),
        })?;
        let ver: u32 = ver
            .trim()
            .parse()
            .map_err(|e| invalid("QR_PREVIOUS_SECRETS", e))?;
        ring = ring.with_retired(ver, old.trim());
    }
    Ok(ring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::KeyProvider;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.database_url.is_none());
        assert_eq!(config.booking.reservation_ttl, Duration::minutes(15));
        assert_eq!(config.booking.intent_ttl, Duration::minutes(10));
        assert!(config.expiry_sweep.is_none());
        assert!(config.bank.is_none());
        assert_eq!(config.qr_keys.current_version(), 1);
    }

    #[test]
    fn test_production_requires_qr_secret() {
        let err = config(&[("RUST_ENV", "production")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("QR_SECRET")));
        assert!(config(&[("RUST_ENV", "production"), ("QR_SECRET", "s3cret")]).is_ok());
    }

    #[test]
    fn test_previous_secrets_are_loaded() {
        let config = config(&[
            ("QR_SECRET", "new"),
            ("QR_KEY_VERSION", "3"),
            ("QR_PREVIOUS_SECRETS", "1:first, 2:second"),
        ])
        .unwrap();
        assert_eq!(config.qr_keys.current_version(), 3);
        assert_eq!(config.qr_keys.key(1), Some(&b"first"[..]));
        assert_eq!(config.qr_keys.key(2), Some(&b"second"[..]));
        assert_eq!(config.qr_keys.key(3), Some(&b"new"[..]));
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(config(&[("PORT", "eighty")]).is_err());
        assert!(config(&[("QR_PREVIOUS_SECRETS", "nocolon")]).is_err());
        assert!(config(&[("RESERVATION_TTL_MINS", "0")]).is_err());
    }

    #[test]
    fn test_bank_info_needs_name_and_account() {
        let config = config(&[
            ("BANK_NAME", "Vietcombank"),
            ("BANK_ACCOUNT_NUMBER", "0123456789"),
            ("BANK_ACCOUNT_NAME", "CINEMA CO"),
        ])
        .unwrap();
        let bank = config.bank.unwrap();
        assert_eq!(bank.bank_name, "Vietcombank");
        assert!(bank.branch.is_none());
    }
}
