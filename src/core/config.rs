//! Environment-driven configuration for the reminder daemon
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Retry policy and per-channel webhook URLs
//! - 1.0.0: Initial database, logging and sweep cadence settings

use anyhow::{Context, Result};
use std::time::Duration;

use crate::core::models::Channel;

/// Runtime configuration loaded from environment variables (and `.env` via dotenvy)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub log_level: String,
    /// Cadence of the sweep loop (hourly by default)
    pub sweep_interval: Duration,
    /// Lifetime of the sweep lock row; a crashed holder is ignored after this
    pub sweep_lock_ttl: Duration,
    /// Maximum reminders processed in parallel within one sweep
    pub sweep_concurrency: usize,
    /// Upper bound on a single transport call
    pub transport_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_backoff: Vec<Duration>,
    pub email_webhook_url: Option<String>,
    pub sms_webhook_url: Option<String>,
    pub whatsapp_webhook_url: Option<String>,
    /// Route every channel to the log transport instead of real sinks
    pub notify_log_only: bool,
    /// Optional YAML file overriding the built-in message templates
    pub templates_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "reminders.db".to_string(),
            log_level: "info".to_string(),
            sweep_interval: Duration::from_secs(3600),
            sweep_lock_ttl: Duration::from_secs(900),
            sweep_concurrency: 8,
            transport_timeout: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_backoff: vec![
                Duration::from_secs(300),
                Duration::from_secs(900),
                Duration::from_secs(3600),
            ],
            email_webhook_url: None,
            sms_webhook_url: None,
            whatsapp_webhook_url: None,
            notify_log_only: false,
            templates_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => {
                    let secs: u64 = raw
                        .parse()
                        .with_context(|| format!("{key} must be a number of seconds, got '{raw}'"))?;
                    Ok(Duration::from_secs(secs))
                }
                None => Ok(default),
            }
        };

        let sweep_concurrency = match get("SWEEP_CONCURRENCY") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("SWEEP_CONCURRENCY must be a positive integer, got '{raw}'"))?,
            None => defaults.sweep_concurrency,
        };
        if sweep_concurrency == 0 {
            return Err(anyhow::anyhow!("SWEEP_CONCURRENCY must be at least 1"));
        }

        let retry_max_attempts = match get("RETRY_MAX_ATTEMPTS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("RETRY_MAX_ATTEMPTS must be an integer, got '{raw}'"))?,
            None => defaults.retry_max_attempts,
        };
        if retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        let retry_backoff = match get("RETRY_BACKOFF_SECONDS") {
            Some(raw) => parse_backoff(&raw)?,
            None => defaults.retry_backoff,
        };

        let notify_log_only = get("NOTIFY_LOG_ONLY")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Ok(Config {
            database_path: get("DATABASE_PATH").unwrap_or(defaults.database_path),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            sweep_interval: seconds("SWEEP_INTERVAL_SECONDS", defaults.sweep_interval)?,
            sweep_lock_ttl: seconds("SWEEP_LOCK_TTL_SECONDS", defaults.sweep_lock_ttl)?,
            sweep_concurrency,
            transport_timeout: seconds("TRANSPORT_TIMEOUT_SECONDS", defaults.transport_timeout)?,
            retry_max_attempts,
            retry_backoff,
            email_webhook_url: get("EMAIL_WEBHOOK_URL"),
            sms_webhook_url: get("SMS_WEBHOOK_URL"),
            whatsapp_webhook_url: get("WHATSAPP_WEBHOOK_URL"),
            notify_log_only,
            templates_path: get("TEMPLATES_PATH"),
        })
    }

    /// Webhook endpoint configured for a channel, if any
    pub fn webhook_url(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email_webhook_url.as_deref(),
            Channel::Sms => self.sms_webhook_url.as_deref(),
            Channel::Whatsapp => self.whatsapp_webhook_url.as_deref(),
        }
    }
}

/// Parse a comma separated list of seconds, e.g. "300,900,3600"
fn parse_backoff(raw: &str) -> Result<Vec<Duration>> {
    let steps = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("Invalid RETRY_BACKOFF_SECONDS entry '{s}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    if steps.is_empty() {
        return Err(anyhow::anyhow!("RETRY_BACKOFF_SECONDS must list at least one delay"));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_path, "reminders.db");
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_backoff.len(), 3);
        assert!(!config.notify_log_only);
        assert!(config.webhook_url(Channel::Sms).is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_PATH", "/tmp/r.db"),
            ("SWEEP_INTERVAL_SECONDS", "300"),
            ("SWEEP_CONCURRENCY", "2"),
            ("RETRY_BACKOFF_SECONDS", "60, 120"),
            ("SMS_WEBHOOK_URL", "http://localhost:9000/sms"),
            ("NOTIFY_LOG_ONLY", "true"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, "/tmp/r.db");
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.sweep_concurrency, 2);
        assert_eq!(
            config.retry_backoff,
            vec![Duration::from_secs(60), Duration::from_secs(120)]
        );
        assert_eq!(
            config.webhook_url(Channel::Sms),
            Some("http://localhost:9000/sms")
        );
        assert!(config.notify_log_only);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_lookup(lookup(&[("SWEEP_INTERVAL_SECONDS", "hourly")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SWEEP_CONCURRENCY", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("RETRY_BACKOFF_SECONDS", ",")])).is_err());
    }
}
