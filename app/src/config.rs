//! Configuration for the core. Loaded once at startup by the binary and threaded down into
//! every component that needs it.

use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: Url,
    pub lightning: LightningConfig,
    pub bitcoin: BitcoinConfig,
    pub limits: LimitsConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: u32,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    pub limit: usize,
    pub span_secs: u64,
}

impl RateLimitConfig {
    pub fn span(&self) -> Duration {
        Duration::from_secs(self.span_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct LightningConfig {
    pub rest_endpoint: Url,
    pub macaroon_path: String,
    pub cert_path: String,
}

#[derive(Debug, Deserialize)]
pub struct BitcoinConfig {
    pub rpc_endpoint: Url,
    pub rpc_user: String,
    pub rpc_password: String,
    pub zmq_raw_tx_endpoint: String,
    pub zmq_raw_block_endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    pub max_amount_sat_per_invoice: i64,
    #[serde(default = "default_max_memo_len")]
    pub max_memo_len: usize,
    #[serde(default = "default_webhook_queue_capacity")]
    pub webhook_queue_capacity: usize,
    #[serde(default = "default_webhook_retry_base_secs")]
    pub webhook_retry_base_secs: u64,
}

impl LimitsConfig {
    pub fn webhook_retry_base(&self) -> Duration {
        Duration::from_secs(self.webhook_retry_base_secs)
    }
}

fn default_confirmation_threshold() -> u32 {
    3
}

fn default_max_memo_len() -> usize {
    256
}

fn default_webhook_queue_capacity() -> usize {
    1024
}

fn default_webhook_retry_base_secs() -> u64 {
    1
}

impl Config {
    pub fn load(path: &str) -> Self {
        let contents = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read config file {:?}: {:?}", path, e));
        toml::from_str(&contents)
            .unwrap_or_else(|e| panic!("failed to parse config file {:?}: {:?}", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = r#"
        database_url = "postgres://localhost/ledger"

        [lightning]
        rest_endpoint = "https://localhost:8080"
        macaroon_path = "/etc/lnd/admin.macaroon"
        cert_path = "/etc/lnd/tls.cert"

        [bitcoin]
        rpc_endpoint = "http://localhost:8332"
        rpc_user = "user"
        rpc_password = "pass"
        zmq_raw_tx_endpoint = "tcp://127.0.0.1:28332"
        zmq_raw_block_endpoint = "tcp://127.0.0.1:28333"

        [limits]
        max_amount_sat_per_invoice = 1000000

        [rate_limit]
        limit = 60
        span_secs = 60
    "#;

    #[test]
    fn missing_optional_fields_fall_back_to_defaults() {
        let config: Config = toml::from_str(MINIMAL_TOML).unwrap();
        assert_eq!(config.confirmation_threshold, 3);
        assert_eq!(config.limits.max_memo_len, 256);
        assert_eq!(config.limits.webhook_queue_capacity, 1024);
        assert_eq!(config.limits.webhook_retry_base(), Duration::from_secs(1));
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let with_overrides = format!(
            "{}\nconfirmation_threshold = 6\n",
            MINIMAL_TOML.replace(
                "max_amount_sat_per_invoice = 1000000",
                "max_amount_sat_per_invoice = 1000000\nmax_memo_len = 64"
            )
        );
        let config: Config = toml::from_str(&with_overrides).unwrap();
        assert_eq!(config.confirmation_threshold, 6);
        assert_eq!(config.limits.max_memo_len, 64);
    }

    #[test]
    fn rate_limit_span_converts_secs_to_duration() {
        let config: Config = toml::from_str(MINIMAL_TOML).unwrap();
        assert_eq!(config.rate_limit.span(), Duration::from_secs(60));
    }
}
