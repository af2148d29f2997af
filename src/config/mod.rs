use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::{FaucetError, FaucetResult};
use crate::faucet::TokenAsset;
use crate::faucet::orchestrator::FaucetPolicy;
use crate::faucet::units::{Drops, TokenAmount};
use crate::identity::{validate_classic_address, validate_seed_format};
use crate::rpc::{PayoutTiming, RetryPolicy};

#[derive(Debug, Deserialize)]
pub struct FaucetBotConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub faucet: FaucetConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FaucetBotConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("FAUCET_BOT_CONFIG")
            .unwrap_or_else(|_| "config/faucet.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("FAUCET_BOT_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/faucet.{env_override}.toml");
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("FAUCET")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("faucet.admin_users")
                    .try_parsing(true),
            )
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize faucet bot configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the faucet cannot run with.
    pub fn validate(&self) -> FaucetResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(config_error("database.url must be specified"));
        }
        if self.server.port == 0 {
            return Err(config_error("server.port must be greater than zero"));
        }
        if self.ledger.rpc_url.trim().is_empty() {
            return Err(config_error("ledger.rpc_url must be specified"));
        }
        if self.ledger.retry_attempts == 0 {
            return Err(config_error("ledger.retry_attempts must be at least 1"));
        }
        self.faucet.validate()?;
        if self.ledger.confirm_wait() >= self.faucet.payout_timeout() {
            return Err(config_error(
                "ledger.confirm_wait_ms must be shorter than faucet.payout_timeout_secs",
            ));
        }
        if self.bot.command_prefix.trim().is_empty() {
            return Err(config_error("bot.command_prefix cannot be empty"));
        }
        Ok(())
    }

    pub fn policy(&self) -> FaucetResult<FaucetPolicy> {
        Ok(FaucetPolicy {
            asset: self.faucet.asset(),
            hot_wallet: self.faucet.hot_wallet_address.clone(),
            claim_amount: self.faucet.claim_amount()?,
            min_balance: self.faucet.min_balance()?,
            cooldown: self.faucet.cooldown(),
            payout_timeout: self.faucet.payout_timeout(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "LedgerConfig::default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "LedgerConfig::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "LedgerConfig::default_ledger_offset")]
    pub ledger_offset: u32,
    #[serde(default = "LedgerConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "LedgerConfig::default_confirm_wait_ms")]
    pub confirm_wait_ms: u64,
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(5_000).clamp(100, 60_000);
        Duration::from_millis(millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn confirm_wait(&self) -> Duration {
        Duration::from_millis(self.confirm_wait_ms)
    }

    pub fn payout_timing(&self) -> PayoutTiming {
        PayoutTiming {
            ledger_offset: self.ledger_offset.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(100)),
            confirm_wait: self.confirm_wait(),
        }
    }

    const fn default_retry_attempts() -> u32 {
        3
    }

    const fn default_retry_backoff_ms() -> u64 {
        250
    }

    const fn default_ledger_offset() -> u32 {
        20
    }

    const fn default_poll_interval_ms() -> u64 {
        1_000
    }

    const fn default_confirm_wait_ms() -> u64 {
        20_000
    }
}

#[derive(Debug, Deserialize)]
pub struct FaucetConfig {
    #[serde(default = "FaucetConfig::default_currency_code")]
    pub currency_code: String,
    pub issuer: String,
    pub hot_wallet_address: String,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub hot_wallet_seed: Option<SecretString>,
    #[serde(default = "FaucetConfig::default_daily_amount")]
    pub daily_amount: String,
    #[serde(default = "FaucetConfig::default_cooldown_hours")]
    pub cooldown_hours: u64,
    #[serde(default = "FaucetConfig::default_min_xrp_balance")]
    pub min_xrp_balance: String,
    #[serde(default = "FaucetConfig::default_payout_timeout_secs")]
    pub payout_timeout_secs: u64,
    #[serde(default = "FaucetConfig::default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "FaucetConfig::default_balance_cache_secs")]
    pub balance_cache_secs: u64,
    #[serde(default)]
    pub admin_users: Vec<String>,
}

impl FaucetConfig {
    fn validate(&self) -> FaucetResult<()> {
        let seed = self
            .hot_wallet_seed
            .as_ref()
            .ok_or_else(|| config_error("faucet.hot_wallet_seed is not configured"))?;
        validate_seed_format(seed).map_err(|err| config_error(&err.to_string()))?;
        validate_classic_address(&self.hot_wallet_address)
            .map_err(|err| config_error(&format!("faucet.hot_wallet_address: {err}")))?;
        validate_classic_address(&self.issuer)
            .map_err(|err| config_error(&format!("faucet.issuer: {err}")))?;
        if self.currency_code.trim().len() < 3 || self.currency_code.trim().len() > 40 {
            return Err(config_error("faucet.currency_code must be 3-40 characters"));
        }
        if self.claim_amount()? == TokenAmount::ZERO {
            return Err(config_error("faucet.daily_amount must be positive"));
        }
        self.min_balance()?;
        if self.cooldown_hours == 0 {
            return Err(config_error("faucet.cooldown_hours must be positive"));
        }
        if self.payout_timeout_secs == 0 || self.reconcile_interval_secs == 0 {
            return Err(config_error(
                "faucet payout timeout and reconcile interval must be positive",
            ));
        }
        Ok(())
    }

    pub fn asset(&self) -> TokenAsset {
        TokenAsset {
            currency: self.currency_code.trim().to_string(),
            issuer: self.issuer.trim().to_string(),
        }
    }

    pub fn claim_amount(&self) -> FaucetResult<TokenAmount> {
        self.daily_amount
            .parse()
            .map_err(|err| config_error(&format!("faucet.daily_amount: {err}")))
    }

    pub fn min_balance(&self) -> FaucetResult<Drops> {
        Drops::from_xrp_str(&self.min_xrp_balance)
            .map_err(|err| config_error(&format!("faucet.min_xrp_balance: {err}")))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_hours.saturating_mul(3600))
    }

    pub fn payout_timeout(&self) -> Duration {
        Duration::from_secs(self.payout_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn balance_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_cache_secs.max(1))
    }

    fn default_currency_code() -> String {
        "TXT".to_string()
    }

    fn default_daily_amount() -> String {
        "100".to_string()
    }

    const fn default_cooldown_hours() -> u64 {
        24
    }

    fn default_min_xrp_balance() -> String {
        "0.1".to_string()
    }

    const fn default_payout_timeout_secs() -> u64 {
        45
    }

    const fn default_reconcile_interval_secs() -> u64 {
        60
    }

    const fn default_balance_cache_secs() -> u64 {
        30
    }
}

#[derive(Debug, Deserialize)]
pub struct BotConfig {
    #[serde(default = "BotConfig::default_command_prefix")]
    pub command_prefix: String,
    /// Bearer token the chat bridge must present on `/bot/command`.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub bridge_token: Option<SecretString>,
}

impl BotConfig {
    fn default_command_prefix() -> String {
        "!".to_string()
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: Self::default_command_prefix(),
            bridge_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

/// Blank values count as unset.
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|secret| !secret.trim().is_empty())
        .map(|secret| SecretString::from(secret.trim().to_string())))
}

fn config_error(message: &str) -> FaucetError {
    FaucetError::Configuration(message.to_string())
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
