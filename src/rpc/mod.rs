//! XRPL JSON-RPC client.
//!
//! rippled reports most failures inside a successful JSON-RPC response as
//! `{"status": "error", "error": "<code>"}`, so every call is decoded to a
//! [`Value`] first and split into transport and ledger errors here.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{FaucetError, FaucetResult};
use crate::faucet::units::{Drops, TOKEN_DECIMALS, TokenAmount};
use crate::faucet::{LedgerFacts, NodeStatus, TokenAsset, TokenHolding};

mod payout;

pub use payout::{PayoutTiming, XrplPayoutSubmitter};

const MAX_BACKOFF: Duration = Duration::from_secs(5);
const MAX_LINE_PAGES: usize = 10;
const ACCOUNT_NOT_FOUND: &str = "actNotFound";

#[derive(Debug, Error)]
pub enum RpcCallError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("ledger returned {code}: {message}")]
    Ledger { code: String, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RpcCallError {
    pub fn is_code(&self, expected: &str) -> bool {
        matches!(self, RpcCallError::Ledger { code, .. } if code == expected)
    }
}

impl From<RpcCallError> for FaucetError {
    fn from(err: RpcCallError) -> Self {
        FaucetError::ExternalService(err.to_string())
    }
}

/// Bounded exponential backoff for read-only calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[derive(Clone)]
pub struct XrplClient {
    inner: HttpClient,
    endpoint: String,
    retry: RetryPolicy,
}

impl XrplClient {
    pub fn new(endpoint: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(retry.attempts >= 1, "At least one RPC attempt is required");

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build XRPL client for {endpoint}"))?;

        Ok(Self {
            inner: client,
            endpoint: endpoint.to_string(),
            retry,
        })
    }

    /// Single attempt, no retry. Used for anything that must not repeat.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value, RpcCallError> {
        let result: Value = self
            .inner
            .request(method, rpc_params![params])
            .await
            .map_err(|err| RpcCallError::Transport(format!("{method}: {err}")))?;

        if result.get("status").and_then(Value::as_str) == Some("error") {
            let code = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let message = result
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(RpcCallError::Ledger { code, message });
        }
        Ok(result)
    }

    /// Read-only call, retried on transport failures.
    pub(crate) async fn read(&self, method: &str, params: Value) -> Result<Value, RpcCallError> {
        let mut attempt = 1;
        loop {
            match self.call(method, params.clone()).await {
                Err(RpcCallError::Transport(reason)) if attempt < self.retry.attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(method, attempt, ?delay, "XRPL read failed, retrying: {reason}");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn validated_ledger_index(&self) -> Result<u32, RpcCallError> {
        let result = self
            .read("ledger", json!({ "ledger_index": "validated" }))
            .await?;
        result
            .get("ledger_index")
            .and_then(Value::as_u64)
            .and_then(|index| u32::try_from(index).ok())
            .ok_or_else(|| RpcCallError::Malformed("ledger response without ledger_index".into()))
    }

    async fn account_xrp_balance(&self, account: &str) -> Result<Drops, RpcCallError> {
        let params = json!({ "account": account, "ledger_index": "validated" });
        let result = match self.read("account_info", params).await {
            Ok(result) => result,
            Err(err) if err.is_code(ACCOUNT_NOT_FOUND) => return Ok(Drops::ZERO),
            Err(err) => return Err(err),
        };
        let balance = result
            .pointer("/account_data/Balance")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcCallError::Malformed("account_info without Balance".into()))?;
        Drops::from_drops_str(balance).map_err(|err| RpcCallError::Malformed(err.to_string()))
    }

    /// One `account_lines` page, or `None` for an unfunded account.
    async fn lines_page(
        &self,
        account: &str,
        peer: Option<&str>,
        marker: Option<&Value>,
    ) -> Result<Option<(Vec<Value>, Option<Value>)>, RpcCallError> {
        let mut params = json!({ "account": account, "ledger_index": "validated" });
        if let Some(peer) = peer {
            params["peer"] = json!(peer);
        }
        if let Some(marker) = marker {
            params["marker"] = marker.clone();
        }
        let mut result = match self.read("account_lines", params).await {
            Ok(result) => result,
            Err(err) if err.is_code(ACCOUNT_NOT_FOUND) => return Ok(None),
            Err(err) => return Err(err),
        };
        let lines = match result.get_mut("lines").map(Value::take) {
            Some(Value::Array(lines)) => lines,
            _ => return Err(RpcCallError::Malformed("account_lines without lines".into())),
        };
        Ok(Some((lines, result.get("marker").cloned())))
    }

    /// The account's trust line to `asset.issuer` for `asset.currency`.
    async fn trust_line(
        &self,
        account: &str,
        asset: &TokenAsset,
    ) -> Result<Option<Value>, RpcCallError> {
        let wanted = normalize_currency(&asset.currency);
        let mut marker: Option<Value> = None;

        for _ in 0..MAX_LINE_PAGES {
            let Some((lines, next)) = self
                .lines_page(account, Some(&asset.issuer), marker.as_ref())
                .await?
            else {
                return Ok(None);
            };
            let found = lines.iter().find(|line| {
                line.get("account").and_then(Value::as_str) == Some(asset.issuer.as_str())
                    && line
                        .get("currency")
                        .and_then(Value::as_str)
                        .map(normalize_currency)
                        .as_deref()
                        == Some(wanted.as_str())
            });
            if let Some(line) = found {
                return Ok(Some(line.clone()));
            }

            marker = next;
            if marker.is_none() {
                break;
            }
        }
        Ok(None)
    }

    async fn holdings(&self, account: &str) -> Result<Vec<TokenHolding>, RpcCallError> {
        let mut holdings = Vec::new();
        let mut marker: Option<Value> = None;

        for _ in 0..MAX_LINE_PAGES {
            let Some((lines, next)) = self.lines_page(account, None, marker.as_ref()).await? else {
                break;
            };
            holdings.extend(lines.iter().filter_map(holding_from_line));
            marker = next;
            if marker.is_none() {
                break;
            }
        }
        Ok(holdings)
    }
}

#[async_trait]
impl LedgerFacts for XrplClient {
    async fn trust_line_present(&self, wallet: &str, asset: &TokenAsset) -> FaucetResult<bool> {
        let line = self.trust_line(wallet, asset).await?;
        debug!(wallet, present = line.is_some(), "Trust line lookup");
        Ok(line.is_some())
    }

    async fn xrp_balance(&self, wallet: &str) -> FaucetResult<Drops> {
        Ok(self.account_xrp_balance(wallet).await?)
    }

    async fn token_balance(&self, wallet: &str, asset: &TokenAsset) -> FaucetResult<TokenAmount> {
        let Some(line) = self.trust_line(wallet, asset).await? else {
            return Ok(TokenAmount::ZERO);
        };
        let balance = line
            .get("balance")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcCallError::Malformed("trust line without balance".into()))?;
        parse_line_balance(balance)
    }

    async fn token_holdings(&self, wallet: &str) -> FaucetResult<Vec<TokenHolding>> {
        Ok(self.holdings(wallet).await?)
    }

    async fn node_status(&self) -> FaucetResult<NodeStatus> {
        let result = self.read("server_info", json!({})).await?;
        Ok(parse_server_info(&self.endpoint, &result)?)
    }
}

fn holding_from_line(line: &Value) -> Option<TokenHolding> {
    let balance = parse_line_balance(line.get("balance")?.as_str()?).ok()?;
    if balance == TokenAmount::ZERO {
        return None;
    }
    Some(TokenHolding {
        currency: display_currency(line.get("currency")?.as_str()?),
        issuer: line.get("account")?.as_str()?.to_string(),
        balance,
    })
}

fn parse_server_info(endpoint: &str, result: &Value) -> Result<NodeStatus, RpcCallError> {
    let info = result
        .get("info")
        .ok_or_else(|| RpcCallError::Malformed("server_info without info".into()))?;
    let text = |key: &str| {
        info.get(key)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    };
    Ok(NodeStatus {
        endpoint: endpoint.to_string(),
        server_state: text("server_state"),
        build_version: text("build_version"),
        validated_ledger: info
            .pointer("/validated_ledger/seq")
            .and_then(Value::as_u64)
            .and_then(|seq| u32::try_from(seq).ok()),
    })
}

/// Human-readable currency: 40-hex codes that spell printable ASCII are
/// decoded, anything else is shown as the ledger reports it.
pub fn display_currency(code: &str) -> String {
    if code.len() != 40 {
        return code.to_string();
    }
    let Ok(bytes) = hex::decode(code) else {
        return code.to_string();
    };
    let trimmed: &[u8] = match bytes.iter().rposition(|byte| *byte != 0) {
        Some(end) => &bytes[..=end],
        None => return code.to_string(),
    };
    if trimmed.iter().all(|byte| byte.is_ascii_graphic()) {
        String::from_utf8_lossy(trimmed).into_owned()
    } else {
        code.to_string()
    }
}

/// Ledger representation of a currency code: standard three-character codes
/// stay as they are, anything else becomes the 40-character hex form.
pub fn normalize_currency(code: &str) -> String {
    let trimmed = code.trim();
    if trimmed.len() == 3 {
        return trimmed.to_string();
    }
    if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return trimmed.to_ascii_uppercase();
    }
    let mut bytes = trimmed.as_bytes().to_vec();
    bytes.resize(20, 0);
    hex::encode_upper(bytes)
}

/// Trust line balances are decimal strings with up to 15 significant
/// digits; extra precision is truncated and negative balances count as zero.
fn parse_line_balance(balance: &str) -> FaucetResult<TokenAmount> {
    let trimmed = balance.trim();
    if trimmed.starts_with('-') {
        return Ok(TokenAmount::ZERO);
    }
    if trimmed.contains(['e', 'E']) {
        return Err(FaucetError::ExternalService(format!(
            "unsupported balance notation {trimmed}"
        )));
    }
    let truncated = match trimmed.split_once('.') {
        Some((whole, frac)) if frac.len() > TOKEN_DECIMALS as usize => {
            format!("{whole}.{}", &frac[..TOKEN_DECIMALS as usize])
        }
        _ => trimmed.to_string(),
    };
    truncated
        .parse()
        .map_err(|err| FaucetError::ExternalService(format!("invalid trust line balance: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_normalization() {
        assert_eq!(normalize_currency("TXT"), "TXT");
        let hex = normalize_currency("TEXTRP");
        assert_eq!(hex.len(), 40);
        assert!(hex.starts_with("544558545250"));
        assert!(hex.ends_with("0000"));
        assert_eq!(normalize_currency(&hex.to_ascii_lowercase()), hex);
    }

    #[test]
    fn line_balance_parsing() {
        assert_eq!(parse_line_balance("250").unwrap(), "250".parse().unwrap());
        assert_eq!(
            parse_line_balance("1.123456789").unwrap(),
            "1.123456".parse().unwrap()
        );
        assert_eq!(parse_line_balance("-5").unwrap(), TokenAmount::ZERO);
        assert!(parse_line_balance("1e-7").is_err());
    }

    #[test]
    fn holdings_skip_empty_and_decode_names() {
        let line = json!({ "account": "rIssuer", "currency": normalize_currency("TEXTRP"), "balance": "12.5" });
        assert_eq!(
            holding_from_line(&line),
            Some(TokenHolding {
                currency: "TEXTRP".to_string(),
                issuer: "rIssuer".to_string(),
                balance: "12.5".parse().unwrap(),
            })
        );
        let empty = json!({ "account": "rIssuer", "currency": "TXT", "balance": "0" });
        assert_eq!(holding_from_line(&empty), None);
        assert_eq!(display_currency("TXT"), "TXT");
        let binary = format!("01{}", "0".repeat(38));
        assert_eq!(display_currency(&binary), binary);
    }

    #[test]
    fn server_info_fields() {
        let result = json!({
            "info": {
                "build_version": "2.3.0",
                "server_state": "full",
                "validated_ledger": { "seq": 91_234_567 },
            }
        });
        let status = parse_server_info("https://node", &result).unwrap();
        assert_eq!(status.server_state, "full");
        assert_eq!(status.build_version, "2.3.0");
        assert_eq!(status.validated_ledger, Some(91_234_567));

        let syncing = parse_server_info("https://node", &json!({ "info": {} })).unwrap();
        assert_eq!(syncing.validated_ledger, None);
        assert_eq!(syncing.server_state, "unknown");
        assert!(parse_server_info("https://node", &json!({})).is_err());
    }

    #[test]
    fn backoff_is_bounded() {
        let retry = RetryPolicy {
            attempts: 8,
            base_backoff: Duration::from_millis(200),
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(800));
        assert_eq!(retry.delay_for(10), MAX_BACKOFF);
    }

    #[test]
    fn ledger_error_codes_are_matched() {
        let err = RpcCallError::Ledger {
            code: "actNotFound".to_string(),
            message: String::new(),
        };
        assert!(err.is_code(ACCOUNT_NOT_FOUND));
        assert!(!RpcCallError::Transport("down".into()).is_code(ACCOUNT_NOT_FOUND));
    }
}
