//! Faucet payments through rippled's sign-and-submit mode.
//!
//! A payment is submitted once and never resubmitted. It carries a
//! `LastLedgerSequence`, so once the validated ledger has moved past it the
//! transaction can no longer appear, and a memo holding the idempotency key,
//! so a payment whose hash was never learned can still be found in the hot
//! wallet's history.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::{RpcCallError, XrplClient, normalize_currency};
use crate::error::FaucetResult;
use crate::faucet::{
    PayoutOutcome, PayoutQuery, PayoutRequest, PayoutStatusReport, PayoutSubmitter, PayoutTicket,
};

const SUCCESS: &str = "tesSUCCESS";
const TX_NOT_FOUND: &str = "txnNotFound";
const MEMO_TYPE: &str = "faucet/idempotency-key";
const HISTORY_PAGE_SIZE: u32 = 200;
const MAX_HISTORY_PAGES: usize = 5;

/// Timing knobs for submission and confirmation.
#[derive(Debug, Clone, Copy)]
pub struct PayoutTiming {
    /// Ledgers after the current validated one in which the payment may land.
    pub ledger_offset: u32,
    pub poll_interval: Duration,
    /// Time spent waiting for validation before reporting an ambiguous result.
    pub confirm_wait: Duration,
}

pub struct XrplPayoutSubmitter {
    client: XrplClient,
    hot_wallet: String,
    seed: SecretString,
    timing: PayoutTiming,
}

impl XrplPayoutSubmitter {
    pub fn new(
        client: XrplClient,
        hot_wallet: String,
        seed: SecretString,
        timing: PayoutTiming,
    ) -> Self {
        assert!(timing.ledger_offset > 0, "Ledger offset must be positive");
        assert!(
            !timing.poll_interval.is_zero(),
            "Poll interval must be positive"
        );
        Self {
            client,
            hot_wallet,
            seed,
            timing,
        }
    }

    async fn lookup_tx(&self, hash: &str) -> Result<Option<ValidatedTx>, RpcCallError> {
        let result = match self
            .client
            .read("tx", json!({ "transaction": hash, "binary": false }))
            .await
        {
            Ok(result) => result,
            Err(err) if err.is_code(TX_NOT_FOUND) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(ValidatedTx::from_result(hash, &result))
    }

    /// Searches hot wallet history for a payment carrying `key`, within
    /// `window` (inclusive ledger range) when one is known.
    async fn find_by_memo(
        &self,
        key: &str,
        window: Option<(u32, u32)>,
    ) -> Result<MemoScan, RpcCallError> {
        let wanted = memo_hex(key);
        let (min, max) = window.map_or((-1, -1), |(min, max)| (i64::from(min), i64::from(max)));
        let mut marker: Option<Value> = None;

        for _ in 0..MAX_HISTORY_PAGES {
            let mut params = json!({
                "account": self.hot_wallet,
                "ledger_index_min": min,
                "ledger_index_max": max,
                "limit": HISTORY_PAGE_SIZE,
                "forward": false,
            });
            if let Some(marker) = &marker {
                params["marker"] = marker.clone();
            }
            let result = self.client.read("account_tx", params).await?;
            let transactions = result
                .get("transactions")
                .and_then(Value::as_array)
                .ok_or_else(|| RpcCallError::Malformed("account_tx without transactions".into()))?;

            for entry in transactions {
                let tx = entry.get("tx").or_else(|| entry.get("tx_json"));
                let Some(tx) = tx else { continue };
                if !carries_memo(tx, &wanted) {
                    continue;
                }
                let hash = tx
                    .get("hash")
                    .or_else(|| entry.get("hash"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if let Some(found) = ValidatedTx::from_result(hash, entry) {
                    return Ok(MemoScan::Found(found));
                }
            }

            marker = result.get("marker").cloned();
            if marker.is_none() {
                return Ok(MemoScan::Absent);
            }
        }
        debug!(key, "Memo scan stopped at page limit");
        Ok(MemoScan::Incomplete)
    }

    async fn wait_for_validation(&self, hash: &str, last_ledger: u32) -> PayoutOutcome {
        let deadline = Instant::now() + self.timing.confirm_wait;
        let ticket = PayoutTicket {
            transaction_reference: Some(hash.to_string()),
            last_ledger_sequence: Some(last_ledger),
        };

        while Instant::now() < deadline {
            sleep(self.timing.poll_interval).await;
            match self.lookup_tx(hash).await {
                Ok(Some(validated)) => return validated.into_outcome(),
                Ok(None) => debug!(hash, "Payment not validated yet"),
                Err(err) => warn!(hash, "Payment status poll failed: {err}"),
            }
        }
        warn!(hash, last_ledger, "Payment not validated within wait budget");
        PayoutOutcome::Ambiguous(ticket)
    }
}

#[async_trait]
impl PayoutSubmitter for XrplPayoutSubmitter {
    async fn submit_payment(&self, request: &PayoutRequest) -> PayoutOutcome {
        let validated = match self.client.validated_ledger_index().await {
            Ok(index) => index,
            // nothing was sent yet, so a retry cannot double-pay
            Err(err) => return PayoutOutcome::DefiniteFailure(format!("ledger unavailable: {err}")),
        };
        let last_ledger = validated.saturating_add(self.timing.ledger_offset);

        let tx_json = json!({
            "TransactionType": "Payment",
            "Account": request.source,
            "Destination": request.destination,
            "Amount": {
                "currency": normalize_currency(&request.asset.currency),
                "issuer": request.asset.issuer,
                "value": request.amount.to_string(),
            },
            "LastLedgerSequence": last_ledger,
            "Memos": [{
                "Memo": {
                    "MemoType": hex::encode_upper(MEMO_TYPE),
                    "MemoData": memo_hex(&request.idempotency_key),
                }
            }],
        });
        let params = json!({
            "tx_json": tx_json,
            "secret": self.seed.expose_secret(),
        });

        let result = match self.client.call("submit", params).await {
            Ok(result) => result,
            Err(RpcCallError::Ledger { code, message }) => {
                // rejected before signing completed
                return PayoutOutcome::DefiniteFailure(format!("{code}: {message}"));
            }
            Err(err) => {
                warn!(key = %request.idempotency_key, "Submit outcome unknown: {err}");
                return PayoutOutcome::Ambiguous(PayoutTicket {
                    transaction_reference: None,
                    last_ledger_sequence: Some(last_ledger),
                });
            }
        };

        let engine_result = result
            .get("engine_result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let hash = result
            .pointer("/tx_json/hash")
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(
            key = %request.idempotency_key,
            destination = %request.destination,
            engine_result = %engine_result,
            hash = hash.as_deref().unwrap_or(""),
            "Payment submitted"
        );

        match classify_submit(&engine_result) {
            SubmitClass::Rejected => return PayoutOutcome::DefiniteFailure(engine_result),
            SubmitClass::Provisional => {
                // another server may still apply it before the last ledger
                warn!(
                    key = %request.idempotency_key,
                    engine_result = %engine_result,
                    last_ledger,
                    "Payment not applied locally, leaving it to reconciliation"
                );
                return PayoutOutcome::Ambiguous(PayoutTicket {
                    transaction_reference: hash,
                    last_ledger_sequence: Some(last_ledger),
                });
            }
            SubmitClass::Queued => {}
        }
        match hash {
            Some(hash) => self.wait_for_validation(&hash, last_ledger).await,
            None => PayoutOutcome::Ambiguous(PayoutTicket {
                transaction_reference: None,
                last_ledger_sequence: Some(last_ledger),
            }),
        }
    }

    async fn payout_status(&self, query: &PayoutQuery) -> FaucetResult<PayoutStatusReport> {
        if let Some(hash) = &query.transaction_reference {
            if let Some(validated) = self.lookup_tx(hash).await? {
                return Ok(validated.into_status());
            }
        }

        let Some(last_ledger) = query.last_ledger_sequence else {
            return Ok(match self.find_by_memo(&query.idempotency_key, None).await? {
                MemoScan::Found(found) => found.into_status(),
                MemoScan::Absent | MemoScan::Incomplete => PayoutStatusReport::Unknown,
            });
        };

        // read before scanning: an expired window is then fully validated
        let validated = self.client.validated_ledger_index().await?;
        let window = (
            last_ledger.saturating_sub(self.timing.ledger_offset),
            last_ledger,
        );
        match self.find_by_memo(&query.idempotency_key, Some(window)).await? {
            MemoScan::Found(found) => Ok(found.into_status()),
            MemoScan::Absent if validated > last_ledger => Ok(PayoutStatusReport::Failed(
                format!("expired after ledger {last_ledger}"),
            )),
            MemoScan::Absent | MemoScan::Incomplete => Ok(PayoutStatusReport::Unknown),
        }
    }
}

/// Result of searching hot wallet history for a memo.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MemoScan {
    Found(ValidatedTx),
    /// The whole range was searched.
    Absent,
    Incomplete,
}

/// A transaction found in a validated ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidatedTx {
    hash: String,
    result: String,
}

impl ValidatedTx {
    /// Reads `validated` and `meta.TransactionResult` from a `tx` result or
    /// an `account_tx` entry.
    fn from_result(hash: &str, value: &Value) -> Option<Self> {
        if value.get("validated").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        let result = value
            .pointer("/meta/TransactionResult")
            .and_then(Value::as_str)?;
        Some(Self {
            hash: hash.to_string(),
            result: result.to_string(),
        })
    }

    fn into_outcome(self) -> PayoutOutcome {
        if self.result == SUCCESS {
            PayoutOutcome::Success(self.hash)
        } else {
            PayoutOutcome::DefiniteFailure(self.result)
        }
    }

    fn into_status(self) -> PayoutStatusReport {
        if self.result == SUCCESS {
            PayoutStatusReport::Confirmed(self.hash)
        } else {
            PayoutStatusReport::Failed(self.result)
        }
    }
}

/// How far a preliminary submit result can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitClass {
    /// `tem*`: malformed, can never be included in any ledger.
    Rejected,
    /// `tel*`/`tef*`: not applied by this server, but still relayable until
    /// the last ledger sequence passes.
    Provisional,
    /// Applied or queued; the validated ledger decides.
    Queued,
}

fn classify_submit(engine_result: &str) -> SubmitClass {
    if engine_result.starts_with("tem") {
        SubmitClass::Rejected
    } else if engine_result.starts_with("tel") || engine_result.starts_with("tef") {
        SubmitClass::Provisional
    } else {
        SubmitClass::Queued
    }
}

fn memo_hex(key: &str) -> String {
    hex::encode_upper(key.as_bytes())
}

fn carries_memo(tx: &Value, wanted_hex: &str) -> bool {
    tx.get("Memos")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|memo| memo.pointer("/Memo/MemoData").and_then(Value::as_str))
        .any(|data| data.eq_ignore_ascii_case(wanted_hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_result_classes() {
        assert_eq!(classify_submit("temBAD_AMOUNT"), SubmitClass::Rejected);
        assert_eq!(classify_submit("tefPAST_SEQ"), SubmitClass::Provisional);
        assert_eq!(classify_submit("telINSUF_FEE_P"), SubmitClass::Provisional);
        assert_eq!(classify_submit("tesSUCCESS"), SubmitClass::Queued);
        assert_eq!(classify_submit("terQUEUED"), SubmitClass::Queued);
        assert_eq!(classify_submit("tecPATH_DRY"), SubmitClass::Queued);
    }

    #[test]
    fn validated_tx_from_lookup() {
        let value = json!({
            "validated": true,
            "meta": { "TransactionResult": "tesSUCCESS" },
        });
        let tx = ValidatedTx::from_result("AB", &value).unwrap();
        assert_eq!(tx.clone().into_outcome(), PayoutOutcome::Success("AB".into()));
        assert_eq!(tx.into_status(), PayoutStatusReport::Confirmed("AB".into()));

        let failed = json!({
            "validated": true,
            "meta": { "TransactionResult": "tecNO_LINE" },
        });
        assert_eq!(
            ValidatedTx::from_result("CD", &failed).unwrap().into_status(),
            PayoutStatusReport::Failed("tecNO_LINE".into())
        );

        let pending = json!({ "validated": false, "meta": { "TransactionResult": "tesSUCCESS" } });
        assert!(ValidatedTx::from_result("EF", &pending).is_none());
    }

    #[test]
    fn memo_matching_is_case_insensitive() {
        let key = "ab12";
        let tx = json!({
            "Memos": [
                { "Memo": { "MemoData": "DEADBEEF" } },
                { "Memo": { "MemoData": memo_hex(key).to_ascii_lowercase() } },
            ]
        });
        assert!(carries_memo(&tx, &memo_hex(key)));
        assert!(!carries_memo(&tx, &memo_hex("other")));
        assert!(!carries_memo(&json!({}), &memo_hex(key)));
    }
}
