//! Claim orchestrator.
//!
//! Per request: `Received -> Evaluated -> (Admitted -> PayoutRequested ->
//! PayoutConfirmed -> Committed) | Denied`, with `Failed` for definite payout
//! failures. A journal row is opened before the payout is submitted and is
//! only closed by a commit or a definite failure, so an unresolved payout keeps
//! the wallet locked across restarts.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::entities::payout_attempt;
use crate::error::{FaucetError, FaucetResult};
use crate::faucet::eligibility::{self, EligibilityInput, Verdict, next_eligible_at};
use crate::faucet::idempotency::idempotency_key;
use crate::faucet::units::{Drops, TokenAmount};
use crate::faucet::{
    LedgerFacts, PayoutOutcome, PayoutQuery, PayoutRequest, PayoutStatusReport, PayoutSubmitter,
    PayoutTicket, TokenAsset,
};
use crate::identity::validate_classic_address;
use crate::ledger::{BeginPayout, ClaimLedger, ClaimRecord, NewClaim};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    Received,
    Evaluated,
    Admitted,
    PayoutRequested,
    PayoutConfirmed,
    Committed,
    Denied,
    Failed,
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimState::Received => "received",
            ClaimState::Evaluated => "evaluated",
            ClaimState::Admitted => "admitted",
            ClaimState::PayoutRequested => "payout_requested",
            ClaimState::PayoutConfirmed => "payout_confirmed",
            ClaimState::Committed => "committed",
            ClaimState::Denied => "denied",
            ClaimState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Static faucet parameters.
#[derive(Debug, Clone)]
pub struct FaucetPolicy {
    pub asset: TokenAsset,
    pub hot_wallet: String,
    pub claim_amount: TokenAmount,
    pub min_balance: Drops,
    pub cooldown: Duration,
    pub payout_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub wallet_address: String,
    /// Caller-supplied correlation id, only logged.
    pub request_id: String,
}

impl ClaimRequest {
    pub fn new(wallet_address: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            request_id: request_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimReceipt {
    pub wallet_address: String,
    pub amount: TokenAmount,
    pub transaction_reference: String,
    pub claimed_at: DateTime<Utc>,
    pub next_claim_at: DateTime<Utc>,
}

/// Result of re-examining one journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Committed(ClaimRecord),
    Failed(String),
    Unresolved,
}

/// Operator verdict for a journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualResolution {
    Confirmed(String),
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub committed: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub skipped: usize,
}

pub struct ClaimOrchestrator {
    ledger: Arc<ClaimLedger>,
    facts: Arc<dyn LedgerFacts>,
    submitter: Arc<dyn PayoutSubmitter>,
    policy: FaucetPolicy,
    in_flight: Mutex<HashSet<String>>,
}

impl ClaimOrchestrator {
    pub fn new(
        ledger: Arc<ClaimLedger>,
        facts: Arc<dyn LedgerFacts>,
        submitter: Arc<dyn PayoutSubmitter>,
        policy: FaucetPolicy,
    ) -> Self {
        assert_eq!(
            ledger.cooldown(),
            policy.cooldown,
            "Ledger and policy must agree on the cooldown"
        );
        assert!(
            !policy.payout_timeout.is_zero(),
            "Payout timeout must be positive"
        );
        Self {
            ledger,
            facts,
            submitter,
            policy,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &FaucetPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<ClaimLedger> {
        &self.ledger
    }

    pub async fn submit_claim(&self, request: &ClaimRequest) -> FaucetResult<ClaimReceipt> {
        self.submit_claim_at(request, Utc::now()).await
    }

    pub async fn submit_claim_at(
        &self,
        request: &ClaimRequest,
        now: DateTime<Utc>,
    ) -> FaucetResult<ClaimReceipt> {
        let wallet = validate_classic_address(&request.wallet_address)?;
        let _guard = WalletGuard::acquire(&self.in_flight, &wallet).ok_or_else(|| {
            debug!(wallet = %wallet, request = %request.request_id, "Claim already in flight");
            FaucetError::ClaimInProgress
        })?;
        transition(&wallet, &request.request_id, ClaimState::Received);

        if let Some(pending) = self.ledger.pending_payout_for(&wallet).await? {
            match self.reconcile_attempt(&pending).await? {
                Resolution::Unresolved => return Err(FaucetError::ClaimInProgress),
                // a committed claim now shows up as an active cooldown below
                Resolution::Committed(_) | Resolution::Failed(_) => {}
            }
        }

        let snapshot = self.ledger.snapshot(&wallet).await?;
        if let Err(reason) = eligibility::check_blacklist(&snapshot.blacklisted) {
            transition(&wallet, &request.request_id, ClaimState::Denied);
            return Err(FaucetError::Denied(reason));
        }

        let trust_line_present = self
            .facts
            .trust_line_present(&wallet, &self.policy.asset)
            .await?;
        let xrp_balance = self.facts.xrp_balance(&wallet).await?;
        let verdict = eligibility::evaluate(&EligibilityInput {
            blacklisted: snapshot.blacklisted,
            last_claim: snapshot.last_claim,
            trust_line_present,
            xrp_balance,
            min_balance: self.policy.min_balance,
            cooldown: self.policy.cooldown,
            now,
        });
        transition(&wallet, &request.request_id, ClaimState::Evaluated);

        if let Verdict::Deny(reason) = verdict {
            info!(wallet = %wallet, request = %request.request_id, %reason, "Claim denied");
            transition(&wallet, &request.request_id, ClaimState::Denied);
            return Err(FaucetError::Denied(reason));
        }
        transition(&wallet, &request.request_id, ClaimState::Admitted);

        let key = idempotency_key(&wallet, snapshot.last_claim, self.policy.cooldown);
        match self
            .ledger
            .begin_payout(&key, &wallet, self.policy.claim_amount, now)
            .await?
        {
            BeginPayout::Started => {}
            BeginPayout::InProgress(attempt) => {
                debug!(wallet = %wallet, key = %attempt.idempotency_key, "Payout still pending");
                return Err(FaucetError::ClaimInProgress);
            }
            BeginPayout::AlreadyConfirmed(_) => {
                error!(wallet = %wallet, key = %key, "Confirmed payout has no claim record");
                return Err(FaucetError::Consistency(format!(
                    "payout {key} is confirmed but no claim is recorded for it"
                )));
            }
        }

        let payout = PayoutRequest {
            source: self.policy.hot_wallet.clone(),
            destination: wallet.clone(),
            amount: self.policy.claim_amount,
            asset: self.policy.asset.clone(),
            idempotency_key: key.clone(),
        };
        transition(&wallet, &request.request_id, ClaimState::PayoutRequested);
        let outcome = match tokio::time::timeout(
            self.policy.payout_timeout,
            self.submitter.submit_payment(&payout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(wallet = %wallet, key = %key, "Payout submission timed out");
                PayoutOutcome::Ambiguous(PayoutTicket::default())
            }
        };

        match outcome {
            PayoutOutcome::Success(tx) => {
                transition(&wallet, &request.request_id, ClaimState::PayoutConfirmed);
                self.ledger.attach_submission(&key, Some(&tx), None).await?;
                let record = self.commit(&wallet, &key, &tx, now).await?;
                transition(&wallet, &request.request_id, ClaimState::Committed);
                Ok(self.receipt(record))
            }
            PayoutOutcome::DefiniteFailure(cause) => {
                self.ledger.fail_payout(&key, &cause).await?;
                transition(&wallet, &request.request_id, ClaimState::Failed);
                Err(FaucetError::PayoutFailed(cause))
            }
            PayoutOutcome::Ambiguous(ticket) => {
                self.ledger
                    .attach_submission(
                        &key,
                        ticket.transaction_reference.as_deref(),
                        ticket.last_ledger_sequence,
                    )
                    .await?;
                let attempt = self.ledger.payout_attempt(&key).await?.ok_or_else(|| {
                    FaucetError::Consistency(format!("payout journal row {key} vanished"))
                })?;
                match self.reconcile_attempt(&attempt).await? {
                    Resolution::Committed(record) => {
                        transition(&wallet, &request.request_id, ClaimState::Committed);
                        Ok(self.receipt(record))
                    }
                    Resolution::Failed(cause) => {
                        transition(&wallet, &request.request_id, ClaimState::Failed);
                        Err(FaucetError::PayoutFailed(cause))
                    }
                    Resolution::Unresolved => {
                        warn!(wallet = %wallet, key = %key, "Payout outcome unknown, holding wallet");
                        Err(FaucetError::PayoutPending {
                            idempotency_key: key,
                        })
                    }
                }
            }
        }
    }

    /// Resolves every pending journal entry whose wallet is not busy.
    pub async fn reconcile_pending(&self) -> FaucetResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for attempt in self.ledger.pending_payouts().await? {
            let Some(_guard) = WalletGuard::acquire(&self.in_flight, &attempt.wallet_address)
            else {
                summary.skipped += 1;
                continue;
            };
            match self.reconcile_attempt(&attempt).await {
                Ok(Resolution::Committed(_)) => summary.committed += 1,
                Ok(Resolution::Failed(_)) => summary.failed += 1,
                Ok(Resolution::Unresolved) => summary.unresolved += 1,
                Err(err) => {
                    warn!(key = %attempt.idempotency_key, "Reconciliation failed: {err}");
                    summary.unresolved += 1;
                }
            }
        }
        if summary != ReconcileSummary::default() {
            info!(?summary, "Reconciled pending payouts");
        }
        Ok(summary)
    }

    /// Applies an operator's verdict to a pending journal entry.
    pub async fn resolve_manually(
        &self,
        key: &str,
        resolution: ManualResolution,
    ) -> FaucetResult<Resolution> {
        let attempt = self
            .ledger
            .payout_attempt(key)
            .await?
            .ok_or_else(|| FaucetError::Validation(format!("no payout attempt with key {key}")))?;
        if attempt.status != payout_attempt::PayoutStatus::Pending {
            return Err(FaucetError::Validation(format!(
                "payout {key} is not pending"
            )));
        }
        let _guard = WalletGuard::acquire(&self.in_flight, &attempt.wallet_address)
            .ok_or(FaucetError::ClaimInProgress)?;

        match resolution {
            ManualResolution::Confirmed(tx) => {
                info!(key, tx = %tx, "Operator confirmed payout");
                let record = self
                    .commit(&attempt.wallet_address, key, &tx, attempt.created_at)
                    .await?;
                Ok(Resolution::Committed(record))
            }
            ManualResolution::Failed => {
                let cause = "resolved as failed by operator".to_string();
                self.ledger.fail_payout(key, &cause).await?;
                Ok(Resolution::Failed(cause))
            }
        }
    }

    /// Asks the submitter about a pending attempt and applies the answer.
    async fn reconcile_attempt(
        &self,
        attempt: &payout_attempt::Model,
    ) -> FaucetResult<Resolution> {
        let query = PayoutQuery {
            idempotency_key: attempt.idempotency_key.clone(),
            destination: attempt.wallet_address.clone(),
            transaction_reference: attempt.transaction_reference.clone(),
            last_ledger_sequence: attempt
                .last_ledger_sequence
                .and_then(|sequence| u32::try_from(sequence).ok()),
            submitted_at: attempt.created_at,
        };
        let report = match self.submitter.payout_status(&query).await {
            Ok(report) => report,
            Err(err) => {
                warn!(key = %attempt.idempotency_key, "Payout status lookup failed: {err}");
                PayoutStatusReport::Unknown
            }
        };

        match report {
            PayoutStatusReport::Confirmed(tx) => {
                info!(key = %attempt.idempotency_key, tx = %tx, "Pending payout confirmed");
                let record = self
                    .commit(
                        &attempt.wallet_address,
                        &attempt.idempotency_key,
                        &tx,
                        attempt.created_at,
                    )
                    .await?;
                Ok(Resolution::Committed(record))
            }
            PayoutStatusReport::Failed(cause) => {
                self.ledger
                    .fail_payout(&attempt.idempotency_key, &cause)
                    .await?;
                Ok(Resolution::Failed(cause))
            }
            PayoutStatusReport::Unknown => Ok(Resolution::Unresolved),
        }
    }

    /// Writes the claim for a confirmed payout. A duplicate key means an
    /// earlier commit already landed; any other failure leaves the journal
    /// row pending for reconciliation.
    async fn commit(
        &self,
        wallet: &str,
        key: &str,
        transaction_reference: &str,
        claimed_at: DateTime<Utc>,
    ) -> FaucetResult<ClaimRecord> {
        let attempt_amount = match self.ledger.payout_attempt(key).await? {
            Some(attempt) => TokenAmount::from_db(attempt.amount)?,
            None => self.policy.claim_amount,
        };
        let claim = NewClaim {
            wallet_address: wallet.to_string(),
            claimed_at,
            amount: attempt_amount,
            transaction_reference: transaction_reference.to_string(),
            idempotency_key: key.to_string(),
        };

        match self.ledger.record_claim(claim).await {
            Ok(record) => Ok(record),
            Err(FaucetError::Conflict(detail)) => {
                if let Some(existing) = self.ledger.claim_by_key(key).await? {
                    debug!(key, "Claim already committed");
                    return Ok(existing);
                }
                error!(
                    wallet,
                    key,
                    tx = transaction_reference,
                    "Payout landed but claim was rejected: {detail}"
                );
                Err(FaucetError::Consistency(detail))
            }
            Err(err) => {
                error!(
                    wallet,
                    key,
                    tx = transaction_reference,
                    "Payout landed but claim commit failed: {err}"
                );
                Err(match err {
                    FaucetError::Consistency(_) => err,
                    other => FaucetError::Consistency(other.to_string()),
                })
            }
        }
    }

    fn receipt(&self, record: ClaimRecord) -> ClaimReceipt {
        ClaimReceipt {
            next_claim_at: next_eligible_at(record.claimed_at, self.policy.cooldown),
            wallet_address: record.wallet_address,
            amount: record.amount,
            transaction_reference: record.transaction_reference,
            claimed_at: record.claimed_at,
        }
    }
}

fn transition(wallet: &str, request_id: &str, state: ClaimState) {
    match state {
        ClaimState::Committed | ClaimState::Failed => {
            info!(wallet, request = request_id, state = %state, "Claim state")
        }
        _ => debug!(wallet, request = request_id, state = %state, "Claim state"),
    }
}

/// Exclusive claim slot for one wallet, released on drop.
struct WalletGuard<'a> {
    slots: &'a Mutex<HashSet<String>>,
    wallet: String,
}

impl<'a> WalletGuard<'a> {
    fn acquire(slots: &'a Mutex<HashSet<String>>, wallet: &str) -> Option<Self> {
        let mut held = slots.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(wallet.to_string()) {
            return None;
        }
        Some(Self {
            slots,
            wallet: wallet.to_string(),
        })
    }
}

impl Drop for WalletGuard<'_> {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.wallet);
    }
}
