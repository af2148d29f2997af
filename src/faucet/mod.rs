//! Claim gating: eligibility, payout orchestration and operator reporting.
//!
//! The ledger RPC client is reached only through [`LedgerFacts`] and
//! [`PayoutSubmitter`], so everything here runs against scripted fakes in
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FaucetResult;
use crate::faucet::units::{Drops, TokenAmount};

pub mod eligibility;
pub mod idempotency;
pub mod orchestrator;
pub mod reconciler;
pub mod reporter;
pub mod units;

/// Issued token the faucet distributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenAsset {
    pub currency: String,
    pub issuer: String,
}

/// A trust line holding a positive balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolding {
    pub currency: String,
    pub issuer: String,
    pub balance: TokenAmount,
}

/// What the connected ledger node reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub endpoint: String,
    pub server_state: String,
    pub build_version: String,
    pub validated_ledger: Option<u32>,
}

/// Read-only facts about ledger accounts.
#[async_trait]
pub trait LedgerFacts: Send + Sync {
    async fn trust_line_present(&self, wallet: &str, asset: &TokenAsset) -> FaucetResult<bool>;

    async fn xrp_balance(&self, wallet: &str) -> FaucetResult<Drops>;

    async fn token_balance(&self, wallet: &str, asset: &TokenAsset) -> FaucetResult<TokenAmount>;

    /// Every issued token the wallet holds a positive balance of.
    async fn token_holdings(&self, wallet: &str) -> FaucetResult<Vec<TokenHolding>>;

    async fn node_status(&self) -> FaucetResult<NodeStatus>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    pub source: String,
    pub destination: String,
    pub amount: TokenAmount,
    pub asset: TokenAsset,
    pub idempotency_key: String,
}

/// Whatever the submitter learned about a payment it could not settle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayoutTicket {
    pub transaction_reference: Option<String>,
    pub last_ledger_sequence: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Success(String),
    DefiniteFailure(String),
    Ambiguous(PayoutTicket),
}

/// Journal facts needed to look an earlier payout up again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutQuery {
    pub idempotency_key: String,
    pub destination: String,
    pub transaction_reference: Option<String>,
    pub last_ledger_sequence: Option<u32>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutStatusReport {
    Confirmed(String),
    Failed(String),
    Unknown,
}

/// Sends faucet payouts. Implementations never resubmit on their own.
#[async_trait]
pub trait PayoutSubmitter: Send + Sync {
    async fn submit_payment(&self, request: &PayoutRequest) -> PayoutOutcome;

    async fn payout_status(&self, query: &PayoutQuery) -> FaucetResult<PayoutStatusReport>;
}
