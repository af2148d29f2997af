use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::faucet::units::{Drops, TokenAmount};
use crate::ledger::{ClaimRecord, FaucetStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsOverview {
    #[serde(flatten)]
    pub stats: FaucetStats,
    pub claims_24h: u64,
    pub blacklisted_count: u64,
    pub pending_payouts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletClaimInfo {
    pub wallet_address: String,
    pub claim_count: usize,
    pub total_claimed: TokenAmount,
    pub first_claim: Option<DateTime<Utc>>,
    pub last_claim: Option<DateTime<Utc>>,
    pub last_transaction: Option<String>,
    pub next_claim_at: Option<DateTime<Utc>>,
    pub blacklisted: bool,
}

/// Ledger-only eligibility preview; trust line and reserve are not checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletCheck {
    pub wallet_address: String,
    pub blacklisted: bool,
    pub blacklist_reason: Option<String>,
    pub last_claim: Option<DateTime<Utc>>,
    pub cooldown_remaining_seconds: u64,
    pub next_claim_at: Option<DateTime<Utc>>,
    pub payout_pending: bool,
    pub can_claim: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotWalletBalance {
    pub address: String,
    pub xrp: Drops,
    pub token: TokenAmount,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimView {
    pub wallet_address: String,
    pub claimed_at: DateTime<Utc>,
    pub amount: TokenAmount,
    pub transaction_reference: String,
}

impl From<ClaimRecord> for ClaimView {
    fn from(record: ClaimRecord) -> Self {
        Self {
            wallet_address: record.wallet_address,
            claimed_at: record.claimed_at,
            amount: record.amount,
            transaction_reference: record.transaction_reference,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimsQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotCommandRequest {
    pub sender: String,
    pub room_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotCommandResponse {
    /// `None` when the message was not a command.
    pub reply: Option<String>,
}
