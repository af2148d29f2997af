//! Claim ledger.
//!
//! Sole owner of persisted faucet state: committed claims, the blacklist, the
//! aggregate statistics row and the payout journal. Every mutation goes
//! through a database transaction and returns only after it is committed.
//!
//! Writers take the ledger's write gate for the whole transaction. SQLite
//! allows one writer at a time and does not wait when two deferred
//! transactions both try to upgrade to a write lock, so the ledger queues its
//! writers itself. Readers never take the gate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::entities::faucet_stats::STATS_ROW_ID;
use crate::entities::payout_attempt::PayoutStatus;
use crate::entities::{blacklist_entry, claim_record, faucet_stats, payout_attempt};
use crate::error::{FaucetError, FaucetResult};
use crate::faucet::eligibility::next_eligible_at;
use crate::faucet::units::TokenAmount;

mod payouts;

pub use payouts::BeginPayout;

const REPLAY_PAGE_SIZE: u64 = 500;
pub const MAX_RECENT_CLAIMS: u64 = 100;

/// A claim about to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub wallet_address: String,
    pub claimed_at: DateTime<Utc>,
    pub amount: TokenAmount,
    pub transaction_reference: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRecord {
    pub wallet_address: String,
    pub claimed_at: DateTime<Utc>,
    pub amount: TokenAmount,
    pub transaction_reference: String,
    pub idempotency_key: String,
}

impl TryFrom<claim_record::Model> for ClaimRecord {
    type Error = FaucetError;

    fn try_from(model: claim_record::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            wallet_address: model.wallet_address,
            claimed_at: model.claimed_at,
            amount: TokenAmount::from_db(model.amount)?,
            transaction_reference: model.transaction_reference,
            idempotency_key: model.idempotency_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlacklistEntry {
    pub wallet_address: String,
    pub reason: Option<String>,
    pub added_at: DateTime<Utc>,
    pub added_by: String,
}

impl From<blacklist_entry::Model> for BlacklistEntry {
    fn from(model: blacklist_entry::Model) -> Self {
        Self {
            wallet_address: model.wallet_address,
            reason: model.reason,
            added_at: model.added_at,
            added_by: model.added_by,
        }
    }
}

/// Aggregates derived from the claim history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FaucetStats {
    pub total_claims: u64,
    pub total_distributed: TokenAmount,
    pub unique_wallets: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl FaucetStats {
    /// Compares counters only; `last_updated` is bookkeeping.
    pub fn same_totals(&self, other: &FaucetStats) -> bool {
        self.total_claims == other.total_claims
            && self.total_distributed == other.total_distributed
            && self.unique_wallets == other.unique_wallets
    }

    fn from_model(model: &faucet_stats::Model) -> FaucetResult<Self> {
        Ok(Self {
            total_claims: non_negative(model.total_claims, "total_claims")?,
            total_distributed: TokenAmount::from_db(model.total_distributed)?,
            unique_wallets: non_negative(model.unique_wallets, "unique_wallets")?,
            last_updated: model.last_updated,
        })
    }
}

/// Per-wallet state the eligibility evaluator reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub blacklisted: Option<Option<String>>,
    pub last_claim: Option<DateTime<Utc>>,
}

/// Outcome of comparing the stored aggregate with a full replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsCheck {
    pub stored: FaucetStats,
    pub recomputed: FaucetStats,
    pub repaired: bool,
}

pub struct ClaimLedger {
    database: DatabaseConnection,
    cooldown: Duration,
    stats_suspect: AtomicBool,
    write_gate: Mutex<()>,
}

impl ClaimLedger {
    pub fn new(database: DatabaseConnection, cooldown: Duration) -> Self {
        assert!(!cooldown.is_zero(), "Claim cooldown must be positive");
        Self {
            database,
            cooldown,
            stats_suspect: AtomicBool::new(false),
            write_gate: Mutex::new(()),
        }
    }

    /// Held from `begin` to `commit` of every write transaction.
    async fn write_gate(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    #[cfg(test)]
    pub(crate) fn mark_stats_suspect(&self) {
        self.stats_suspect.store(true, AtomicOrdering::SeqCst);
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub async fn get_last_claim(&self, wallet: &str) -> FaucetResult<Option<DateTime<Utc>>> {
        last_claim_time(&self.database, wallet).await
    }

    pub async fn is_blacklisted(&self, wallet: &str) -> FaucetResult<bool> {
        Ok(self.blacklist_entry(wallet).await?.is_some())
    }

    pub async fn blacklist_entry(&self, wallet: &str) -> FaucetResult<Option<BlacklistEntry>> {
        let entry = blacklist_entry::Entity::find_by_id(wallet.to_string())
            .one(&self.database)
            .await?;
        Ok(entry.map(Into::into))
    }

    pub async fn snapshot(&self, wallet: &str) -> FaucetResult<WalletSnapshot> {
        let blacklisted = self.blacklist_entry(wallet).await?.map(|entry| entry.reason);
        let last_claim = self.get_last_claim(wallet).await?;
        Ok(WalletSnapshot {
            blacklisted,
            last_claim,
        })
    }

    /// Commits a claim together with the statistics update and, when a
    /// journal row exists for the key, marks that payout confirmed.
    ///
    /// Rejects a duplicate idempotency key and a claim closer than the
    /// cooldown to the wallet's previous one.
    pub async fn record_claim(&self, claim: NewClaim) -> FaucetResult<ClaimRecord> {
        let amount = claim.amount.to_db()?;
        let _gate = self.write_gate().await;
        let txn = self.database.begin().await?;

        let previous = last_claim_time(&txn, &claim.wallet_address).await?;
        if let Some(previous) = previous {
            if claim.claimed_at < next_eligible_at(previous, self.cooldown) {
                return Err(FaucetError::Conflict(format!(
                    "claim for {} at {} is within the cooldown of the claim at {}",
                    claim.wallet_address, claim.claimed_at, previous
                )));
            }
        }

        let row = claim_record::ActiveModel {
            wallet_address: Set(claim.wallet_address.clone()),
            claimed_at: Set(claim.claimed_at),
            amount: Set(amount),
            transaction_reference: Set(claim.transaction_reference.clone()),
            idempotency_key: Set(claim.idempotency_key.clone()),
            ..Default::default()
        };
        if let Err(err) = claim_record::Entity::insert(row).exec(&txn).await {
            if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
                return Err(FaucetError::Conflict(format!(
                    "claim window {} already committed: {detail}",
                    claim.idempotency_key
                )));
            }
            return Err(err.into());
        }

        let stored = faucet_stats::Entity::find_by_id(STATS_ROW_ID).one(&txn).await?;
        let current = match &stored {
            Some(model) => FaucetStats::from_model(model)?,
            None => FaucetStats::default(),
        };
        let next = FaucetStats {
            total_claims: current.total_claims + 1,
            total_distributed: current
                .total_distributed
                .checked_add(claim.amount)
                .ok_or_else(|| FaucetError::Consistency("total distributed overflow".to_string()))?,
            unique_wallets: current.unique_wallets + u64::from(previous.is_none()),
            last_updated: Some(claim.claimed_at),
        };
        write_stats(&txn, stored.is_some(), &next).await?;

        payout_attempt::Entity::update_many()
            .col_expr(
                payout_attempt::Column::Status,
                sea_orm::sea_query::Expr::value(PayoutStatus::Confirmed),
            )
            .col_expr(
                payout_attempt::Column::TransactionReference,
                sea_orm::sea_query::Expr::value(Some(claim.transaction_reference.clone())),
            )
            .col_expr(
                payout_attempt::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(payout_attempt::Column::IdempotencyKey.eq(&claim.idempotency_key))
            .exec(&txn)
            .await?;

        if let Err(err) = txn.commit().await {
            // the commit outcome is unknown; force the next stats read to replay
            self.stats_suspect.store(true, AtomicOrdering::SeqCst);
            error!(
                wallet = %claim.wallet_address,
                key = %claim.idempotency_key,
                "Claim commit failed: {err}"
            );
            return Err(FaucetError::Consistency(format!(
                "commit of claim {} failed: {err}",
                claim.idempotency_key
            )));
        }

        info!(
            wallet = %claim.wallet_address,
            amount = %claim.amount,
            tx = %claim.transaction_reference,
            "Recorded claim"
        );

        Ok(ClaimRecord {
            wallet_address: claim.wallet_address,
            claimed_at: claim.claimed_at,
            amount: claim.amount,
            transaction_reference: claim.transaction_reference,
            idempotency_key: claim.idempotency_key,
        })
    }

    pub async fn claim_by_key(&self, key: &str) -> FaucetResult<Option<ClaimRecord>> {
        claim_record::Entity::find()
            .filter(claim_record::Column::IdempotencyKey.eq(key))
            .one(&self.database)
            .await?
            .map(ClaimRecord::try_from)
            .transpose()
    }

    /// Adds or replaces a blacklist entry.
    pub async fn add_blacklist(
        &self,
        wallet: &str,
        reason: Option<String>,
        admin: &str,
        now: DateTime<Utc>,
    ) -> FaucetResult<()> {
        let _gate = self.write_gate().await;
        let txn = self.database.begin().await?;
        blacklist_entry::Entity::delete_by_id(wallet.to_string())
            .exec(&txn)
            .await?;
        blacklist_entry::ActiveModel {
            wallet_address: Set(wallet.to_string()),
            reason: Set(reason.clone()),
            added_at: Set(now),
            added_by: Set(admin.to_string()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(wallet, admin, reason = reason.as_deref().unwrap_or(""), "Blacklisted wallet");
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub async fn remove_blacklist(&self, wallet: &str) -> FaucetResult<bool> {
        let _gate = self.write_gate().await;
        let result = blacklist_entry::Entity::delete_by_id(wallet.to_string())
            .exec(&self.database)
            .await?;
        let removed = result.rows_affected > 0;
        if removed {
            info!(wallet, "Removed wallet from blacklist");
        } else {
            debug!(wallet, "Blacklist removal for unlisted wallet");
        }
        Ok(removed)
    }

    pub async fn list_blacklist(&self) -> FaucetResult<Vec<BlacklistEntry>> {
        let entries = blacklist_entry::Entity::find()
            .order_by_desc(blacklist_entry::Column::AddedAt)
            .all(&self.database)
            .await?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    pub async fn blacklist_count(&self) -> FaucetResult<u64> {
        Ok(blacklist_entry::Entity::find().count(&self.database).await?)
    }

    /// Stored aggregate. After an ambiguous commit the aggregate is rebuilt
    /// from the claim history before it is returned.
    pub async fn get_stats(&self) -> FaucetResult<FaucetStats> {
        if self.stats_suspect.load(AtomicOrdering::SeqCst) {
            let check = self.reconcile_stats().await?;
            self.stats_suspect.store(false, AtomicOrdering::SeqCst);
            return Ok(check.recomputed);
        }
        self.stored_stats().await
    }

    async fn stored_stats(&self) -> FaucetResult<FaucetStats> {
        match faucet_stats::Entity::find_by_id(STATS_ROW_ID).one(&self.database).await? {
            Some(model) => FaucetStats::from_model(&model),
            None => Ok(FaucetStats::default()),
        }
    }

    /// Replays every committed claim to rebuild the aggregate.
    pub async fn recompute_stats(&self) -> FaucetResult<FaucetStats> {
        replay_claims(&self.database).await
    }

    /// Compares the stored aggregate with a replay and overwrites it when
    /// they differ.
    pub async fn reconcile_stats(&self) -> FaucetResult<StatsCheck> {
        let _gate = self.write_gate().await;
        let txn = self.database.begin().await?;
        let stored_model = faucet_stats::Entity::find_by_id(STATS_ROW_ID).one(&txn).await?;
        let stored = match &stored_model {
            Some(model) => FaucetStats::from_model(model)?,
            None => FaucetStats::default(),
        };
        let recomputed = replay_claims(&txn).await?;

        let repaired = !stored.same_totals(&recomputed);
        if repaired {
            error!(
                stored_claims = stored.total_claims,
                replayed_claims = recomputed.total_claims,
                stored_total = %stored.total_distributed,
                replayed_total = %recomputed.total_distributed,
                "Faucet statistics diverged from claim history, rewriting"
            );
            write_stats(&txn, stored_model.is_some(), &recomputed).await?;
        }
        txn.commit().await?;

        Ok(StatsCheck {
            stored,
            recomputed,
            repaired,
        })
    }

    pub async fn recent_claims(&self, limit: u64) -> FaucetResult<Vec<ClaimRecord>> {
        let limit = limit.clamp(1, MAX_RECENT_CLAIMS);
        claim_record::Entity::find()
            .order_by_desc(claim_record::Column::ClaimedAt)
            .limit(limit)
            .all(&self.database)
            .await?
            .into_iter()
            .map(ClaimRecord::try_from)
            .collect()
    }

    /// Claims of one wallet, newest first.
    pub async fn claims_for_wallet(&self, wallet: &str) -> FaucetResult<Vec<ClaimRecord>> {
        claim_record::Entity::find()
            .filter(claim_record::Column::WalletAddress.eq(wallet))
            .order_by_desc(claim_record::Column::ClaimedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(ClaimRecord::try_from)
            .collect()
    }

    pub async fn claims_since(&self, since: DateTime<Utc>) -> FaucetResult<u64> {
        Ok(claim_record::Entity::find()
            .filter(claim_record::Column::ClaimedAt.gt(since))
            .count(&self.database)
            .await?)
    }
}

async fn last_claim_time<C: ConnectionTrait>(
    conn: &C,
    wallet: &str,
) -> FaucetResult<Option<DateTime<Utc>>> {
    let latest = claim_record::Entity::find()
        .filter(claim_record::Column::WalletAddress.eq(wallet))
        .order_by_desc(claim_record::Column::ClaimedAt)
        .one(conn)
        .await?;
    Ok(latest.map(|model| model.claimed_at))
}

async fn replay_claims<C: ConnectionTrait>(conn: &C) -> FaucetResult<FaucetStats> {
    let mut stats = FaucetStats::default();
    let mut wallets = HashSet::new();
    let mut pages = claim_record::Entity::find()
        .order_by_asc(claim_record::Column::Id)
        .paginate(conn, REPLAY_PAGE_SIZE);

    while let Some(page) = pages.fetch_and_next().await? {
        for model in page {
            let amount = TokenAmount::from_db(model.amount)?;
            stats.total_claims += 1;
            stats.total_distributed = stats
                .total_distributed
                .checked_add(amount)
                .ok_or_else(|| FaucetError::Consistency("replayed total overflow".to_string()))?;
            if stats.last_updated.is_none_or(|last| model.claimed_at > last) {
                stats.last_updated = Some(model.claimed_at);
            }
            wallets.insert(model.wallet_address);
        }
    }
    stats.unique_wallets = wallets.len() as u64;
    Ok(stats)
}

async fn write_stats<C: ConnectionTrait>(
    conn: &C,
    exists: bool,
    stats: &FaucetStats,
) -> FaucetResult<()> {
    let row = faucet_stats::ActiveModel {
        id: Set(STATS_ROW_ID),
        total_claims: Set(to_db_count(stats.total_claims)?),
        total_distributed: Set(stats.total_distributed.to_db()?),
        unique_wallets: Set(to_db_count(stats.unique_wallets)?),
        last_updated: Set(stats.last_updated),
    };
    if exists {
        row.update(conn).await?;
    } else {
        warn!("Statistics row missing, creating it");
        row.insert(conn).await?;
    }
    Ok(())
}

fn non_negative(value: i64, column: &str) -> FaucetResult<u64> {
    u64::try_from(value)
        .map_err(|_| FaucetError::Consistency(format!("negative {column} in statistics row")))
}

fn to_db_count(value: u64) -> FaucetResult<i64> {
    i64::try_from(value)
        .map_err(|_| FaucetError::Consistency(format!("counter {value} exceeds storage range")))
}
