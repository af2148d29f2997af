//! Payout journal operations.

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
    TransactionTrait,
};
use tracing::{info, warn};

use super::ClaimLedger;
use crate::entities::payout_attempt::{self, PayoutStatus};
use crate::error::{FaucetError, FaucetResult};
use crate::faucet::units::TokenAmount;

/// Result of trying to open a payout for a claim window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginPayout {
    /// A pending row now exists for the key; the caller may submit.
    Started,
    /// Another attempt for this wallet has not been resolved.
    InProgress(payout_attempt::Model),
    /// The window was already paid.
    AlreadyConfirmed(payout_attempt::Model),
}

impl ClaimLedger {
    /// Opens the journal row for a payout. A failed attempt for the same key
    /// is reopened; a pending attempt for any key blocks the wallet.
    pub async fn begin_payout(
        &self,
        key: &str,
        wallet: &str,
        amount: TokenAmount,
        now: DateTime<Utc>,
    ) -> FaucetResult<BeginPayout> {
        let _gate = self.write_gate().await;
        let txn = self.database().begin().await?;

        let pending = payout_attempt::Entity::find()
            .filter(payout_attempt::Column::WalletAddress.eq(wallet))
            .filter(payout_attempt::Column::Status.eq(PayoutStatus::Pending))
            .one(&txn)
            .await?;
        if let Some(pending) = pending {
            return Ok(BeginPayout::InProgress(pending));
        }

        let existing = payout_attempt::Entity::find_by_id(key.to_string())
            .one(&txn)
            .await?;
        match existing {
            Some(attempt) if attempt.status == PayoutStatus::Confirmed => {
                return Ok(BeginPayout::AlreadyConfirmed(attempt));
            }
            Some(attempt) => {
                let mut row = attempt.into_active_model();
                row.status = Set(PayoutStatus::Pending);
                row.amount = Set(amount.to_db()?);
                row.transaction_reference = Set(None);
                row.last_ledger_sequence = Set(None);
                row.failure_cause = Set(None);
                row.created_at = Set(now);
                row.updated_at = Set(now);
                row.update(&txn).await?;
            }
            None => {
                payout_attempt::ActiveModel {
                    idempotency_key: Set(key.to_string()),
                    wallet_address: Set(wallet.to_string()),
                    amount: Set(amount.to_db()?),
                    status: Set(PayoutStatus::Pending),
                    transaction_reference: Set(None),
                    last_ledger_sequence: Set(None),
                    failure_cause: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;
        Ok(BeginPayout::Started)
    }

    /// Stores whatever is known about a submitted payment: its hash and the
    /// last ledger it may appear in. Absent values leave stored ones intact.
    pub async fn attach_submission(
        &self,
        key: &str,
        transaction_reference: Option<&str>,
        last_ledger_sequence: Option<u32>,
    ) -> FaucetResult<()> {
        let _gate = self.write_gate().await;
        let attempt = self.require_attempt(key).await?;
        let mut row = attempt.into_active_model();
        if let Some(reference) = transaction_reference {
            row.transaction_reference = Set(Some(reference.to_string()));
        }
        if let Some(sequence) = last_ledger_sequence {
            row.last_ledger_sequence = Set(Some(i64::from(sequence)));
        }
        row.updated_at = Set(Utc::now());
        row.update(self.database()).await?;
        Ok(())
    }

    /// Marks a pending attempt as definitively failed so the window can be
    /// retried.
    pub async fn fail_payout(&self, key: &str, cause: &str) -> FaucetResult<()> {
        let _gate = self.write_gate().await;
        let attempt = self.require_attempt(key).await?;
        if attempt.status == PayoutStatus::Confirmed {
            return Err(FaucetError::Conflict(format!(
                "payout {key} is already confirmed"
            )));
        }
        let wallet = attempt.wallet_address.clone();
        let mut row = attempt.into_active_model();
        row.status = Set(PayoutStatus::Failed);
        row.failure_cause = Set(Some(cause.to_string()));
        row.updated_at = Set(Utc::now());
        row.update(self.database()).await?;

        warn!(key, wallet = %wallet, cause, "Payout marked failed");
        Ok(())
    }

    pub async fn payout_attempt(&self, key: &str) -> FaucetResult<Option<payout_attempt::Model>> {
        Ok(payout_attempt::Entity::find_by_id(key.to_string())
            .one(self.database())
            .await?)
    }

    pub async fn pending_payout_for(
        &self,
        wallet: &str,
    ) -> FaucetResult<Option<payout_attempt::Model>> {
        Ok(payout_attempt::Entity::find()
            .filter(payout_attempt::Column::WalletAddress.eq(wallet))
            .filter(payout_attempt::Column::Status.eq(PayoutStatus::Pending))
            .one(self.database())
            .await?)
    }

    /// Unresolved attempts, oldest first.
    pub async fn pending_payouts(&self) -> FaucetResult<Vec<payout_attempt::Model>> {
        let attempts = payout_attempt::Entity::find()
            .filter(payout_attempt::Column::Status.eq(PayoutStatus::Pending))
            .order_by_asc(payout_attempt::Column::CreatedAt)
            .all(self.database())
            .await?;
        if !attempts.is_empty() {
            info!(count = attempts.len(), "Loaded pending payouts");
        }
        Ok(attempts)
    }

    async fn require_attempt(&self, key: &str) -> FaucetResult<payout_attempt::Model> {
        self.payout_attempt(key)
            .await?
            .ok_or_else(|| FaucetError::Validation(format!("no payout attempt with key {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewClaim;
    use crate::test_support::{ALICE, BOB, DAY, memory_ledger, t0};

    fn amount() -> TokenAmount {
        "100".parse().unwrap()
    }

    #[tokio::test]
    async fn pending_attempt_blocks_wallet() {
        let ledger = memory_ledger(DAY).await;
        assert_eq!(
            ledger.begin_payout("k1", ALICE, amount(), t0()).await.unwrap(),
            BeginPayout::Started
        );

        match ledger.begin_payout("k1", ALICE, amount(), t0()).await.unwrap() {
            BeginPayout::InProgress(attempt) => assert_eq!(attempt.idempotency_key, "k1"),
            other => panic!("unexpected {other:?}"),
        }
        // other wallets are unaffected
        assert_eq!(
            ledger.begin_payout("k2", BOB, amount(), t0()).await.unwrap(),
            BeginPayout::Started
        );
        assert_eq!(ledger.pending_payouts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_attempt_can_be_reopened() {
        let ledger = memory_ledger(DAY).await;
        ledger.begin_payout("k1", ALICE, amount(), t0()).await.unwrap();
        ledger.attach_submission("k1", Some("ABC"), Some(120)).await.unwrap();
        ledger.fail_payout("k1", "tecPATH_DRY").await.unwrap();
        assert!(ledger.pending_payout_for(ALICE).await.unwrap().is_none());

        let later = t0() + chrono::Duration::minutes(2);
        assert_eq!(
            ledger.begin_payout("k1", ALICE, amount(), later).await.unwrap(),
            BeginPayout::Started
        );
        let attempt = ledger.payout_attempt("k1").await.unwrap().unwrap();
        assert_eq!(attempt.status, PayoutStatus::Pending);
        assert_eq!(attempt.transaction_reference, None);
        assert_eq!(attempt.failure_cause, None);
        assert_eq!(attempt.created_at, later);
    }

    #[tokio::test]
    async fn recording_claim_confirms_attempt() {
        let ledger = memory_ledger(DAY).await;
        ledger.begin_payout("k1", ALICE, amount(), t0()).await.unwrap();
        ledger
            .record_claim(NewClaim {
                wallet_address: ALICE.to_string(),
                claimed_at: t0(),
                amount: amount(),
                transaction_reference: "HASH".to_string(),
                idempotency_key: "k1".to_string(),
            })
            .await
            .unwrap();

        let attempt = ledger.payout_attempt("k1").await.unwrap().unwrap();
        assert_eq!(attempt.status, PayoutStatus::Confirmed);
        assert_eq!(attempt.transaction_reference.as_deref(), Some("HASH"));
        assert!(matches!(
            ledger.begin_payout("k1", ALICE, amount(), t0()).await.unwrap(),
            BeginPayout::AlreadyConfirmed(_)
        ));
        assert!(matches!(
            ledger.fail_payout("k1", "late").await,
            Err(FaucetError::Conflict(_))
        ));
    }
}
