//! Operator-facing reads and admin actions.
//!
//! Everything except the blacklist and payout-resolution commands is
//! read-only. Admin actions are gated by membership of the configured admin
//! set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::{info, warn};

use crate::error::{FaucetError, FaucetResult};
use crate::faucet::LedgerFacts;
use crate::faucet::eligibility::{cooldown_remaining, next_eligible_at};
use crate::faucet::orchestrator::{
    ClaimOrchestrator, ManualResolution, ReconcileSummary, Resolution,
};
use crate::faucet::units::TokenAmount;
use crate::identity::{normalize_user_id, validate_classic_address};
use crate::ledger::{BlacklistEntry, ClaimLedger, ClaimRecord, FaucetStats, StatsCheck};
use crate::models::faucet::{HotWalletBalance, StatsOverview, WalletCheck, WalletClaimInfo};

const BALANCE_CACHE_KEY: &str = "hot_wallet";

pub struct AdminStatsReporter {
    ledger: Arc<ClaimLedger>,
    orchestrator: Arc<ClaimOrchestrator>,
    facts: Arc<dyn LedgerFacts>,
    admins: HashSet<String>,
    balance_cache: Cache<&'static str, HotWalletBalance>,
}

impl AdminStatsReporter {
    pub fn new(
        orchestrator: Arc<ClaimOrchestrator>,
        facts: Arc<dyn LedgerFacts>,
        admins: &[String],
        balance_ttl: Duration,
    ) -> Self {
        let balance_cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(balance_ttl)
            .build();
        Self {
            ledger: orchestrator.ledger().clone(),
            orchestrator,
            facts,
            admins: admins.iter().map(|admin| normalize_user_id(admin)).collect(),
            balance_cache,
        }
    }

    pub fn is_admin(&self, caller: &str) -> bool {
        self.admins.contains(&normalize_user_id(caller))
    }

    fn authorize(&self, caller: &str) -> FaucetResult<()> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            warn!(caller, "Unauthorized admin command");
            Err(FaucetError::Unauthorized)
        }
    }

    pub async fn get_stats(&self) -> FaucetResult<FaucetStats> {
        self.ledger.get_stats().await
    }

    pub async fn overview(&self, now: DateTime<Utc>) -> FaucetResult<StatsOverview> {
        let stats = self.ledger.get_stats().await?;
        let claims_24h = self
            .ledger
            .claims_since(now - chrono::Duration::hours(24))
            .await?;
        let blacklisted_count = self.ledger.blacklist_count().await?;
        let pending_payouts = self.ledger.pending_payouts().await?.len();
        Ok(StatsOverview {
            stats,
            claims_24h,
            blacklisted_count,
            pending_payouts,
        })
    }

    /// Hot wallet XRP and token holdings, cached briefly.
    pub async fn hot_wallet_balance(&self, caller: &str) -> FaucetResult<HotWalletBalance> {
        self.authorize(caller)?;
        if let Some(cached) = self.balance_cache.get(BALANCE_CACHE_KEY).await {
            return Ok(cached);
        }

        let policy = self.orchestrator.policy();
        let xrp = self.facts.xrp_balance(&policy.hot_wallet).await?;
        let token = self
            .facts
            .token_balance(&policy.hot_wallet, &policy.asset)
            .await?;
        let balance = HotWalletBalance {
            address: policy.hot_wallet.clone(),
            xrp,
            token,
            currency: policy.asset.currency.clone(),
        };
        self.balance_cache
            .insert(BALANCE_CACHE_KEY, balance.clone())
            .await;
        Ok(balance)
    }

    pub async fn admin_blacklist(
        &self,
        wallet: &str,
        reason: Option<String>,
        caller: &str,
        now: DateTime<Utc>,
    ) -> FaucetResult<()> {
        self.authorize(caller)?;
        let wallet = validate_classic_address(wallet)?;
        self.ledger.add_blacklist(&wallet, reason, caller, now).await
    }

    /// Returns whether the wallet had been blacklisted.
    pub async fn admin_whitelist(&self, wallet: &str, caller: &str) -> FaucetResult<bool> {
        self.authorize(caller)?;
        let wallet = validate_classic_address(wallet)?;
        self.ledger.remove_blacklist(&wallet).await
    }

    pub async fn list_blacklist(&self, caller: &str) -> FaucetResult<Vec<BlacklistEntry>> {
        self.authorize(caller)?;
        self.ledger.list_blacklist().await
    }

    pub async fn recent_claims(&self, limit: u64) -> FaucetResult<Vec<ClaimRecord>> {
        self.ledger.recent_claims(limit).await
    }

    pub async fn claim_info(&self, wallet: &str) -> FaucetResult<WalletClaimInfo> {
        let wallet = validate_classic_address(wallet)?;
        let claims = self.ledger.claims_for_wallet(&wallet).await?;
        let total_claimed = claims
            .iter()
            .try_fold(TokenAmount::ZERO, |sum, claim| sum.checked_add(claim.amount))
            .ok_or_else(|| FaucetError::Consistency(format!("claim total for {wallet} overflows")))?;
        let last_claim = claims.first().map(|claim| claim.claimed_at);
        Ok(WalletClaimInfo {
            claim_count: claims.len(),
            total_claimed,
            first_claim: claims.last().map(|claim| claim.claimed_at),
            last_claim,
            last_transaction: claims
                .first()
                .map(|claim| claim.transaction_reference.clone()),
            next_claim_at: last_claim.map(|last| next_eligible_at(last, self.ledger.cooldown())),
            blacklisted: self.ledger.is_blacklisted(&wallet).await?,
            wallet_address: wallet,
        })
    }

    /// Eligibility preview from ledger state alone.
    pub async fn check_wallet(&self, wallet: &str, now: DateTime<Utc>) -> FaucetResult<WalletCheck> {
        let wallet = validate_classic_address(wallet)?;
        let snapshot = self.ledger.snapshot(&wallet).await?;
        let remaining = cooldown_remaining(snapshot.last_claim, self.ledger.cooldown(), now);
        let payout_pending = self.ledger.pending_payout_for(&wallet).await?.is_some();
        let blacklisted = snapshot.blacklisted.is_some();
        Ok(WalletCheck {
            blacklisted,
            blacklist_reason: snapshot.blacklisted.flatten(),
            last_claim: snapshot.last_claim,
            cooldown_remaining_seconds: remaining.map_or(0, |left| left.as_secs()),
            next_claim_at: snapshot
                .last_claim
                .map(|last| next_eligible_at(last, self.ledger.cooldown())),
            payout_pending,
            can_claim: !blacklisted && remaining.is_none() && !payout_pending,
            wallet_address: wallet,
        })
    }

    pub async fn verify_stats(&self, caller: &str) -> FaucetResult<StatsCheck> {
        self.authorize(caller)?;
        let check = self.ledger.reconcile_stats().await?;
        info!(repaired = check.repaired, "Statistics verified");
        Ok(check)
    }

    pub async fn reconcile_payouts(&self, caller: &str) -> FaucetResult<ReconcileSummary> {
        self.authorize(caller)?;
        self.orchestrator.reconcile_pending().await
    }

    pub async fn resolve_payout(
        &self,
        key: &str,
        resolution: ManualResolution,
        caller: &str,
    ) -> FaucetResult<Resolution> {
        self.authorize(caller)?;
        info!(key, caller, ?resolution, "Manual payout resolution");
        self.orchestrator.resolve_manually(key, resolution).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faucet::orchestrator::ClaimRequest;
    use crate::faucet::units::Drops;
    use crate::test_support::{
        ALICE, BOB, DAY, FakeLedgerFacts, ScriptedSubmitter, memory_ledger, t0, test_policy,
    };

    const ADMIN: &str = "@admin:textrp.io";
    const HOT: &str = "rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe";

    async fn reporter() -> (AdminStatsReporter, Arc<ClaimOrchestrator>, Arc<FakeLedgerFacts>) {
        let ledger = Arc::new(memory_ledger(DAY).await);
        let facts = Arc::new(FakeLedgerFacts::default());
        facts.fund(ALICE, Drops::new(20_000_000), true);
        facts.fund(HOT, Drops::new(500_000_000), true);
        facts.set_tokens(HOT, "1000000".parse().unwrap());
        let orchestrator = Arc::new(ClaimOrchestrator::new(
            ledger,
            facts.clone(),
            Arc::new(ScriptedSubmitter::default()),
            test_policy(),
        ));
        let reporter = AdminStatsReporter::new(
            orchestrator.clone(),
            facts.clone(),
            &["@Admin:TextRP.io".to_string()],
            Duration::from_secs(60),
        );
        (reporter, orchestrator, facts)
    }

    #[tokio::test]
    async fn admin_commands_require_membership() {
        let (reporter, _, _) = reporter().await;
        let outsider = "@someone:textrp.io";

        assert!(matches!(
            reporter.admin_blacklist(BOB, None, outsider, t0()).await,
            Err(FaucetError::Unauthorized)
        ));
        assert!(matches!(
            reporter.admin_whitelist(BOB, outsider).await,
            Err(FaucetError::Unauthorized)
        ));
        assert!(matches!(
            reporter.hot_wallet_balance(outsider).await,
            Err(FaucetError::Unauthorized)
        ));

        reporter
            .admin_blacklist(BOB, Some("bot farm".to_string()), ADMIN, t0())
            .await
            .unwrap();
        let listed = reporter.list_blacklist(ADMIN).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].wallet_address, BOB);
        assert!(reporter.admin_whitelist(BOB, ADMIN).await.unwrap());
    }

    #[tokio::test]
    async fn blacklist_rejects_malformed_wallet() {
        let (reporter, _, _) = reporter().await;
        assert!(matches!(
            reporter.admin_blacklist("rNope", None, ADMIN, t0()).await,
            Err(FaucetError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn overview_and_claim_info_follow_history() {
        let (reporter, orchestrator, _) = reporter().await;
        orchestrator
            .submit_claim_at(&ClaimRequest::new(ALICE, "r1"), t0())
            .await
            .unwrap();

        let overview = reporter.overview(t0() + chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(overview.stats.total_claims, 1);
        assert_eq!(overview.claims_24h, 1);
        assert_eq!(overview.pending_payouts, 0);

        let info = reporter.claim_info(ALICE).await.unwrap();
        assert_eq!(info.claim_count, 1);
        assert_eq!(info.total_claimed, "100".parse().unwrap());
        assert_eq!(info.next_claim_at, Some(t0() + chrono::Duration::hours(24)));

        let check = reporter
            .check_wallet(ALICE, t0() + chrono::Duration::hours(23))
            .await
            .unwrap();
        assert!(!check.can_claim);
        assert_eq!(check.cooldown_remaining_seconds, 3600);

        let fresh = reporter.check_wallet(BOB, t0()).await.unwrap();
        assert!(fresh.can_claim);
    }

    #[tokio::test]
    async fn hot_wallet_balance_is_cached() {
        let (reporter, _, facts) = reporter().await;
        let first = reporter.hot_wallet_balance(ADMIN).await.unwrap();
        assert_eq!(first.xrp, Drops::new(500_000_000));
        assert_eq!(first.token, "1000000".parse().unwrap());
        let lookups = facts.lookups();

        let second = reporter.hot_wallet_balance(ADMIN).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(facts.lookups(), lookups);
    }

    #[tokio::test]
    async fn verify_stats_reports_consistency() {
        let (reporter, orchestrator, _) = reporter().await;
        orchestrator
            .submit_claim_at(&ClaimRequest::new(ALICE, "r1"), t0())
            .await
            .unwrap();
        let check = reporter.verify_stats(ADMIN).await.unwrap();
        assert!(!check.repaired);
        assert_eq!(check.recomputed.total_claims, 1);
    }
}
