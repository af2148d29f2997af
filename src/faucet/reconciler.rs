use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::faucet::orchestrator::ClaimOrchestrator;

/// Periodically settles pending payouts until shutdown is signalled.
pub struct PayoutReconciler {
    orchestrator: Arc<ClaimOrchestrator>,
    interval: Duration,
}

impl PayoutReconciler {
    pub fn new(orchestrator: Arc<ClaimOrchestrator>, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "Reconcile interval must be positive");
        Self {
            orchestrator,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "Starting payout reconciler");
        // attempts left pending by a previous process
        self.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Reconciler shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting reconciler loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }

        Ok(())
    }

    async fn tick(&self) {
        match self.orchestrator.reconcile_pending().await {
            Ok(summary) => debug!(?summary, "Reconciler pass complete"),
            Err(err) => warn!("Reconciler pass failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faucet::orchestrator::{ClaimRequest, FaucetPolicy};
    use crate::faucet::units::Drops;
    use crate::faucet::{PayoutOutcome, PayoutStatusReport, PayoutTicket, TokenAsset};
    use crate::test_support::{ALICE, DAY, FakeLedgerFacts, ScriptedSubmitter, memory_ledger, t0};

    #[tokio::test]
    async fn startup_pass_settles_pending_and_stops_on_signal() {
        let ledger = Arc::new(memory_ledger(DAY).await);
        let facts = Arc::new(FakeLedgerFacts::default());
        facts.fund(ALICE, Drops::new(5_000_000), true);
        let submitter = Arc::new(ScriptedSubmitter::default());
        submitter.push_outcome(PayoutOutcome::Ambiguous(PayoutTicket::default()));
        let orchestrator = Arc::new(ClaimOrchestrator::new(
            ledger.clone(),
            facts,
            submitter.clone(),
            FaucetPolicy {
                asset: TokenAsset {
                    currency: "TXT".to_string(),
                    issuer: "rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn".to_string(),
                },
                hot_wallet: "rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe".to_string(),
                claim_amount: "10".parse().unwrap(),
                min_balance: Drops::new(1_000_000),
                cooldown: DAY,
                payout_timeout: Duration::from_secs(5),
            },
        ));
        assert!(
            orchestrator
                .submit_claim_at(&ClaimRequest::new(ALICE, "r"), t0())
                .await
                .is_err()
        );
        submitter.set_status(PayoutStatusReport::Confirmed("BEEF".to_string()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler = PayoutReconciler::new(orchestrator, Duration::from_secs(3600));
        let handle = tokio::spawn(reconciler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(ledger.pending_payouts().await.unwrap().is_empty());
        assert_eq!(ledger.get_stats().await.unwrap().total_claims, 1);
    }
}
