//! Shared fixtures for unit tests: an in-memory ledger with migrations applied
//! and scripted stand-ins for the ledger RPC seams.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::error::{FaucetError, FaucetResult};
use crate::faucet::orchestrator::FaucetPolicy;
use crate::faucet::units::{Drops, TokenAmount};
use crate::faucet::{
    LedgerFacts, NodeStatus, PayoutOutcome, PayoutQuery, PayoutRequest, PayoutStatusReport,
    PayoutSubmitter, TokenAsset, TokenHolding,
};
use crate::ledger::ClaimLedger;

pub const ALICE: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
pub const BOB: &str = "rrrrrrrrrrrrrrrrrrrrBZbvji";
pub const DAY: Duration = Duration::from_secs(24 * 3600);

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub async fn memory_database() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // one connection, otherwise every pool member sees its own empty database
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let database = Database::connect(options).await.unwrap();
    Migrator::up(&database, None).await.unwrap();
    database
}

/// 100 TXT per day, 0.1 XRP reserve floor, 5 s payout timeout.
pub fn test_policy() -> FaucetPolicy {
    FaucetPolicy {
        asset: TokenAsset {
            currency: "TXT".to_string(),
            issuer: "rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn".to_string(),
        },
        hot_wallet: "rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe".to_string(),
        claim_amount: TokenAmount::from_whole(100),
        min_balance: Drops::new(100_000),
        cooldown: DAY,
        payout_timeout: Duration::from_secs(5),
    }
}

pub async fn memory_ledger(cooldown: Duration) -> ClaimLedger {
    ClaimLedger::new(memory_database().await, cooldown)
}

#[derive(Default)]
pub struct FakeLedgerFacts {
    accounts: Mutex<HashMap<String, (Drops, bool)>>,
    tokens: Mutex<HashMap<String, TokenAmount>>,
    holdings: Mutex<HashMap<String, Vec<TokenHolding>>>,
    lookups: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeLedgerFacts {
    pub fn fund(&self, wallet: &str, balance: Drops, trust_line: bool) {
        self.accounts
            .lock()
            .unwrap()
            .insert(wallet.to_string(), (balance, trust_line));
    }

    pub fn set_tokens(&self, wallet: &str, amount: TokenAmount) {
        self.tokens
            .lock()
            .unwrap()
            .insert(wallet.to_string(), amount);
    }

    pub fn set_holdings(&self, wallet: &str, holdings: Vec<TokenHolding>) {
        self.holdings
            .lock()
            .unwrap()
            .insert(wallet.to_string(), holdings);
    }

    pub fn fail_next_lookup(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn account(&self, wallet: &str) -> FaucetResult<(Drops, bool)> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(FaucetError::ExternalService("rippled unreachable".to_string()));
        }
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(wallet)
            .copied()
            .unwrap_or((Drops::ZERO, false)))
    }
}

#[async_trait]
impl LedgerFacts for FakeLedgerFacts {
    async fn trust_line_present(&self, wallet: &str, _asset: &TokenAsset) -> FaucetResult<bool> {
        Ok(self.account(wallet)?.1)
    }

    async fn xrp_balance(&self, wallet: &str) -> FaucetResult<Drops> {
        Ok(self.account(wallet)?.0)
    }

    async fn token_balance(&self, wallet: &str, _asset: &TokenAsset) -> FaucetResult<TokenAmount> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .get(wallet)
            .copied()
            .unwrap_or(TokenAmount::ZERO))
    }

    async fn token_holdings(&self, wallet: &str) -> FaucetResult<Vec<TokenHolding>> {
        self.account(wallet)?;
        Ok(self
            .holdings
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .unwrap_or_default())
    }

    async fn node_status(&self) -> FaucetResult<NodeStatus> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(FaucetError::ExternalService("rippled unreachable".to_string()));
        }
        Ok(NodeStatus {
            endpoint: "http://rippled.test:5005".to_string(),
            server_state: "full".to_string(),
            build_version: "2.3.0".to_string(),
            validated_ledger: Some(91_000_000),
        })
    }
}

/// Pays successfully unless an outcome was queued; status lookups answer
/// whatever was last set (`Unknown` by default).
pub struct ScriptedSubmitter {
    outcomes: Mutex<VecDeque<PayoutOutcome>>,
    submissions: Mutex<Vec<PayoutRequest>>,
    status: Mutex<PayoutStatusReport>,
    delay: Mutex<Duration>,
}

impl Default for ScriptedSubmitter {
    fn default() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            status: Mutex::new(PayoutStatusReport::Unknown),
            delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl ScriptedSubmitter {
    pub fn push_outcome(&self, outcome: PayoutOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn set_status(&self, status: PayoutStatusReport) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn submissions(&self) -> Vec<PayoutRequest> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PayoutSubmitter for ScriptedSubmitter {
    async fn submit_payment(&self, request: &PayoutRequest) -> PayoutOutcome {
        let count = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(request.clone());
            submissions.len()
        };
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| PayoutOutcome::Success(format!("{count:064X}")))
    }

    async fn payout_status(&self, _query: &PayoutQuery) -> FaucetResult<PayoutStatusReport> {
        Ok(self.status.lock().unwrap().clone())
    }
}
