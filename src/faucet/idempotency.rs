use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::faucet::eligibility::next_eligible_at;

const GENESIS_ANCHOR: &str = "genesis";

/// Key identifying a wallet's current claim window.
///
/// The window is anchored at the instant the wallet last became eligible
/// (previous claim + cooldown), so every retry before the next commit derives
/// the same key and the key changes once a claim is committed.
pub fn idempotency_key(
    wallet: &str,
    last_claim: Option<DateTime<Utc>>,
    cooldown: Duration,
) -> String {
    let anchor = match last_claim {
        Some(last) => next_eligible_at(last, cooldown).to_rfc3339_opts(SecondsFormat::Micros, true),
        None => GENESIS_ANCHOR.to_string(),
    };
    let mut hasher = Sha256::new();
    hasher.update(wallet.as_bytes());
    hasher.update(b"|");
    hasher.update(anchor.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DAY: Duration = Duration::from_secs(86_400);
    const WALLET: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    #[test]
    fn stable_within_a_window() {
        let last = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        let a = idempotency_key(WALLET, Some(last), DAY);
        let b = idempotency_key(WALLET, Some(last), DAY);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn changes_after_commit_and_per_wallet() {
        let first = idempotency_key(WALLET, None, DAY);
        let last = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        let second = idempotency_key(WALLET, Some(last), DAY);
        assert_ne!(first, second);

        let other = idempotency_key("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe", None, DAY);
        assert_ne!(first, other);
    }
}
