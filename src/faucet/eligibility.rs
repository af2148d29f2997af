//! Claim eligibility.
//!
//! A pure function of ledger read-state plus externally supplied facts. The
//! check order is fixed (blacklist, trust line, reserve, cooldown) because it
//! decides which single reason a user sees.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::format_wait;
use crate::faucet::units::Drops;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Deny(DenyReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    NoTrustLine,
    Blacklisted { reason: Option<String> },
    CooldownActive { remaining: Duration },
    InsufficientReserve { required: Drops, actual: Drops },
}

impl DenyReason {
    pub fn user_message(&self) -> String {
        match self {
            DenyReason::NoTrustLine => {
                "You need to set up a trust line for the faucet token first.".to_string()
            }
            DenyReason::Blacklisted { .. } => "Wallet is blacklisted from faucet.".to_string(),
            DenyReason::CooldownActive { remaining } => format!(
                "Please wait {} before claiming again.",
                format_wait(*remaining)
            ),
            DenyReason::InsufficientReserve { required, .. } => format!(
                "You need at least {required} to claim. This helps prevent spam and abuse."
            ),
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoTrustLine => f.write_str("no trust line"),
            DenyReason::Blacklisted { reason: Some(reason) } => write!(f, "blacklisted: {reason}"),
            DenyReason::Blacklisted { reason: None } => f.write_str("blacklisted"),
            DenyReason::CooldownActive { remaining } => {
                write!(f, "cooldown active for {}s", remaining.as_secs())
            }
            DenyReason::InsufficientReserve { required, actual } => {
                write!(f, "insufficient reserve: required {required}, actual {actual}")
            }
        }
    }
}

/// Everything the evaluator looks at for one request.
#[derive(Debug, Clone)]
pub struct EligibilityInput {
    /// `Some` when the wallet is blacklisted, carrying the optional reason.
    pub blacklisted: Option<Option<String>>,
    pub last_claim: Option<DateTime<Utc>>,
    pub trust_line_present: bool,
    pub xrp_balance: Drops,
    pub min_balance: Drops,
    pub cooldown: Duration,
    pub now: DateTime<Utc>,
}

pub fn evaluate(input: &EligibilityInput) -> Verdict {
    let checks = [
        check_blacklist(&input.blacklisted),
        check_trust_line(input.trust_line_present),
        check_reserve(input.xrp_balance, input.min_balance),
        check_cooldown(input.last_claim, input.cooldown, input.now),
    ];
    checks
        .into_iter()
        .find_map(|check| check.err())
        .map_or(Verdict::Admit, Verdict::Deny)
}

pub fn check_blacklist(entry: &Option<Option<String>>) -> Result<(), DenyReason> {
    match entry {
        Some(reason) => Err(DenyReason::Blacklisted {
            reason: reason.clone(),
        }),
        None => Ok(()),
    }
}

pub fn check_trust_line(present: bool) -> Result<(), DenyReason> {
    if present {
        Ok(())
    } else {
        Err(DenyReason::NoTrustLine)
    }
}

pub fn check_reserve(actual: Drops, required: Drops) -> Result<(), DenyReason> {
    if actual < required {
        Err(DenyReason::InsufficientReserve { required, actual })
    } else {
        Ok(())
    }
}

pub fn check_cooldown(
    last_claim: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Result<(), DenyReason> {
    match cooldown_remaining(last_claim, cooldown, now) {
        Some(remaining) => Err(DenyReason::CooldownActive { remaining }),
        None => Ok(()),
    }
}

/// `cooldown - (now - last_claim)` floored at zero; `None` once elapsed or
/// when the wallet never claimed.
pub fn cooldown_remaining(
    last_claim: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last_claim = last_claim?;
    // a clock behind the last claim counts as zero elapsed
    let elapsed = (now - last_claim).to_std().unwrap_or(Duration::ZERO);
    let remaining = cooldown.saturating_sub(elapsed);
    if remaining.is_zero() { None } else { Some(remaining) }
}

/// Instant from which the wallet may claim again.
pub fn next_eligible_at(last_claim: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    let cooldown = chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);
    last_claim
        .checked_add_signed(cooldown)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
