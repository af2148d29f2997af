//! Fixed-point amounts.
//!
//! Issued-token amounts carry six decimal places and are stored as integer
//! base units; XRP balances are kept in drops. Both parse from and render to
//! plain decimal strings such as `"100"` or `"0.25"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FaucetError;

/// Decimal places carried by [`TokenAmount`].
pub const TOKEN_DECIMALS: u32 = 6;
/// Decimal places of an XRP amount expressed in drops.
const XRP_DECIMALS: u32 = 6;

const TOKEN_SCALE: u64 = 10u64.pow(TOKEN_DECIMALS);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenAmount(u64);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub fn from_whole(whole: u64) -> Self {
        Self(whole.saturating_mul(TOKEN_SCALE))
    }

    pub fn checked_add(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(other.0).map(TokenAmount)
    }

    /// Value as stored in an `i64` column.
    pub fn to_db(self) -> Result<i64, FaucetError> {
        i64::try_from(self.0)
            .map_err(|_| FaucetError::Consistency(format!("amount {self} exceeds storage range")))
    }

    pub fn from_db(value: i64) -> Result<Self, FaucetError> {
        u64::try_from(value)
            .map(TokenAmount)
            .map_err(|_| FaucetError::Consistency(format!("negative stored amount {value}")))
    }
}

impl FromStr for TokenAmount {
    type Err = FaucetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_fixed(value, TOKEN_DECIMALS).map(TokenAmount)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_fixed(self.0, TOKEN_DECIMALS))
    }
}

/// XRP amount in drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Drops(u64);

impl Drops {
    pub const ZERO: Drops = Drops(0);

    pub const fn new(drops: u64) -> Self {
        Self(drops)
    }

    /// Parses an XRP-denominated decimal string (`"0.1"` is 100000 drops).
    pub fn from_xrp_str(value: &str) -> Result<Self, FaucetError> {
        parse_fixed(value, XRP_DECIMALS).map(Drops)
    }

    /// Parses the integer drop string the ledger returns in `Balance` fields.
    pub fn from_drops_str(value: &str) -> Result<Self, FaucetError> {
        value
            .trim()
            .parse::<u64>()
            .map(Drops)
            .map_err(|err| FaucetError::ExternalService(format!("invalid drops value {value:?}: {err}")))
    }
}

impl fmt::Display for Drops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} XRP", render_fixed(self.0, XRP_DECIMALS))
    }
}

fn parse_fixed(value: &str, decimals: u32) -> Result<u64, FaucetError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FaucetError::Validation("amount cannot be empty".to_string()));
    }
    let (whole, frac) = match trimmed.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (trimmed, ""),
    };
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !digits_only(whole) || !digits_only(frac) || (whole.is_empty() && frac.is_empty()) {
        return Err(FaucetError::Validation(format!("invalid amount {trimmed:?}")));
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(FaucetError::Validation(format!(
            "amount {trimmed:?} has more than {decimals} decimal places"
        )));
    }

    let scale = 10u64.pow(decimals);
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u64>()
            .map_err(|_| FaucetError::Validation(format!("amount {trimmed:?} out of range")))?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = decimals as usize);
        padded
            .parse::<u64>()
            .map_err(|_| FaucetError::Validation(format!("invalid amount {trimmed:?}")))?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(frac_units))
        .ok_or_else(|| FaucetError::Validation(format!("amount {trimmed:?} out of range")))
}

fn render_fixed(units: u64, decimals: u32) -> String {
    let scale = 10u64.pow(decimals);
    let whole = units / scale;
    let frac = units % scale;
    if frac == 0 {
        whole.to_string()
    } else {
        let frac_str = format!("{frac:0width$}", width = decimals as usize);
        format!("{whole}.{}", frac_str.trim_end_matches('0'))
    }
}
