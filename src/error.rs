use std::time::Duration;

use thiserror::Error;

use crate::faucet::eligibility::DenyReason;

pub type FaucetResult<T> = Result<T, FaucetError>;

/// Faucet failures, grouped by who needs to act on them.
#[derive(Debug, Error)]
pub enum FaucetError {
    /// Missing or invalid faucet settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed request input, rejected before evaluation.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("claim denied: {0}")]
    Denied(DenyReason),

    /// Another request for the same wallet holds the claim slot.
    #[error("a claim for this wallet is already in progress")]
    ClaimInProgress,

    /// The ledger definitively rejected the payment.
    #[error("payout failed: {0}")]
    PayoutFailed(String),

    /// The payout outcome is unknown and awaits reconciliation.
    #[error("payout outcome pending for key {idempotency_key}")]
    PayoutPending { idempotency_key: String },

    #[error("external service error: {0}")]
    ExternalService(String),

    /// The ledger refused a write that would duplicate or violate spacing.
    #[error("claim conflict: {0}")]
    Conflict(String),

    /// Persisted state disagrees with itself; needs operator attention.
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("caller is not a faucet admin")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl FaucetError {
    /// Text safe to show the chat user. Infrastructure failures collapse to a
    /// generic retry hint; the detailed cause stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            FaucetError::Validation(msg) => format!("Invalid request: {msg}"),
            FaucetError::Denied(reason) => reason.user_message(),
            FaucetError::ClaimInProgress => {
                "A claim for your wallet is already being processed. Please wait a moment."
                    .to_string()
            }
            FaucetError::PayoutFailed(cause) => format!("Failed to send tokens: {cause}"),
            FaucetError::PayoutPending { .. } => {
                "Your payout was submitted but is not confirmed yet. It will be checked \
                 before any new claim is allowed."
                    .to_string()
            }
            FaucetError::Unauthorized => "This command is restricted to faucet admins.".to_string(),
            FaucetError::Configuration(_) => "Faucet is not configured or available.".to_string(),
            FaucetError::ExternalService(_)
            | FaucetError::Conflict(_)
            | FaucetError::Consistency(_)
            | FaucetError::Database(_) => {
                "An error occurred while processing your claim. Please try again later."
                    .to_string()
            }
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FaucetError::ClaimInProgress
                | FaucetError::PayoutPending { .. }
                | FaucetError::ExternalService(_)
                | FaucetError::Database(_)
        )
    }
}

/// Renders a duration as `"3h 12m"`, `"12m"` or `"45s"` for chat replies.
pub fn format_wait(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{}s", total.max(1))
    }
}
