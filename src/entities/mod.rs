pub mod blacklist_entry;
pub mod claim_record;
pub mod faucet_stats;
pub mod payout_attempt;
