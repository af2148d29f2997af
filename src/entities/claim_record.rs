//! Committed faucet payouts. Cooldown decisions and statistics replay read
//! exclusively from this table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "claim_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Claimant XRPL classic address
    #[sea_orm(column_type = "String(StringLen::N(35))")]
    pub wallet_address: String,
    /// Time the payout was made
    pub claimed_at: DateTimeUtc,
    /// Amount paid, in token base units
    pub amount: i64,
    /// Ledger transaction hash of the payout
    #[sea_orm(column_type = "String(StringLen::N(128))")]
    pub transaction_reference: String,
    /// Key of the cooldown window this claim consumed
    #[sea_orm(column_type = "String(StringLen::N(64))", unique)]
    pub idempotency_key: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
