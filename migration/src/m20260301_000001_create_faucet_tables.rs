use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per committed faucet payout
        manager
            .create_table(
                Table::create()
                    .table(ClaimRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClaimRecords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ClaimRecords::WalletAddress)
                            .string_len(35)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClaimRecords::ClaimedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClaimRecords::Amount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClaimRecords::TransactionReference)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClaimRecords::IdempotencyKey)
                            .string_len(64)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Cooldown lookups scan by wallet, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_claim_wallet_time")
                    .table(ClaimRecords::Table)
                    .col(ClaimRecords::WalletAddress)
                    .col(ClaimRecords::ClaimedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // At most one committed claim per wallet window
        manager
            .create_index(
                Index::create()
                    .name("idx_claim_idempotency_key")
                    .table(ClaimRecords::Table)
                    .col(ClaimRecords::IdempotencyKey)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BlacklistEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BlacklistEntries::WalletAddress)
                            .string_len(35)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BlacklistEntries::Reason)
                            .string_len(512)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BlacklistEntries::AddedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BlacklistEntries::AddedBy)
                            .string_len(255)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FaucetStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FaucetStats::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FaucetStats::TotalClaims)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(FaucetStats::TotalDistributed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(FaucetStats::UniqueWallets)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(FaucetStats::LastUpdated)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // The aggregate is a single row with id 1
        let seed_stats = Query::insert()
            .into_table(FaucetStats::Table)
            .columns([FaucetStats::Id])
            .values_panic([1.into()])
            .to_owned();
        manager.exec_stmt(seed_stats).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FaucetStats::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BlacklistEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ClaimRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ClaimRecords {
    Table,
    Id,
    WalletAddress,
    ClaimedAt,
    Amount,
    TransactionReference,
    IdempotencyKey,
}

#[derive(DeriveIden)]
enum BlacklistEntries {
    Table,
    WalletAddress,
    Reason,
    AddedAt,
    AddedBy,
}

#[derive(DeriveIden)]
enum FaucetStats {
    Table,
    Id,
    TotalClaims,
    TotalDistributed,
    UniqueWallets,
    LastUpdated,
}
