use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Journal of payouts written before submission, resolved afterwards
        manager
            .create_table(
                Table::create()
                    .table(PayoutAttempts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PayoutAttempts::IdempotencyKey)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::WalletAddress)
                            .string_len(35)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::Amount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::TransactionReference)
                            .string_len(128)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::LastLedgerSequence)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::FailureCause)
                            .string_len(512)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutAttempts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payout_wallet_status")
                    .table(PayoutAttempts::Table)
                    .col(PayoutAttempts::WalletAddress)
                    .col(PayoutAttempts::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PayoutAttempts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PayoutAttempts {
    Table,
    IdempotencyKey,
    WalletAddress,
    Amount,
    Status,
    TransactionReference,
    LastLedgerSequence,
    FailureCause,
    CreatedAt,
    UpdatedAt,
}
