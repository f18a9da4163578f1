//! Initial schema migration for electronic invoicing.
//!
//! - `electronic_invoices`: one fiscal document per sale, with its lifecycle
//!   state and the payloads exchanged with the SRI
//! - `invoice_sequences`: the per (establishment, emission point) counter
//!   used to allocate sequentials
//!
//! Uniqueness of `sale_id`, `access_key` and the
//! `(establishment, emission_point, sequential)` triple is enforced here and
//! not only in the engine.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum ElectronicInvoices {
    Table,
    Id,
    SaleId,
    Establishment,
    EmissionPoint,
    Sequential,
    AccessKey,
    NumericCode,
    EmissionDate,
    Environment,
    BuyerIdentification,
    BuyerName,
    SubtotalMinor,
    DiscountMinor,
    TaxMinor,
    TotalMinor,
    State,
    RequestXml,
    SignedXml,
    AuthorizedXml,
    AuthorizationNumber,
    AuthorizedAt,
    AuthorityMessages,
    Attempts,
    SendingSince,
    AnnulmentReason,
    AnnulledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum InvoiceSequences {
    Table,
    Establishment,
    EmissionPoint,
    LastSequential,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Electronic invoices
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(ElectronicInvoices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ElectronicInvoices::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::SaleId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::Establishment)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::EmissionPoint)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::Sequential)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::AccessKey)
                            .string_len(49)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::NumericCode)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::EmissionDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::Environment)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::BuyerIdentification)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::BuyerName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::SubtotalMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::DiscountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::TaxMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::TotalMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::State)
                            .string()
                            .not_null()
                            .default("GENERATED"),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::RequestXml)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ElectronicInvoices::SignedXml).text())
                    .col(ColumnDef::new(ElectronicInvoices::AuthorizedXml).text())
                    .col(ColumnDef::new(ElectronicInvoices::AuthorizationNumber).string())
                    .col(ColumnDef::new(ElectronicInvoices::AuthorizedAt).timestamp())
                    .col(
                        ColumnDef::new(ElectronicInvoices::AuthorityMessages)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ElectronicInvoices::SendingSince).timestamp())
                    .col(ColumnDef::new(ElectronicInvoices::AnnulmentReason).string())
                    .col(ColumnDef::new(ElectronicInvoices::AnnulledAt).timestamp())
                    .col(
                        ColumnDef::new(ElectronicInvoices::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ElectronicInvoices::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-electronic_invoices-sale_id")
                    .table(ElectronicInvoices::Table)
                    .col(ElectronicInvoices::SaleId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-electronic_invoices-access_key")
                    .table(ElectronicInvoices::Table)
                    .col(ElectronicInvoices::AccessKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-electronic_invoices-establishment-emission_point-sequential")
                    .table(ElectronicInvoices::Table)
                    .col(ElectronicInvoices::Establishment)
                    .col(ElectronicInvoices::EmissionPoint)
                    .col(ElectronicInvoices::Sequential)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-electronic_invoices-state-created_at")
                    .table(ElectronicInvoices::Table)
                    .col(ElectronicInvoices::State)
                    .col(ElectronicInvoices::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Sequence counters
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(InvoiceSequences::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InvoiceSequences::Establishment)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InvoiceSequences::EmissionPoint)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InvoiceSequences::LastSequential)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(InvoiceSequences::Establishment)
                            .col(InvoiceSequences::EmissionPoint),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InvoiceSequences::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ElectronicInvoices::Table).to_owned())
            .await?;
        Ok(())
    }
}
