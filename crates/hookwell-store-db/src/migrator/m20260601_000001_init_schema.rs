//! Consolidated initial schema migration

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ============================================================
        // 1. Create owners table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Owner::Table)
                    .if_not_exists()
                    .col(uuid(Owner::Id).primary_key())
                    .col(string_len(Owner::Email, 255).not_null().unique_key())
                    .col(string_len(Owner::Plan, 16).not_null().default("free"))
                    .col(big_integer(Owner::RequestLimit).not_null())
                    .col(big_integer(Owner::RequestsUsed).not_null().default(0))
                    .col(timestamp_with_time_zone_null(Owner::PeriodStart))
                    .col(timestamp_with_time_zone_null(Owner::PeriodEnd))
                    .col(
                        boolean(Owner::CancelAtPeriodEnd)
                            .not_null()
                            .default(false),
                    )
                    .col(string_len_null(Owner::SubscriptionStatus, 64))
                    .col(
                        string_len_null(Owner::BillingCustomerId, 255).unique_key(),
                    )
                    .col(
                        timestamp_with_time_zone(Owner::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_owners_period_end")
                    .table(Owner::Table)
                    .col(Owner::PeriodEnd)
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 2. Create endpoints table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Endpoint::Table)
                    .if_not_exists()
                    .col(string_len(Endpoint::Id, 64).primary_key())
                    .col(string_len(Endpoint::Slug, 50).not_null().unique_key())
                    .col(uuid_null(Endpoint::OwnerId))
                    .col(string_len_null(Endpoint::Name, 255))
                    .col(text_null(Endpoint::MockResponse))
                    .col(boolean(Endpoint::IsEphemeral).not_null().default(false))
                    .col(timestamp_with_time_zone_null(Endpoint::ExpiresAt))
                    .col(big_integer(Endpoint::RequestCount).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(Endpoint::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_endpoints_owner_id")
                            .from(Endpoint::Table, Endpoint::OwnerId)
                            .to(Owner::Table, Owner::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_endpoints_slug")
                    .table(Endpoint::Table)
                    .col(Endpoint::Slug)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_endpoints_expires_at")
                    .table(Endpoint::Table)
                    .col(Endpoint::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 3. Create captured_requests table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(CapturedRequest::Table)
                    .if_not_exists()
                    .col(string_len(CapturedRequest::Id, 64).primary_key())
                    .col(string_len(CapturedRequest::EndpointId, 64).not_null())
                    .col(string_len(CapturedRequest::Method, 16).not_null())
                    .col(string_len(CapturedRequest::Path, 2048).not_null())
                    .col(text(CapturedRequest::Headers).not_null())
                    .col(text_null(CapturedRequest::Body))
                    .col(text(CapturedRequest::QueryParams).not_null())
                    .col(string_len_null(CapturedRequest::ContentType, 255))
                    .col(string_len(CapturedRequest::Ip, 45).not_null())
                    .col(big_integer(CapturedRequest::Size).not_null())
                    .col(
                        timestamp_with_time_zone(CapturedRequest::ReceivedAt)
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_captured_requests_endpoint_id")
                            .from(CapturedRequest::Table, CapturedRequest::EndpointId)
                            .to(Endpoint::Table, Endpoint::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_captured_requests_endpoint_received")
                    .table(CapturedRequest::Table)
                    .col(CapturedRequest::EndpointId)
                    .col((CapturedRequest::ReceivedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CapturedRequest::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Endpoint::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Owner::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Owner {
    #[sea_orm(iden = "owners")]
    Table,
    Id,
    Email,
    Plan,
    RequestLimit,
    RequestsUsed,
    PeriodStart,
    PeriodEnd,
    CancelAtPeriodEnd,
    SubscriptionStatus,
    BillingCustomerId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Endpoint {
    #[sea_orm(iden = "endpoints")]
    Table,
    Id,
    Slug,
    OwnerId,
    Name,
    MockResponse,
    IsEphemeral,
    ExpiresAt,
    RequestCount,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CapturedRequest {
    #[sea_orm(iden = "captured_requests")]
    Table,
    Id,
    EndpointId,
    Method,
    Path,
    Headers,
    Body,
    QueryParams,
    ContentType,
    Ip,
    Size,
    ReceivedAt,
}
