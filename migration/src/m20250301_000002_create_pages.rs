// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Pages::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Pages::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Pages::JobId).uuid().not_null())
                    .col(ColumnDef::new(Pages::PageNumber).integer().not_null())
                    .col(ColumnDef::new(Pages::PageJobId).uuid())
                    .col(ColumnDef::new(Pages::Status).string().not_null())
                    .col(ColumnDef::new(Pages::StoragePagePath).string())
                    .col(ColumnDef::new(Pages::MarkdownContent).text())
                    .col(ColumnDef::new(Pages::StorageMarkdownPath).string())
                    .col(ColumnDef::new(Pages::Error).text())
                    .col(
                        ColumnDef::new(Pages::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Pages::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Pages::CompletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pages_job")
                            .from(Pages::Table, Pages::JobId)
                            .to(Jobs::Table, Jobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_pages_job_number")
                    .table(Pages::Table)
                    .col(Pages::JobId)
                    .col(Pages::PageNumber)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Pages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Pages {
    Table,
    Id,
    JobId,
    PageNumber,
    PageJobId,
    Status,
    StoragePagePath,
    MarkdownContent,
    StorageMarkdownPath,
    Error,
    RetryCount,
    UpdatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
}
