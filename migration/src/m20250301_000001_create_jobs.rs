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
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Jobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Jobs::UserId).uuid().not_null())
                    .col(ColumnDef::new(Jobs::JobType).string().not_null())
                    .col(ColumnDef::new(Jobs::Status).string().not_null())
                    .col(ColumnDef::new(Jobs::Progress).integer().not_null().default(0))
                    .col(ColumnDef::new(Jobs::SourceType).string().not_null())
                    .col(ColumnDef::new(Jobs::SourceUrl).text())
                    .col(ColumnDef::new(Jobs::UrlPattern).text())
                    .col(ColumnDef::new(Jobs::Name).string().not_null())
                    .col(ColumnDef::new(Jobs::ParentJobId).uuid())
                    .col(ColumnDef::new(Jobs::Error).text())
                    .col(ColumnDef::new(Jobs::TotalPages).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Jobs::PagesCompleted)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::PagesFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Jobs::StorageUploadPath).string())
                    .col(ColumnDef::new(Jobs::StorageResultPath).string())
                    .col(ColumnDef::new(Jobs::CrawlerConfig).json_binary())
                    .col(ColumnDef::new(Jobs::CrawlerSchedule).json_binary())
                    .col(ColumnDef::new(Jobs::ExecutionMeta).json_binary())
                    .col(
                        ColumnDef::new(Jobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Jobs::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Jobs::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Jobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_jobs_parent")
                            .from(Jobs::Table, Jobs::ParentJobId)
                            .to(Jobs::Table, Jobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 调度器重建走 (job_type, status) 复合索引
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_type_status")
                    .table(Jobs::Table)
                    .col(Jobs::JobType)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_user_created")
                    .table(Jobs::Table)
                    .col(Jobs::UserId)
                    .col(Jobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_parent")
                    .table(Jobs::Table)
                    .col(Jobs::ParentJobId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_url_pattern")
                    .table(Jobs::Table)
                    .col(Jobs::UrlPattern)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    UserId,
    JobType,
    Status,
    Progress,
    SourceType,
    SourceUrl,
    UrlPattern,
    Name,
    ParentJobId,
    Error,
    TotalPages,
    PagesCompleted,
    PagesFailed,
    StorageUploadPath,
    StorageResultPath,
    CrawlerConfig,
    CrawlerSchedule,
    ExecutionMeta,
    CreatedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}
