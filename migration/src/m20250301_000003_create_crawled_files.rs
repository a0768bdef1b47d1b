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
                    .table(CrawledFiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrawledFiles::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrawledFiles::ExecutionId).uuid().not_null())
                    .col(ColumnDef::new(CrawledFiles::Url).text().not_null())
                    .col(ColumnDef::new(CrawledFiles::Filename).string().not_null())
                    .col(ColumnDef::new(CrawledFiles::FileType).string())
                    .col(ColumnDef::new(CrawledFiles::MimeType).string())
                    .col(
                        ColumnDef::new(CrawledFiles::SizeBytes)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CrawledFiles::StoragePath).string())
                    .col(ColumnDef::new(CrawledFiles::PublicUrl).text())
                    .col(ColumnDef::new(CrawledFiles::Status).string().not_null())
                    .col(ColumnDef::new(CrawledFiles::Error).text())
                    .col(ColumnDef::new(CrawledFiles::DownloadedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(CrawledFiles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_crawled_files_execution")
                            .from(CrawledFiles::Table, CrawledFiles::ExecutionId)
                            .to(Jobs::Table, Jobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crawled_files_execution")
                    .table(CrawledFiles::Table)
                    .col(CrawledFiles::ExecutionId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CrawledFiles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CrawledFiles {
    Table,
    Id,
    ExecutionId,
    Url,
    Filename,
    FileType,
    MimeType,
    SizeBytes,
    StoragePath,
    PublicUrl,
    Status,
    Error,
    DownloadedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
}
