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
                    .table(WorkTasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(WorkTasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(WorkTasks::Kind).string().not_null())
                    .col(ColumnDef::new(WorkTasks::Queue).string().not_null())
                    .col(ColumnDef::new(WorkTasks::Payload).json_binary().not_null())
                    .col(ColumnDef::new(WorkTasks::Status).string().not_null())
                    .col(
                        ColumnDef::new(WorkTasks::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkTasks::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkTasks::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(WorkTasks::ScheduledAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(WorkTasks::ExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(WorkTasks::LockToken).uuid())
                    .col(ColumnDef::new(WorkTasks::LockExpiresAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(WorkTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(WorkTasks::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(WorkTasks::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(WorkTasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // 出队路径：queue + status + priority/created_at
        manager
            .create_index(
                Index::create()
                    .name("idx_work_tasks_queue_status")
                    .table(WorkTasks::Table)
                    .col(WorkTasks::Queue)
                    .col(WorkTasks::Status)
                    .col(WorkTasks::Priority)
                    .col(WorkTasks::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkTasks {
    Table,
    Id,
    Kind,
    Queue,
    Payload,
    Status,
    Priority,
    AttemptCount,
    MaxRetries,
    ScheduledAt,
    ExpiresAt,
    LockToken,
    LockExpiresAt,
    CreatedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}
