// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_jobs;
mod m20250301_000002_create_pages;
mod m20250301_000003_create_crawled_files;
mod m20250301_000004_create_work_tasks;

/// 数据库迁移器
///
/// 管理数据库模式迁移，负责数据库结构的版本控制
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_jobs::Migration),
            Box::new(m20250301_000002_create_pages::Migration),
            Box::new(m20250301_000003_create_crawled_files::Migration),
            Box::new(m20250301_000004_create_work_tasks::Migration),
        ]
    }
}
