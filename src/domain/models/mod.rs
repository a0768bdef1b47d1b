// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 作业（job）：单表多态的转换/爬虫作业及其状态机
/// - 页面（page）：拆分产出的单页记录
/// - 爬取文件（crawled_file）：一次执行下载的文件
/// - 爬虫配置与调度（crawler_config / crawler_schedule）：JSON值对象
/// - 重试历史（retry_history）：执行元数据
/// - 队列任务（work_task）：数据库承载的工作队列行
pub mod crawled_file;
pub mod crawler_config;
pub mod crawler_schedule;
pub mod job;
pub mod page;
pub mod retry_history;
pub mod work_task;
