// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::models::job::DomainError;

/// 预计算的未来执行时间数量
const NEXT_RUNS_WINDOW: usize = 5;

/// 调度类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// 一次性执行
    #[default]
    OneTime,
    /// 按cron表达式重复执行
    Recurring,
}

/// 爬虫调度值对象
///
/// cron在配置时区内求值，结果换算为UTC存储与比较。
/// 夏令时：不存在的本地时刻推进到下一个有效时刻，
/// 含糊时刻取较早偏移；只依赖 (cron, timezone, after)，
/// 重建调度器时结果一致
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerSchedule {
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// 未来执行时刻缓存（UTC，严格递增）
    #[serde(default)]
    pub next_runs: Vec<DateTime<Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl fmt::Display for CrawlerSchedule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.schedule_type {
            ScheduleType::Recurring => write!(
                f,
                "recurring: {} ({})",
                self.cron_expression.as_deref().unwrap_or("?"),
                self.timezone
            ),
            ScheduleType::OneTime => match self.next_runs.first() {
                Some(at) => write!(f, "one-time: {}", at.to_rfc3339()),
                None => write!(f, "one-time: not scheduled"),
            },
        }
    }
}

impl CrawlerSchedule {
    /// 创建一次性调度
    pub fn one_time(execution_time: DateTime<Utc>) -> Self {
        Self {
            schedule_type: ScheduleType::OneTime,
            cron_expression: None,
            timezone: default_timezone(),
            next_runs: vec![execution_time],
        }
    }

    /// 创建重复调度并预计算next_runs
    pub fn recurring(cron_expression: &str, timezone: &str) -> Result<Self, DomainError> {
        let mut schedule = Self {
            schedule_type: ScheduleType::Recurring,
            cron_expression: Some(cron_expression.to_string()),
            timezone: timezone.to_string(),
            next_runs: Vec::new(),
        };
        schedule.validate()?;
        schedule.next_runs = schedule.next_n_runs(NEXT_RUNS_WINDOW, Utc::now())?;
        Ok(schedule)
    }

    /// 校验调度
    ///
    /// recurring 必须有合法cron与IANA时区；one_time 不允许携带cron
    pub fn validate(&self) -> Result<(), DomainError> {
        self.parse_timezone()?;

        match self.schedule_type {
            ScheduleType::Recurring => {
                let expr = self.cron_expression.as_deref().ok_or_else(|| {
                    DomainError::Validation(
                        "cron_expression is required for recurring schedules".to_string(),
                    )
                })?;
                parse_cron(expr)?;
            }
            ScheduleType::OneTime => {
                if self.cron_expression.is_some() {
                    return Err(DomainError::Validation(
                        "cron_expression should not be set for one-time schedules".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_timezone(&self) -> Result<Tz, DomainError> {
        self.timezone.parse::<Tz>().map_err(|_| {
            DomainError::Validation(format!("invalid timezone '{}'", self.timezone))
        })
    }

    /// 计算某时刻之后的下一次执行（UTC）
    ///
    /// one_time 返回缓存时刻（若仍在未来侧不早于after则返回它一次）
    pub fn next_run_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, DomainError> {
        match self.schedule_type {
            ScheduleType::OneTime => Ok(self
                .next_runs
                .first()
                .copied()
                .filter(|at| *at > after)),
            ScheduleType::Recurring => {
                let runs = self.next_n_runs(1, after)?;
                Ok(runs.first().copied())
            }
        }
    }

    /// 计算某时刻之后的N次执行（UTC，严格递增）
    pub fn next_n_runs(
        &self,
        n: usize,
        after: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, DomainError> {
        if self.schedule_type != ScheduleType::Recurring {
            return Ok(self
                .next_runs
                .iter()
                .copied()
                .filter(|at| *at > after)
                .take(n)
                .collect());
        }

        let expr = self.cron_expression.as_deref().ok_or_else(|| {
            DomainError::Validation("cron_expression is required".to_string())
        })?;
        let schedule = parse_cron(expr)?;
        let tz = self.parse_timezone()?;

        // cron在时区内迭代：跳过的本地时刻不会产出，含糊时刻取较早偏移
        let zoned_after = after.with_timezone(&tz);
        Ok(schedule
            .after(&zoned_after)
            .take(n)
            .map(|at| at.with_timezone(&Utc))
            .collect())
    }

    /// 刷新next_runs缓存
    pub fn refresh_next_runs(&mut self, after: DateTime<Utc>) -> Result<(), DomainError> {
        if self.schedule_type == ScheduleType::Recurring {
            self.next_runs = self.next_n_runs(NEXT_RUNS_WINDOW, after)?;
        }
        Ok(())
    }

    /// 估算cron周期，用于触发TTL（取前两次执行的间隔）
    pub fn period(&self) -> Option<Duration> {
        match self.schedule_type {
            ScheduleType::OneTime => None,
            ScheduleType::Recurring => {
                let runs = self.next_n_runs(2, Utc::now()).ok()?;
                match runs.as_slice() {
                    [first, second] => Some(*second - *first),
                    _ => None,
                }
            }
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule_type == ScheduleType::Recurring
    }

    pub fn is_one_time(&self) -> bool {
        self.schedule_type == ScheduleType::OneTime
    }

    /// 下一次已缓存的执行时刻
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        self.next_runs.first().copied()
    }
}

/// 解析cron表达式
///
/// 接受5字段形式并补秒字段归一化为cron crate的6字段形式
fn parse_cron(expression: &str) -> Result<Schedule, DomainError> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized)
        .map_err(|e| DomainError::Validation(format!("invalid cron expression '{}': {}", expression, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recurring_requires_cron() {
        let schedule = CrawlerSchedule {
            schedule_type: ScheduleType::Recurring,
            cron_expression: None,
            timezone: "UTC".to_string(),
            next_runs: Vec::new(),
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_one_time_forbids_cron() {
        let schedule = CrawlerSchedule {
            schedule_type: ScheduleType::OneTime,
            cron_expression: Some("* * * * *".to_string()),
            timezone: "UTC".to_string(),
            next_runs: Vec::new(),
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let schedule = CrawlerSchedule {
            schedule_type: ScheduleType::Recurring,
            cron_expression: Some("*/5 * * * *".to_string()),
            timezone: "Mars/Olympus".to_string(),
            next_runs: Vec::new(),
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_five_field_cron_accepted() {
        let schedule = CrawlerSchedule::recurring("*/5 * * * *", "UTC").unwrap();
        assert_eq!(schedule.next_runs.len(), 5);
    }

    #[test]
    fn test_invalid_cron_rejected() {
        assert!(CrawlerSchedule::recurring("not a cron", "UTC").is_err());
    }

    #[test]
    fn test_every_minute_emits_one_per_minute() {
        let schedule = CrawlerSchedule::recurring("* * * * *", "UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap();

        let runs = schedule.next_n_runs(10, after).unwrap();
        assert_eq!(runs.len(), 10);
        assert_eq!(runs[0], Utc.with_ymd_and_hms(2025, 3, 1, 12, 1, 0).unwrap());
        for pair in runs.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::minutes(1));
        }
    }

    #[test]
    fn test_next_runs_strictly_increasing() {
        let schedule = CrawlerSchedule::recurring("*/5 * * * *", "America/Sao_Paulo").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 10, 3, 2, 0).unwrap();
        let runs = schedule.next_n_runs(6, after).unwrap();
        for pair in runs.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_cron_evaluated_in_local_zone() {
        // 每天本地9点，São Paulo为UTC-3（6月无夏令时）
        let schedule = CrawlerSchedule::recurring("0 9 * * *", "America/Sao_Paulo").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let runs = schedule.next_n_runs(1, after).unwrap();
        assert_eq!(runs[0], Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_one_time_fires_once() {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let schedule = CrawlerSchedule::one_time(at);

        let before = Utc.with_ymd_and_hms(2025, 5, 1, 7, 0, 0).unwrap();
        assert_eq!(schedule.next_run_after(before).unwrap(), Some(at));

        // 触发时刻过后不再产出
        assert_eq!(schedule.next_run_after(at).unwrap(), None);
    }

    #[test]
    fn test_period_estimation() {
        let schedule = CrawlerSchedule::recurring("*/5 * * * *", "UTC").unwrap();
        assert_eq!(schedule.period(), Some(Duration::minutes(5)));
    }

    #[test]
    fn test_json_roundtrip_uses_type_key() {
        let schedule = CrawlerSchedule::recurring("*/5 * * * *", "UTC").unwrap();
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["type"], "recurring");

        let parsed: CrawlerSchedule = serde_json::from_value(json).unwrap();
        assert!(parsed.is_recurring());
        assert_eq!(parsed.next_runs, schedule.next_runs);
    }
}
