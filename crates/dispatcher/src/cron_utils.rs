//! Cron 表达式工具
//!
//! 六段表达式：秒 分 时 日 月 周。

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use cronplane_errors::{SchedulerError, SchedulerResult};

#[derive(Debug)]
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| SchedulerError::invalid_cron(cron_expr, e))?;
        Ok(Self { schedule })
    }

    /// 校验表达式
    pub fn validate(cron_expr: &str) -> SchedulerResult<()> {
        Schedule::from_str(cron_expr).map_err(|e| SchedulerError::invalid_cron(cron_expr, e))?;
        Ok(())
    }

    /// 严格晚于 from 的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 不早于 from 的下一次触发时间。
    /// from 本身落在 cron 边界上时返回 from
    pub fn next_at_or_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&(from - Duration::seconds(1))).next()
    }

    /// 从 from 开始的 n 次触发时间
    pub fn upcoming(&self, from: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_six_field_expression() {
        assert!(CronScheduler::new("*/5 * * * * *").is_ok());
        assert!(CronScheduler::new("0 30 3 * * *").is_ok());

        let err = CronScheduler::new("每五秒").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }

    #[test]
    fn test_next_after_is_strict() {
        let cron = CronScheduler::new("*/5 * * * * *").unwrap();
        let boundary = at(10, 0, 5);
        assert_eq!(cron.next_after(boundary), Some(at(10, 0, 10)));
    }

    #[test]
    fn test_next_at_or_after_includes_boundary() {
        let cron = CronScheduler::new("*/5 * * * * *").unwrap();
        assert_eq!(cron.next_at_or_after(at(10, 0, 5)), Some(at(10, 0, 5)));
        assert_eq!(cron.next_at_or_after(at(10, 0, 6)), Some(at(10, 0, 10)));
    }

    #[test]
    fn test_upcoming_sequence() {
        let cron = CronScheduler::new("0 * * * * *").unwrap();
        let times = cron.upcoming(at(10, 0, 30), 3);
        assert_eq!(times, vec![at(10, 1, 0), at(10, 2, 0), at(10, 3, 0)]);
    }
}
