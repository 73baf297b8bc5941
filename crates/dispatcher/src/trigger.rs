//! 触发循环
//!
//! 每个 tick 抢一次领导锁，抢到的副本扫描预读窗口内到期的任务，
//! 在锁内推进调度游标并把触发挂上时间轮。没抢到锁或锁存储不可
//! 达都静默跳过本轮，下一个 tick 重试；游标未推进的任务会重新
//! 进入扫描。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use cronplane_domain::{Task, TaskRepository};
use cronplane_errors::{SchedulerError, SchedulerResult};
use cronplane_foundation::{DistributedLock, KvStore, TimeWheel};

use crate::cron_utils::CronScheduler;
use crate::dispatch::{DispatchService, FiringContext};

/// 触发领导锁键（锁层自动加 lock: 前缀）
pub const TRIGGER_LOCK_KEY: &str = "scheduler:trigger";

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// 循环周期
    pub interval: Duration,
    /// 预读窗口（秒）
    pub pre_read_seconds: i64,
    /// 单轮扫描上限
    pub scan_limit: i64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            pre_read_seconds: 5,
            scan_limit: 1000,
        }
    }
}

#[derive(Clone)]
pub struct TriggerScheduler {
    task_repo: Arc<dyn TaskRepository>,
    kv_store: Arc<dyn KvStore>,
    wheel: TimeWheel,
    dispatch: DispatchService,
    config: TriggerConfig,
    running: Arc<RwLock<bool>>,
}

impl TriggerScheduler {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        kv_store: Arc<dyn KvStore>,
        wheel: TimeWheel,
        dispatch: DispatchService,
        config: TriggerConfig,
    ) -> Self {
        Self {
            task_repo,
            kv_store,
            wheel,
            dispatch,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 启动触发循环
    pub fn start(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            {
                let mut running = scheduler.running.write().await;
                if *running {
                    warn!("触发循环已在运行");
                    return;
                }
                *running = true;
            }
            info!(
                "触发循环启动, 周期 {:?}, 预读 {} 秒",
                scheduler.config.interval, scheduler.config.pre_read_seconds
            );

            let mut ticker = tokio::time::interval(scheduler.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !*scheduler.running.read().await {
                    info!("触发循环已停止");
                    return;
                }
                if let Err(e) = scheduler.run_once().await {
                    error!("触发循环执行出错: {}", e);
                }
            }
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// 单轮触发：领导锁 -> 扫描 -> 推进游标 -> 挂轮。
    /// 返回本轮预载的触发数
    pub async fn run_once(&self) -> SchedulerResult<usize> {
        let lock = DistributedLock::new(
            self.kv_store.clone(),
            TRIGGER_LOCK_KEY,
            self.config.interval * 5,
        );

        match lock.lock().await {
            Ok(()) => {}
            Err(SchedulerError::LockFailed { .. }) => {
                debug!("未取得触发领导权，跳过本轮");
                return Ok(0);
            }
            Err(e) => {
                // 锁存储不可达：跳过本轮，下个 tick 重试
                warn!("触发锁不可用，跳过本轮: {}", e);
                return Ok(0);
            }
        }

        let result = self.scan_and_seed().await;

        if let Err(e) = lock.unlock().await {
            warn!("释放触发领导锁失败: {}", e);
        }
        result
    }

    async fn scan_and_seed(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(self.config.pre_read_seconds);
        let due = self
            .task_repo
            .get_due_tasks(deadline, self.config.scan_limit)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut seeded = 0;
        for task in due {
            match self.seed_task(&task, now).await {
                Ok(true) => seeded += 1,
                Ok(false) => {}
                // 游标未推进，下一轮扫描会重试该任务
                Err(e) => error!("预载任务 {} 触发失败: {}", task.id, e),
            }
        }

        if seeded > 0 {
            debug!("本轮预载 {} 个触发", seeded);
        }
        Ok(seeded)
    }

    /// 计算本次与下次触发时间，先落游标再挂轮。
    /// 两步之间崩溃最多丢失这一次预读触发（记录于设计文档）
    async fn seed_task(&self, task: &Task, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let cron = CronScheduler::new(&task.cron)?;

        // 游标落后时从当前时间追赶，跳过错过的触发点
        let base = match task.next_trigger_time {
            Some(next) if next > now => next,
            _ => now,
        };
        let Some(next_fire) = cron.next_at_or_after(base) else {
            warn!("任务 {} 无法计算下次触发时间: {}", task.id, task.cron);
            return Ok(false);
        };
        let Some(further_fire) = cron.next_after(next_fire) else {
            warn!("任务 {} 无法计算后续触发时间: {}", task.id, task.cron);
            return Ok(false);
        };

        if !self
            .task_repo
            .advance_trigger_time(task.id, next_fire, further_fire)
            .await?
        {
            return Ok(false);
        }

        let delay = (next_fire - now).to_std().unwrap_or(Duration::ZERO);
        let key = format!("{}:{}", task.id, next_fire.timestamp());
        let ctx = FiringContext::cron(task.id, next_fire);
        let job = self.dispatch.make_dispatch_job(ctx.clone());
        let reject = self.dispatch.make_saturated_job(ctx);
        self.wheel.add_task(delay, &key, job, Some(reject));

        debug!(
            "任务 {} 触发已挂轮: {} (延时 {:?})",
            task.id, next_fire, delay
        );
        Ok(true)
    }
}
