//! 实例超时巡检
//!
//! 周期扫描 running 实例，执行时长超过任务 timeout 的实例判定
//! 失败（timeout 为 0 的任务不限时）。失败走统一的失败收尾，
//! 与结果回调竞争同一把实例锁，先到者胜。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use cronplane_domain::{TaskInstanceRepository, TaskRepository};
use cronplane_errors::SchedulerResult;

use crate::dispatch::{DispatchService, MSG_TIMEOUT};

#[derive(Clone)]
pub struct TimeoutSweeper {
    task_repo: Arc<dyn TaskRepository>,
    instance_repo: Arc<dyn TaskInstanceRepository>,
    dispatch: DispatchService,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl TimeoutSweeper {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        instance_repo: Arc<dyn TaskInstanceRepository>,
        dispatch: DispatchService,
        interval: Duration,
    ) -> Self {
        Self {
            task_repo,
            instance_repo,
            dispatch,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn start(&self) {
        let sweeper = self.clone();
        tokio::spawn(async move {
            {
                let mut running = sweeper.running.write().await;
                if *running {
                    warn!("超时巡检已在运行");
                    return;
                }
                *running = true;
            }
            info!("超时巡检启动, 周期 {:?}", sweeper.interval);

            let mut ticker = tokio::time::interval(sweeper.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !*sweeper.running.read().await {
                    info!("超时巡检已停止");
                    return;
                }
                if let Err(e) = sweeper.sweep_once().await {
                    error!("超时巡检执行出错: {}", e);
                }
            }
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// 单轮巡检，返回判定超时的实例数
    pub async fn sweep_once(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let mut timed_out = 0;

        for instance in self.instance_repo.get_running().await? {
            let Some(task) = self.task_repo.get_by_id(instance.task_id).await? else {
                continue;
            };
            if task.timeout <= 0 {
                continue;
            }
            let Some(start_time) = instance.start_time else {
                continue;
            };

            if now - start_time > chrono::Duration::seconds(task.timeout) {
                warn!(
                    "实例 {} 运行超过 {} 秒，判定超时",
                    instance.id, task.timeout
                );
                self.dispatch
                    .fail_instance(&task, &instance, -1, MSG_TIMEOUT)
                    .await?;
                timed_out += 1;
            }
        }
        Ok(timed_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use cronplane_domain::{
        DispatchAck, DispatchRequest, InstanceStatus, Task, TaskInstance, TriggerType,
    };
    use cronplane_foundation::{TimeWheel, WorkerPool};
    use cronplane_infrastructure::{
        MemoryExecutorRepository, MemoryKvStore, MemoryTaskInstanceRepository,
        MemoryTaskLogRepository, MemoryTaskRepository,
    };
    use cronplane_errors::SchedulerResult;

    use crate::executor_client::ExecutorClient;

    struct NoopClient;

    #[async_trait]
    impl ExecutorClient for NoopClient {
        async fn run(&self, _: &str, _: &DispatchRequest) -> SchedulerResult<DispatchAck> {
            Ok(DispatchAck {
                code: 0,
                message: "ok".into(),
            })
        }

        async fn cancel(&self, _: &str, _: i64) -> SchedulerResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        task_repo: Arc<MemoryTaskRepository>,
        instance_repo: Arc<MemoryTaskInstanceRepository>,
        sweeper: TimeoutSweeper,
    }

    fn fixture() -> Fixture {
        let task_repo = Arc::new(MemoryTaskRepository::new());
        let instance_repo = Arc::new(MemoryTaskInstanceRepository::new());

        let pool = WorkerPool::new(2, 16);
        let wheel = TimeWheel::new(Duration::from_millis(100), 64, pool.clone()).unwrap();
        let dispatch = crate::dispatch::DispatchService::new(
            task_repo.clone(),
            instance_repo.clone(),
            Arc::new(MemoryExecutorRepository::new()),
            Arc::new(MemoryTaskLogRepository::new()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(NoopClient),
            wheel,
            pool,
        );

        let sweeper = TimeoutSweeper::new(
            task_repo.clone(),
            instance_repo.clone(),
            dispatch,
            Duration::from_secs(10),
        );

        Fixture {
            task_repo,
            instance_repo,
            sweeper,
        }
    }

    /// 建一个已运行 running_for 秒的实例
    async fn running_instance(fixture: &Fixture, timeout: i64, running_for: i64) -> TaskInstance {
        let mut task = Task::new(1, "作业".into(), "*/5 * * * * *".into(), "handler.run".into());
        task.timeout = timeout;
        let task = fixture.task_repo.create(&task).await.unwrap();

        let instance = fixture
            .instance_repo
            .create(&TaskInstance::from_task(&task, TriggerType::Cron, Utc::now()))
            .await
            .unwrap();
        fixture
            .instance_repo
            .mark_scheduling(instance.id, "exec-1", "10.0.0.1:8080", Utc::now())
            .await
            .unwrap();
        fixture
            .instance_repo
            .mark_running(
                instance.id,
                Utc::now() - chrono::Duration::seconds(running_for),
            )
            .await
            .unwrap();
        fixture.instance_repo.get_by_id(instance.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_overdue_running_instance_is_swept() {
        let fixture = fixture();
        let instance = running_instance(&fixture, 1, 5).await;

        assert_eq!(fixture.sweeper.sweep_once().await.unwrap(), 1);

        let swept = fixture
            .instance_repo
            .get_by_id(instance.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(swept.status, InstanceStatus::Failed);
        assert_eq!(swept.result_msg.as_deref(), Some("任务执行超时"));
    }

    #[tokio::test]
    async fn test_fresh_running_instance_is_not_swept() {
        let fixture = fixture();
        let instance = running_instance(&fixture, 60, 1).await;

        assert_eq!(fixture.sweeper.sweep_once().await.unwrap(), 0);
        let status = fixture
            .instance_repo
            .get_by_id(instance.id)
            .await
            .unwrap()
            .unwrap()
            .status;
        assert_eq!(status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_unbounded() {
        let fixture = fixture();
        // timeout 为 0 表示不限时，运行再久也不判超时
        let instance = running_instance(&fixture, 0, 3600).await;

        assert_eq!(fixture.sweeper.sweep_once().await.unwrap(), 0);
        let status = fixture
            .instance_repo
            .get_by_id(instance.id)
            .await
            .unwrap()
            .unwrap()
            .status;
        assert_eq!(status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_negative_timeout_is_unbounded() {
        let fixture = fixture();
        let instance = running_instance(&fixture, -5, 3600).await;

        assert_eq!(fixture.sweeper.sweep_once().await.unwrap(), 0);
        let status = fixture
            .instance_repo
            .get_by_id(instance.id)
            .await
            .unwrap()
            .unwrap()
            .status;
        assert_eq!(status, InstanceStatus::Running);
    }
}
