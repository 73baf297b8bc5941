//! 任务服务
//!
//! 任务定义的生命周期操作：创建/更新时校验 cron 并播种调度游标，
//! 启停切换，手动触发，依赖边的加环校验与维护。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use cronplane_domain::{Task, TaskGroupRepository, TaskRepository, TaskStatus};
use cronplane_errors::{SchedulerError, SchedulerResult};
use cronplane_foundation::TaskDag;

use crate::cron_utils::CronScheduler;
use crate::dispatch::{DispatchService, FiringContext};

pub struct TaskService {
    task_repo: Arc<dyn TaskRepository>,
    group_repo: Arc<dyn TaskGroupRepository>,
    dispatch: DispatchService,
}

impl TaskService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        group_repo: Arc<dyn TaskGroupRepository>,
        dispatch: DispatchService,
    ) -> Self {
        Self {
            task_repo,
            group_repo,
            dispatch,
        }
    }

    /// 创建任务：校验 cron 与任务组，播种 next_trigger_time
    pub async fn create(&self, mut task: Task) -> SchedulerResult<Task> {
        let cron = CronScheduler::new(&task.cron)?;

        self.group_repo
            .get_by_id(task.group_id)
            .await?
            .ok_or_else(|| SchedulerError::GroupNotFound {
                app_name: format!("组ID {}", task.group_id),
            })?;

        task.shard_num = task.shard_num.max(1);
        task.next_trigger_time = cron.next_after(Utc::now());
        let created = self.task_repo.create(&task).await?;
        info!("任务创建成功: {} ({})", created.name, created.id);
        Ok(created)
    }

    /// 更新任务：cron 变化时重新播种游标
    pub async fn update(&self, mut task: Task) -> SchedulerResult<()> {
        let cron = CronScheduler::new(&task.cron)?;
        self.task_repo
            .get_by_id(task.id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task.id })?;

        task.shard_num = task.shard_num.max(1);
        task.next_trigger_time = cron.next_after(Utc::now());
        self.task_repo.update(&task).await
    }

    pub async fn get(&self, id: i64) -> SchedulerResult<Task> {
        self.task_repo
            .get_by_id(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })
    }

    pub async fn delete(&self, id: i64) -> SchedulerResult<()> {
        self.task_repo.delete(id).await
    }

    /// 启用任务并重新播种游标
    pub async fn enable(&self, id: i64) -> SchedulerResult<()> {
        let mut task = self.get(id).await?;
        let cron = CronScheduler::new(&task.cron)?;
        task.status = TaskStatus::Enabled;
        task.next_trigger_time = cron.next_after(Utc::now());
        self.task_repo.update(&task).await?;
        info!("任务 {} 已启用", id);
        Ok(())
    }

    pub async fn disable(&self, id: i64) -> SchedulerResult<()> {
        self.get(id).await?;
        self.task_repo.update_status(id, TaskStatus::Disabled).await?;
        info!("任务 {} 已禁用", id);
        Ok(())
    }

    /// 手动触发，绕过触发循环但走完整调度路径
    pub async fn trigger(&self, id: i64, param: Option<String>) -> SchedulerResult<()> {
        self.get(id).await?;
        self.dispatch.submit_firing(FiringContext::manual(id, param));
        info!("任务 {} 手动触发已提交", id);
        Ok(())
    }

    /// 预览 cron 表达式接下来 n 次触发时间
    pub fn next_trigger_times(cron: &str, n: usize) -> SchedulerResult<Vec<DateTime<Utc>>> {
        let cron = CronScheduler::new(cron)?;
        Ok(cron.upcoming(Utc::now(), n))
    }

    /// 添加依赖边 task_id -> depend_task_id，写入前经依赖图查环
    pub async fn add_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()> {
        self.get(task_id).await?;
        self.get(depend_task_id).await?;

        let mut dag = self.load_dependency_graph().await?;
        // 图中的边方向：被依赖者 -> 依赖者
        dag.add_edge(depend_task_id, task_id)?;

        self.task_repo.add_dependency(task_id, depend_task_id).await?;
        info!("任务依赖已添加: {} 依赖 {}", task_id, depend_task_id);
        Ok(())
    }

    pub async fn remove_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()> {
        self.task_repo.remove_dependency(task_id, depend_task_id).await
    }

    /// 以当前任务与依赖边构建依赖图
    pub async fn load_dependency_graph(&self) -> SchedulerResult<TaskDag> {
        let mut dag = TaskDag::new();
        let edges = self.task_repo.get_all_dependencies().await?;

        for edge in &edges {
            // 节点名仅用于诊断输出
            dag.add_node(edge.task_id, &format!("任务{}", edge.task_id));
            dag.add_node(edge.depend_task_id, &format!("任务{}", edge.depend_task_id));
        }
        for edge in &edges {
            dag.add_edge(edge.depend_task_id, edge.task_id)?;
        }
        Ok(dag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronplane_domain::TaskGroup;
    use cronplane_foundation::{TimeWheel, WorkerPool};
    use cronplane_infrastructure::{
        MemoryExecutorRepository, MemoryKvStore, MemoryTaskGroupRepository,
        MemoryTaskInstanceRepository, MemoryTaskLogRepository, MemoryTaskRepository,
    };
    use std::time::Duration;

    use crate::executor_client::ExecutorClient;
    use async_trait::async_trait;
    use cronplane_domain::{DispatchAck, DispatchRequest};

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

    async fn service() -> (TaskService, Arc<MemoryTaskRepository>) {
        let task_repo = Arc::new(MemoryTaskRepository::new());
        let group_repo = Arc::new(MemoryTaskGroupRepository::new());
        group_repo
            .create(&TaskGroup::new("演示组".into(), "demo".into()))
            .await
            .unwrap();

        let pool = WorkerPool::new(4, 16);
        let wheel = TimeWheel::new(Duration::from_millis(50), 64, pool.clone()).unwrap();
        let dispatch = DispatchService::new(
            task_repo.clone(),
            Arc::new(MemoryTaskInstanceRepository::new()),
            Arc::new(MemoryExecutorRepository::new()),
            Arc::new(MemoryTaskLogRepository::new()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(NoopClient),
            wheel,
            pool,
        );

        (
            TaskService::new(task_repo.clone(), group_repo, dispatch),
            task_repo,
        )
    }

    fn sample_task() -> Task {
        Task::new(1, "清理".into(), "*/5 * * * * *".into(), "cleanup".into())
    }

    #[tokio::test]
    async fn test_create_seeds_next_trigger_time() {
        let (service, _) = service().await;
        let created = service.create(sample_task()).await.unwrap();

        let next = created.next_trigger_time.expect("游标应已播种");
        assert!(next > Utc::now() - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_cron() {
        let (service, _) = service().await;
        let mut task = sample_task();
        task.cron = "每五秒".into();

        let err = service.create(task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_group() {
        let (service, _) = service().await;
        let mut task = sample_task();
        task.group_id = 99;

        let err = service.create(task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::GroupNotFound { .. }));
    }

    #[tokio::test]
    async fn test_dependency_cycle_rejected() {
        let (service, _) = service().await;
        let a = service.create(sample_task()).await.unwrap();
        let b = service.create(sample_task()).await.unwrap();
        let c = service.create(sample_task()).await.unwrap();

        service.add_dependency(b.id, a.id).await.unwrap(); // b 依赖 a
        service.add_dependency(c.id, b.id).await.unwrap(); // c 依赖 b

        // a 依赖 c 成环
        let err = service.add_dependency(a.id, c.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::CycleDetected { .. }));

        // 图保持无环，拓扑排序成功
        let dag = service.load_dependency_graph().await.unwrap();
        let order = dag.topological_sort().unwrap();
        assert_eq!(order.len(), 3);
    }

    #[tokio::test]
    async fn test_enable_reseeds_cursor() {
        let (service, task_repo) = service().await;
        let created = service.create(sample_task()).await.unwrap();

        service.disable(created.id).await.unwrap();
        let task = task_repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Disabled);

        service.enable(created.id).await.unwrap();
        let task = task_repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Enabled);
        assert!(task.next_trigger_time.unwrap() > Utc::now() - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_next_trigger_times_preview() {
        let times = TaskService::next_trigger_times("0 * * * * *", 3).unwrap();
        assert_eq!(times.len(), 3);
        assert!(times[0] < times[1] && times[1] < times[2]);
    }
}
