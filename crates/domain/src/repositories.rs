//! 仓储抽象
//!
//! 关系型持久化只通过这些接口访问；调度核心不感知具体实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cronplane_errors::SchedulerResult;

use crate::entities::{
    ExecutorHeartbeat, ExecutorNode, InstanceStatus, Task, TaskDependency, TaskGroup, TaskInstance,
    TaskLog, TaskStatus,
};

/// 任务组仓储
#[async_trait]
pub trait TaskGroupRepository: Send + Sync {
    async fn create(&self, group: &TaskGroup) -> SchedulerResult<TaskGroup>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskGroup>>;
    async fn get_by_app_name(&self, app_name: &str) -> SchedulerResult<Option<TaskGroup>>;
    async fn list_all(&self) -> SchedulerResult<Vec<TaskGroup>>;
}

/// 任务仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;
    async fn update(&self, task: &Task) -> SchedulerResult<()>;
    async fn update_status(&self, id: i64, status: TaskStatus) -> SchedulerResult<()>;
    async fn delete(&self, id: i64) -> SchedulerResult<()>;

    /// 预读扫描：status=enabled 且 next_trigger_time <= deadline，
    /// 按 next_trigger_time 升序，最多 limit 条
    async fn get_due_tasks(
        &self,
        deadline: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>>;

    /// 推进调度游标，附带版本自增；只允许触发循环在领导锁内调用
    async fn advance_trigger_time(
        &self,
        id: i64,
        last_trigger_time: DateTime<Utc>,
        next_trigger_time: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// task_id 的直接依赖（父任务 id 列表）
    async fn get_dependencies(&self, task_id: i64) -> SchedulerResult<Vec<i64>>;
    async fn get_all_dependencies(&self) -> SchedulerResult<Vec<TaskDependency>>;
    async fn add_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()>;
    async fn remove_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()>;
}

/// 任务实例仓储
#[async_trait]
pub trait TaskInstanceRepository: Send + Sync {
    async fn create(&self, instance: &TaskInstance) -> SchedulerResult<TaskInstance>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskInstance>>;

    /// pending -> scheduling，写入选中的执行器；实例已离开 pending 则返回 false
    async fn mark_scheduling(
        &self,
        id: i64,
        executor_id: &str,
        executor_address: &str,
        schedule_time: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// scheduling -> running；实例不在 scheduling 则返回 false
    async fn mark_running(&self, id: i64, start_time: DateTime<Utc>) -> SchedulerResult<bool>;

    /// 写入终态。仅当实例仍是非终态时生效（首个终态写入获胜），
    /// 否则返回 false，调用方记一条告警日志即可
    async fn finish(
        &self,
        id: i64,
        status: InstanceStatus,
        result_code: i32,
        result_msg: &str,
        end_time: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// 置位告警标记，终态实例唯一允许的后续变更
    async fn mark_alarmed(&self, id: i64) -> SchedulerResult<bool>;

    /// 任务的全部非终态实例（pending/scheduling/running）
    async fn get_active_by_task(&self, task_id: i64) -> SchedulerResult<Vec<TaskInstance>>;

    /// 串行策略排队中最早的 pending 实例
    async fn get_oldest_pending_by_task(&self, task_id: i64)
        -> SchedulerResult<Option<TaskInstance>>;

    /// trigger_time 早于 before 的最近一个实例（依赖闸门用）
    async fn get_latest_by_task_before(
        &self,
        task_id: i64,
        before: DateTime<Utc>,
    ) -> SchedulerResult<Option<TaskInstance>>;

    /// 全部 running 实例（超时巡检用）
    async fn get_running(&self) -> SchedulerResult<Vec<TaskInstance>>;

    async fn list_by_task(&self, task_id: i64, limit: i64) -> SchedulerResult<Vec<TaskInstance>>;
    async fn get_recent(&self, limit: i64) -> SchedulerResult<Vec<TaskInstance>>;
    async fn count_by_status(
        &self,
        task_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SchedulerResult<std::collections::HashMap<InstanceStatus, i64>>;
}

/// 执行器节点仓储
#[async_trait]
pub trait ExecutorRepository: Send + Sync {
    async fn register(&self, node: &ExecutorNode) -> SchedulerResult<()>;
    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<ExecutorNode>>;

    /// 按心跳上报刷新负载与 last_heartbeat，并把状态置回在线；
    /// 节点不存在时返回 false
    async fn update_heartbeat(&self, heartbeat: &ExecutorHeartbeat) -> SchedulerResult<bool>;

    async fn set_offline(&self, id: &str) -> SchedulerResult<bool>;
    async fn get_online_by_group(&self, group_id: i64) -> SchedulerResult<Vec<ExecutorNode>>;
    async fn list_by_group(&self, group_id: i64) -> SchedulerResult<Vec<ExecutorNode>>;

    /// 把 last_heartbeat 早于 deadline 的在线节点批量置为离线，返回条数
    async fn mark_offline_stale(&self, deadline: DateTime<Utc>) -> SchedulerResult<u64>;
}

/// 任务日志仓储，只追加
#[async_trait]
pub trait TaskLogRepository: Send + Sync {
    async fn append(&self, log: &TaskLog) -> SchedulerResult<()>;
    async fn get_by_instance(&self, instance_id: i64, limit: i64) -> SchedulerResult<Vec<TaskLog>>;
}
