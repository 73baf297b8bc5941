//! 内存仓储
//!
//! 嵌入模式与测试共用的内存实现，语义与 Postgres 版保持一致：
//! 条件更新（mark_* / finish）同样遵循"首个终态写入获胜"。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use cronplane_domain::{
    AlarmStatus, ExecutorHeartbeat, ExecutorNode, ExecutorStatus, InstanceStatus, Task,
    TaskDependency, TaskGroup, TaskInstance, TaskLog, TaskStatus,
};
use cronplane_domain::{
    ExecutorRepository, TaskGroupRepository, TaskInstanceRepository, TaskLogRepository,
    TaskRepository,
};
use cronplane_errors::SchedulerResult;
use cronplane_foundation::KvStore;

// ============================================================================
// 任务组
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskGroupRepository {
    groups: Mutex<HashMap<i64, TaskGroup>>,
    next_id: Mutex<i64>,
}

impl MemoryTaskGroupRepository {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl TaskGroupRepository for MemoryTaskGroupRepository {
    async fn create(&self, group: &TaskGroup) -> SchedulerResult<TaskGroup> {
        let mut groups = self.groups.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = group.clone();
        created.id = *next_id;
        *next_id += 1;
        groups.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskGroup>> {
        Ok(self.groups.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_app_name(&self, app_name: &str) -> SchedulerResult<Option<TaskGroup>> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .values()
            .find(|g| g.app_name == app_name)
            .cloned())
    }

    async fn list_all(&self) -> SchedulerResult<Vec<TaskGroup>> {
        let mut groups: Vec<_> = self.groups.lock().unwrap().values().cloned().collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }
}

// ============================================================================
// 任务
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: Mutex<HashMap<i64, Task>>,
    dependencies: Mutex<Vec<TaskDependency>>,
    next_id: Mutex<i64>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            dependencies: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = task.clone();
        created.id = *next_id;
        *next_id += 1;
        tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut updated = task.clone();
        updated.updated_at = Utc::now();
        tasks.insert(task.id, updated);
        Ok(())
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> SchedulerResult<()> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.status = status;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        self.tasks.lock().unwrap().remove(&id);
        self.dependencies
            .lock()
            .unwrap()
            .retain(|d| d.task_id != id && d.depend_task_id != id);
        Ok(())
    }

    async fn get_due_tasks(
        &self,
        deadline: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut due: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.is_enabled()
                    && t.next_trigger_time
                        .map(|next| next <= deadline)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_trigger_time);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn advance_trigger_time(
        &self,
        id: i64,
        last_trigger_time: DateTime<Utc>,
        next_trigger_time: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) => {
                task.last_trigger_time = Some(last_trigger_time);
                task.next_trigger_time = Some(next_trigger_time);
                task.version += 1;
                task.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_dependencies(&self, task_id: i64) -> SchedulerResult<Vec<i64>> {
        Ok(self
            .dependencies
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.task_id == task_id)
            .map(|d| d.depend_task_id)
            .collect())
    }

    async fn get_all_dependencies(&self) -> SchedulerResult<Vec<TaskDependency>> {
        Ok(self.dependencies.lock().unwrap().clone())
    }

    async fn add_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()> {
        let mut deps = self.dependencies.lock().unwrap();
        let exists = deps
            .iter()
            .any(|d| d.task_id == task_id && d.depend_task_id == depend_task_id);
        if !exists {
            let id = deps.len() as i64 + 1;
            deps.push(TaskDependency {
                id,
                task_id,
                depend_task_id,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn remove_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()> {
        self.dependencies
            .lock()
            .unwrap()
            .retain(|d| !(d.task_id == task_id && d.depend_task_id == depend_task_id));
        Ok(())
    }
}

// ============================================================================
// 任务实例
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskInstanceRepository {
    instances: Mutex<HashMap<i64, TaskInstance>>,
    next_id: Mutex<i64>,
}

impl MemoryTaskInstanceRepository {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }

    /// 测试辅助：全量快照
    pub fn snapshot(&self) -> Vec<TaskInstance> {
        let mut all: Vec<_> = self.instances.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|i| i.id);
        all
    }
}

#[async_trait]
impl TaskInstanceRepository for MemoryTaskInstanceRepository {
    async fn create(&self, instance: &TaskInstance) -> SchedulerResult<TaskInstance> {
        let mut instances = self.instances.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = instance.clone();
        created.id = *next_id;
        *next_id += 1;
        instances.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskInstance>> {
        Ok(self.instances.lock().unwrap().get(&id).cloned())
    }

    async fn mark_scheduling(
        &self,
        id: i64,
        executor_id: &str,
        executor_address: &str,
        schedule_time: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut instances = self.instances.lock().unwrap();
        match instances.get_mut(&id) {
            Some(instance) if instance.status == InstanceStatus::Pending => {
                instance.status = InstanceStatus::Scheduling;
                instance.executor_id = Some(executor_id.to_string());
                instance.executor_address = Some(executor_address.to_string());
                instance.schedule_time = Some(schedule_time);
                instance.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_running(&self, id: i64, start_time: DateTime<Utc>) -> SchedulerResult<bool> {
        let mut instances = self.instances.lock().unwrap();
        match instances.get_mut(&id) {
            Some(instance) if instance.status == InstanceStatus::Scheduling => {
                instance.status = InstanceStatus::Running;
                instance.start_time = Some(start_time);
                instance.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish(
        &self,
        id: i64,
        status: InstanceStatus,
        result_code: i32,
        result_msg: &str,
        end_time: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut instances = self.instances.lock().unwrap();
        match instances.get_mut(&id) {
            Some(instance) if !instance.is_terminal() => {
                instance.status = status;
                instance.result_code = result_code;
                instance.result_msg = Some(result_msg.to_string());
                instance.end_time = Some(end_time);
                instance.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_alarmed(&self, id: i64) -> SchedulerResult<bool> {
        let mut instances = self.instances.lock().unwrap();
        match instances.get_mut(&id) {
            Some(instance)
                if instance.is_terminal() && instance.alarm_status == AlarmStatus::None =>
            {
                instance.alarm_status = AlarmStatus::Alarmed;
                instance.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_active_by_task(&self, task_id: i64) -> SchedulerResult<Vec<TaskInstance>> {
        let instances = self.instances.lock().unwrap();
        let mut active: Vec<TaskInstance> = instances
            .values()
            .filter(|i| i.task_id == task_id && !i.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|i| i.id);
        Ok(active)
    }

    async fn get_oldest_pending_by_task(
        &self,
        task_id: i64,
    ) -> SchedulerResult<Option<TaskInstance>> {
        let instances = self.instances.lock().unwrap();
        Ok(instances
            .values()
            .filter(|i| i.task_id == task_id && i.status == InstanceStatus::Pending)
            .min_by_key(|i| (i.trigger_time, i.id))
            .cloned())
    }

    async fn get_latest_by_task_before(
        &self,
        task_id: i64,
        before: DateTime<Utc>,
    ) -> SchedulerResult<Option<TaskInstance>> {
        let instances = self.instances.lock().unwrap();
        Ok(instances
            .values()
            .filter(|i| i.task_id == task_id && i.trigger_time <= before)
            .max_by_key(|i| (i.trigger_time, i.id))
            .cloned())
    }

    async fn get_running(&self) -> SchedulerResult<Vec<TaskInstance>> {
        let instances = self.instances.lock().unwrap();
        Ok(instances
            .values()
            .filter(|i| i.status == InstanceStatus::Running)
            .cloned()
            .collect())
    }

    async fn list_by_task(&self, task_id: i64, limit: i64) -> SchedulerResult<Vec<TaskInstance>> {
        let instances = self.instances.lock().unwrap();
        let mut list: Vec<TaskInstance> = instances
            .values()
            .filter(|i| i.task_id == task_id)
            .cloned()
            .collect();
        list.sort_by_key(|i| std::cmp::Reverse(i.id));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn get_recent(&self, limit: i64) -> SchedulerResult<Vec<TaskInstance>> {
        let instances = self.instances.lock().unwrap();
        let mut list: Vec<TaskInstance> = instances.values().cloned().collect();
        list.sort_by_key(|i| std::cmp::Reverse(i.id));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn count_by_status(
        &self,
        task_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SchedulerResult<HashMap<InstanceStatus, i64>> {
        let instances = self.instances.lock().unwrap();
        let mut counts = HashMap::new();
        for instance in instances.values() {
            if instance.task_id == task_id
                && instance.trigger_time >= start
                && instance.trigger_time <= end
            {
                *counts.entry(instance.status).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

// ============================================================================
// 执行器节点
// ============================================================================

#[derive(Default)]
pub struct MemoryExecutorRepository {
    nodes: Mutex<HashMap<String, ExecutorNode>>,
}

impl MemoryExecutorRepository {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ExecutorRepository for MemoryExecutorRepository {
    async fn register(&self, node: &ExecutorNode) -> SchedulerResult<()> {
        self.nodes
            .lock()
            .unwrap()
            .insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<ExecutorNode>> {
        Ok(self.nodes.lock().unwrap().get(id).cloned())
    }

    async fn update_heartbeat(&self, heartbeat: &ExecutorHeartbeat) -> SchedulerResult<bool> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(&heartbeat.executor_id) {
            Some(node) => {
                node.current_load = heartbeat.current_load;
                node.cpu_usage = heartbeat.cpu_usage;
                node.memory_usage = heartbeat.memory_usage;
                node.last_heartbeat = Utc::now();
                node.status = ExecutorStatus::Online;
                node.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_offline(&self, id: &str) -> SchedulerResult<bool> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(id) {
            Some(node) => {
                node.status = ExecutorStatus::Offline;
                node.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_online_by_group(&self, group_id: i64) -> SchedulerResult<Vec<ExecutorNode>> {
        let nodes = self.nodes.lock().unwrap();
        let mut online: Vec<ExecutorNode> = nodes
            .values()
            .filter(|n| n.group_id == group_id && n.is_online())
            .cloned()
            .collect();
        online.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        Ok(online)
    }

    async fn list_by_group(&self, group_id: i64) -> SchedulerResult<Vec<ExecutorNode>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .values()
            .filter(|n| n.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn mark_offline_stale(&self, deadline: DateTime<Utc>) -> SchedulerResult<u64> {
        let mut nodes = self.nodes.lock().unwrap();
        let mut flipped = 0;
        for node in nodes.values_mut() {
            if node.is_online() && node.last_heartbeat < deadline {
                node.status = ExecutorStatus::Offline;
                node.updated_at = Utc::now();
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}

// ============================================================================
// 任务日志
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskLogRepository {
    logs: Mutex<Vec<TaskLog>>,
}

impl MemoryTaskLogRepository {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TaskLogRepository for MemoryTaskLogRepository {
    async fn append(&self, log: &TaskLog) -> SchedulerResult<()> {
        let mut logs = self.logs.lock().unwrap();
        let mut entry = log.clone();
        entry.id = logs.len() as i64 + 1;
        logs.push(entry);
        Ok(())
    }

    async fn get_by_instance(&self, instance_id: i64, limit: i64) -> SchedulerResult<Vec<TaskLog>> {
        let logs = self.logs.lock().unwrap();
        let mut list: Vec<TaskLog> = logs
            .iter()
            .filter(|l| l.instance_id == instance_id)
            .cloned()
            .collect();
        list.sort_by_key(|l| l.log_time);
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }
}

// ============================================================================
// 内存 KV（单副本/测试）
// ============================================================================

/// 内存 KV 存储，TTL 懒清理
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut data = self.data.lock().unwrap();
        let now = Instant::now();
        match data.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                data.insert(key.to_string(), (value.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> SchedulerResult<bool> {
        let mut data = self.data.lock().unwrap();
        match data.get(key) {
            Some((v, expires)) if v == value && *expires > Instant::now() => {
                data.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> SchedulerResult<bool> {
        let mut data = self.data.lock().unwrap();
        match data.get_mut(key) {
            Some((v, expires)) if v == value && *expires > Instant::now() => {
                *expires = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(v, _)| v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use cronplane_domain::TriggerType;

    fn sample_task(repo_next_trigger: Option<DateTime<Utc>>) -> Task {
        let mut task = Task::new(1, "清理".into(), "*/5 * * * * *".into(), "cleanup".into());
        task.next_trigger_time = repo_next_trigger;
        task
    }

    #[tokio::test]
    async fn test_due_task_scan_order_and_limit() {
        let repo = MemoryTaskRepository::new();
        let now = Utc::now();

        for offset in [3, 1, 2] {
            let task = sample_task(Some(now + ChronoDuration::seconds(offset)));
            repo.create(&task).await.unwrap();
        }
        // 禁用任务不参与扫描
        let mut disabled = sample_task(Some(now));
        disabled.status = TaskStatus::Disabled;
        repo.create(&disabled).await.unwrap();

        let due = repo
            .get_due_tasks(now + ChronoDuration::seconds(5), 2)
            .await
            .unwrap();
        assert_eq!(due.len(), 2);
        assert!(due[0].next_trigger_time <= due[1].next_trigger_time);
    }

    #[tokio::test]
    async fn test_advance_trigger_time_bumps_version() {
        let repo = MemoryTaskRepository::new();
        let now = Utc::now();
        let task = repo.create(&sample_task(Some(now))).await.unwrap();

        let advanced = repo
            .advance_trigger_time(task.id, now, now + ChronoDuration::seconds(5))
            .await
            .unwrap();
        assert!(advanced);

        let task = repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(task.version, 1);
        assert_eq!(task.last_trigger_time, Some(now));
        assert!(task.next_trigger_time > task.last_trigger_time);
    }

    #[tokio::test]
    async fn test_instance_first_terminal_write_wins() {
        let repo = MemoryTaskInstanceRepository::new();
        let task = sample_task(None);
        let instance = repo
            .create(&TaskInstance::from_task(&task, TriggerType::Cron, Utc::now()))
            .await
            .unwrap();

        assert!(repo
            .finish(instance.id, InstanceStatus::Success, 0, "完成", Utc::now())
            .await
            .unwrap());
        // 第二个终态写入被拒绝
        assert!(!repo
            .finish(instance.id, InstanceStatus::Failed, 1, "超时", Utc::now())
            .await
            .unwrap());

        let stored = repo.get_by_id(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Success);
        assert_eq!(stored.result_msg.as_deref(), Some("完成"));
    }

    #[tokio::test]
    async fn test_instance_state_guards() {
        let repo = MemoryTaskInstanceRepository::new();
        let task = sample_task(None);
        let instance = repo
            .create(&TaskInstance::from_task(&task, TriggerType::Cron, Utc::now()))
            .await
            .unwrap();

        // pending 不能直接 running
        assert!(!repo.mark_running(instance.id, Utc::now()).await.unwrap());

        assert!(repo
            .mark_scheduling(instance.id, "exec-1", "10.0.0.1:8080", Utc::now())
            .await
            .unwrap());
        // 重复 mark_scheduling 失败
        assert!(!repo
            .mark_scheduling(instance.id, "exec-2", "10.0.0.2:8080", Utc::now())
            .await
            .unwrap());

        assert!(repo.mark_running(instance.id, Utc::now()).await.unwrap());
        let stored = repo.get_by_id(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Running);
        assert_eq!(stored.executor_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn test_alarm_raised_once() {
        let repo = MemoryTaskInstanceRepository::new();
        let task = sample_task(None);
        let instance = repo
            .create(&TaskInstance::from_task(&task, TriggerType::Cron, Utc::now()))
            .await
            .unwrap();

        // 非终态不允许告警
        assert!(!repo.mark_alarmed(instance.id).await.unwrap());

        repo.finish(instance.id, InstanceStatus::Failed, 1, "失败", Utc::now())
            .await
            .unwrap();
        assert!(repo.mark_alarmed(instance.id).await.unwrap());
        assert!(!repo.mark_alarmed(instance.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_executor_stale_sweep() {
        let repo = MemoryExecutorRepository::new();
        let mut fresh = ExecutorNode::new(1, "demo".into(), "10.0.0.1".into(), 8080, 10);
        let mut stale = ExecutorNode::new(1, "demo".into(), "10.0.0.2".into(), 8080, 10);
        stale.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        fresh.last_heartbeat = Utc::now();

        repo.register(&fresh).await.unwrap();
        repo.register(&stale).await.unwrap();

        let flipped = repo
            .mark_offline_stale(Utc::now() - ChronoDuration::seconds(90))
            .await
            .unwrap();
        assert_eq!(flipped, 1);

        let online = repo.get_online_by_group(1).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, fresh.id);

        // 心跳使离线节点恢复在线
        let heartbeat = ExecutorHeartbeat {
            executor_id: stale.id.clone(),
            app_name: "demo".into(),
            host: "10.0.0.2".into(),
            port: 8080,
            current_load: 3,
            cpu_usage: 40.0,
            memory_usage: 50.0,
        };
        assert!(repo.update_heartbeat(&heartbeat).await.unwrap());
        assert_eq!(repo.get_online_by_group(1).await.unwrap().len(), 2);
    }
}
