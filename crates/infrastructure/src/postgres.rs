//! Postgres 仓储
//!
//! 状态机约束直接编码在条件 UPDATE 的 WHERE 子句里：
//! mark_* 与 finish 只在实例处于期望状态时生效，终态写入天然
//! "先到先得"，锁竞争的失败方通过返回值感知。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use cronplane_domain::{
    AlarmStatus, BlockStrategy, ExecutorHeartbeat, ExecutorNode, ExecutorStatus, GroupStatus,
    InstanceStatus, RouteStrategy, Task, TaskDependency, TaskGroup, TaskInstance, TaskLog,
    TaskStatus, TriggerType,
};
use cronplane_domain::{
    ExecutorRepository, TaskGroupRepository, TaskInstanceRepository, TaskLogRepository,
    TaskRepository,
};
use cronplane_errors::{SchedulerError, SchedulerResult};

fn invalid_column(column: &str, value: &str) -> SchedulerError {
    SchedulerError::internal(format!("非法的 {column} 取值: {value}"))
}

// ============================================================================
// 任务组
// ============================================================================

pub struct PostgresTaskGroupRepository {
    pool: PgPool,
}

impl PostgresTaskGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_group(row: &PgRow) -> SchedulerResult<TaskGroup> {
        let status: String = row.try_get("status")?;
        Ok(TaskGroup {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            app_name: row.try_get("app_name")?,
            status: match status.as_str() {
                "ENABLED" => GroupStatus::Enabled,
                "DISABLED" => GroupStatus::Disabled,
                other => return Err(invalid_column("task_group.status", other)),
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskGroupRepository for PostgresTaskGroupRepository {
    async fn create(&self, group: &TaskGroup) -> SchedulerResult<TaskGroup> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_group (name, description, app_name, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, now(), now())
            RETURNING *
            "#,
        )
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.app_name)
        .bind(match group.status {
            GroupStatus::Enabled => "ENABLED",
            GroupStatus::Disabled => "DISABLED",
        })
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_group(&row)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskGroup>> {
        let row = sqlx::query("SELECT * FROM task_group WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn get_by_app_name(&self, app_name: &str) -> SchedulerResult<Option<TaskGroup>> {
        let row = sqlx::query("SELECT * FROM task_group WHERE app_name = $1")
            .bind(app_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn list_all(&self) -> SchedulerResult<Vec<TaskGroup>> {
        let rows = sqlx::query("SELECT * FROM task_group ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_group).collect()
    }
}

// ============================================================================
// 任务
// ============================================================================

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> SchedulerResult<Task> {
        let route_strategy: String = row.try_get("route_strategy")?;
        let block_strategy: String = row.try_get("block_strategy")?;
        let status: String = row.try_get("status")?;

        Ok(Task {
            id: row.try_get("id")?,
            group_id: row.try_get("group_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            cron: row.try_get("cron")?,
            executor_handler: row.try_get("executor_handler")?,
            executor_param: row.try_get("executor_param")?,
            route_strategy: RouteStrategy::parse(&route_strategy)
                .ok_or_else(|| invalid_column("task.route_strategy", &route_strategy))?,
            block_strategy: BlockStrategy::parse(&block_strategy)
                .ok_or_else(|| invalid_column("task.block_strategy", &block_strategy))?,
            shard_num: row.try_get("shard_num")?,
            retry_count: row.try_get("retry_count")?,
            retry_interval: row.try_get("retry_interval")?,
            timeout: row.try_get("timeout")?,
            priority: row.try_get("priority")?,
            status: match status.as_str() {
                "ENABLED" => TaskStatus::Enabled,
                "DISABLED" => TaskStatus::Disabled,
                other => return Err(invalid_column("task.status", other)),
            },
            version: row.try_get("version")?,
            next_trigger_time: row.try_get("next_trigger_time")?,
            last_trigger_time: row.try_get("last_trigger_time")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn status_str(status: TaskStatus) -> &'static str {
        match status {
            TaskStatus::Enabled => "ENABLED",
            TaskStatus::Disabled => "DISABLED",
        }
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let row = sqlx::query(
            r#"
            INSERT INTO task (
                group_id, name, description, cron, executor_handler, executor_param,
                route_strategy, block_strategy, shard_num, retry_count, retry_interval,
                timeout, priority, status, version, next_trigger_time, last_trigger_time,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0, $15, $16, now(), now())
            RETURNING *
            "#,
        )
        .bind(task.group_id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.cron)
        .bind(&task.executor_handler)
        .bind(&task.executor_param)
        .bind(task.route_strategy.as_str())
        .bind(task.block_strategy.as_str())
        .bind(task.shard_num)
        .bind(task.retry_count)
        .bind(task.retry_interval)
        .bind(task.timeout)
        .bind(task.priority)
        .bind(Self::status_str(task.status))
        .bind(task.next_trigger_time)
        .bind(task.last_trigger_time)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_task(&row)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM task WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            UPDATE task SET
                name = $2, description = $3, cron = $4, executor_handler = $5,
                executor_param = $6, route_strategy = $7, block_strategy = $8,
                shard_num = $9, retry_count = $10, retry_interval = $11, timeout = $12,
                priority = $13, status = $14, version = version + 1,
                next_trigger_time = $15, last_trigger_time = $16, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.cron)
        .bind(&task.executor_handler)
        .bind(&task.executor_param)
        .bind(task.route_strategy.as_str())
        .bind(task.block_strategy.as_str())
        .bind(task.shard_num)
        .bind(task.retry_count)
        .bind(task.retry_interval)
        .bind(task.timeout)
        .bind(task.priority)
        .bind(Self::status_str(task.status))
        .bind(task.next_trigger_time)
        .bind(task.last_trigger_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> SchedulerResult<()> {
        sqlx::query("UPDATE task SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(Self::status_str(status))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM task_dependency WHERE task_id = $1 OR depend_task_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM task WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_due_tasks(
        &self,
        deadline: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM task
            WHERE status = 'ENABLED'
              AND next_trigger_time IS NOT NULL
              AND next_trigger_time <= $1
            ORDER BY next_trigger_time ASC
            LIMIT $2
            "#,
        )
        .bind(deadline)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn advance_trigger_time(
        &self,
        id: i64,
        last_trigger_time: DateTime<Utc>,
        next_trigger_time: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE task SET
                last_trigger_time = $2, next_trigger_time = $3,
                version = version + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_trigger_time)
        .bind(next_trigger_time)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_dependencies(&self, task_id: i64) -> SchedulerResult<Vec<i64>> {
        let rows =
            sqlx::query("SELECT depend_task_id FROM task_dependency WHERE task_id = $1")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("depend_task_id").map_err(Into::into))
            .collect()
    }

    async fn get_all_dependencies(&self) -> SchedulerResult<Vec<TaskDependency>> {
        let rows = sqlx::query("SELECT * FROM task_dependency")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(TaskDependency {
                    id: row.try_get("id")?,
                    task_id: row.try_get("task_id")?,
                    depend_task_id: row.try_get("depend_task_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn add_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_dependency (task_id, depend_task_id, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (task_id, depend_task_id) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(depend_task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_dependency(&self, task_id: i64, depend_task_id: i64) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM task_dependency WHERE task_id = $1 AND depend_task_id = $2")
            .bind(task_id)
            .bind(depend_task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// 任务实例
// ============================================================================

pub struct PostgresTaskInstanceRepository {
    pool: PgPool,
}

impl PostgresTaskInstanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_instance(row: &PgRow) -> SchedulerResult<TaskInstance> {
        let status: String = row.try_get("status")?;
        let trigger_type: String = row.try_get("trigger_type")?;
        let alarm_status: String = row.try_get("alarm_status")?;

        Ok(TaskInstance {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            group_id: row.try_get("group_id")?,
            executor_id: row.try_get("executor_id")?,
            executor_address: row.try_get("executor_address")?,
            executor_handler: row.try_get("executor_handler")?,
            executor_param: row.try_get("executor_param")?,
            shard_index: row.try_get("shard_index")?,
            shard_total: row.try_get("shard_total")?,
            trigger_type: TriggerType::parse(&trigger_type)
                .ok_or_else(|| invalid_column("task_instance.trigger_type", &trigger_type))?,
            trigger_time: row.try_get("trigger_time")?,
            schedule_time: row.try_get("schedule_time")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            status: InstanceStatus::parse(&status)
                .ok_or_else(|| invalid_column("task_instance.status", &status))?,
            result_code: row.try_get("result_code")?,
            result_msg: row.try_get("result_msg")?,
            retry_count: row.try_get("retry_count")?,
            alarm_status: match alarm_status.as_str() {
                "NONE" => AlarmStatus::None,
                "ALARMED" => AlarmStatus::Alarmed,
                other => return Err(invalid_column("task_instance.alarm_status", other)),
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskInstanceRepository for PostgresTaskInstanceRepository {
    async fn create(&self, instance: &TaskInstance) -> SchedulerResult<TaskInstance> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_instance (
                task_id, group_id, executor_id, executor_address, executor_handler,
                executor_param, shard_index, shard_total, trigger_type, trigger_time,
                schedule_time, start_time, end_time, status, result_code, result_msg,
                retry_count, alarm_status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 'NONE', now(), now())
            RETURNING *
            "#,
        )
        .bind(instance.task_id)
        .bind(instance.group_id)
        .bind(&instance.executor_id)
        .bind(&instance.executor_address)
        .bind(&instance.executor_handler)
        .bind(&instance.executor_param)
        .bind(instance.shard_index)
        .bind(instance.shard_total)
        .bind(instance.trigger_type.as_str())
        .bind(instance.trigger_time)
        .bind(instance.schedule_time)
        .bind(instance.start_time)
        .bind(instance.end_time)
        .bind(instance.status.as_str())
        .bind(instance.result_code)
        .bind(&instance.result_msg)
        .bind(instance.retry_count)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_instance(&row)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskInstance>> {
        let row = sqlx::query("SELECT * FROM task_instance WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn mark_scheduling(
        &self,
        id: i64,
        executor_id: &str,
        executor_address: &str,
        schedule_time: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE task_instance SET
                status = 'SCHEDULING', executor_id = $2, executor_address = $3,
                schedule_time = $4, updated_at = now()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(executor_id)
        .bind(executor_address)
        .bind(schedule_time)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_running(&self, id: i64, start_time: DateTime<Utc>) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE task_instance SET status = 'RUNNING', start_time = $2, updated_at = now()
            WHERE id = $1 AND status = 'SCHEDULING'
            "#,
        )
        .bind(id)
        .bind(start_time)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish(
        &self,
        id: i64,
        status: InstanceStatus,
        result_code: i32,
        result_msg: &str,
        end_time: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE task_instance SET
                status = $2, result_code = $3, result_msg = $4, end_time = $5, updated_at = now()
            WHERE id = $1 AND status IN ('PENDING', 'SCHEDULING', 'RUNNING')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(result_code)
        .bind(result_msg)
        .bind(end_time)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_alarmed(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE task_instance SET alarm_status = 'ALARMED', updated_at = now()
            WHERE id = $1 AND alarm_status = 'NONE'
              AND status IN ('SUCCESS', 'FAILED', 'CANCELLED')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_active_by_task(&self, task_id: i64) -> SchedulerResult<Vec<TaskInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM task_instance
            WHERE task_id = $1 AND status IN ('PENDING', 'SCHEDULING', 'RUNNING')
            ORDER BY id
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn get_oldest_pending_by_task(
        &self,
        task_id: i64,
    ) -> SchedulerResult<Option<TaskInstance>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM task_instance
            WHERE task_id = $1 AND status = 'PENDING'
            ORDER BY trigger_time ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn get_latest_by_task_before(
        &self,
        task_id: i64,
        before: DateTime<Utc>,
    ) -> SchedulerResult<Option<TaskInstance>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM task_instance
            WHERE task_id = $1 AND trigger_time <= $2
            ORDER BY trigger_time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn get_running(&self) -> SchedulerResult<Vec<TaskInstance>> {
        let rows = sqlx::query("SELECT * FROM task_instance WHERE status = 'RUNNING'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn list_by_task(&self, task_id: i64, limit: i64) -> SchedulerResult<Vec<TaskInstance>> {
        let rows = sqlx::query(
            "SELECT * FROM task_instance WHERE task_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn get_recent(&self, limit: i64) -> SchedulerResult<Vec<TaskInstance>> {
        let rows = sqlx::query("SELECT * FROM task_instance ORDER BY id DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn count_by_status(
        &self,
        task_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SchedulerResult<std::collections::HashMap<InstanceStatus, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT status, count(*) AS cnt FROM task_instance
            WHERE task_id = $1 AND trigger_time >= $2 AND trigger_time <= $3
            GROUP BY status
            "#,
        )
        .bind(task_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = std::collections::HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("cnt")?;
            let status = InstanceStatus::parse(&status)
                .ok_or_else(|| invalid_column("task_instance.status", &status))?;
            counts.insert(status, count);
        }
        Ok(counts)
    }
}

// ============================================================================
// 执行器节点
// ============================================================================

pub struct PostgresExecutorRepository {
    pool: PgPool,
}

impl PostgresExecutorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &PgRow) -> SchedulerResult<ExecutorNode> {
        let status: String = row.try_get("status")?;
        let port: i32 = row.try_get("port")?;

        Ok(ExecutorNode {
            id: row.try_get("id")?,
            group_id: row.try_get("group_id")?,
            app_name: row.try_get("app_name")?,
            host: row.try_get("host")?,
            port: port as u16,
            weight: row.try_get("weight")?,
            max_concurrent: row.try_get("max_concurrent")?,
            current_load: row.try_get("current_load")?,
            cpu_usage: row.try_get("cpu_usage")?,
            memory_usage: row.try_get("memory_usage")?,
            status: match status.as_str() {
                "ONLINE" => ExecutorStatus::Online,
                "OFFLINE" => ExecutorStatus::Offline,
                other => return Err(invalid_column("executor_node.status", other)),
            },
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ExecutorRepository for PostgresExecutorRepository {
    async fn register(&self, node: &ExecutorNode) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executor_node (
                id, group_id, app_name, host, port, weight, max_concurrent,
                current_load, cpu_usage, memory_usage, status, last_heartbeat,
                registered_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'ONLINE', $11, now(), now())
            ON CONFLICT (id) DO UPDATE SET
                status = 'ONLINE', last_heartbeat = EXCLUDED.last_heartbeat, updated_at = now()
            "#,
        )
        .bind(&node.id)
        .bind(node.group_id)
        .bind(&node.app_name)
        .bind(&node.host)
        .bind(node.port as i32)
        .bind(node.weight)
        .bind(node.max_concurrent)
        .bind(node.current_load)
        .bind(node.cpu_usage)
        .bind(node.memory_usage)
        .bind(node.last_heartbeat)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<ExecutorNode>> {
        let row = sqlx::query("SELECT * FROM executor_node WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn update_heartbeat(&self, heartbeat: &ExecutorHeartbeat) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executor_node SET
                current_load = $2, cpu_usage = $3, memory_usage = $4,
                status = 'ONLINE', last_heartbeat = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(&heartbeat.executor_id)
        .bind(heartbeat.current_load)
        .bind(heartbeat.cpu_usage)
        .bind(heartbeat.memory_usage)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_offline(&self, id: &str) -> SchedulerResult<bool> {
        let result =
            sqlx::query("UPDATE executor_node SET status = 'OFFLINE', updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_online_by_group(&self, group_id: i64) -> SchedulerResult<Vec<ExecutorNode>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM executor_node
            WHERE group_id = $1 AND status = 'ONLINE'
            ORDER BY registered_at, id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn list_by_group(&self, group_id: i64) -> SchedulerResult<Vec<ExecutorNode>> {
        let rows = sqlx::query("SELECT * FROM executor_node WHERE group_id = $1 ORDER BY id")
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn mark_offline_stale(&self, deadline: DateTime<Utc>) -> SchedulerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE executor_node SET status = 'OFFLINE', updated_at = now()
            WHERE status = 'ONLINE' AND last_heartbeat < $1
            "#,
        )
        .bind(deadline)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// 任务日志
// ============================================================================

pub struct PostgresTaskLogRepository {
    pool: PgPool,
}

impl PostgresTaskLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskLogRepository for PostgresTaskLogRepository {
    async fn append(&self, log: &TaskLog) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_log (instance_id, task_id, log_time, log_level, log_content)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(log.instance_id)
        .bind(log.task_id)
        .bind(log.log_time)
        .bind(&log.log_level)
        .bind(&log.log_content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_instance(&self, instance_id: i64, limit: i64) -> SchedulerResult<Vec<TaskLog>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM task_log WHERE instance_id = $1
            ORDER BY log_time ASC LIMIT $2
            "#,
        )
        .bind(instance_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TaskLog {
                    id: row.try_get("id")?,
                    instance_id: row.try_get("instance_id")?,
                    task_id: row.try_get("task_id")?,
                    log_time: row.try_get("log_time")?,
                    log_level: row.try_get("log_level")?,
                    log_content: row.try_get("log_content")?,
                })
            })
            .collect()
    }
}
