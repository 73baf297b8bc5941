//! 调度服务与实例状态机
//!
//! 一次触发的完整执行路径：阻塞策略 -> 依赖闸门 -> 创建实例 ->
//! 执行器路由 -> 标记调度中 -> 出站派发；随后由回调、超时巡检
//! 与取消驱动实例走向终态。终态写入由实例级分布式锁加条件更新
//! 双重串行化，首个终态写入获胜。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use cronplane_domain::{
    BlockStrategy, DispatchRequest, InstanceStatus, ResultCallback, RouteStrategy, StartCallback,
    Task, TaskInstance, TaskLog, TriggerType,
};
use cronplane_domain::{
    ExecutorRepository, InstanceStatistics, TaskInstanceRepository, TaskLogRepository,
    TaskRepository,
};
use cronplane_errors::{SchedulerError, SchedulerResult};
use cronplane_foundation::{DistributedLock, Job, KvStore, TimeWheel, WorkerPool};

use crate::executor_client::ExecutorClient;
use crate::strategies::StrategyRouter;

const MSG_DISCARDED: &str = "存在未结束实例，本次调度被丢弃";
const MSG_COVERED: &str = "被新调度覆盖取消";
const MSG_DEP_UNMET: &str = "依赖任务未完成";
const MSG_NO_EXECUTOR: &str = "没有可用的执行器";
const MSG_POOL_SATURATED: &str = "调度工作池已满";
const MSG_USER_CANCELLED: &str = "用户取消";
pub(crate) const MSG_TIMEOUT: &str = "任务执行超时";

/// 实例终态锁的争用等待上限
const INSTANCE_LOCK_WAIT: Duration = Duration::from_secs(3);

/// 一次触发的来源描述
#[derive(Debug, Clone)]
pub struct FiringContext {
    pub task_id: i64,
    pub trigger_type: TriggerType,
    pub trigger_time: DateTime<Utc>,
    pub retry_count: i32,
    /// 重试沿用原实例的分片座标；None 表示由任务定义展开
    pub shard: Option<(i32, i32)>,
    pub param_override: Option<String>,
}

impl FiringContext {
    pub fn cron(task_id: i64, trigger_time: DateTime<Utc>) -> Self {
        Self {
            task_id,
            trigger_type: TriggerType::Cron,
            trigger_time,
            retry_count: 0,
            shard: None,
            param_override: None,
        }
    }

    pub fn manual(task_id: i64, param: Option<String>) -> Self {
        Self {
            task_id,
            trigger_type: TriggerType::Manual,
            trigger_time: Utc::now(),
            retry_count: 0,
            shard: None,
            param_override: param,
        }
    }
}

struct DispatchInner {
    task_repo: Arc<dyn TaskRepository>,
    instance_repo: Arc<dyn TaskInstanceRepository>,
    executor_repo: Arc<dyn ExecutorRepository>,
    log_repo: Arc<dyn TaskLogRepository>,
    kv_store: Arc<dyn KvStore>,
    client: Arc<dyn ExecutorClient>,
    strategies: StrategyRouter,
    wheel: TimeWheel,
    pool: WorkerPool,
}

#[derive(Clone)]
pub struct DispatchService {
    inner: Arc<DispatchInner>,
}

impl DispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        instance_repo: Arc<dyn TaskInstanceRepository>,
        executor_repo: Arc<dyn ExecutorRepository>,
        log_repo: Arc<dyn TaskLogRepository>,
        kv_store: Arc<dyn KvStore>,
        client: Arc<dyn ExecutorClient>,
        wheel: TimeWheel,
        pool: WorkerPool,
    ) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                task_repo,
                instance_repo,
                executor_repo,
                log_repo,
                kv_store,
                client,
                strategies: StrategyRouter::new(),
                wheel,
                pool,
            }),
        }
    }

    // ------------------------------------------------------------------
    // 作业入口
    // ------------------------------------------------------------------

    /// 调度作业：由时间轮/工作池执行
    pub fn make_dispatch_job(&self, ctx: FiringContext) -> Job {
        let service = self.clone();
        Box::pin(async move {
            let task_id = ctx.task_id;
            if let Err(e) = service.dispatch(ctx).await {
                error!("调度任务 {} 失败: {}", task_id, e);
            }
        })
    }

    /// 工作池拒绝时的补偿作业：落一条"池满"失败实例并进入重试
    pub fn make_saturated_job(&self, ctx: FiringContext) -> Job {
        let service = self.clone();
        Box::pin(async move {
            service.record_pool_saturated(ctx).await;
        })
    }

    /// 立即提交一次触发到工作池
    pub fn submit_firing(&self, ctx: FiringContext) {
        let job = self.make_dispatch_job(ctx.clone());
        match self.inner.pool.submit(job) {
            Ok(()) => {}
            Err(SchedulerError::PoolFull) => {
                warn!("工作池已满，任务 {} 本次触发转入补偿路径", ctx.task_id);
                let service = self.clone();
                tokio::spawn(async move {
                    service.record_pool_saturated(ctx).await;
                });
            }
            Err(e) => error!("提交任务 {} 触发失败: {}", ctx.task_id, e),
        }
    }

    // ------------------------------------------------------------------
    // 调度主流程
    // ------------------------------------------------------------------

    pub async fn dispatch(&self, ctx: FiringContext) -> SchedulerResult<()> {
        let Some(task) = self.inner.task_repo.get_by_id(ctx.task_id).await? else {
            warn!("任务 {} 不存在，放弃本次触发", ctx.task_id);
            return Ok(());
        };
        if !task.is_enabled() {
            debug!("任务 {} 已禁用，放弃本次触发", task.id);
            return Ok(());
        }

        // 1. 阻塞策略
        let active = self.inner.instance_repo.get_active_by_task(task.id).await?;
        if !active.is_empty() {
            match task.block_strategy {
                BlockStrategy::SerialExecution => {
                    let instance = self.create_instance(&task, &ctx).await?;
                    info!(
                        "任务 {} 存在 {} 个未结束实例，实例 {} 串行排队",
                        task.id,
                        active.len(),
                        instance.id
                    );
                    return Ok(());
                }
                BlockStrategy::DiscardLater => {
                    let instance = self.create_cancelled(&task, &ctx, MSG_DISCARDED).await?;
                    info!("任务 {} 本次触发被丢弃，实例 {}", task.id, instance.id);
                    return Ok(());
                }
                BlockStrategy::CoverEarly => {
                    for prior in &active {
                        let covered = self
                            .finish_with_lock(prior.id, InstanceStatus::Cancelled, 0, MSG_COVERED)
                            .await?;
                        if covered {
                            info!("任务 {} 的实例 {} 被新调度覆盖", task.id, prior.id);
                        }
                    }
                }
            }
        }

        // 2. 依赖闸门
        if let Some(parent_id) = self.unmet_dependency(task.id, ctx.trigger_time).await? {
            let instance = self.create_cancelled(&task, &ctx, MSG_DEP_UNMET).await?;
            info!(
                "任务 {} 依赖任务 {} 未完成，实例 {} 取消",
                task.id, parent_id, instance.id
            );
            return Ok(());
        }

        // 3-6. 分片广播展开为每个分片独立的实例与路由
        if task.route_strategy == RouteStrategy::ShardingBroadcast && ctx.shard.is_none() {
            let shard_total = task.shard_num.max(1);
            for shard_index in 0..shard_total {
                let mut shard_ctx = ctx.clone();
                shard_ctx.shard = Some((shard_index, shard_total));
                let instance = self.create_instance(&task, &shard_ctx).await?;
                if let Err(e) = self.dispatch_instance(&task, instance).await {
                    error!(
                        "任务 {} 分片 {}/{} 派发失败: {}",
                        task.id, shard_index, shard_total, e
                    );
                }
            }
            return Ok(());
        }

        let instance = self.create_instance(&task, &ctx).await?;
        self.dispatch_instance(&task, instance).await
    }

    /// 对已存在的 pending 实例执行选择与派发（步骤 4-6）
    pub(crate) async fn dispatch_instance(
        &self,
        task: &Task,
        instance: TaskInstance,
    ) -> SchedulerResult<()> {
        // 4. 执行器选择
        let candidates = self
            .inner
            .executor_repo
            .get_online_by_group(task.group_id)
            .await?;
        let selected = match self.inner.strategies.select(
            task.route_strategy,
            &candidates,
            &instance.executor_param,
        ) {
            Ok(node) => node,
            Err(SchedulerError::NoAvailableExecutor) => {
                warn!("任务 {} 没有可用执行器，实例 {} 失败", task.id, instance.id);
                return self.fail_instance(task, &instance, -1, MSG_NO_EXECUTOR).await;
            }
            Err(e) => return Err(e),
        };

        // 选中后的过载复核只作观察：注册表最终一致
        if selected.is_overloaded() {
            debug!("节点 {} 负载信号滞后，仍按选择结果派发", selected.id);
        }

        // 5. pending -> scheduling
        let address = selected.address();
        let moved = self
            .inner
            .instance_repo
            .mark_scheduling(instance.id, &selected.id, &address, Utc::now())
            .await?;
        if !moved {
            warn!("实例 {} 已离开 pending 状态，跳过派发", instance.id);
            return Ok(());
        }

        // 6. 出站派发
        let request = DispatchRequest {
            instance_id: instance.id,
            task_id: task.id,
            executor_handler: instance.executor_handler.clone(),
            executor_param: instance.executor_param.clone(),
            shard_index: instance.shard_index,
            shard_total: instance.shard_total,
            timeout: task.timeout,
        };

        match self.inner.client.run(&address, &request).await {
            Ok(ack) if ack.accepted() => {
                info!(
                    "实例 {} 已派发至执行器 {} ({})",
                    instance.id, selected.id, address
                );
                self.append_log(
                    &instance,
                    format!("已派发至执行器 {} ({address})", selected.id),
                )
                .await;
                Ok(())
            }
            Ok(ack) => {
                warn!(
                    "执行器 {} 拒绝实例 {}: {} - {}",
                    selected.id, instance.id, ack.code, ack.message
                );
                self.fail_instance(task, &instance, ack.code, &ack.message).await
            }
            Err(e) => {
                warn!("实例 {} 出站调用失败: {}", instance.id, e);
                self.fail_instance(task, &instance, -1, &format!("出站调用失败: {e}"))
                    .await
            }
        }
    }

    // ------------------------------------------------------------------
    // 回调入口
    // ------------------------------------------------------------------

    /// 执行器回报开始执行：scheduling -> running
    pub async fn handle_start_callback(&self, callback: StartCallback) -> SchedulerResult<()> {
        self.inner
            .instance_repo
            .get_by_id(callback.instance_id)
            .await?
            .ok_or(SchedulerError::InstanceNotFound {
                id: callback.instance_id,
            })?;

        let moved = self
            .inner
            .instance_repo
            .mark_running(callback.instance_id, Utc::now())
            .await?;
        if moved {
            info!("实例 {} 开始执行", callback.instance_id);
        } else {
            warn!(
                "实例 {} 不在 scheduling 状态，忽略开始回报",
                callback.instance_id
            );
        }
        Ok(())
    }

    /// 执行器回报结果：code == 0 成功，否则失败（进入重试策略）
    pub async fn handle_result_callback(&self, callback: ResultCallback) -> SchedulerResult<()> {
        let instance = self
            .inner
            .instance_repo
            .get_by_id(callback.instance_id)
            .await?
            .ok_or(SchedulerError::InstanceNotFound {
                id: callback.instance_id,
            })?;
        let task = self.inner.task_repo.get_by_id(instance.task_id).await?;

        if callback.code == 0 {
            let won = self
                .finish_with_lock(instance.id, InstanceStatus::Success, 0, &callback.message)
                .await?;
            if won {
                info!("实例 {} 执行成功", instance.id);
                self.append_log(&instance, "执行成功".to_string()).await;
                if let Some(task) = &task {
                    self.promote_serial_queue(task).await;
                }
            }
            return Ok(());
        }

        match &task {
            Some(task) => {
                self.fail_instance(task, &instance, callback.code, &callback.message)
                    .await
            }
            // 任务已删除：只落终态，不再重试
            None => {
                self.finish_with_lock(
                    instance.id,
                    InstanceStatus::Failed,
                    callback.code,
                    &callback.message,
                )
                .await?;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // 取消与手动重试
    // ------------------------------------------------------------------

    /// 取消实例。pending/scheduling 直接落终态并摘除时间轮条目；
    /// running 仅通知执行器，等待回调或超时收尾
    pub async fn cancel_instance(&self, instance_id: i64) -> SchedulerResult<TaskInstance> {
        let instance = self
            .inner
            .instance_repo
            .get_by_id(instance_id)
            .await?
            .ok_or(SchedulerError::InstanceNotFound { id: instance_id })?;

        match instance.status {
            InstanceStatus::Pending | InstanceStatus::Scheduling => {
                let won = self
                    .finish_with_lock(instance_id, InstanceStatus::Cancelled, 0, MSG_USER_CANCELLED)
                    .await?;
                if won {
                    self.inner.wheel.remove_task(&retry_key(instance_id));
                    info!("实例 {} 已取消", instance_id);
                    if let Some(task) = self.inner.task_repo.get_by_id(instance.task_id).await? {
                        self.promote_serial_queue(&task).await;
                    }
                }
            }
            InstanceStatus::Running => {
                // 运行中的取消只是建议性的
                if let Some(address) = &instance.executor_address {
                    if let Err(e) = self.inner.client.cancel(address, instance_id).await {
                        warn!("通知执行器取消实例 {} 失败: {}", instance_id, e);
                    } else {
                        info!("已通知执行器取消实例 {}", instance_id);
                    }
                }
            }
            status => {
                return Err(SchedulerError::InvalidStateTransition {
                    from: status.as_str().to_string(),
                    to: InstanceStatus::Cancelled.as_str().to_string(),
                });
            }
        }

        self.inner
            .instance_repo
            .get_by_id(instance_id)
            .await?
            .ok_or(SchedulerError::InstanceNotFound { id: instance_id })
    }

    /// 手动重试一个失败实例：以 RETRY 触发类型重新入队一次触发，
    /// 沿用原实例的分片座标与参数
    pub async fn retry_instance(&self, instance_id: i64) -> SchedulerResult<()> {
        let instance = self
            .inner
            .instance_repo
            .get_by_id(instance_id)
            .await?
            .ok_or(SchedulerError::InstanceNotFound { id: instance_id })?;
        if instance.status != InstanceStatus::Failed {
            return Err(SchedulerError::InvalidStateTransition {
                from: instance.status.as_str().to_string(),
                to: "RETRY".to_string(),
            });
        }

        self.submit_firing(FiringContext {
            task_id: instance.task_id,
            trigger_type: TriggerType::Retry,
            trigger_time: Utc::now(),
            retry_count: 0,
            shard: Some((instance.shard_index, instance.shard_total)),
            param_override: Some(instance.executor_param.clone()),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // 查询
    // ------------------------------------------------------------------

    pub async fn get_instance(&self, instance_id: i64) -> SchedulerResult<TaskInstance> {
        self.inner
            .instance_repo
            .get_by_id(instance_id)
            .await?
            .ok_or(SchedulerError::InstanceNotFound { id: instance_id })
    }

    pub async fn recent_instances(&self, limit: i64) -> SchedulerResult<Vec<TaskInstance>> {
        self.inner.instance_repo.get_recent(limit).await
    }

    pub async fn instance_logs(
        &self,
        instance_id: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<TaskLog>> {
        self.inner.log_repo.get_by_instance(instance_id, limit).await
    }

    pub async fn statistics(
        &self,
        task_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SchedulerResult<InstanceStatistics> {
        let counts = self
            .inner
            .instance_repo
            .count_by_status(task_id, start, end)
            .await?;
        let get = |status: InstanceStatus| counts.get(&status).copied().unwrap_or(0);

        let mut stats = InstanceStatistics {
            success: get(InstanceStatus::Success),
            failed: get(InstanceStatus::Failed),
            running: get(InstanceStatus::Running),
            pending: get(InstanceStatus::Pending) + get(InstanceStatus::Scheduling),
            cancelled: get(InstanceStatus::Cancelled),
            ..Default::default()
        };
        stats.total = stats.success + stats.failed + stats.running + stats.pending + stats.cancelled;
        if stats.success + stats.failed > 0 {
            stats.rate = stats.success as f64 / (stats.success + stats.failed) as f64 * 100.0;
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // 内部路径
    // ------------------------------------------------------------------

    async fn create_instance(
        &self,
        task: &Task,
        ctx: &FiringContext,
    ) -> SchedulerResult<TaskInstance> {
        let mut instance = TaskInstance::from_task(task, ctx.trigger_type, ctx.trigger_time);
        instance.retry_count = ctx.retry_count;
        if let Some((shard_index, shard_total)) = ctx.shard {
            instance.shard_index = shard_index;
            instance.shard_total = shard_total;
        }
        if let Some(param) = &ctx.param_override {
            instance.executor_param = param.clone();
        }
        let created = self.inner.instance_repo.create(&instance).await?;
        self.append_log(
            &created,
            format!("实例创建, 触发类型 {}", ctx.trigger_type.as_str()),
        )
        .await;
        Ok(created)
    }

    async fn create_cancelled(
        &self,
        task: &Task,
        ctx: &FiringContext,
        reason: &str,
    ) -> SchedulerResult<TaskInstance> {
        let created = self.create_instance(task, ctx).await?;
        self.inner
            .instance_repo
            .finish(created.id, InstanceStatus::Cancelled, 0, reason, Utc::now())
            .await?;
        self.append_log(&created, format!("实例取消: {reason}")).await;
        self.inner
            .instance_repo
            .get_by_id(created.id)
            .await?
            .ok_or(SchedulerError::InstanceNotFound { id: created.id })
    }

    /// 终态写入：实例级分布式锁 + 条件更新，首个写入获胜。
    /// 返回是否由本次调用写入终态
    pub(crate) async fn finish_with_lock(
        &self,
        instance_id: i64,
        status: InstanceStatus,
        result_code: i32,
        result_msg: &str,
    ) -> SchedulerResult<bool> {
        let lock = DistributedLock::for_instance(self.inner.kv_store.clone(), instance_id);
        let locked = match lock.try_lock(INSTANCE_LOCK_WAIT).await {
            Ok(()) => true,
            Err(SchedulerError::LockFailed { .. }) => {
                // 锁等待超时时仍可依赖条件更新仲裁
                warn!("实例 {} 终态锁等待超时，退化为条件更新", instance_id);
                false
            }
            Err(e) => return Err(e),
        };

        let result = self
            .inner
            .instance_repo
            .finish(instance_id, status, result_code, result_msg, Utc::now())
            .await;

        if locked {
            if let Err(e) = lock.unlock().await {
                warn!("释放实例 {} 终态锁失败: {}", instance_id, e);
            }
        }

        let won = result?;
        if !won {
            warn!(
                "实例 {} 已是终态，丢弃后到的 {} 写入",
                instance_id,
                status.as_str()
            );
        }
        Ok(won)
    }

    /// 失败收尾：落终态、置告警、按任务重试预算安排重试
    pub(crate) async fn fail_instance(
        &self,
        task: &Task,
        instance: &TaskInstance,
        result_code: i32,
        result_msg: &str,
    ) -> SchedulerResult<()> {
        let won = self
            .finish_with_lock(instance.id, InstanceStatus::Failed, result_code, result_msg)
            .await?;
        if !won {
            return Ok(());
        }

        self.inner.instance_repo.mark_alarmed(instance.id).await?;
        self.append_log(instance, format!("执行失败: {result_msg}")).await;

        if instance.retry_count < task.retry_count {
            self.schedule_retry(task, instance);
        } else if task.retry_count > 0 {
            info!(
                "实例 {} 已达最大重试次数 {}，不再重试",
                instance.id, task.retry_count
            );
        }

        self.promote_serial_queue(task).await;
        Ok(())
    }

    /// 经由时间轮安排一次 RETRY 触发
    fn schedule_retry(&self, task: &Task, instance: &TaskInstance) {
        let delay = Duration::from_secs(task.retry_interval.max(0) as u64);
        let ctx = FiringContext {
            task_id: task.id,
            trigger_type: TriggerType::Retry,
            // 触发时间在实际到点时再取，这里只携带座标
            trigger_time: Utc::now(),
            retry_count: instance.retry_count + 1,
            shard: Some((instance.shard_index, instance.shard_total)),
            param_override: Some(instance.executor_param.clone()),
        };

        let service = self.clone();
        let fire_ctx = ctx.clone();
        let job: Job = Box::pin(async move {
            let mut ctx = fire_ctx;
            ctx.trigger_time = Utc::now();
            let task_id = ctx.task_id;
            if let Err(e) = service.dispatch(ctx).await {
                error!("重试调度任务 {} 失败: {}", task_id, e);
            }
        });
        let reject = self.make_saturated_job(ctx);

        info!(
            "实例 {} 将在 {} 秒后重试 (第 {} 次)",
            instance.id,
            task.retry_interval,
            instance.retry_count + 1
        );
        self.inner
            .wheel
            .add_task(delay, &retry_key(instance.id), job, Some(reject));
    }

    /// 工作池饱和的补偿路径：直接落一条失败实例，消耗一次重试
    async fn record_pool_saturated(&self, ctx: FiringContext) {
        let result: SchedulerResult<()> = async {
            let Some(task) = self.inner.task_repo.get_by_id(ctx.task_id).await? else {
                return Ok(());
            };
            let instance = self.create_instance(&task, &ctx).await?;
            self.fail_instance(&task, &instance, -1, MSG_POOL_SATURATED).await
        }
        .await;

        if let Err(e) = result {
            error!("记录任务 {} 池满失败实例出错: {}", ctx.task_id, e);
        }
    }

    /// 串行策略：前一实例终止后促发队列中最早的 pending 实例
    fn promote_serial_queue<'a>(
        &'a self,
        task: &'a Task,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.promote_serial_queue_inner(task))
    }

    async fn promote_serial_queue_inner(&self, task: &Task) {
        if task.block_strategy != BlockStrategy::SerialExecution {
            return;
        }

        let result: SchedulerResult<()> = async {
            let active = self.inner.instance_repo.get_active_by_task(task.id).await?;
            // 仍有实例在调度或运行时不促发
            if active.iter().any(|i| i.status != InstanceStatus::Pending) {
                return Ok(());
            }
            let Some(next) = self
                .inner
                .instance_repo
                .get_oldest_pending_by_task(task.id)
                .await?
            else {
                return Ok(());
            };

            info!("任务 {} 串行队列促发实例 {}", task.id, next.id);
            let service = self.clone();
            let task = task.clone();
            let job: Job = Box::pin(async move {
                let instance_id = next.id;
                if let Err(e) = service.promote_instance(&task, next).await {
                    error!("串行促发实例 {} 失败: {}", instance_id, e);
                }
            });
            if let Err(e) = self.inner.pool.submit(job) {
                // 留在 pending，下一次终态转换会再尝试促发
                warn!("串行促发提交失败: {}", e);
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!("任务 {} 串行队列促发出错: {}", task.id, e);
        }
    }

    /// 促发一个排队实例。排队只豁免阻塞策略，依赖闸门照常生效：
    /// 父任务未完成时排队实例取消，并继续促发下一个
    async fn promote_instance(&self, task: &Task, instance: TaskInstance) -> SchedulerResult<()> {
        if let Some(parent_id) = self.unmet_dependency(task.id, instance.trigger_time).await? {
            let cancelled = self
                .finish_with_lock(instance.id, InstanceStatus::Cancelled, 0, MSG_DEP_UNMET)
                .await?;
            if cancelled {
                info!(
                    "任务 {} 依赖任务 {} 未完成，排队实例 {} 取消",
                    task.id, parent_id, instance.id
                );
                self.append_log(&instance, format!("实例取消: {MSG_DEP_UNMET}")).await;
            }
            self.promote_serial_queue(task).await;
            return Ok(());
        }
        self.dispatch_instance(task, instance).await
    }

    /// 依赖闸门：trigger_time 之前每个父任务的最近实例必须成功，
    /// 返回第一个未满足的父任务 id
    async fn unmet_dependency(
        &self,
        task_id: i64,
        trigger_time: DateTime<Utc>,
    ) -> SchedulerResult<Option<i64>> {
        for parent_id in self.inner.task_repo.get_dependencies(task_id).await? {
            let parent_done = self
                .inner
                .instance_repo
                .get_latest_by_task_before(parent_id, trigger_time)
                .await?
                .map(|instance| instance.status == InstanceStatus::Success)
                .unwrap_or(false);
            if !parent_done {
                return Ok(Some(parent_id));
            }
        }
        Ok(None)
    }

    async fn append_log(&self, instance: &TaskInstance, content: String) {
        let log = TaskLog::info(instance.id, instance.task_id, content);
        if let Err(e) = self.inner.log_repo.append(&log).await {
            warn!("写入实例 {} 日志失败: {}", instance.id, e);
        }
    }
}

pub(crate) fn retry_key(instance_id: i64) -> String {
    format!("retry:{instance_id}")
}
