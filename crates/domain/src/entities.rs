//! 领域实体定义
//!
//! 任务组、任务、任务实例、执行器节点与执行日志，以及它们在调度
//! 协议中使用的状态枚举和线上报文结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// 任务相关实体
// ============================================================================

/// 任务组
///
/// 执行器按 `app_name` 归属到任务组，任务也挂在任务组之下。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// 全局唯一，执行器注册时用它定位任务组
    pub app_name: String,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GroupStatus {
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "DISABLED")]
    Disabled,
}

impl TaskGroup {
    pub fn new(name: String, app_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由存储层生成
            name,
            description: String::new(),
            app_name,
            status: GroupStatus::Enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 任务定义
///
/// `next_trigger_time` 是调度游标，只有触发循环在领导锁内推进它；
/// 推进必须单调：任何时刻 `next_trigger_time > last_trigger_time`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub description: String,
    /// 六段 cron：秒 分 时 日 月 周
    pub cron: String,
    pub executor_handler: String,
    pub executor_param: String,
    pub route_strategy: RouteStrategy,
    pub block_strategy: BlockStrategy,
    /// 分片总数，>= 1
    pub shard_num: i32,
    pub retry_count: i32,
    /// 重试间隔（秒）
    pub retry_interval: i64,
    /// 执行超时（秒），0 表示不限制
    pub timeout: i64,
    pub priority: i32,
    pub status: TaskStatus,
    /// 乐观锁版本号，单调递增
    pub version: i64,
    pub next_trigger_time: Option<DateTime<Utc>>,
    pub last_trigger_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "DISABLED")]
    Disabled,
}

/// 路由策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RouteStrategy {
    #[serde(rename = "ROUND_ROBIN")]
    RoundRobin,
    #[serde(rename = "RANDOM")]
    Random,
    #[serde(rename = "CONSISTENT_HASH")]
    ConsistentHash,
    #[serde(rename = "LEAST_FREQUENTLY_USED")]
    LeastFrequentlyUsed,
    #[serde(rename = "LEAST_RECENTLY_USED")]
    LeastRecentlyUsed,
    #[serde(rename = "FAILOVER")]
    Failover,
    #[serde(rename = "SHARDING_BROADCAST")]
    ShardingBroadcast,
}

impl RouteStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStrategy::RoundRobin => "ROUND_ROBIN",
            RouteStrategy::Random => "RANDOM",
            RouteStrategy::ConsistentHash => "CONSISTENT_HASH",
            RouteStrategy::LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
            RouteStrategy::LeastRecentlyUsed => "LEAST_RECENTLY_USED",
            RouteStrategy::Failover => "FAILOVER",
            RouteStrategy::ShardingBroadcast => "SHARDING_BROADCAST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROUND_ROBIN" => Some(RouteStrategy::RoundRobin),
            "RANDOM" => Some(RouteStrategy::Random),
            "CONSISTENT_HASH" => Some(RouteStrategy::ConsistentHash),
            "LEAST_FREQUENTLY_USED" => Some(RouteStrategy::LeastFrequentlyUsed),
            "LEAST_RECENTLY_USED" => Some(RouteStrategy::LeastRecentlyUsed),
            "FAILOVER" => Some(RouteStrategy::Failover),
            "SHARDING_BROADCAST" => Some(RouteStrategy::ShardingBroadcast),
            _ => None,
        }
    }
}

/// 阻塞策略：同一任务相邻调度之间的并发约束
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlockStrategy {
    /// 串行：前一次未结束时，新调度排队等待
    #[serde(rename = "SERIAL_EXECUTION")]
    SerialExecution,
    /// 丢弃后续：前一次未结束时，新调度直接作废
    #[serde(rename = "DISCARD_LATER")]
    DiscardLater,
    /// 覆盖之前：取消未结束的旧调度，执行新调度
    #[serde(rename = "COVER_EARLY")]
    CoverEarly,
}

impl BlockStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStrategy::SerialExecution => "SERIAL_EXECUTION",
            BlockStrategy::DiscardLater => "DISCARD_LATER",
            BlockStrategy::CoverEarly => "COVER_EARLY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SERIAL_EXECUTION" => Some(BlockStrategy::SerialExecution),
            "DISCARD_LATER" => Some(BlockStrategy::DiscardLater),
            "COVER_EARLY" => Some(BlockStrategy::CoverEarly),
            _ => None,
        }
    }
}

impl Task {
    pub fn new(group_id: i64, name: String, cron: String, executor_handler: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由存储层生成
            group_id,
            name,
            description: String::new(),
            cron,
            executor_handler,
            executor_param: String::new(),
            route_strategy: RouteStrategy::RoundRobin,
            block_strategy: BlockStrategy::SerialExecution,
            shard_num: 1,
            retry_count: 0,
            retry_interval: 0,
            timeout: 0,
            priority: 0,
            status: TaskStatus::Enabled,
            version: 0,
            next_trigger_time: None,
            last_trigger_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.status, TaskStatus::Enabled)
    }
}

/// 任务依赖边：`task_id` 依赖 `depend_task_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: i64,
    pub task_id: i64,
    pub depend_task_id: i64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// 任务实例
// ============================================================================

/// 任务实例：任务一次触发的完整生命周期记录
///
/// pending -> scheduling -> running -> {success, failed, cancelled}。
/// 终态不可变，仅 `alarm_status` 允许置位一次。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: i64,
    pub task_id: i64,
    pub group_id: i64,
    /// 调度选中执行器后写入
    pub executor_id: Option<String>,
    pub executor_address: Option<String>,
    pub executor_handler: String,
    pub executor_param: String,
    pub shard_index: i32,
    pub shard_total: i32,
    pub trigger_type: TriggerType,
    pub trigger_time: DateTime<Utc>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: InstanceStatus,
    pub result_code: i32,
    pub result_msg: Option<String>,
    pub retry_count: i32,
    pub alarm_status: AlarmStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SCHEDULING")]
    Scheduling,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Success | InstanceStatus::Failed | InstanceStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "PENDING",
            InstanceStatus::Scheduling => "SCHEDULING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Success => "SUCCESS",
            InstanceStatus::Failed => "FAILED",
            InstanceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(InstanceStatus::Pending),
            "SCHEDULING" => Some(InstanceStatus::Scheduling),
            "RUNNING" => Some(InstanceStatus::Running),
            "SUCCESS" => Some(InstanceStatus::Success),
            "FAILED" => Some(InstanceStatus::Failed),
            "CANCELLED" => Some(InstanceStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerType {
    #[serde(rename = "CRON")]
    Cron,
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "PARENT")]
    Parent,
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "RETRY")]
    Retry,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cron => "CRON",
            TriggerType::Manual => "MANUAL",
            TriggerType::Parent => "PARENT",
            TriggerType::Api => "API",
            TriggerType::Retry => "RETRY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CRON" => Some(TriggerType::Cron),
            "MANUAL" => Some(TriggerType::Manual),
            "PARENT" => Some(TriggerType::Parent),
            "API" => Some(TriggerType::Api),
            "RETRY" => Some(TriggerType::Retry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlarmStatus {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "ALARMED")]
    Alarmed,
}

impl TaskInstance {
    /// 从任务定义创建一个待调度实例
    pub fn from_task(task: &Task, trigger_type: TriggerType, trigger_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由存储层生成
            task_id: task.id,
            group_id: task.group_id,
            executor_id: None,
            executor_address: None,
            executor_handler: task.executor_handler.clone(),
            executor_param: task.executor_param.clone(),
            shard_index: 0,
            shard_total: 1,
            trigger_type,
            trigger_time,
            schedule_time: None,
            start_time: None,
            end_time: None,
            status: InstanceStatus::Pending,
            result_code: 0,
            result_msg: None,
            retry_count: 0,
            alarm_status: AlarmStatus::None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 执行时长（毫秒）
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// 实例状态统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceStatistics {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub running: i64,
    pub pending: i64,
    pub cancelled: i64,
    /// 成功率（百分比）
    pub rate: f64,
}

/// 任务执行日志行，按 (instance_id, log_time) 追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: i64,
    pub instance_id: i64,
    pub task_id: i64,
    pub log_time: DateTime<Utc>,
    pub log_level: String,
    pub log_content: String,
}

impl TaskLog {
    pub fn info(instance_id: i64, task_id: i64, content: String) -> Self {
        Self {
            id: 0,
            instance_id,
            task_id,
            log_time: Utc::now(),
            log_level: "INFO".to_string(),
            log_content: content,
        }
    }
}

// ============================================================================
// 执行器节点
// ============================================================================

/// 执行器节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorNode {
    pub id: String,
    pub group_id: i64,
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub weight: i32,
    pub max_concurrent: i32,
    pub current_load: i32,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub status: ExecutorStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutorStatus {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "OFFLINE")]
    Offline,
}

impl ExecutorNode {
    pub fn new(group_id: i64, app_name: String, host: String, port: u16, max_concurrent: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            app_name,
            host,
            port,
            weight: 100,
            max_concurrent,
            current_load: 0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            status: ExecutorStatus::Online,
            last_heartbeat: now,
            registered_at: now,
            updated_at: now,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, ExecutorStatus::Online)
    }

    pub fn is_overloaded(&self) -> bool {
        self.current_load >= self.max_concurrent
    }
}

// ============================================================================
// 线上报文
// ============================================================================

/// 执行器注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRegistration {
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub max_concurrent: i32,
}

/// 执行器心跳上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorHeartbeat {
    pub executor_id: String,
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub current_load: i32,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// 出站调度请求（控制面 -> 执行器 POST /run）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub instance_id: i64,
    pub task_id: i64,
    pub executor_handler: String,
    pub executor_param: String,
    pub shard_index: i32,
    pub shard_total: i32,
    pub timeout: i64,
}

/// 执行器同步应答，code == 0 表示接受
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAck {
    pub code: i32,
    pub message: String,
}

impl DispatchAck {
    pub fn accepted(&self) -> bool {
        self.code == 0
    }
}

/// 执行开始回报（执行器 -> 控制面 POST /callback/start）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCallback {
    pub instance_id: i64,
}

/// 执行结果回报（执行器 -> 控制面 POST /callback），code == 0 表示成功
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCallback {
    pub instance_id: i64,
    pub code: i32,
    pub message: String,
}
