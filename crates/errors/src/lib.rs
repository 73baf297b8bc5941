use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("KV存储错误: {0}")]
    KvStore(#[from] redis::RedisError),
    #[error("无效的Cron表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("任务组未找到: {app_name}")]
    GroupNotFound { app_name: String },
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("任务实例未找到: {id}")]
    InstanceNotFound { id: i64 },
    #[error("执行器未找到: {id}")]
    ExecutorNotFound { id: String },
    #[error("没有可用的执行器")]
    NoAvailableExecutor,
    #[error("获取锁失败: {key}")]
    LockFailed { key: String },
    #[error("锁不属于当前持有者: {key}")]
    LockNotHeld { key: String },
    #[error("工作池已满")]
    PoolFull,
    #[error("工作池已关闭")]
    PoolClosed,
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("检测到循环依赖: 任务 {task_id} -> 任务 {depend_task_id}")]
    CycleDetected { task_id: i64, depend_task_id: i64 },
    #[error("无效的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("网络错误: {0}")]
    Network(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn invalid_cron<E: std::fmt::Display>(expr: &str, err: E) -> Self {
        Self::InvalidCron {
            expr: expr.to_string(),
            message: err.to_string(),
        }
    }

    pub fn lock_failed<S: Into<String>>(key: S) -> Self {
        Self::LockFailed { key: key.into() }
    }

    pub fn lock_not_held<S: Into<String>>(key: S) -> Self {
        Self::LockNotHeld { key: key.into() }
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 瞬态错误，下一个调度周期会自然重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_)
                | SchedulerError::KvStore(_)
                | SchedulerError::Network(_)
                | SchedulerError::Timeout(_)
                | SchedulerError::PoolFull
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_) | SchedulerError::Internal(_)
        )
    }

    /// 对外暴露的业务错误码，0 保留给成功
    pub fn code(&self) -> i32 {
        match self {
            SchedulerError::InvalidCron { .. } => 1001,
            SchedulerError::GroupNotFound { .. } => 1002,
            SchedulerError::TaskNotFound { .. } => 1003,
            SchedulerError::InstanceNotFound { .. } => 1004,
            SchedulerError::ExecutorNotFound { .. } => 1005,
            SchedulerError::NoAvailableExecutor => 1006,
            SchedulerError::CycleDetected { .. } => 1007,
            SchedulerError::InvalidStateTransition { .. } => 1008,
            SchedulerError::LockFailed { .. } | SchedulerError::LockNotHeld { .. } => 1100,
            SchedulerError::PoolFull | SchedulerError::PoolClosed => 1101,
            SchedulerError::Timeout(_) => 1102,
            _ => 1500,
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SchedulerError::Timeout(err.to_string())
        } else {
            SchedulerError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests;
