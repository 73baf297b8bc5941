//! 基础组件层
//!
//! 调度引擎依赖的四个叶子组件：基于共享 KV 的分布式锁、
//! 弹性工作池、哈希时间轮、任务依赖图。

pub mod dag;
pub mod lock;
pub mod pool;
pub mod timewheel;

pub use dag::TaskDag;
pub use lock::{with_lock, DistributedLock, KvStore};
pub use pool::{Job, PoolStats, WorkerPool};
pub use timewheel::TimeWheel;
