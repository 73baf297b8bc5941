//! 存储实现层
//!
//! 仓储契约的两套实现：内存版（嵌入模式与测试）与 Postgres 版，
//! 以及分布式锁使用的 KV 存储（内存版与 Redis 版）。

pub mod memory;
pub mod postgres;
pub mod redis_store;

pub use memory::{
    MemoryExecutorRepository, MemoryKvStore, MemoryTaskGroupRepository,
    MemoryTaskInstanceRepository, MemoryTaskLogRepository, MemoryTaskRepository,
};
pub use postgres::{
    PostgresExecutorRepository, PostgresTaskGroupRepository, PostgresTaskInstanceRepository,
    PostgresTaskLogRepository, PostgresTaskRepository,
};
pub use redis_store::RedisKvStore;
