//! 调度引擎
//!
//! 触发循环扫描到期任务并在领导锁内推进游标，时间轮在到点时把
//! 调度作业交给工作池，调度作业完成阻塞策略、依赖闸门、执行器
//! 路由与出站派发，实例状态机经由回调与巡检走向终态。

pub mod cron_utils;
pub mod dispatch;
pub mod executor_client;
pub mod registry;
pub mod strategies;
pub mod task_service;
pub mod timeout_sweeper;
pub mod trigger;

pub use cron_utils::CronScheduler;
pub use dispatch::{DispatchService, FiringContext};
pub use executor_client::{ExecutorClient, HttpExecutorClient};
pub use registry::{ExecutorRegistry, RegistryConfig};
pub use strategies::{Strategy, StrategyRouter};
pub use task_service::TaskService;
pub use timeout_sweeper::TimeoutSweeper;
pub use trigger::{TriggerConfig, TriggerScheduler};
