//! 执行器注册表与存活巡检
//!
//! 注册按 app_name 归组，心跳刷新负载并把节点拉回在线；
//! 后台巡检把超时未心跳的在线节点批量置为离线。
//! 注册表是最终一致的：取到在线列表后仍须在派发时复核过载。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use cronplane_domain::{
    ExecutorHeartbeat, ExecutorNode, ExecutorRegistration, ExecutorRepository, TaskGroupRepository,
};
use cronplane_errors::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 心跳超时，超过即判离线
    pub dead_timeout: Duration,
    /// 巡检周期
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dead_timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct ExecutorRegistry {
    group_repo: Arc<dyn TaskGroupRepository>,
    executor_repo: Arc<dyn ExecutorRepository>,
    config: RegistryConfig,
    running: Arc<RwLock<bool>>,
}

impl ExecutorRegistry {
    pub fn new(
        group_repo: Arc<dyn TaskGroupRepository>,
        executor_repo: Arc<dyn ExecutorRepository>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            group_repo,
            executor_repo,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 注册执行器。app_name 对应的任务组必须已存在
    pub async fn register(
        &self,
        registration: ExecutorRegistration,
    ) -> SchedulerResult<ExecutorNode> {
        let group = self
            .group_repo
            .get_by_app_name(&registration.app_name)
            .await?
            .ok_or_else(|| SchedulerError::GroupNotFound {
                app_name: registration.app_name.clone(),
            })?;

        let node = ExecutorNode::new(
            group.id,
            registration.app_name,
            registration.host,
            registration.port,
            registration.max_concurrent,
        );
        self.executor_repo.register(&node).await?;

        info!(
            "执行器注册成功: {} ({}) -> 任务组 {}",
            node.id,
            node.address(),
            group.app_name
        );
        Ok(node)
    }

    /// 处理心跳。未知节点返回 `ExecutorNotFound`，agent 应重新注册
    pub async fn heartbeat(&self, heartbeat: ExecutorHeartbeat) -> SchedulerResult<()> {
        let known = self.executor_repo.update_heartbeat(&heartbeat).await?;
        if !known {
            warn!(
                "收到未知执行器 {} 的心跳，需要重新注册",
                heartbeat.executor_id
            );
            return Err(SchedulerError::ExecutorNotFound {
                id: heartbeat.executor_id,
            });
        }
        debug!("执行器 {} 心跳已刷新", heartbeat.executor_id);
        Ok(())
    }

    /// 主动注销，节点置为离线
    pub async fn unregister(&self, executor_id: &str) -> SchedulerResult<()> {
        let known = self.executor_repo.set_offline(executor_id).await?;
        if !known {
            return Err(SchedulerError::ExecutorNotFound {
                id: executor_id.to_string(),
            });
        }
        info!("执行器 {} 已注销", executor_id);
        Ok(())
    }

    pub async fn get_online_by_group(&self, group_id: i64) -> SchedulerResult<Vec<ExecutorNode>> {
        self.executor_repo.get_online_by_group(group_id).await
    }

    pub async fn get_by_id(&self, executor_id: &str) -> SchedulerResult<ExecutorNode> {
        self.executor_repo
            .get_by_id(executor_id)
            .await?
            .ok_or_else(|| SchedulerError::ExecutorNotFound {
                id: executor_id.to_string(),
            })
    }

    /// 单轮巡检：把心跳过期的在线节点置为离线，返回条数
    pub async fn sweep_once(&self) -> SchedulerResult<u64> {
        let deadline = Utc::now()
            - chrono::Duration::from_std(self.config.dead_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(90));
        let flipped = self.executor_repo.mark_offline_stale(deadline).await?;
        if flipped > 0 {
            warn!("存活巡检: {} 个执行器因心跳超时被置为离线", flipped);
        }
        Ok(flipped)
    }

    /// 启动后台存活巡检
    pub fn start_sweeper(&self) {
        let registry = self.clone();
        tokio::spawn(async move {
            {
                let mut running = registry.running.write().await;
                if *running {
                    warn!("存活巡检已在运行");
                    return;
                }
                *running = true;
            }
            info!(
                "存活巡检启动, 周期 {:?}, 心跳超时 {:?}",
                registry.config.sweep_interval, registry.config.dead_timeout
            );

            let mut ticker = tokio::time::interval(registry.config.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !*registry.running.read().await {
                    info!("存活巡检已停止");
                    return;
                }
                if let Err(e) = registry.sweep_once().await {
                    warn!("存活巡检失败: {}", e);
                }
            }
        });
    }

    pub async fn stop_sweeper(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }
}
