//! 应用组装
//!
//! 按配置选择存储后端：database.url 为空走内存仓储（嵌入模式），
//! redis.url 为空走内存 KV（单副本）。多副本部署必须配置 Redis，
//! 否则触发领导锁只在本进程内生效。

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{info, warn};

use cronplane_api::{create_routes, AppState};
use cronplane_config::AppConfig;
use cronplane_dispatcher::{
    DispatchService, ExecutorRegistry, HttpExecutorClient, RegistryConfig, TimeoutSweeper,
    TriggerConfig, TriggerScheduler,
};
use cronplane_domain::{
    ExecutorRepository, TaskGroupRepository, TaskInstanceRepository, TaskLogRepository,
    TaskRepository,
};
use cronplane_foundation::{KvStore, TimeWheel, WorkerPool};
use cronplane_infrastructure::{
    MemoryExecutorRepository, MemoryKvStore, MemoryTaskGroupRepository,
    MemoryTaskInstanceRepository, MemoryTaskLogRepository, MemoryTaskRepository,
    PostgresExecutorRepository, PostgresTaskGroupRepository, PostgresTaskInstanceRepository,
    PostgresTaskLogRepository, PostgresTaskRepository, RedisKvStore,
};

use crate::shutdown::ShutdownManager;

struct Repositories {
    group_repo: Arc<dyn TaskGroupRepository>,
    task_repo: Arc<dyn TaskRepository>,
    instance_repo: Arc<dyn TaskInstanceRepository>,
    executor_repo: Arc<dyn ExecutorRepository>,
    log_repo: Arc<dyn TaskLogRepository>,
}

pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.config;

        let repos = build_repositories(config).await?;
        let kv_store = build_kv_store(config).await?;

        // 调度工作池与时间轮
        let pool = WorkerPool::new(
            config.scheduler.trigger_pool_size,
            config.scheduler.trigger_queue_size,
        );
        let wheel = TimeWheel::new(
            std::time::Duration::from_millis(config.scheduler.time_wheel_interval_ms),
            config.scheduler.time_wheel_slot_num,
            pool.clone(),
        )
        .context("创建时间轮失败")?;
        wheel.start();

        // 调度服务
        let dispatch = DispatchService::new(
            repos.task_repo.clone(),
            repos.instance_repo.clone(),
            repos.executor_repo.clone(),
            repos.log_repo.clone(),
            kv_store.clone(),
            Arc::new(HttpExecutorClient::new()),
            wheel.clone(),
            pool.clone(),
        );

        // 执行器注册表与存活巡检
        let registry = ExecutorRegistry::new(
            repos.group_repo.clone(),
            repos.executor_repo.clone(),
            RegistryConfig {
                dead_timeout: std::time::Duration::from_secs(
                    config.executor.dead_timeout_seconds.max(1) as u64,
                ),
                sweep_interval: std::time::Duration::from_secs(
                    config.executor.sweep_interval_seconds,
                ),
            },
        );
        registry.start_sweeper();

        // 超时巡检
        let timeout_sweeper = TimeoutSweeper::new(
            repos.task_repo.clone(),
            repos.instance_repo.clone(),
            dispatch.clone(),
            std::time::Duration::from_secs(config.instance.timeout_sweep_interval_seconds),
        );
        timeout_sweeper.start();

        // 触发循环
        let trigger = TriggerScheduler::new(
            repos.task_repo.clone(),
            kv_store.clone(),
            wheel.clone(),
            dispatch.clone(),
            TriggerConfig {
                interval: std::time::Duration::from_millis(config.scheduler.trigger_interval_ms),
                pre_read_seconds: config.scheduler.pre_read_seconds,
                scan_limit: config.scheduler.scan_limit,
            },
        );
        if config.scheduler.enable {
            trigger.start();
        } else {
            warn!("scheduler.enable = false，本副本不参与触发");
        }

        // HTTP 入口
        let app = create_routes(AppState {
            registry: registry.clone(),
            dispatch: dispatch.clone(),
        });
        let listener = TcpListener::bind(&config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", config.api.bind_address))?;
        info!("HTTP 服务监听 {}", config.api.bind_address);

        // 优雅关闭
        let shutdown = ShutdownManager::new();
        let mut shutdown_rx = shutdown.subscribe();
        let signal_task = {
            let shutdown = shutdown;
            tokio::spawn(async move { shutdown.listen_for_signal().await })
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("HTTP 服务异常退出")?;

        info!("开始关停后台组件");
        trigger.stop().await;
        timeout_sweeper.stop().await;
        registry.stop_sweeper().await;
        wheel.stop();
        if let Err(e) = pool.shutdown(std::time::Duration::from_secs(10)).await {
            warn!("工作池关停超时: {}", e);
        }
        signal_task.abort();

        info!("cronplane 已退出");
        Ok(())
    }
}

async fn build_repositories(config: &AppConfig) -> Result<Repositories> {
    if config.is_embedded() {
        info!("未配置数据库，以嵌入模式启动（内存仓储）");
        return Ok(Repositories {
            group_repo: Arc::new(MemoryTaskGroupRepository::new()),
            task_repo: Arc::new(MemoryTaskRepository::new()),
            instance_repo: Arc::new(MemoryTaskInstanceRepository::new()),
            executor_repo: Arc::new(MemoryExecutorRepository::new()),
            log_repo: Arc::new(MemoryTaskLogRepository::new()),
        });
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("连接数据库失败")?;
    info!("数据库连接池就绪, 最大连接数 {}", config.database.max_connections);

    Ok(Repositories {
        group_repo: Arc::new(PostgresTaskGroupRepository::new(pool.clone())),
        task_repo: Arc::new(PostgresTaskRepository::new(pool.clone())),
        instance_repo: Arc::new(PostgresTaskInstanceRepository::new(pool.clone())),
        executor_repo: Arc::new(PostgresExecutorRepository::new(pool.clone())),
        log_repo: Arc::new(PostgresTaskLogRepository::new(pool)),
    })
}

async fn build_kv_store(config: &AppConfig) -> Result<Arc<dyn KvStore>> {
    if config.redis.url.is_empty() {
        warn!("未配置 Redis，领导锁与实例锁仅在本进程内生效");
        return Ok(Arc::new(MemoryKvStore::new()));
    }
    let store = RedisKvStore::connect(&config.redis.url)
        .await
        .context("连接 Redis 失败")?;
    Ok(Arc::new(store))
}
