//! 弹性工作池
//!
//! 有界队列 + 按需扩容的任务执行池，承接所有出站调度调用。
//! 初始 worker 数为上限的四分之一，空闲 30 秒自动缩容，但始终
//! 保留一个常驻 worker；任务内 panic 被捕获，worker 不退出。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, error, info};

use cronplane_errors::{SchedulerError, SchedulerResult};

/// 池中执行的任务
pub type Job = BoxFuture<'static, ()>;

/// worker 空闲多久后退出
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// 运行时统计
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub max_workers: usize,
    pub workers: usize,
    pub running: usize,
    pub queue_size: usize,
    pub queue_cap: usize,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    max_workers: usize,
    tx: mpsc::Sender<Job>,
    /// 多 worker 共享同一个接收端，取任务时短暂持锁
    rx: Mutex<mpsc::Receiver<Job>>,
    workers: AtomicUsize,
    running: AtomicUsize,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    drained: Notify,
}

impl WorkerPool {
    pub fn new(max_workers: usize, queue_size: usize) -> Self {
        let max_workers = max_workers.max(1);
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let pool = Self {
            inner: Arc::new(PoolInner {
                max_workers,
                tx,
                rx: Mutex::new(rx),
                workers: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                shutdown_tx,
                drained: Notify::new(),
            }),
        };

        let initial_workers = (max_workers / 4).max(1);
        for _ in 0..initial_workers {
            pool.spawn_worker();
        }

        info!(
            "工作池启动成功, 最大worker数: {}, 队列容量: {}",
            max_workers,
            queue_size.max(1)
        );
        pool
    }

    /// 提交任务。队列满且还有扩容余地时扩一个 worker 再试一次，
    /// 仍然满则返回 `PoolFull`
    pub fn submit(&self, job: Job) -> SchedulerResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::PoolClosed);
        }

        match self.inner.tx.try_send(job) {
            Ok(()) => {
                self.maybe_expand();
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                if self.inner.workers.load(Ordering::SeqCst) < self.inner.max_workers {
                    self.spawn_worker();
                    match self.inner.tx.try_send(job) {
                        Ok(()) => Ok(()),
                        Err(TrySendError::Full(_)) => Err(SchedulerError::PoolFull),
                        Err(TrySendError::Closed(_)) => Err(SchedulerError::PoolClosed),
                    }
                } else {
                    Err(SchedulerError::PoolFull)
                }
            }
            Err(TrySendError::Closed(_)) => Err(SchedulerError::PoolClosed),
        }
    }

    /// 提交任务，最多等待 d 让出队列空间
    pub async fn submit_with_timeout(&self, job: Job, d: Duration) -> SchedulerResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::PoolClosed);
        }

        match self.inner.tx.send_timeout(job, d).await {
            Ok(()) => {
                self.maybe_expand();
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                Err(SchedulerError::Timeout("提交任务超时".to_string()))
            }
            Err(SendTimeoutError::Closed(_)) => Err(SchedulerError::PoolClosed),
        }
    }

    /// 优雅关闭：停止接收新任务，排空在途任务，最多等待 grace
    pub async fn shutdown(&self, grace: Duration) -> SchedulerResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("工作池开始关闭");
        let _ = self.inner.shutdown_tx.send(true);

        let drain = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.inner.workers.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(grace, drain).await {
            Ok(()) => {
                info!("工作池已完全关闭");
                Ok(())
            }
            Err(_) => Err(SchedulerError::Timeout("工作池关闭超时".to_string())),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.load(Ordering::SeqCst)
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn queue_size(&self) -> usize {
        self.inner.tx.max_capacity() - self.inner.tx.capacity()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.inner.max_workers,
            workers: self.worker_count(),
            running: self.running_count(),
            queue_size: self.queue_size(),
            queue_cap: self.inner.tx.max_capacity(),
        }
    }

    /// 队列积压超过 worker 数且未到上限时扩容
    fn maybe_expand(&self) -> bool {
        let workers = self.inner.workers.load(Ordering::SeqCst);
        if self.queue_size() > workers && workers < self.inner.max_workers {
            self.spawn_worker();
            true
        } else {
            false
        }
    }

    fn spawn_worker(&self) {
        let inner = self.inner.clone();
        inner.workers.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut shutdown_rx = inner.shutdown_tx.subscribe();

            loop {
                // 关闭后只排空存量队列
                if *shutdown_rx.borrow() {
                    let job = inner.rx.lock().await.try_recv().ok();
                    match job {
                        Some(job) => {
                            inner.run_job(job).await;
                            continue;
                        }
                        None => break,
                    }
                }

                let next = async {
                    let mut rx = inner.rx.lock().await;
                    tokio::time::timeout(IDLE_TIMEOUT, rx.recv()).await
                };

                tokio::select! {
                    _ = shutdown_rx.changed() => continue,
                    polled = next => match polled {
                        Ok(Some(job)) => inner.run_job(job).await,
                        Ok(None) => break,
                        Err(_) => {
                            // 空闲退出；持锁者才会走到这里，始终保留一个 worker
                            if inner.workers.load(Ordering::SeqCst) > 1 {
                                debug!("worker 空闲退出");
                                break;
                            }
                        }
                    }
                }
            }

            if inner.workers.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.drained.notify_waiters();
            }
        });
    }
}

impl PoolInner {
    async fn run_job(&self, job: Job) {
        self.running.fetch_add(1, Ordering::SeqCst);
        if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "未知panic".to_string());
            error!("工作池任务panic: {}", msg);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}
