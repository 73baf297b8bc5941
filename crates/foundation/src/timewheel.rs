//! 哈希时间轮
//!
//! 单层轮 + 圈数计数的进程内延时调度器，插入与删除均摊 O(1)。
//! 到期回调一律转交工作池执行，绝不在 tick 内联执行；tick 路径
//! 不含任何挂起点。外部修改通过有界通道汇入轮协程，通道满时
//! 退化为直接持锁写入——宁可短暂争锁也不丢任务。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cronplane_errors::{SchedulerError, SchedulerResult};

use crate::pool::{Job, WorkerPool};

/// 修改操作通道容量
const OP_CHANNEL_SIZE: usize = 1000;

/// 一条待注册的轮上任务
pub struct WheelTask {
    pub key: String,
    pub delay: Duration,
    pub job: Job,
    /// 工作池拒绝（已满）时的补偿任务，脱离池直接派发
    pub on_reject: Option<Job>,
}

struct WheelEntry {
    /// 剩余圈数，为 0 时当前槽扫过即触发
    circle: u64,
    job: Job,
    on_reject: Option<Job>,
}

struct WheelCore {
    slots: Vec<HashMap<String, WheelEntry>>,
    /// key -> 槽位，支撑 O(1) 删除与同 key 覆盖
    index: HashMap<String, usize>,
    cursor: usize,
}

impl WheelCore {
    fn new(slot_num: usize) -> Self {
        Self {
            slots: (0..slot_num).map(|_| HashMap::new()).collect(),
            index: HashMap::new(),
            cursor: 0,
        }
    }

    fn insert(&mut self, interval: Duration, task: WheelTask) {
        // 同 key 覆盖旧条目
        if let Some(pos) = self.index.remove(&task.key) {
            self.slots[pos].remove(&task.key);
        }

        let slot_num = self.slots.len();
        let ticks = (task.delay.as_millis() / interval.as_millis().max(1)) as u64;
        let circle = ticks / slot_num as u64;
        let pos = (self.cursor + ticks as usize) % slot_num;

        self.slots[pos].insert(
            task.key.clone(),
            WheelEntry {
                circle,
                job: task.job,
                on_reject: task.on_reject,
            },
        );
        self.index.insert(task.key, pos);
    }

    fn remove(&mut self, key: &str) {
        if let Some(pos) = self.index.remove(key) {
            self.slots[pos].remove(key);
        }
    }

    /// 处理当前槽并前移游标，返回到期条目
    fn advance(&mut self) -> Vec<(String, WheelEntry)> {
        let slot = &mut self.slots[self.cursor];

        let due_keys: Vec<String> = slot
            .iter()
            .filter(|(_, entry)| entry.circle == 0)
            .map(|(key, _)| key.clone())
            .collect();

        let mut due = Vec::with_capacity(due_keys.len());
        for key in due_keys {
            if let Some(entry) = slot.remove(&key) {
                self.index.remove(&key);
                due.push((key, entry));
            }
        }

        for entry in slot.values_mut() {
            entry.circle -= 1;
        }

        self.cursor = (self.cursor + 1) % self.slots.len();
        due
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

enum WheelOp {
    Add(WheelTask),
    Remove(String),
}

/// 哈希时间轮，最大直达延时 = interval × slot_num，更长的延时靠圈数绕行
#[derive(Clone)]
pub struct TimeWheel {
    inner: Arc<WheelInner>,
}

struct WheelInner {
    interval: Duration,
    core: Mutex<WheelCore>,
    op_tx: mpsc::Sender<WheelOp>,
    op_rx: Mutex<Option<mpsc::Receiver<WheelOp>>>,
    pool: WorkerPool,
    stop_tx: watch::Sender<bool>,
}

impl TimeWheel {
    pub fn new(interval: Duration, slot_num: usize, pool: WorkerPool) -> SchedulerResult<Self> {
        if interval.is_zero() || slot_num == 0 {
            return Err(SchedulerError::config_error(
                "时间轮 interval 和 slot_num 必须大于 0",
            ));
        }

        let (op_tx, op_rx) = mpsc::channel(OP_CHANNEL_SIZE);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(WheelInner {
                interval,
                core: Mutex::new(WheelCore::new(slot_num)),
                op_tx,
                op_rx: Mutex::new(Some(op_rx)),
                pool,
                stop_tx,
            }),
        })
    }

    /// 启动轮协程。重复调用无效果
    pub fn start(&self) {
        let Some(mut op_rx) = self.inner.op_rx.lock().unwrap().take() else {
            warn!("时间轮已经启动过");
            return;
        };

        let inner = self.inner.clone();
        let mut stop_rx = self.inner.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval 的第一个 tick 立即返回，吞掉它
            ticker.tick().await;

            info!("时间轮启动成功");
            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.tick(),
                    op = op_rx.recv() => match op {
                        Some(WheelOp::Add(task)) => {
                            inner.core.lock().unwrap().insert(inner.interval, task);
                        }
                        Some(WheelOp::Remove(key)) => {
                            inner.core.lock().unwrap().remove(&key);
                        }
                        None => {}
                    },
                    _ = stop_rx.changed() => {
                        info!("时间轮已停止");
                        return;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.inner.stop_tx.send(true);
    }

    /// 注册延时任务。delay 为 0（或不足一个 tick 已到期）时立刻派发；
    /// 同 key 覆盖既有条目
    pub fn add_task(&self, delay: Duration, key: &str, job: Job, on_reject: Option<Job>) {
        if delay.is_zero() {
            self.inner.dispatch(key, job, on_reject);
            return;
        }

        let task = WheelTask {
            key: key.to_string(),
            delay,
            job,
            on_reject,
        };

        match self.inner.op_tx.try_send(WheelOp::Add(task)) {
            Ok(()) => {}
            Err(TrySendError::Full(WheelOp::Add(task))) => {
                // 通道满，直接持锁写入
                self.inner.core.lock().unwrap().insert(self.inner.interval, task);
            }
            Err(TrySendError::Closed(WheelOp::Add(task))) => {
                warn!("时间轮未在运行，直接写入: {}", task.key);
                self.inner.core.lock().unwrap().insert(self.inner.interval, task);
            }
            Err(_) => {}
        }
    }

    pub fn remove_task(&self, key: &str) {
        match self.inner.op_tx.try_send(WheelOp::Remove(key.to_string())) {
            Ok(()) => {}
            Err(_) => self.inner.core.lock().unwrap().remove(key),
        }
    }

    pub fn has_task(&self, key: &str) -> bool {
        self.inner.core.lock().unwrap().index.contains_key(key)
    }

    pub fn task_count(&self) -> usize {
        self.inner.core.lock().unwrap().len()
    }
}

impl WheelInner {
    fn tick(&self) {
        let due = self.core.lock().unwrap().advance();
        for (key, entry) in due {
            debug!("时间轮任务到期: {}", key);
            self.dispatch(&key, entry.job, entry.on_reject);
        }
    }

    fn dispatch(&self, key: &str, job: Job, on_reject: Option<Job>) {
        match self.pool.submit(job) {
            Ok(()) => {}
            Err(SchedulerError::PoolFull) => {
                warn!("工作池已满，任务 {} 走补偿路径", key);
                if let Some(reject) = on_reject {
                    tokio::spawn(reject);
                }
            }
            Err(e) => error!("派发时间轮任务 {} 失败: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    fn test_wheel(interval_ms: u64, slot_num: usize) -> TimeWheel {
        let pool = WorkerPool::new(4, 64);
        let wheel = TimeWheel::new(Duration::from_millis(interval_ms), slot_num, pool).unwrap();
        wheel.start();
        wheel
    }

    fn counting_job(counter: &Arc<AtomicU32>) -> Job {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_invalid_geometry() {
        let pool = WorkerPool::new(1, 4);
        assert!(TimeWheel::new(Duration::ZERO, 10, pool.clone()).is_err());
        assert!(TimeWheel::new(Duration::from_millis(10), 0, pool).is_err());
    }

    #[tokio::test]
    async fn test_fires_after_delay() {
        let wheel = test_wheel(20, 32);
        let fired = Arc::new(AtomicU32::new(0));

        wheel.add_task(Duration::from_millis(100), "t1", counting_job(&fired), None);

        sleep(Duration::from_millis(40)).await;
        assert!(wheel.has_task("t1"));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!wheel.has_task("t1"));
    }

    #[tokio::test]
    async fn test_zero_delay_fires_immediately() {
        let wheel = test_wheel(50, 8);
        let fired = Arc::new(AtomicU32::new(0));

        wheel.add_task(Duration::ZERO, "now", counting_job(&fired), None);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circle_wraps_around() {
        // 4 槽 × 20ms，一圈 80ms；180ms 的延时需要绕两圈
        let wheel = test_wheel(20, 4);
        let fired = Arc::new(AtomicU32::new(0));

        wheel.add_task(Duration::from_millis(180), "long", counting_job(&fired), None);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "绕圈任务不应提前触发");

        sleep(Duration::from_millis(160)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_task() {
        let wheel = test_wheel(20, 32);
        let fired = Arc::new(AtomicU32::new(0));

        wheel.add_task(Duration::from_millis(100), "gone", counting_job(&fired), None);
        sleep(Duration::from_millis(30)).await;
        wheel.remove_task("gone");

        sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!wheel.has_task("gone"));
    }

    #[tokio::test]
    async fn test_same_key_replaces() {
        let wheel = test_wheel(20, 32);
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        wheel.add_task(Duration::from_millis(100), "dup", counting_job(&first), None);
        wheel.add_task(Duration::from_millis(100), "dup", counting_job(&second), None);

        sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0, "旧条目应被覆盖");
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.task_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_path_when_pool_full() {
        // 池：1 worker、队列 1，先塞满
        let pool = WorkerPool::new(1, 1);
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit(Box::pin(async move {
            let _ = hold_rx.await;
        }))
        .unwrap();
        sleep(Duration::from_millis(30)).await;
        pool.submit(Box::pin(async {})).unwrap();

        let wheel = TimeWheel::new(Duration::from_millis(20), 8, pool).unwrap();
        wheel.start();

        let rejected = Arc::new(AtomicU32::new(0));
        let fired = Arc::new(AtomicU32::new(0));
        wheel.add_task(
            Duration::from_millis(40),
            "sat",
            counting_job(&fired),
            Some(counting_job(&rejected)),
        );

        sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(rejected.load(Ordering::SeqCst), 1, "拒绝补偿任务应被执行");

        let _ = hold_tx.send(());
    }
}
