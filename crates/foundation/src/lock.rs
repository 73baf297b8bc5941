//! 分布式锁
//!
//! 以共享 KV 存储的原子 set-if-absent + TTL 实现的带令牌互斥锁。
//! 每把锁持有随机令牌，释放和续期都先比对令牌，防止过期持有者
//! 误删他人持有的锁。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use cronplane_errors::{SchedulerError, SchedulerResult};

/// 锁轮询间隔
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// 共享 KV 存储抽象
///
/// 要求实现方保证三个操作各自原子。
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 键不存在时写入并设置 TTL，返回是否写入成功
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool>;

    /// 当前值等于 value 时删除键，返回是否删除
    async fn compare_and_delete(&self, key: &str, value: &str) -> SchedulerResult<bool>;

    /// 当前值等于 value 时重置 TTL，返回是否续期
    async fn compare_and_expire(&self, key: &str, value: &str, ttl: Duration)
        -> SchedulerResult<bool>;

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>>;
}

/// 带令牌的分布式互斥锁
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    key: String,
    token: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, key: &str, ttl: Duration) -> Self {
        Self {
            store,
            key: format!("lock:{key}"),
            token: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    /// 单次调度防重锁，键为 scheduler:<任务ID十进制>:<YYYYMMDDhhmmss>
    pub fn for_firing(
        store: Arc<dyn KvStore>,
        task_id: i64,
        trigger_time: DateTime<Utc>,
    ) -> Self {
        let key = format!("scheduler:{}:{}", task_id, trigger_time.format("%Y%m%d%H%M%S"));
        Self::new(store, &key, Duration::from_secs(300))
    }

    /// 实例终态写入互斥锁
    pub fn for_instance(store: Arc<dyn KvStore>, instance_id: i64) -> Self {
        let key = format!("instance:{instance_id}");
        Self::new(store, &key, Duration::from_secs(30))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 尝试获取锁，未持有时返回 `LockFailed`
    pub async fn lock(&self) -> SchedulerResult<()> {
        if self.store.set_nx(&self.key, &self.token, self.ttl).await? {
            debug!("获取锁成功: {}", self.key);
            Ok(())
        } else {
            Err(SchedulerError::lock_failed(&self.key))
        }
    }

    /// 在 wait 时间内每 50ms 轮询一次；调用方取消 Future 即取消等待
    pub async fn try_lock(&self, wait: Duration) -> SchedulerResult<()> {
        let deadline = Instant::now() + wait;
        loop {
            match self.lock().await {
                Ok(()) => return Ok(()),
                Err(SchedulerError::LockFailed { .. }) if Instant::now() < deadline => {
                    sleep(RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 释放锁。令牌不匹配说明锁已过期易主，返回 `LockNotHeld`
    pub async fn unlock(&self) -> SchedulerResult<()> {
        if self.store.compare_and_delete(&self.key, &self.token).await? {
            debug!("释放锁成功: {}", self.key);
            Ok(())
        } else {
            Err(SchedulerError::lock_not_held(&self.key))
        }
    }

    /// 续期。TTL 到期后临界区不再受保护，长临界区必须周期续期
    pub async fn refresh(&self) -> SchedulerResult<()> {
        if self
            .store
            .compare_and_expire(&self.key, &self.token, self.ttl)
            .await?
        {
            Ok(())
        } else {
            Err(SchedulerError::lock_not_held(&self.key))
        }
    }
}

/// 在锁保护下执行闭包，所有退出路径（包括 panic 展开）都会释放锁
pub async fn with_lock<F, Fut, T>(
    store: Arc<dyn KvStore>,
    key: &str,
    ttl: Duration,
    f: F,
) -> SchedulerResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SchedulerResult<T>>,
{
    let lock = DistributedLock::new(store.clone(), key, ttl);
    lock.lock().await?;

    let mut guard = UnlockGuard {
        store,
        key: lock.key.clone(),
        token: lock.token.clone(),
        armed: true,
    };

    let result = f().await;

    guard.armed = false;
    match lock.unlock().await {
        Ok(()) => {}
        Err(SchedulerError::LockNotHeld { key }) => {
            warn!("释放锁时令牌已失效，锁可能已过期易主: {}", key);
        }
        Err(e) => return Err(e),
    }

    result
}

/// panic 展开时的兜底释放
struct UnlockGuard {
    store: Arc<dyn KvStore>,
    key: String,
    token: String,
    armed: bool,
}

impl Drop for UnlockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = store.compare_and_delete(&key, &token).await {
                    warn!("兜底释放锁失败: {} - {}", key, e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 测试用内存 KV，行为与 infrastructure 的实现一致
    struct TestKvStore {
        data: Mutex<HashMap<String, (String, Instant)>>,
    }

    impl TestKvStore {
        fn new() -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl KvStore for TestKvStore {
        async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
            let mut data = self.data.lock().unwrap();
            let now = Instant::now();
            match data.get(key) {
                Some((_, expires)) if *expires > now => Ok(false),
                _ => {
                    data.insert(key.to_string(), (value.to_string(), now + ttl));
                    Ok(true)
                }
            }
        }

        async fn compare_and_delete(&self, key: &str, value: &str) -> SchedulerResult<bool> {
            let mut data = self.data.lock().unwrap();
            match data.get(key) {
                Some((v, expires)) if v == value && *expires > Instant::now() => {
                    data.remove(key);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn compare_and_expire(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> SchedulerResult<bool> {
            let mut data = self.data.lock().unwrap();
            match data.get_mut(key) {
                Some((v, expires)) if v == value && *expires > Instant::now() => {
                    *expires = Instant::now() + ttl;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
            let data = self.data.lock().unwrap();
            Ok(data
                .get(key)
                .filter(|(_, expires)| *expires > Instant::now())
                .map(|(v, _)| v.clone()))
        }
    }

    #[tokio::test]
    async fn test_lock_mutual_exclusion() {
        let store: Arc<dyn KvStore> = Arc::new(TestKvStore::new());

        let lock_a = DistributedLock::new(store.clone(), "scheduler:trigger", Duration::from_secs(5));
        let lock_b = DistributedLock::new(store.clone(), "scheduler:trigger", Duration::from_secs(5));

        lock_a.lock().await.unwrap();
        let err = lock_b.lock().await.unwrap_err();
        assert!(matches!(err, SchedulerError::LockFailed { .. }));

        lock_a.unlock().await.unwrap();
        lock_b.lock().await.unwrap();
        lock_b.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_with_foreign_token() {
        let store: Arc<dyn KvStore> = Arc::new(TestKvStore::new());

        let holder = DistributedLock::new(store.clone(), "demo", Duration::from_secs(5));
        let stranger = DistributedLock::new(store.clone(), "demo", Duration::from_secs(5));

        holder.lock().await.unwrap();
        let err = stranger.unlock().await.unwrap_err();
        assert!(matches!(err, SchedulerError::LockNotHeld { .. }));

        // 持有者不受影响
        assert!(store.get("lock:demo").await.unwrap().is_some());
        holder.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired() {
        let store: Arc<dyn KvStore> = Arc::new(TestKvStore::new());

        let first = DistributedLock::new(store.clone(), "demo", Duration::from_millis(20));
        first.lock().await.unwrap();
        sleep(Duration::from_millis(40)).await;

        let second = DistributedLock::new(store.clone(), "demo", Duration::from_secs(5));
        second.lock().await.unwrap();

        // 过期持有者的释放被令牌挡下
        let err = first.unlock().await.unwrap_err();
        assert!(matches!(err, SchedulerError::LockNotHeld { .. }));
    }

    #[tokio::test]
    async fn test_try_lock_waits_for_release() {
        let store: Arc<dyn KvStore> = Arc::new(TestKvStore::new());

        let holder = DistributedLock::new(store.clone(), "demo", Duration::from_secs(5));
        holder.lock().await.unwrap();

        let waiter = DistributedLock::new(store.clone(), "demo", Duration::from_secs(5));
        let release = tokio::spawn({
            let store = store.clone();
            async move {
                sleep(Duration::from_millis(100)).await;
                let _ = store.compare_and_delete("lock:demo", "").await; // 令牌不符，不生效
                holder.unlock().await.unwrap();
            }
        });

        waiter.try_lock(Duration::from_secs(1)).await.unwrap();
        release.await.unwrap();
    }

    #[tokio::test]
    async fn test_try_lock_times_out() {
        let store: Arc<dyn KvStore> = Arc::new(TestKvStore::new());

        let holder = DistributedLock::new(store.clone(), "demo", Duration::from_secs(30));
        holder.lock().await.unwrap();

        let waiter = DistributedLock::new(store.clone(), "demo", Duration::from_secs(5));
        let err = waiter.try_lock(Duration::from_millis(150)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::LockFailed { .. }));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let store: Arc<dyn KvStore> = Arc::new(TestKvStore::new());

        let result: SchedulerResult<()> =
            with_lock(store.clone(), "demo", Duration::from_secs(5), || async {
                Err(SchedulerError::internal("业务失败"))
            })
            .await;
        assert!(result.is_err());

        // 锁已释放，可立即重新获取
        let lock = DistributedLock::new(store, "demo", Duration::from_secs(5));
        lock.lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_firing_lock_key_layout() {
        let store: Arc<dyn KvStore> = Arc::new(TestKvStore::new());
        let trigger_time = DateTime::parse_from_rfc3339("2025-03-01T12:30:05Z")
            .unwrap()
            .with_timezone(&Utc);

        let lock = DistributedLock::for_firing(store, 42, trigger_time);
        assert_eq!(lock.key(), "lock:scheduler:42:20250301123005");
    }
}
