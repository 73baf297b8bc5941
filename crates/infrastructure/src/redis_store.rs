//! Redis KV 存储
//!
//! 分布式锁的生产实现。set-if-absent 用 SET NX PX 一条命令完成；
//! 比对删除与比对续期用 Lua 脚本保证原子性。

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::debug;

use cronplane_errors::SchedulerResult;
use cronplane_foundation::KvStore;

/// 值匹配才删除
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// 值匹配才续期
const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

pub struct RedisKvStore {
    conn: MultiplexedConnection,
    delete_script: Script,
    expire_script: Script,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> SchedulerResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!("Redis 连接建立成功: {}", url);

        Ok(Self {
            conn,
            delete_script: Script::new(COMPARE_AND_DELETE),
            expire_script: Script::new(COMPARE_AND_EXPIRE),
        })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .delete_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .expire_script
            .key(key)
            .arg(value)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}
