//! 出站执行器客户端
//!
//! 控制面到执行器 agent 的两条 HTTP 调用：派发与取消通知。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use cronplane_domain::{DispatchAck, DispatchRequest};
use cronplane_errors::{SchedulerError, SchedulerResult};

#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// POST /run，执行器同步应答是否接受
    async fn run(&self, address: &str, request: &DispatchRequest) -> SchedulerResult<DispatchAck>;

    /// POST /cancel，尽力而为的取消通知
    async fn cancel(&self, address: &str, instance_id: i64) -> SchedulerResult<()>;
}

pub struct HttpExecutorClient {
    client: reqwest::Client,
}

impl HttpExecutorClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("构建 HTTP 客户端不会失败");
        Self { client }
    }
}

impl Default for HttpExecutorClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn run(&self, address: &str, request: &DispatchRequest) -> SchedulerResult<DispatchAck> {
        let url = format!("http://{address}/run");
        debug!("派发实例 {} -> {}", request.instance_id, url);

        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(SchedulerError::Network(format!(
                "执行器 {} 返回状态 {}",
                address,
                response.status()
            )));
        }
        Ok(response.json::<DispatchAck>().await?)
    }

    async fn cancel(&self, address: &str, instance_id: i64) -> SchedulerResult<()> {
        let url = format!("http://{address}/cancel");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "instance_id": instance_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SchedulerError::Network(format!(
                "执行器 {} 取消请求返回状态 {}",
                address,
                response.status()
            )));
        }
        Ok(())
    }
}
