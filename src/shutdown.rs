//! 优雅关闭
//!
//! 广播信号给所有后台组件，等待在途任务排空。

use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，通知所有订阅者
    pub fn shutdown(&self) {
        let subscribers = self.shutdown_tx.receiver_count();
        debug!("发送关闭信号给 {} 个订阅者", subscribers);
        let _ = self.shutdown_tx.send(());
    }

    /// 等待 Ctrl-C 后触发关闭
    pub async fn listen_for_signal(&self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("监听关闭信号失败: {}", e);
            return;
        }
        info!("收到关闭信号");
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_all_subscribers() {
        let manager = ShutdownManager::new();
        let mut rx_a = manager.subscribe();
        let mut rx_b = manager.subscribe();

        manager.shutdown();

        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();
    }
}
