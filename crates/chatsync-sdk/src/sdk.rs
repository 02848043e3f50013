//! SDK 入口
//!
//! 组装存储、网络监控与同步引擎，对外提供统一接口。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::config::SyncConfig;
use crate::error::{ChatSyncError, Result};
use crate::events::SyncEvent;
use crate::message::{ClientMessageId, Message};
use crate::network::{ConnectivityListener, ConnectivityMonitor};
use crate::remote::RemoteChannel;
use crate::storage::{KvStats, KvStore};
use crate::sync::{FlushReport, SyncEngine};
use crate::version::SDK_VERSION;

#[derive(Debug)]
pub struct ChatSync {
    config: SyncConfig,
    store: Arc<KvStore>,
    connectivity: Arc<ConnectivityMonitor>,
    engine: Arc<SyncEngine>,
    shutting_down: AtomicBool,
}

impl ChatSync {
    /// 初始化 SDK
    #[instrument(skip_all, fields(user = %config.local_user))]
    pub async fn initialize(
        config: SyncConfig,
        remote: Arc<dyn RemoteChannel>,
        listener: Arc<dyn ConnectivityListener>,
    ) -> Result<Self> {
        info!("正在初始化 ChatSync {}...", SDK_VERSION);
        config.validate()?;

        // === 第1层：本地存储 ===
        let store = Arc::new(KvStore::open(&config.data_dir, &config.local_user).await?);

        // === 第2层：网络监控 ===
        let connectivity = Arc::new(ConnectivityMonitor::new(listener));
        connectivity.start().await?;

        // === 第3层：同步引擎 ===
        let engine = Arc::new(SyncEngine::new(
            config.clone(),
            store.clone(),
            remote,
            connectivity.clone(),
        ));
        engine.start().await?;

        info!("ChatSync 初始化完成, online={}", connectivity.is_online());
        Ok(Self {
            config,
            store,
            connectivity,
            engine,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn send_message(&self, text: &str, image: Option<String>) -> Result<ClientMessageId> {
        if self.is_shutting_down() {
            return Err(ChatSyncError::ShuttingDown("ChatSync is shut down".to_string()));
        }
        self.engine.send_message(text, image).await
    }

    pub async fn flush_queue(&self) -> Result<FlushReport> {
        self.engine.flush_queue().await
    }

    pub fn messages(&self) -> Arc<Vec<Message>> {
        self.engine.messages()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe_events()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn store_stats(&self) -> Result<KvStats> {
        self.store.stats()
    }

    /// 登出：清空当前用户的聊天历史、离线队列与已读记录
    #[instrument(skip(self))]
    pub fn clear_local_data(&self) -> Result<()> {
        self.engine.clear_local_data()?;
        self.store.clear()?;
        info!("用户本地数据已清空");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 关闭 SDK：停止订阅与网络监听并落盘
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 ChatSync...");

        self.engine.shutdown();
        self.connectivity.stop().await;
        self.store.flush_async().await?;

        info!("ChatSync 关闭完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ManualConnectivityListener;
    use crate::remote::InMemoryRemote;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initialize_and_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let config = SyncConfig::builder()
            .data_dir(temp_dir.path())
            .local_user("alice")
            .build();
        let remote = Arc::new(InMemoryRemote::new());
        let listener = Arc::new(ManualConnectivityListener::new(false));

        let sdk = ChatSync::initialize(config, remote, listener).await.unwrap();
        assert!(!sdk.is_online());

        sdk.send_message("queued", None).await.unwrap();
        assert_eq!(sdk.engine().pending_len(), 1);
        assert!(sdk.store_stats().unwrap().key_count >= 1);

        sdk.shutdown().await.unwrap();
        sdk.shutdown().await.unwrap();
        assert!(matches!(
            sdk.send_message("late", None).await,
            Err(ChatSyncError::ShuttingDown(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_config() {
        let config = SyncConfig::builder().local_user("").build();
        let result = ChatSync::initialize(
            config,
            Arc::new(InMemoryRemote::new()),
            Arc::new(ManualConnectivityListener::default()),
        )
        .await;
        assert!(matches!(result, Err(ChatSyncError::Config(_))));
    }
}
