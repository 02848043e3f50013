//! 网络连接监控
//!
//! 平台层通过 [`ConnectivityListener`] 提供在线状态；[`ConnectivityMonitor`]
//! 只在状态真正变化时广播 [`ConnectivityEvent`]，重复的"在线"通知被吸收。

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;

/// 连接状态变化事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub online: bool,
    pub previous: bool,
    /// 毫秒时间戳
    pub timestamp: i64,
}

/// 网络状态监听器trait（由平台层实现，如 Android/iOS）
#[async_trait]
pub trait ConnectivityListener: Send + Sync + std::fmt::Debug {
    /// 当前是否可达
    async fn is_online(&self) -> bool;

    /// 开始监听，返回原始状态流（允许重复值）
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<bool>>;

    async fn stop_monitoring(&self);
}

/// 网络监控管理器
#[derive(Debug)]
pub struct ConnectivityMonitor {
    listener: Arc<dyn ConnectivityListener>,
    sender: broadcast::Sender<ConnectivityEvent>,
    online: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(listener: Arc<dyn ConnectivityListener>) -> Self {
        let (sender, _) = broadcast::channel(100);

        Self {
            listener,
            sender,
            online: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        }
    }

    /// 启动监控：先用监听器当前状态初始化，再转发后续变化
    pub async fn start(&self) -> Result<()> {
        let initial = self.listener.is_online().await;
        Self::apply(&self.online, &self.sender, initial);

        let mut receiver = self.listener.start_monitoring().await?;
        let sender = self.sender.clone();
        let online = self.online.clone();

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(state) => {
                        Self::apply(&online, &sender, state);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("连接状态通知滞后，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("连接状态转发任务结束");
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }

        info!("🌐 连接监控已启动, online={}", initial);
        Ok(())
    }

    fn apply(
        online: &RwLock<bool>,
        sender: &broadcast::Sender<ConnectivityEvent>,
        state: bool,
    ) -> Option<ConnectivityEvent> {
        let previous = {
            let mut current = online.write();
            let previous = *current;
            *current = state;
            previous
        };
        if previous == state {
            return None;
        }

        let event = ConnectivityEvent {
            online: state,
            previous,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        info!("🌐 连接状态变化: {} -> {}", previous, state);
        let _ = sender.send(event.clone());
        Some(event)
    }

    /// 手动设置连接状态；仅在状态变化时返回事件
    pub fn set_online(&self, state: bool) -> Option<ConnectivityEvent> {
        Self::apply(&self.online, &self.sender, state)
    }

    /// 重新查询监听器，补上可能错过的状态变化
    pub async fn check_connection(&self) -> bool {
        let state = self.listener.is_online().await;
        self.set_online(state);
        state
    }

    pub fn is_online(&self) -> bool {
        *self.online.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.sender.subscribe()
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.listener.stop_monitoring().await;
        info!("🌐 连接监控已停止");
    }
}

/// 由宿主手动驱动的监听器，用于测试或自行探测网络的平台
#[derive(Debug)]
pub struct ManualConnectivityListener {
    online: AtomicBool,
    sender: Mutex<Option<broadcast::Sender<bool>>>,
}

impl ManualConnectivityListener {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            sender: Mutex::new(None),
        }
    }

    /// 更新状态并通知监控器（重复值同样转发，由监控器去重）
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(online);
        }
    }

    /// 只改变可查询状态，不发通知（模拟平台漏报）
    pub fn set_online_silently(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ManualConnectivityListener {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConnectivityListener for ManualConnectivityListener {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<bool>> {
        let (tx, rx) = broadcast::channel(16);
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }

    async fn stop_monitoring(&self) {
        *self.sender.lock() = None;
    }
}
