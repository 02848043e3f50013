use thiserror::Error;

/// SDK 统一错误类型
#[derive(Debug, Clone, Error)]
pub enum ChatSyncError {
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Not connected")]
    NotConnected,
    /// 远端不可达、写入被拒绝等传输层错误
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Queue is full: {0}")]
    QueueFull(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// 订阅通道出错（远端监听器回调 onError）
    #[error("Subscription error: {0}")]
    Subscription(String),
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl From<sled::Error> for ChatSyncError {
    fn from(error: sled::Error) -> Self {
        ChatSyncError::KvStore(error.to_string())
    }
}

impl From<serde_json::Error> for ChatSyncError {
    fn from(error: serde_json::Error) -> Self {
        ChatSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for ChatSyncError {
    fn from(error: std::io::Error) -> Self {
        ChatSyncError::IO(error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ChatSyncError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        ChatSyncError::Timeout(error.to_string())
    }
}

impl ChatSyncError {
    /// 是否属于可在本地恢复的瞬时错误（发送失败时退化为离线入队）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatSyncError::NotConnected
                | ChatSyncError::Transport(_)
                | ChatSyncError::Timeout(_)
                | ChatSyncError::Subscription(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatSyncError>;
