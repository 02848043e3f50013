use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChatSyncError, Result};

/// 图片载荷（data URI 或 URI）的默认长度上限（字符）
pub const DEFAULT_MAX_IMAGE_PAYLOAD_LEN: usize = 1_200_000;

/// 同步引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 本地数据目录（sled KV 存储）
    pub data_dir: PathBuf,
    /// 本机用户的显示名，用于区分自己与他人的消息
    pub local_user: String,
    /// 待发送消息临时 id 的前缀
    pub temp_id_prefix: String,
    /// 图片载荷最大长度（字符）
    pub max_image_payload_len: usize,
    /// 离线队列最大长度
    pub max_pending_messages: usize,
    /// 已读回执"已尝试"集合容量
    pub read_tracker_capacity: usize,
    /// 事件广播通道容量
    pub event_channel_capacity: usize,
    /// 单次远端写入超时（毫秒）
    pub send_timeout_ms: u64,
    /// 每次发送前是否先尝试补发队列
    pub flush_before_send: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chatsync_data"),
            local_user: "User".to_string(),
            temp_id_prefix: "temp_".to_string(),
            max_image_payload_len: DEFAULT_MAX_IMAGE_PAYLOAD_LEN,
            max_pending_messages: 10_000,
            read_tracker_capacity: 10_000,
            event_channel_capacity: 256,
            send_timeout_ms: 15_000,
            flush_before_send: true,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 从 JSON 文件加载，缺省字段取默认值
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| ChatSyncError::Config(format!("解析配置文件失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_user.trim().is_empty() {
            return Err(ChatSyncError::Config("local_user cannot be empty".to_string()));
        }
        if self.max_pending_messages == 0 {
            return Err(ChatSyncError::Config("max_pending_messages must be > 0".to_string()));
        }
        if self.read_tracker_capacity == 0 {
            return Err(ChatSyncError::Config("read_tracker_capacity must be > 0".to_string()));
        }
        if self.event_channel_capacity == 0 {
            return Err(ChatSyncError::Config("event_channel_capacity must be > 0".to_string()));
        }
        if self.send_timeout_ms == 0 {
            return Err(ChatSyncError::Config("send_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn local_user<S: Into<String>>(mut self, user: S) -> Self {
        self.config.local_user = user.into();
        self
    }

    pub fn temp_id_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.temp_id_prefix = prefix.into();
        self
    }

    pub fn max_image_payload_len(mut self, len: usize) -> Self {
        self.config.max_image_payload_len = len;
        self
    }

    pub fn max_pending_messages(mut self, max: usize) -> Self {
        self.config.max_pending_messages = max;
        self
    }

    pub fn read_tracker_capacity(mut self, capacity: usize) -> Self {
        self.config.read_tracker_capacity = capacity;
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn flush_before_send(mut self, enabled: bool) -> Self {
        self.config.flush_before_send = enabled;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
