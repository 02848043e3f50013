//! 远端消息通道
//!
//! 远端是一个最终一致、只追加的消息集合。订阅返回快照流：每个快照都是
//! 按 `createdAt` 升序的完整列表（不是增量），出错通过流中的 `Err` 传递。

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ClientMessageId, ImagePayload};

pub mod memory;

pub use memory::InMemoryRemote;

/// 远端文档（边界格式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image: Option<ImagePayload>,
    pub user: String,
    /// 服务端时间戳（毫秒），写入后可能短暂为空
    #[serde(default)]
    pub created_at: Option<i64>,
    /// 旧客户端写入的文档可能缺失
    #[serde(default)]
    pub client_message_id: Option<ClientMessageId>,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub read: bool,
}

/// 追加写入的文档内容，`id` 与 `createdAt` 由服务端分配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub text: String,
    pub image: Option<ImagePayload>,
    pub user: String,
    pub client_message_id: ClientMessageId,
    pub delivered: bool,
    pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// 远端 SDK 的本地缓存，可能滞后
    LocalCache,
    Server,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub documents: Vec<RemoteDocument>,
    pub source: SnapshotSource,
}

impl Snapshot {
    pub fn from_server(documents: Vec<RemoteDocument>) -> Self {
        Self {
            documents,
            source: SnapshotSource::Server,
        }
    }

    pub fn from_cache(documents: Vec<RemoteDocument>) -> Self {
        Self {
            documents,
            source: SnapshotSource::LocalCache,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

pub type SnapshotStream = BoxStream<'static, Result<Snapshot>>;

/// 远端通道（平台层实现）
#[async_trait]
pub trait RemoteChannel: Send + Sync + std::fmt::Debug {
    /// 订阅会话快照；流结束即订阅结束
    async fn subscribe(&self) -> Result<SnapshotStream>;

    /// 追加一条文档；无法到达服务端时返回错误，不会部分写入
    async fn append(&self, document: NewDocument) -> Result<()>;

    /// 将文档标记为已读（幂等）
    async fn mark_read(&self, id: &str) -> Result<()>;
}
