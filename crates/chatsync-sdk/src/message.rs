//! 消息模型
//!
//! 同一条消息在本地有两种表示：
//! - 待发送（Pending）：本地临时 id + 本地入队时间
//! - 已确认（Confirmed）：服务端文档 id + 服务端时间戳
//!
//! 两者通过 `client_message_id` 关联，这是跨存储唯一的身份键。
//! 持久化 / 边界格式为扁平的 camelCase JSON（`id`、`createdAt`、`pending` ...），
//! 由 [`StoredMessage`] 负责转换。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChatSyncError, Result};

/// 客户端消息 ID（设备内全局唯一，创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMessageId(String);

impl ClientMessageId {
    const MAX_LENGTH: usize = 128;

    /// 生成新的客户端消息 ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(ChatSyncError::InvalidInput(
                "clientMessageId cannot be empty".to_string(),
            ));
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(ChatSyncError::InvalidInput(format!(
                "clientMessageId exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 图片载荷：内嵌的 data URI 或远端 URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImagePayload {
    /// `data:<mime>;base64,...`
    Embedded(String),
    Remote(String),
}

impl ImagePayload {
    /// 解析并校验长度上限
    pub fn parse(raw: impl Into<String>, max_len: usize) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ChatSyncError::InvalidInput("image payload is empty".to_string()));
        }
        if raw.len() > max_len {
            return Err(ChatSyncError::InvalidInput(format!(
                "image payload too large: {} > {}",
                raw.len(),
                max_len
            )));
        }
        Ok(Self::from(raw))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImagePayload::Embedded(s) | ImagePayload::Remote(s) => s,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, ImagePayload::Embedded(_))
    }

    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl From<String> for ImagePayload {
    fn from(raw: String) -> Self {
        if raw.starts_with("data:") {
            ImagePayload::Embedded(raw)
        } else {
            ImagePayload::Remote(raw)
        }
    }
}

impl From<ImagePayload> for String {
    fn from(payload: ImagePayload) -> Self {
        match payload {
            ImagePayload::Embedded(s) | ImagePayload::Remote(s) => s,
        }
    }
}

/// 投递状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 尚未被服务端确认
    Pending {
        local_id: String,
        /// 本地墙钟（毫秒）
        enqueued_at: i64,
    },
    /// 已被服务端确认
    Confirmed {
        server_id: String,
        /// 服务端时间戳（毫秒）；服务端尚未回填时为 None
        server_timestamp: Option<i64>,
    },
}

/// 会话中的一条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredMessage", into = "StoredMessage")]
pub struct Message {
    pub client_message_id: ClientMessageId,
    pub text: String,
    pub image: Option<ImagePayload>,
    /// 发送者显示名
    pub user: String,
    pub delivered: bool,
    pub read: bool,
    pub delivery: Delivery,
}

impl Message {
    /// 创建一条待发送消息，临时 id 为 `<prefix><client_message_id>`
    pub fn new_pending(
        client_message_id: ClientMessageId,
        text: impl Into<String>,
        image: Option<ImagePayload>,
        user: impl Into<String>,
        temp_id_prefix: &str,
        enqueued_at: i64,
    ) -> Self {
        let local_id = format!("{}{}", temp_id_prefix, client_message_id);
        Self {
            client_message_id,
            text: text.into(),
            image,
            user: user.into(),
            delivered: false,
            read: false,
            delivery: Delivery::Pending {
                local_id,
                enqueued_at,
            },
        }
    }

    /// 展示用 id：待发送为临时 id，已确认为服务端 id
    pub fn id(&self) -> &str {
        match &self.delivery {
            Delivery::Pending { local_id, .. } => local_id,
            Delivery::Confirmed { server_id, .. } => server_id,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        match &self.delivery {
            Delivery::Confirmed { server_id, .. } => Some(server_id),
            Delivery::Pending { .. } => None,
        }
    }

    pub fn created_at(&self) -> Option<i64> {
        match &self.delivery {
            Delivery::Pending { enqueued_at, .. } => Some(*enqueued_at),
            Delivery::Confirmed {
                server_timestamp, ..
            } => *server_timestamp,
        }
    }

    /// 排序键：服务端时间戳未回填的消息排在最后
    pub fn sort_key(&self) -> i64 {
        self.created_at().unwrap_or(i64::MAX)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }

    pub fn is_from(&self, user: &str) -> bool {
        self.user == user
    }
}

/// 扁平持久化格式（`chat_history` / `offline_queue` 中的数组元素）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image: Option<ImagePayload>,
    pub user: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    pub client_message_id: ClientMessageId,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub pending: bool,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        let delivery = if stored.pending {
            Delivery::Pending {
                local_id: stored.id,
                enqueued_at: stored.created_at.unwrap_or_default(),
            }
        } else {
            Delivery::Confirmed {
                server_id: stored.id,
                server_timestamp: stored.created_at,
            }
        };
        Self {
            client_message_id: stored.client_message_id,
            text: stored.text,
            image: stored.image,
            user: stored.user,
            delivered: stored.delivered,
            read: stored.read,
            delivery,
        }
    }
}

impl From<Message> for StoredMessage {
    fn from(message: Message) -> Self {
        let pending = message.is_pending();
        let created_at = message.created_at();
        let id = message.id().to_string();
        Self {
            id,
            text: message.text,
            image: message.image,
            user: message.user,
            created_at,
            client_message_id: message.client_message_id,
            delivered: message.delivered,
            read: message.read,
            pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_message_uses_temp_id() {
        let cid = ClientMessageId::new("abc123").unwrap();
        let msg = Message::new_pending(cid.clone(), "hi", None, "alice", "temp_", 1_000);

        assert_eq!(msg.id(), "temp_abc123");
        assert!(msg.is_pending());
        assert_eq!(msg.created_at(), Some(1_000));
        assert!(!msg.delivered);
        assert!(msg.server_id().is_none());
    }

    #[test]
    fn test_stored_format_is_flat_camel_case() {
        let cid = ClientMessageId::new("c1").unwrap();
        let msg = Message::new_pending(cid, "hello", None, "alice", "temp_", 42);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["id"], "temp_c1");
        assert_eq!(json["clientMessageId"], "c1");
        assert_eq!(json["createdAt"], 42);
        assert_eq!(json["pending"], true);
    }

    #[test]
    fn test_confirmed_without_timestamp_sorts_last() {
        let json = r#"{"id":"srv1","text":"x","user":"bob","clientMessageId":"c9","delivered":true}"#;
        let msg: Message = serde_json::from_str(json).unwrap();

        assert!(!msg.is_pending());
        assert_eq!(msg.server_id(), Some("srv1"));
        assert_eq!(msg.sort_key(), i64::MAX);
    }

    #[test]
    fn test_image_payload_kinds_and_limit() {
        let embedded = ImagePayload::parse("data:image/jpeg;base64,AAAA", 100).unwrap();
        assert!(embedded.is_embedded());

        let remote = ImagePayload::parse("https://cdn.example.com/a.jpg", 100).unwrap();
        assert!(!remote.is_embedded());

        let too_big = "x".repeat(101);
        assert!(matches!(
            ImagePayload::parse(too_big, 100),
            Err(ChatSyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_client_message_id_validation() {
        assert!(ClientMessageId::new("  ").is_err());
        assert!(ClientMessageId::new("a".repeat(129)).is_err());

        let generated = ClientMessageId::generate();
        assert_ne!(generated, ClientMessageId::generate());
        assert_eq!(generated.as_str().len(), 32);
    }
}
