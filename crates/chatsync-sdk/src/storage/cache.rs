//! 聊天缓存 - `chat_history` / `offline_queue` 的类型化访问
//!
//! 反序列化失败不是致命错误：记录日志、删除损坏条目、按空值处理。

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::message::Message;
use crate::storage::{cache_keys, LocalStore};

/// `chat_history` 中恢复出的内容
#[derive(Debug, Clone, Default)]
pub struct CachedHistory {
    /// 已被服务端确认的消息
    pub confirmed: Vec<Message>,
    /// 已写入远端、尚未在快照中回显的消息
    pub awaiting_echo: Vec<Message>,
}

impl CachedHistory {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.awaiting_echo.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChatCache {
    store: Arc<dyn LocalStore>,
}

impl ChatCache {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// 读取上次合并后的消息列表
    ///
    /// 未写入远端的待发送条目被丢弃，是否仍待发送以离线队列为准；
    /// 已写入但尚未回显的条目单独返回，重启后继续显示。
    pub fn load_history(&self) -> CachedHistory {
        let mut history = CachedHistory::default();
        let mut dropped = 0usize;
        for message in self.load_list(cache_keys::CHAT_HISTORY) {
            if !message.is_pending() {
                history.confirmed.push(message);
            } else if message.delivered {
                history.awaiting_echo.push(message);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("chat_history 中丢弃 {} 条待发送条目", dropped);
        }
        history
    }

    pub fn save_history(&self, messages: &[Message]) -> Result<()> {
        let raw = serde_json::to_string(messages)?;
        self.store.set_cached(cache_keys::CHAT_HISTORY, &raw)
    }

    pub fn load_queue(&self) -> Vec<Message> {
        let mut messages = self.load_list(cache_keys::OFFLINE_QUEUE);
        messages.retain(|m| m.is_pending());
        messages
    }

    /// 空队列直接删除键
    pub fn save_queue(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return self.store.remove_cached(cache_keys::OFFLINE_QUEUE);
        }
        let raw = serde_json::to_string(messages)?;
        self.store.set_cached(cache_keys::OFFLINE_QUEUE, &raw)
    }

    /// 删除两个命名空间（登出时调用）
    pub fn clear(&self) -> Result<()> {
        self.store.remove_cached(cache_keys::CHAT_HISTORY)?;
        self.store.remove_cached(cache_keys::OFFLINE_QUEUE)
    }

    fn load_list(&self, key: &str) -> Vec<Message> {
        let raw = match self.store.get_cached(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("读取缓存 {} 失败: {}", key, e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("缓存 {} 已损坏，丢弃: {}", key, e);
                if let Err(e) = self.store.remove_cached(key) {
                    warn!("删除损坏缓存 {} 失败: {}", key, e);
                }
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClientMessageId;
    use crate::storage::MemoryStore;

    fn pending(cid: &str, at: i64) -> Message {
        Message::new_pending(ClientMessageId::new(cid).unwrap(), "hi", None, "alice", "temp_", at)
    }

    fn confirmed(id: &str, cid: &str, at: i64) -> Message {
        let raw = format!(
            r#"{{"id":"{}","text":"x","user":"bob","createdAt":{},"clientMessageId":"{}","delivered":true}}"#,
            id, at, cid
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_history_drops_unsent_pending_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChatCache::new(store);

        let mut written = pending("c3", 3);
        written.delivered = true;
        cache
            .save_history(&[confirmed("s1", "c1", 1), pending("c2", 2), written])
            .unwrap();

        let history = cache.load_history();
        assert_eq!(history.confirmed.len(), 1);
        assert_eq!(history.confirmed[0].id(), "s1");
        assert_eq!(history.awaiting_echo.len(), 1);
        assert_eq!(history.awaiting_echo[0].id(), "temp_c3");
        assert!(history.awaiting_echo[0].is_pending());
    }

    #[test]
    fn test_clear_removes_both_namespaces() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChatCache::new(store.clone());
        cache.save_history(&[confirmed("s1", "c1", 1)]).unwrap();
        cache.save_queue(&[pending("c2", 2)]).unwrap();

        cache.clear().unwrap();
        assert!(store.is_empty());
        assert!(cache.load_history().is_empty());
        assert!(cache.load_queue().is_empty());
    }

    #[test]
    fn test_empty_queue_removes_key() {
        let store = Arc::new(MemoryStore::new());
        let cache = ChatCache::new(store.clone());

        cache.save_queue(&[pending("c1", 1)]).unwrap();
        assert!(store.get_cached(cache_keys::OFFLINE_QUEUE).unwrap().is_some());

        cache.save_queue(&[]).unwrap();
        assert!(store.get_cached(cache_keys::OFFLINE_QUEUE).unwrap().is_none());
        assert!(cache.load_queue().is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.set_cached(cache_keys::CHAT_HISTORY, "{not json").unwrap();
        store.set_cached(cache_keys::OFFLINE_QUEUE, r#"[{"id":1}]"#).unwrap();
        let cache = ChatCache::new(store.clone());

        assert!(cache.load_history().is_empty());
        assert!(cache.load_queue().is_empty());
        assert!(store.is_empty());
    }
}
