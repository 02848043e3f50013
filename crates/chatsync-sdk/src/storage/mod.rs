//! 存储模块 - 本地持久化层
//!
//! - LocalStore: 同步的字符串键值存储抽象（跨进程重启持久）
//! - KvStore: 基于 sled 的持久化实现；MemoryStore: 进程内实现
//! - ChatCache: `chat_history` / `offline_queue` 两个逻辑命名空间的类型化访问
//! - PendingQueue: 离线发送队列（FIFO + 在途标记）

use crate::error::Result;

pub mod cache;
pub mod kv;
pub mod queue;

pub use cache::{CachedHistory, ChatCache};
pub use kv::{KvStore, MemoryStore};
pub use queue::PendingQueue;

/// 缓存键常量
pub mod cache_keys {
    /// 最近一次合并后的消息列表，用于启动时先行渲染
    pub const CHAT_HISTORY: &str = "chat_history";
    /// 待发送队列
    pub const OFFLINE_QUEUE: &str = "offline_queue";
}

/// 本地键值存储
///
/// 所有操作同步完成；访问由引擎串行化，不要求实现可重入。
pub trait LocalStore: Send + Sync + std::fmt::Debug {
    fn get_cached(&self, key: &str) -> Result<Option<String>>;

    fn set_cached(&self, key: &str, value: &str) -> Result<()>;

    fn remove_cached(&self, key: &str) -> Result<()>;
}

/// KV 存储统计信息
#[derive(Debug, Clone, Default)]
pub struct KvStats {
    pub key_count: u64,
    pub total_bytes: u64,
}
