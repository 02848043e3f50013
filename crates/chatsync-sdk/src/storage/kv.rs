//! KV 存储模块 - 基于 sled 的本地键值存储
//!
//! 本模块提供：
//! - 持久化的键值存储（跨进程重启）
//! - 按用户隔离的命名空间（每个用户一个 sled Tree）
//! - 进程内的 MemoryStore，供测试或无磁盘环境使用

use parking_lot::Mutex;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ChatSyncError, Result};
use crate::storage::{KvStats, LocalStore};

/// KV 存储组件
#[derive(Debug)]
pub struct KvStore {
    base_path: PathBuf,
    /// 主数据库实例
    db: Db,
    /// 当前用户的 Tree
    tree: Tree,
    uid: String,
}

impl KvStore {
    /// 打开（或创建）指定用户的 KV 存储
    pub async fn open(base_path: &Path, uid: &str) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| ChatSyncError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        let db = open_with_retry(&kv_path).await?;

        let tree = db
            .open_tree(Self::tree_name(uid))
            .map_err(|e| ChatSyncError::KvStore(format!("打开用户 Tree 失败: {}", e)))?;

        info!("用户 KV Tree 初始化完成: {}", uid);

        Ok(Self {
            base_path,
            db,
            tree,
            uid: uid.to_string(),
        })
    }

    fn tree_name(uid: &str) -> String {
        format!("user_{}", uid)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// 删除当前用户的全部数据
    pub fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| ChatSyncError::KvStore(format!("清空用户 Tree 失败: {}", e)))?;
        self.tree.flush()?;
        Ok(())
    }

    /// 获取统计信息
    pub fn stats(&self) -> Result<KvStats> {
        let mut stats = KvStats::default();
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            stats.key_count += 1;
            stats.total_bytes += (key.len() + value.len()) as u64;
        }
        Ok(stats)
    }

    /// 落盘，供关闭前调用
    pub async fn flush_async(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

impl LocalStore for KvStore {
    fn get_cached(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| ChatSyncError::KvStore(format!("获取键值对失败: {}", e)))?;

        match value {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ChatSyncError::Serialization(format!("值不是合法的 UTF-8: {}", e))
                })?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn set_cached(&self, key: &str, value: &str) -> Result<()> {
        self.tree
            .insert(key, value.as_bytes())
            .map_err(|e| ChatSyncError::KvStore(format!("设置键值对失败: {}", e)))?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove_cached(&self, key: &str) -> Result<()> {
        self.tree
            .remove(key)
            .map_err(|e| ChatSyncError::KvStore(format!("删除键值对失败: {}", e)))?;
        self.tree.flush()?;
        Ok(())
    }
}

/// 打开 sled 数据库；上一个进程可能刚释放文件锁，锁冲突时指数退避重试
async fn open_with_retry(path: &Path) -> Result<Db> {
    const MAX_ATTEMPTS: u32 = 8;
    const BASE_DELAY: Duration = Duration::from_millis(300);

    let mut attempt = 0;
    loop {
        match sled::open(path) {
            Ok(db) => return Ok(db),
            Err(e) if is_lock_conflict(&e) && attempt + 1 < MAX_ATTEMPTS => {
                let delay = BASE_DELAY * 2u32.pow(attempt);
                attempt += 1;
                debug!("sled 被锁定，{:?} 后重试 (attempt={})", delay, attempt);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(ChatSyncError::KvStore(format!("打开 sled 数据库失败: {}", e)));
            }
        }
    }
}

fn is_lock_conflict(error: &sled::Error) -> bool {
    let msg = error.to_string();
    ["could not acquire lock", "Resource temporarily unavailable", "WouldBlock"]
        .iter()
        .any(|needle| msg.contains(needle))
}

/// 进程内 KV 存储（不持久化）
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LocalStore for MemoryStore {
    fn get_cached(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_cached(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_cached(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_kv_store_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path(), "alice").await.unwrap();

        store.set_cached("chat_history", "[]").unwrap();
        assert_eq!(store.get_cached("chat_history").unwrap().as_deref(), Some("[]"));

        store.remove_cached("chat_history").unwrap();
        assert!(store.get_cached("chat_history").unwrap().is_none());
        assert!(store.get_cached("never_written").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kv_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = KvStore::open(temp_dir.path(), "alice").await.unwrap();
            store.set_cached("offline_queue", r#"[{"id":"temp_1"}]"#).unwrap();
            store.flush_async().await.unwrap();
        }

        let reopened = KvStore::open(temp_dir.path(), "alice").await.unwrap();
        assert_eq!(
            reopened.get_cached("offline_queue").unwrap().as_deref(),
            Some(r#"[{"id":"temp_1"}]"#)
        );
    }

    #[tokio::test]
    async fn test_kv_store_isolates_users() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path(), "alice").await.unwrap();
        store.set_cached("chat_history", "alice-data").unwrap();

        let other = store.db.open_tree(KvStore::tree_name("bob")).unwrap();
        assert!(other.get("chat_history").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kv_store_stats_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path(), "alice").await.unwrap();
        store.set_cached("a", "1").unwrap();
        store.set_cached("b", "22").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.key_count, 2);
        assert_eq!(stats.total_bytes, 5);

        store.clear().unwrap();
        assert_eq!(store.stats().unwrap().key_count, 0);
    }

    #[test]
    fn test_lock_conflict_detection() {
        let locked = sled::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "could not acquire lock on \"/tmp/kv/db\"",
        ));
        assert!(is_lock_conflict(&locked));
        assert!(!is_lock_conflict(&sled::Error::Unsupported("old format".to_string())));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set_cached("k", "v").unwrap();
        assert_eq!(store.get_cached("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.len(), 1);

        store.remove_cached("k").unwrap();
        assert!(store.get_cached("k").unwrap().is_none());
    }
}
