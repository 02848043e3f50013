//! 进程内远端实现
//!
//! 模拟一个只追加的远端集合：单调递增的服务端时钟、可切换的可达性、
//! 写入延迟、注入的已读失败以及快照重发，供测试和演示使用。

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ChatSyncError, Result};
use crate::message::ClientMessageId;
use crate::remote::{NewDocument, RemoteChannel, RemoteDocument, Snapshot, SnapshotSource, SnapshotStream};

type Subscriber = mpsc::UnboundedSender<Result<Snapshot>>;

#[derive(Debug)]
struct RemoteState {
    documents: Vec<RemoteDocument>,
    subscribers: Vec<Subscriber>,
    clock: i64,
    next_id: u64,
    reachable: bool,
    auto_publish: bool,
    defer_timestamps: bool,
    append_latency: Duration,
    failing_mark_reads: usize,
    append_attempts: usize,
    mark_read_calls: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                documents: Vec::new(),
                subscribers: Vec::new(),
                clock: 0,
                next_id: 1,
                reachable: true,
                auto_publish: true,
                defer_timestamps: false,
                append_latency: Duration::ZERO,
                failing_mark_reads: 0,
                append_attempts: 0,
                mark_read_calls: HashMap::new(),
            }),
        }
    }

    /// 切换可达性；不可达时写入与已读标记均失败
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    pub fn set_append_latency(&self, latency: Duration) {
        self.state.lock().append_latency = latency;
    }

    /// 关闭后写入不再自动推送快照（模拟回显延迟）
    pub fn set_auto_publish(&self, enabled: bool) {
        self.state.lock().auto_publish = enabled;
    }

    /// 开启后新文档的服务端时间戳为空，直到 `resolve_timestamps`
    pub fn set_defer_timestamps(&self, enabled: bool) {
        self.state.lock().defer_timestamps = enabled;
    }

    pub fn resolve_timestamps(&self) {
        let mut state = self.state.lock();
        for index in 0..state.documents.len() {
            if state.documents[index].created_at.is_none() {
                let ts = Self::tick(&mut state);
                state.documents[index].created_at = Some(ts);
            }
        }
        state.documents.sort_by_key(|d| d.created_at.unwrap_or(i64::MAX));
        Self::publish(&mut state, SnapshotSource::Server);
    }

    /// 接下来 `n` 次已读标记返回失败
    pub fn fail_next_mark_reads(&self, n: usize) {
        self.state.lock().failing_mark_reads = n;
    }

    /// 插入一条其他用户发送的消息
    pub fn insert_foreign(&self, user: &str, text: &str) -> String {
        let mut state = self.state.lock();
        let id = Self::next_doc_id(&mut state);
        let created_at = Self::tick(&mut state);
        state.documents.push(RemoteDocument {
            id: id.clone(),
            text: text.to_string(),
            image: None,
            user: user.to_string(),
            created_at: Some(created_at),
            client_message_id: Some(ClientMessageId::generate()),
            delivered: true,
            read: false,
        });
        Self::publish(&mut state, SnapshotSource::Server);
        id
    }

    /// 直接写入原始文档（用于构造重复或缺字段的数据）
    pub fn insert_raw(&self, document: RemoteDocument) {
        let mut state = self.state.lock();
        state.documents.push(document);
        Self::publish(&mut state, SnapshotSource::Server);
    }

    /// 重发当前完整快照
    pub fn emit_snapshot(&self, source: SnapshotSource) {
        let mut state = self.state.lock();
        Self::publish(&mut state, source);
    }

    /// 向所有订阅者推送一个任意快照
    pub fn emit_custom(&self, snapshot: Snapshot) {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
    }

    /// 向所有订阅者推送错误
    pub fn push_error(&self, message: &str) {
        let mut state = self.state.lock();
        let error = ChatSyncError::Subscription(message.to_string());
        state
            .subscribers
            .retain(|tx| tx.send(Err(error.clone())).is_ok());
    }

    pub fn documents(&self) -> Vec<RemoteDocument> {
        self.state.lock().documents.clone()
    }

    /// 某个 clientMessageId 在远端的文档数
    pub fn count_for(&self, client_message_id: &ClientMessageId) -> usize {
        self.state
            .lock()
            .documents
            .iter()
            .filter(|d| d.client_message_id.as_ref() == Some(client_message_id))
            .count()
    }

    pub fn append_attempts(&self) -> usize {
        self.state.lock().append_attempts
    }

    pub fn mark_read_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .mark_read_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_mark_read_calls(&self) -> usize {
        self.state.lock().mark_read_calls.values().sum()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    fn tick(state: &mut RemoteState) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        state.clock = (state.clock + 1).max(now);
        state.clock
    }

    fn next_doc_id(state: &mut RemoteState) -> String {
        let id = format!("doc_{}", state.next_id);
        state.next_id += 1;
        id
    }

    fn publish(state: &mut RemoteState, source: SnapshotSource) {
        let snapshot = Snapshot {
            documents: state.documents.clone(),
            source,
        };
        state
            .subscribers
            .retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
    }
}

#[async_trait]
impl RemoteChannel for InMemoryRemote {
    async fn subscribe(&self) -> Result<SnapshotStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            let initial = Snapshot::from_server(state.documents.clone());
            let _ = tx.send(Ok(initial));
            state.subscribers.push(tx);
        }

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn append(&self, document: NewDocument) -> Result<()> {
        let latency = {
            let mut state = self.state.lock();
            state.append_attempts += 1;
            if !state.reachable {
                return Err(ChatSyncError::Transport("server unreachable".to_string()));
            }
            state.append_latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.reachable {
            return Err(ChatSyncError::Transport("connection lost during write".to_string()));
        }

        let id = Self::next_doc_id(&mut state);
        let created_at = if state.defer_timestamps {
            None
        } else {
            Some(Self::tick(&mut state))
        };
        debug!("远端写入: {} ({})", id, document.client_message_id);
        state.documents.push(RemoteDocument {
            id,
            text: document.text,
            image: document.image,
            user: document.user,
            created_at,
            client_message_id: Some(document.client_message_id),
            delivered: document.delivered,
            read: document.read,
        });
        if state.auto_publish {
            Self::publish(&mut state, SnapshotSource::Server);
        }
        Ok(())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        *state.mark_read_calls.entry(id.to_string()).or_insert(0) += 1;

        if state.failing_mark_reads > 0 {
            state.failing_mark_reads -= 1;
            return Err(ChatSyncError::Transport("mark read rejected".to_string()));
        }
        if !state.reachable {
            return Err(ChatSyncError::Transport("server unreachable".to_string()));
        }

        let changed = match state.documents.iter_mut().find(|d| d.id == id) {
            Some(doc) if !doc.read => {
                doc.read = true;
                true
            }
            Some(_) => false,
            None => return Err(ChatSyncError::NotFound(format!("document {}", id))),
        };
        if changed && state.auto_publish {
            Self::publish(&mut state, SnapshotSource::Server);
        }
        Ok(())
    }
}
