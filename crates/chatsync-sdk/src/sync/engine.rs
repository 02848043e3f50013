//! 同步引擎
//!
//! 职责：
//! - 乐观发送：消息先入待发送队列并持久化，再尝试远端写入
//! - 网络恢复、发送前、启动时补发队列（同一时刻至多一次补发）
//! - 合并远端快照与本地队列，得到唯一的有序视图
//! - 对他人消息发送一次已读回执
//!
//! 所有状态变更在 `state` 锁内完成，锁不跨越 await。
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::error::{ChatSyncError, Result};
use crate::events::{BannerKind, EventManager, SyncEvent};
use crate::message::{ClientMessageId, ImagePayload, Message};
use crate::network::ConnectivityMonitor;
use crate::remote::{NewDocument, RemoteChannel, Snapshot, SnapshotSource, SnapshotStream};
use crate::storage::{ChatCache, LocalStore, PendingQueue};
use crate::sync::merge;
use crate::sync::read_receipt::ReadReceiptTracker;
use crate::sync::{FlushReport, SyncStats};

#[derive(Debug)]
struct EngineState {
    queue: PendingQueue,
    /// 最近一次快照（或缓存历史）中的已确认消息
    server_messages: Vec<Message>,
    server_ids: HashSet<ClientMessageId>,
    /// 已写入成功、尚未在快照中回显的消息
    awaiting_echo: Vec<Message>,
    /// 见过的已读文档 id
    read_seen: HashSet<String>,
    view: Arc<Vec<Message>>,
}

impl EngineState {
    /// 重新合并视图；与当前视图相同时返回 None
    fn rebuild_view(&mut self) -> Option<Arc<Vec<Message>>> {
        let view = merge::merge_view(&self.server_messages, &self.awaiting_echo, self.queue.iter());
        if *self.view == view {
            return None;
        }
        self.view = Arc::new(view);
        Some(self.view.clone())
    }
}

/// 同步引擎
#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    cache: ChatCache,
    remote: Arc<dyn RemoteChannel>,
    connectivity: Arc<ConnectivityMonitor>,
    read_tracker: Arc<ReadReceiptTracker>,
    events: Arc<EventManager>,
    state: Mutex<EngineState>,
    /// 补发锁；已被持有时新的补发直接返回
    flush_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// 已读回执任务所用的运行时；`start` 时记录
    runtime: Mutex<Option<Handle>>,
    closed: AtomicBool,
    stats: Arc<Mutex<SyncStats>>,
}

impl SyncEngine {
    /// 创建同步引擎，从本地缓存恢复历史与待发送队列
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteChannel>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        let cache = ChatCache::new(store);
        let history = cache.load_history();
        let queue = PendingQueue::restore(cache.load_queue(), config.max_pending_messages);

        let server_ids: HashSet<ClientMessageId> = history
            .confirmed
            .iter()
            .map(|m| m.client_message_id.clone())
            .collect();
        let read_seen = history
            .confirmed
            .iter()
            .filter(|m| m.read)
            .filter_map(|m| m.server_id().map(str::to_string))
            .collect();
        let awaiting_echo: Vec<Message> = history
            .awaiting_echo
            .into_iter()
            .filter(|m| {
                !server_ids.contains(&m.client_message_id) && !queue.contains(&m.client_message_id)
            })
            .collect();

        let mut state = EngineState {
            queue,
            server_messages: history.confirmed,
            server_ids,
            awaiting_echo,
            read_seen,
            view: Arc::new(Vec::new()),
        };
        state.rebuild_view();

        info!(
            "同步引擎已创建: 缓存消息 {} 条, 待回显 {} 条, 待发送 {} 条",
            state.server_messages.len(),
            state.awaiting_echo.len(),
            state.queue.len()
        );

        Self {
            read_tracker: Arc::new(ReadReceiptTracker::new(config.read_tracker_capacity)),
            events: Arc::new(EventManager::new(config.event_channel_capacity)),
            config,
            cache,
            remote,
            connectivity,
            state: Mutex::new(state),
            flush_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            runtime: Mutex::new(Handle::try_current().ok()),
            closed: AtomicBool::new(false),
            stats: Arc::new(Mutex::new(SyncStats::default())),
        }
    }

    /// 启动：发布初始视图、订阅远端、监听网络变化，在线时补发一次
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_closed() {
            return Err(ChatSyncError::ShuttingDown("engine already shut down".to_string()));
        }

        *self.runtime.lock() = Some(Handle::current());

        let initial = self.messages();
        self.events.emit(SyncEvent::TimelineReset { messages: initial });

        match self.remote.subscribe().await {
            Ok(stream) => {
                let handle = tokio::spawn(Self::pump_snapshots(Arc::downgrade(self), stream));
                self.tasks.lock().push(handle);
            }
            Err(e) => self.on_subscription_error(e),
        }

        let receiver = self.connectivity.subscribe();
        let handle = tokio::spawn(Self::watch_connectivity(Arc::downgrade(self), receiver));
        self.tasks.lock().push(handle);

        if self.connectivity.is_online() {
            if let Err(e) = self.flush_queue().await {
                warn!("启动补发失败: {}", e);
            }
        }

        info!("✅ 同步引擎已启动");
        Ok(())
    }

    async fn pump_snapshots(engine: Weak<Self>, mut stream: SnapshotStream) {
        while let Some(item) = stream.next().await {
            let Some(engine) = engine.upgrade() else {
                break;
            };
            if engine.is_closed() {
                break;
            }
            match item {
                Ok(snapshot) => engine.on_remote_snapshot(snapshot),
                Err(e) => engine.on_subscription_error(e),
            }
        }
        debug!("远端快照流结束");
    }

    async fn watch_connectivity(
        engine: Weak<Self>,
        mut receiver: broadcast::Receiver<crate::network::ConnectivityEvent>,
    ) {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("网络事件滞后，跳过 {} 条", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(engine) = engine.upgrade() else {
                break;
            };
            if engine.is_closed() {
                break;
            }

            engine
                .events
                .emit(SyncEvent::ConnectivityChanged { online: event.online });
            if event.online {
                engine.events.banner(BannerKind::BackOnline);
                match engine.flush_queue().await {
                    Ok(report) => debug!("网络恢复补发: {:?}", report),
                    Err(e) => warn!("网络恢复补发失败: {}", e),
                }
            } else {
                engine.events.banner(BannerKind::Offline);
            }
        }
    }

    /// 发送消息
    ///
    /// 消息立即出现在视图中。远端不可达或写入失败时消息留在队列，
    /// 只发出提示横幅，不返回错误。
    #[instrument(skip(self, text, image))]
    pub async fn send_message(
        &self,
        text: &str,
        image: Option<String>,
    ) -> Result<ClientMessageId> {
        if self.is_closed() {
            return Err(ChatSyncError::ShuttingDown("engine already shut down".to_string()));
        }

        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(ChatSyncError::InvalidInput(
                "message must contain text or an image".to_string(),
            ));
        }
        let image = image
            .map(|raw| ImagePayload::parse(raw, self.config.max_image_payload_len))
            .transpose()?;

        let client_message_id = ClientMessageId::generate();
        let message = Message::new_pending(
            client_message_id.clone(),
            text,
            image,
            self.config.local_user.as_str(),
            &self.config.temp_id_prefix,
            chrono::Utc::now().timestamp_millis(),
        );

        let view = {
            let mut state = self.state.lock();
            state.queue.enqueue(message)?;
            self.persist_queue(&state);
            self.commit_view(&mut state)
        };
        self.stats.lock().messages_queued += 1;
        self.events.emit(SyncEvent::MessageQueued {
            client_message_id: client_message_id.clone(),
        });
        self.publish(view);

        if !self.connectivity.check_connection().await {
            info!("离线，消息已入队: {}", client_message_id);
            self.events.banner(BannerKind::QueuedOffline);
            return Ok(client_message_id);
        }

        // 队列中还有更早的消息时整体按 FIFO 补发，新消息排在末尾
        let has_older =
            self.config.flush_before_send && self.state.lock().queue.ready_ids().len() > 1;
        if has_older {
            match self.flush_queue().await {
                Ok(report) if !report.is_noop() => {
                    if self.state.lock().queue.contains(&client_message_id) {
                        warn!("补发未能发出新消息，保留在队列: {}", client_message_id);
                        self.events.banner(BannerKind::QueuedAfterFailure);
                    }
                    return Ok(client_message_id);
                }
                Ok(_) => {}
                Err(e) => warn!("发送前补发失败: {}", e),
            }
        }

        match self.deliver(&client_message_id).await {
            Ok(true) => {}
            Ok(false) => debug!("消息已由补发流程处理: {}", client_message_id),
            Err(ChatSyncError::NotConnected) => {
                info!("发送前网络断开，消息已入队: {}", client_message_id);
                self.events.banner(BannerKind::QueuedOffline);
            }
            Err(e) if e.is_transient() => {
                warn!("发送失败，消息保留在队列: {} ({})", client_message_id, e);
                self.events.banner(BannerKind::QueuedAfterFailure);
            }
            Err(e) => {
                error!("远端拒绝写入，消息保留在队列: {} ({})", client_message_id, e);
                self.events.banner(BannerKind::QueuedAfterFailure);
            }
        }

        Ok(client_message_id)
    }

    /// 写入一条队列中的消息
    ///
    /// 返回 `Ok(false)` 表示条目已在发送中或已不在队列；
    /// 已离线时返回 `NotConnected`，条目不被认领。
    async fn deliver(&self, client_message_id: &ClientMessageId) -> Result<bool> {
        if !self.connectivity.is_online() {
            return Err(ChatSyncError::NotConnected);
        }
        let document = {
            let mut state = self.state.lock();
            if !state.queue.claim(client_message_id) {
                return Ok(false);
            }
            match state.queue.get(client_message_id) {
                Some(message) => NewDocument {
                    text: message.text.clone(),
                    image: message.image.clone(),
                    user: message.user.clone(),
                    client_message_id: client_message_id.clone(),
                    delivered: true,
                    read: false,
                },
                None => {
                    state.queue.release(client_message_id);
                    return Ok(false);
                }
            }
        };

        let result = match tokio::time::timeout(self.config.send_timeout(), self.remote.append(document)).await {
            Ok(result) => result,
            Err(elapsed) => Err(ChatSyncError::from(elapsed)),
        };

        match result {
            Ok(()) => {
                let (view, server_id) = {
                    let mut state = self.state.lock();
                    if let Some(mut message) = state.queue.remove(client_message_id) {
                        if !state.server_ids.contains(client_message_id) {
                            message.delivered = true;
                            state.awaiting_echo.push(message);
                        }
                    }
                    self.persist_queue(&state);
                    let server_id = state
                        .server_messages
                        .iter()
                        .find(|m| &m.client_message_id == client_message_id)
                        .and_then(|m| m.server_id().map(str::to_string));
                    (self.commit_view(&mut state), server_id)
                };
                self.stats.lock().messages_sent += 1;
                debug!("消息已写入远端: {}", client_message_id);
                self.events.emit(SyncEvent::MessageConfirmed {
                    client_message_id: client_message_id.clone(),
                    server_id,
                });
                self.publish(view);
                Ok(true)
            }
            Err(e) => {
                self.state.lock().queue.release(client_message_id);
                self.stats.lock().send_failures += 1;
                Err(e)
            }
        }
    }

    /// 按 FIFO 补发队列
    ///
    /// 已有补发进行中时直接返回空报告；单条失败不影响后续条目。
    #[instrument(skip(self))]
    pub async fn flush_queue(&self) -> Result<FlushReport> {
        let Ok(_guard) = self.flush_lock.try_lock() else {
            debug!("补发进行中，忽略本次请求");
            self.stats.lock().flushes_collapsed += 1;
            return Ok(FlushReport::default());
        };

        let mut report = FlushReport::default();
        if self.is_closed() {
            report.remaining = self.pending_len();
            return Ok(report);
        }

        let ready = self.state.lock().queue.ready_ids();
        if ready.is_empty() {
            report.remaining = self.pending_len();
            return Ok(report);
        }
        if !self.connectivity.check_connection().await {
            debug!("离线，跳过补发 ({} 条待发送)", ready.len());
            report.remaining = self.pending_len();
            return Ok(report);
        }

        info!("📤 开始补发离线消息: {} 条", ready.len());
        self.events.banner(BannerKind::FlushingPending);
        self.stats.lock().flushes_run += 1;

        for client_message_id in ready {
            match self.deliver(&client_message_id).await {
                Ok(true) => {
                    report.attempted += 1;
                    report.sent += 1;
                }
                Ok(false) => {}
                Err(ChatSyncError::NotConnected) => {
                    info!("网络已断开，停止补发");
                    break;
                }
                Err(e) => {
                    report.attempted += 1;
                    report.failed += 1;
                    warn!("补发失败: {} ({})", client_message_id, e);
                }
            }
        }

        report.remaining = self.pending_len();
        if report.sent > 0 && report.remaining == 0 {
            self.events.banner(BannerKind::AllPendingSent);
        }
        info!(
            "📤 补发结束: sent={}, failed={}, remaining={}",
            report.sent, report.failed, report.remaining
        );
        Ok(report)
    }

    /// 应用一个远端快照
    pub fn on_remote_snapshot(&self, snapshot: Snapshot) {
        if self.is_closed() {
            debug!("引擎已关闭，忽略快照");
            return;
        }
        if snapshot.is_empty() && snapshot.source == SnapshotSource::LocalCache {
            debug!("忽略来自本地缓存的空快照");
            self.stats.lock().snapshots_ignored += 1;
            return;
        }

        let (view, current, pruned) = {
            let mut state = self.state.lock();
            let server = merge::confirmed_from_documents(&snapshot.documents, &mut state.read_seen);
            let server_ids: HashSet<ClientMessageId> =
                server.iter().map(|m| m.client_message_id.clone()).collect();

            let pruned = if snapshot.source == SnapshotSource::Server {
                state.queue.retain_unconfirmed(&server_ids)
            } else {
                0
            };
            if pruned > 0 {
                info!("服务端已存在，清除队列条目 {} 条", pruned);
                self.persist_queue(&state);
            }

            state
                .awaiting_echo
                .retain(|m| !server_ids.contains(&m.client_message_id));
            state.server_messages = server;
            state.server_ids = server_ids;

            let view = self.commit_view(&mut state);
            (view, state.view.clone(), pruned)
        };

        {
            let mut stats = self.stats.lock();
            stats.snapshots_applied += 1;
            stats.queue_pruned += pruned as u64;
        }
        self.publish(view);
        self.mark_unread(&current);
    }

    fn mark_unread(&self, view: &[Message]) {
        let runtime = self.runtime.lock().clone().or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            debug!("当前没有 tokio 运行时，已读标记留待下次快照");
            return;
        };

        let claimed = self
            .read_tracker
            .claim_unread(view, &self.config.local_user);

        for server_id in claimed {
            let remote = self.remote.clone();
            let tracker = self.read_tracker.clone();
            let stats = self.stats.clone();
            runtime.spawn(async move {
                match remote.mark_read(&server_id).await {
                    Ok(()) => {
                        stats.lock().read_marks_sent += 1;
                        debug!("已标记已读: {}", server_id);
                    }
                    Err(e) => {
                        stats.lock().read_mark_failures += 1;
                        debug!("标记已读失败，等待下次快照重试: {} ({})", server_id, e);
                        tracker.release(&server_id);
                    }
                }
            });
        }
    }

    /// 订阅出错：保留当前视图，必要时退回本地缓存历史
    fn on_subscription_error(&self, e: ChatSyncError) {
        error!("远端订阅出错: {}", e);
        self.stats.lock().subscription_errors += 1;

        let view = {
            let mut state = self.state.lock();
            if state.server_messages.is_empty() {
                let history = self.cache.load_history();
                if !history.is_empty() {
                    info!(
                        "退回本地缓存历史: {} 条, 待回显 {} 条",
                        history.confirmed.len(),
                        history.awaiting_echo.len()
                    );
                    state.server_ids = history
                        .confirmed
                        .iter()
                        .map(|m| m.client_message_id.clone())
                        .collect();
                    state.server_messages = history.confirmed;
                    for message in history.awaiting_echo {
                        let known = state.server_ids.contains(&message.client_message_id)
                            || state.queue.contains(&message.client_message_id)
                            || state
                                .awaiting_echo
                                .iter()
                                .any(|m| m.client_message_id == message.client_message_id);
                        if !known {
                            state.awaiting_echo.push(message);
                        }
                    }
                }
            }
            self.commit_view(&mut state)
        };

        self.events.emit(SyncEvent::SubscriptionFailed {
            error: e.to_string(),
        });
        self.publish(view);
    }

    /// 在锁内重建视图并写入历史缓存
    fn commit_view(&self, state: &mut EngineState) -> Option<Arc<Vec<Message>>> {
        let view = state.rebuild_view()?;
        if let Err(e) = self.cache.save_history(&view) {
            warn!("保存 chat_history 失败: {}", e);
        }
        Some(view)
    }

    fn publish(&self, view: Option<Arc<Vec<Message>>>) {
        if let Some(messages) = view {
            self.stats.lock().views_published += 1;
            self.events.emit(SyncEvent::TimelineReset { messages });
        }
    }

    fn persist_queue(&self, state: &EngineState) {
        if let Err(e) = self.cache.save_queue(&state.queue.messages()) {
            warn!("保存 offline_queue 失败: {}", e);
        }
    }

    /// 清除本地数据（登出）：视图、待发送队列、已读记录与两个缓存命名空间
    ///
    /// 进行中的写入完成后不会再把条目放回视图。
    #[instrument(skip(self))]
    pub fn clear_local_data(&self) -> Result<()> {
        let view = {
            let mut state = self.state.lock();
            state.queue = PendingQueue::new(self.config.max_pending_messages);
            state.server_messages.clear();
            state.server_ids.clear();
            state.awaiting_echo.clear();
            state.read_seen.clear();
            let view = state.rebuild_view();
            self.cache.clear()?;
            view
        };
        self.read_tracker.clear();

        info!("本地聊天数据已清除");
        self.publish(view);
        Ok(())
    }

    /// 关闭：停止订阅与网络监听，进行中的远端调用不被取消
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        info!("同步引擎已关闭");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 当前合并视图
    pub fn messages(&self) -> Arc<Vec<Message>> {
        self.state.lock().view.clone()
    }

    pub fn pending_messages(&self) -> Vec<Message> {
        self.state.lock().queue.messages()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn read_tracker(&self) -> &Arc<ReadReceiptTracker> {
        &self.read_tracker
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ManualConnectivityListener;
    use crate::remote::{InMemoryRemote, RemoteDocument};
    use crate::storage::MemoryStore;

    struct Harness {
        engine: Arc<SyncEngine>,
        remote: Arc<InMemoryRemote>,
        listener: Arc<ManualConnectivityListener>,
        store: Arc<MemoryStore>,
    }

    async fn harness(online: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let listener = Arc::new(ManualConnectivityListener::new(online));
        let monitor = Arc::new(ConnectivityMonitor::new(listener.clone()));
        monitor.start().await.unwrap();

        let config = SyncConfig::builder().local_user("alice").build();
        let engine = Arc::new(SyncEngine::new(config, store.clone(), remote.clone(), monitor));
        Harness {
            engine,
            remote,
            listener,
            store,
        }
    }

    fn server_doc(id: &str, cid: &str, user: &str, at: i64) -> RemoteDocument {
        RemoteDocument {
            id: id.to_string(),
            text: id.to_string(),
            image: None,
            user: user.to_string(),
            created_at: Some(at),
            client_message_id: Some(ClientMessageId::new(cid).unwrap()),
            delivered: true,
            read: false,
        }
    }

    #[tokio::test]
    async fn test_rejects_empty_message() {
        let h = harness(true).await;
        assert!(matches!(
            h.engine.send_message("   ", None).await,
            Err(ChatSyncError::InvalidInput(_))
        ));
        assert_eq!(h.engine.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_rejects_oversized_image() {
        let h = harness(true).await;
        let big = format!("data:image/jpeg;base64,{}", "A".repeat(1_200_000));
        assert!(matches!(
            h.engine.send_message("", Some(big)).await,
            Err(ChatSyncError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_send_is_queued_and_visible() {
        let h = harness(false).await;
        let cid = h.engine.send_message("hello", None).await.unwrap();

        assert_eq!(h.engine.pending_len(), 1);
        assert_eq!(h.engine.pending_messages()[0].client_message_id, cid);
        let view = h.engine.messages();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id(), format!("temp_{}", cid));
        assert!(h.remote.documents().is_empty());
        assert!(h.store.get_cached(crate::storage::cache_keys::OFFLINE_QUEUE).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_online_send_moves_to_awaiting_echo() {
        let h = harness(true).await;
        h.remote.set_auto_publish(false);

        let cid = h.engine.send_message("hello", None).await.unwrap();
        assert_eq!(h.engine.pending_len(), 0);
        assert_eq!(h.remote.count_for(&cid), 1);

        let view = h.engine.messages();
        assert_eq!(view.len(), 1);
        assert!(view[0].delivered);

        h.engine.on_remote_snapshot(Snapshot::from_server(h.remote.documents()));
        let view = h.engine.messages();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id(), "doc_1");
    }

    #[tokio::test]
    async fn test_failed_send_stays_queued() {
        let h = harness(true).await;
        h.remote.set_reachable(false);

        let cid = h.engine.send_message("hello", None).await.unwrap();
        assert_eq!(h.engine.pending_len(), 1);
        assert_eq!(h.engine.stats().send_failures, 1);

        h.remote.set_reachable(true);
        let report = h.engine.flush_queue().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(h.remote.count_for(&cid), 1);
    }

    #[tokio::test]
    async fn test_empty_cache_snapshot_does_not_wipe_view() {
        let h = harness(true).await;
        h.engine
            .on_remote_snapshot(Snapshot::from_server(vec![server_doc("d1", "c1", "bob", 1)]));
        assert_eq!(h.engine.messages().len(), 1);

        h.engine.on_remote_snapshot(Snapshot::from_cache(Vec::new()));
        assert_eq!(h.engine.messages().len(), 1);
        assert_eq!(h.engine.stats().snapshots_ignored, 1);

        h.engine.on_remote_snapshot(Snapshot::from_server(Vec::new()));
        assert!(h.engine.messages().is_empty());
    }

    #[tokio::test]
    async fn test_identical_snapshot_is_not_republished() {
        let h = harness(true).await;
        let docs = vec![server_doc("d1", "c1", "alice", 1)];

        h.engine.on_remote_snapshot(Snapshot::from_server(docs.clone()));
        h.engine.on_remote_snapshot(Snapshot::from_server(docs));

        let stats = h.engine.stats();
        assert_eq!(stats.snapshots_applied, 2);
        assert_eq!(stats.views_published, 1);
    }

    #[tokio::test]
    async fn test_server_snapshot_prunes_queue() {
        let h = harness(false).await;
        let cid = h.engine.send_message("hello", None).await.unwrap();
        assert_eq!(h.engine.pending_len(), 1);

        h.engine
            .on_remote_snapshot(Snapshot::from_server(vec![server_doc("d9", cid.as_str(), "alice", 5)]));
        assert_eq!(h.engine.pending_len(), 0);
        assert_eq!(h.engine.messages().len(), 1);
        assert_eq!(h.engine.stats().queue_pruned, 1);
    }

    #[tokio::test]
    async fn test_subscription_error_falls_back_to_cache() {
        let h = harness(true).await;
        h.engine
            .on_remote_snapshot(Snapshot::from_server(vec![server_doc("d1", "c1", "bob", 1)]));

        let config = SyncConfig::builder().local_user("alice").build();
        let monitor = Arc::new(ConnectivityMonitor::new(h.listener.clone()));
        let restarted = SyncEngine::new(config, h.store.clone(), h.remote.clone(), monitor);
        restarted.on_subscription_error(ChatSyncError::Subscription("denied".to_string()));

        assert_eq!(restarted.messages().len(), 1);
        assert_eq!(restarted.stats().subscription_errors, 1);
    }

    #[tokio::test]
    async fn test_flush_stops_when_connection_drops() {
        let h = harness(false).await;
        for text in ["a", "b", "c"] {
            h.engine.send_message(text, None).await.unwrap();
        }
        h.remote.set_append_latency(std::time::Duration::from_millis(100));
        h.listener.set_online(true);

        let engine = h.engine.clone();
        let flushing = tokio::spawn(async move { engine.flush_queue().await });
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        h.listener.set_online(false);

        let report = flushing.await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(h.remote.append_attempts(), 1);
        assert_eq!(h.engine.stats().send_failures, 0);
    }

    #[test]
    fn test_snapshot_without_runtime_defers_read_marks() {
        let remote = Arc::new(InMemoryRemote::new());
        let listener = Arc::new(ManualConnectivityListener::new(true));
        let monitor = Arc::new(ConnectivityMonitor::new(listener));
        let config = SyncConfig::builder().local_user("alice").build();
        let engine = SyncEngine::new(config, Arc::new(MemoryStore::new()), remote.clone(), monitor);

        let docs = vec![server_doc("d1", "c1", "bob", 1)];
        engine.on_remote_snapshot(Snapshot::from_server(docs.clone()));
        assert_eq!(engine.messages().len(), 1);
        assert!(!engine.read_tracker().is_attempted("d1"));
        assert_eq!(remote.total_mark_read_calls(), 0);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            engine.on_remote_snapshot(Snapshot::from_server(docs));
            for _ in 0..100 {
                if remote.mark_read_calls("d1") > 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });
        assert_eq!(remote.mark_read_calls("d1"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ignores_late_snapshots() {
        let h = harness(true).await;
        h.engine.start().await.unwrap();
        h.engine.shutdown();

        h.engine
            .on_remote_snapshot(Snapshot::from_server(vec![server_doc("d1", "c1", "bob", 1)]));
        assert!(h.engine.messages().is_empty());
        assert!(matches!(
            h.engine.send_message("late", None).await,
            Err(ChatSyncError::ShuttingDown(_))
        ));
    }
}
