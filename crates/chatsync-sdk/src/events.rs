//! 事件系统模块 - 向 UI 层广播同步状态
//!
//! 功能包括：
//! - 合并视图整体刷新（TimelineReset）
//! - 连接状态变化与提示横幅
//! - 消息入队 / 确认
//! - 订阅失败降级通知

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::message::{ClientMessageId, Message};

/// 短暂提示横幅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BannerKind {
    /// 网络已断开
    Offline,
    /// 网络已恢复
    BackOnline,
    /// 离线发送，恢复网络后自动补发
    QueuedOffline,
    /// 网络较慢，消息已存入队列
    QueuedAfterFailure,
    /// 正在补发离线消息
    FlushingPending,
    /// 离线消息已全部发送
    AllPendingSent,
}

impl BannerKind {
    pub fn text(&self) -> &'static str {
        match self {
            BannerKind::Offline => "You are offline",
            BannerKind::BackOnline => "Back online",
            BannerKind::QueuedOffline => "Message will be sent when back online",
            BannerKind::QueuedAfterFailure => "Slow network, message saved to queue",
            BannerKind::FlushingPending => "Sending pending messages...",
            BannerKind::AllPendingSent => "All pending messages sent",
        }
    }
}

/// SDK 事件类型
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// 合并视图整体替换
    TimelineReset { messages: Arc<Vec<Message>> },
    ConnectivityChanged { online: bool },
    Banner { kind: BannerKind },
    MessageQueued { client_message_id: ClientMessageId },
    MessageConfirmed {
        client_message_id: ClientMessageId,
        /// 远端写入成功时服务端文档 id 可能尚未回显
        server_id: Option<String>,
    },
    /// 远端订阅出错，视图退回本地缓存
    SubscriptionFailed { error: String },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::TimelineReset { .. } => "timeline_reset",
            SyncEvent::ConnectivityChanged { .. } => "connectivity_changed",
            SyncEvent::Banner { .. } => "banner",
            SyncEvent::MessageQueued { .. } => "message_queued",
            SyncEvent::MessageConfirmed { .. } => "message_confirmed",
            SyncEvent::SubscriptionFailed { .. } => "subscription_failed",
        }
    }
}

/// 事件管理器
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    stats: RwLock<EventStats>,
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    /// 毫秒时间戳
    pub last_event_time: Option<i64>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(chrono::Utc::now().timestamp_millis());
        }

        // 无订阅者时 send 失败属正常场景（无 UI 客户端）
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    pub fn banner(&self, kind: BannerKind) {
        info!("🔔 {}", kind.text());
        self.emit(SyncEvent::Banner { kind });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
