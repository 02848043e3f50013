//! 消息同步模块
//!
//! 职责：
//! - 合并服务端快照与本地待发送队列（merge）
//! - 离线队列补发与发送降级（engine）
//! - 已读回执（read_receipt）

pub mod engine;
pub mod merge;
pub mod read_receipt;

pub use engine::SyncEngine;
pub use read_receipt::ReadReceiptTracker;

/// 一次补发的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// 实际发起写入的条目数
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// 补发结束后队列剩余长度
    pub remaining: usize,
}

impl FlushReport {
    pub fn is_noop(&self) -> bool {
        self.attempted == 0
    }
}

/// 同步统计信息
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub snapshots_applied: u64,
    pub snapshots_ignored: u64,
    pub views_published: u64,
    pub messages_queued: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub flushes_run: u64,
    /// 因已有补发在进行而直接返回的次数
    pub flushes_collapsed: u64,
    /// 因服务端已存在而从队列中清除的条目数
    pub queue_pruned: u64,
    pub read_marks_sent: u64,
    pub read_mark_failures: u64,
    pub subscription_errors: u64,
}
