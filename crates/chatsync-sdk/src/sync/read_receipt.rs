//! 已读回执跟踪
//!
//! 对合并视图中他人发送、已确认、未读的消息各发起一次已读标记。
//! id 在调用发出前记入"已尝试"集合；失败时移除，以便下次快照重试。

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

use crate::message::Message;

#[derive(Debug, Default)]
struct Attempted {
    ids: HashSet<String>,
    /// 插入顺序，满时淘汰最早的
    order: VecDeque<String>,
}

/// 已读回执跟踪器
#[derive(Debug)]
pub struct ReadReceiptTracker {
    attempted: Mutex<Attempted>,
    capacity: usize,
}

impl ReadReceiptTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            attempted: Mutex::new(Attempted::default()),
            capacity: capacity.max(1),
        }
    }

    /// 选出需要标记已读的服务端 id，并记为已尝试
    pub fn claim_unread(&self, messages: &[Message], local_user: &str) -> Vec<String> {
        let mut attempted = self.attempted.lock();
        let mut claimed = Vec::new();

        for message in messages {
            if message.read || message.is_from(local_user) {
                continue;
            }
            let Some(server_id) = message.server_id() else {
                continue;
            };
            if attempted.ids.contains(server_id) {
                continue;
            }

            if attempted.ids.len() >= self.capacity {
                if let Some(oldest) = attempted.order.pop_front() {
                    attempted.ids.remove(&oldest);
                    debug!("已读跟踪集合已满，淘汰: {}", oldest);
                }
            }
            attempted.ids.insert(server_id.to_string());
            attempted.order.push_back(server_id.to_string());
            claimed.push(server_id.to_string());
        }

        if !claimed.is_empty() {
            debug!("待标记已读: {} 条", claimed.len());
        }
        claimed
    }

    /// 标记失败后移除，允许重试
    pub fn release(&self, server_id: &str) {
        let mut attempted = self.attempted.lock();
        if attempted.ids.remove(server_id) {
            attempted.order.retain(|id| id != server_id);
        }
    }

    pub fn is_attempted(&self, server_id: &str) -> bool {
        self.attempted.lock().ids.contains(server_id)
    }

    pub fn len(&self) -> usize {
        self.attempted.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut attempted = self.attempted.lock();
        attempted.ids.clear();
        attempted.order.clear();
        info!("已读跟踪集合已清空");
    }
}
