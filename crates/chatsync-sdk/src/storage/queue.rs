//! 待发送队列
//!
//! FIFO 顺序保存尚未被服务端确认的消息。条目只有在确认发送后才移除；
//! 发送失败的条目原样保留。`in_flight` 记录正在发送的条目，
//! 保证同一条消息同一时刻至多一个远端写入。

use std::collections::{HashSet, VecDeque};
use tracing::debug;

use crate::error::{ChatSyncError, Result};
use crate::message::{ClientMessageId, Message};

#[derive(Debug)]
pub struct PendingQueue {
    entries: VecDeque<Message>,
    in_flight: HashSet<ClientMessageId>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            in_flight: HashSet::new(),
            capacity,
        }
    }

    /// 从持久化内容恢复；重复的 clientMessageId 只保留第一条
    pub fn restore(messages: Vec<Message>, capacity: usize) -> Self {
        let mut queue = Self::new(capacity);
        for message in messages {
            if !queue.contains(&message.client_message_id) {
                queue.entries.push_back(message);
            }
        }
        queue
    }

    pub fn enqueue(&mut self, message: Message) -> Result<()> {
        if self.contains(&message.client_message_id) {
            return Err(ChatSyncError::InvalidInput(format!(
                "message {} already queued",
                message.client_message_id
            )));
        }
        if self.entries.len() >= self.capacity {
            return Err(ChatSyncError::QueueFull(format!(
                "{} pending messages",
                self.entries.len()
            )));
        }
        debug!("消息入队: {}, 队列长度: {}", message.client_message_id, self.entries.len() + 1);
        self.entries.push_back(message);
        Ok(())
    }

    pub fn contains(&self, id: &ClientMessageId) -> bool {
        self.entries.iter().any(|m| &m.client_message_id == id)
    }

    pub fn get(&self, id: &ClientMessageId) -> Option<&Message> {
        self.entries.iter().find(|m| &m.client_message_id == id)
    }

    pub fn remove(&mut self, id: &ClientMessageId) -> Option<Message> {
        self.in_flight.remove(id);
        let index = self.entries.iter().position(|m| &m.client_message_id == id)?;
        self.entries.remove(index)
    }

    /// 标记为发送中；条目不存在或已在发送中时返回 false
    pub fn claim(&mut self, id: &ClientMessageId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.in_flight.insert(id.clone())
    }

    pub fn release(&mut self, id: &ClientMessageId) {
        self.in_flight.remove(id);
    }

    pub fn is_in_flight(&self, id: &ClientMessageId) -> bool {
        self.in_flight.contains(id)
    }

    /// 可发送的条目（FIFO，排除发送中）
    pub fn ready_ids(&self) -> Vec<ClientMessageId> {
        self.entries
            .iter()
            .filter(|m| !self.in_flight.contains(&m.client_message_id))
            .map(|m| m.client_message_id.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// 移除服务端已持有的条目（发送中的条目由发送方自行移除）
    ///
    /// 返回被移除的条目数。
    pub fn retain_unconfirmed(&mut self, server_ids: &HashSet<ClientMessageId>) -> usize {
        let before = self.entries.len();
        let in_flight = &self.in_flight;
        self.entries.retain(|m| {
            in_flight.contains(&m.client_message_id) || !server_ids.contains(&m.client_message_id)
        });
        before - self.entries.len()
    }
}
