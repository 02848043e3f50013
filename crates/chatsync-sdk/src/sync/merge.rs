//! 合并：服务端快照 + 本地待发送 → 单一有序视图
//!
//! 纯函数，不做 I/O；调用方持有引擎状态锁时调用。

use std::collections::HashSet;
use tracing::warn;

use crate::message::{ClientMessageId, Delivery, Message};
use crate::remote::RemoteDocument;

/// 将快照文档转换为已确认消息
///
/// - 相同 clientMessageId 的文档只保留第一条
/// - 缺失 clientMessageId 的文档以文档 id 作为身份
/// - `read_seen` 记录见过的已读 id，旧快照不能把已读改回未读
pub fn confirmed_from_documents(
    documents: &[RemoteDocument],
    read_seen: &mut HashSet<String>,
) -> Vec<Message> {
    let mut seen_ids: HashSet<ClientMessageId> = HashSet::with_capacity(documents.len());
    let mut messages = Vec::with_capacity(documents.len());

    for doc in documents {
        let client_message_id = match &doc.client_message_id {
            Some(cid) => cid.clone(),
            None => match ClientMessageId::new(doc.id.clone()) {
                Ok(cid) => cid,
                Err(e) => {
                    warn!("跳过无法识别的远端文档 {:?}: {}", doc.id, e);
                    continue;
                }
            },
        };
        if !seen_ids.insert(client_message_id.clone()) {
            warn!("远端存在重复的 clientMessageId: {}", client_message_id);
            continue;
        }

        let read = doc.read || read_seen.contains(&doc.id);
        if read {
            read_seen.insert(doc.id.clone());
        }

        messages.push(Message {
            client_message_id,
            text: doc.text.clone(),
            image: doc.image.clone(),
            user: doc.user.clone(),
            delivered: true,
            read,
            delivery: Delivery::Confirmed {
                server_id: doc.id.clone(),
                server_timestamp: doc.created_at,
            },
        });
    }

    messages
}

/// 构建合并视图
///
/// 服务端消息优先；已写入但未回显的消息与队列中的消息仅在其 id 不在
/// 服务端集合中时出现。按 `createdAt` 稳定排序，相同时间按加入顺序。
pub fn merge_view<'a>(
    server: &'a [Message],
    awaiting_echo: &'a [Message],
    pending: impl IntoIterator<Item = &'a Message>,
) -> Vec<Message> {
    let mut present: HashSet<&ClientMessageId> =
        server.iter().map(|m| &m.client_message_id).collect();
    let mut view: Vec<Message> = server.to_vec();

    for message in awaiting_echo.iter().chain(pending) {
        if present.insert(&message.client_message_id) {
            view.push(message.clone());
        }
    }

    view.sort_by_key(Message::sort_key);
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, cid: Option<&str>, at: Option<i64>, read: bool) -> RemoteDocument {
        RemoteDocument {
            id: id.to_string(),
            text: id.to_string(),
            image: None,
            user: "bob".to_string(),
            created_at: at,
            client_message_id: cid.map(|c| ClientMessageId::new(c).unwrap()),
            delivered: true,
            read,
        }
    }

    fn pending(cid: &str, at: i64) -> Message {
        Message::new_pending(ClientMessageId::new(cid).unwrap(), cid, None, "alice", "temp_", at)
    }

    #[test]
    fn test_duplicate_client_ids_collapse_to_first() {
        let docs = vec![doc("d1", Some("c1"), Some(1), false), doc("d2", Some("c1"), Some(2), false)];
        let mut read_seen = HashSet::new();

        let messages = confirmed_from_documents(&docs, &mut read_seen);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id(), "d1");
    }

    #[test]
    fn test_missing_client_id_falls_back_to_doc_id() {
        let mut read_seen = HashSet::new();
        let messages = confirmed_from_documents(&[doc("legacy", None, Some(1), false)], &mut read_seen);
        assert_eq!(messages[0].client_message_id.as_str(), "legacy");
    }

    #[test]
    fn test_read_never_reverts() {
        let mut read_seen = HashSet::new();
        confirmed_from_documents(&[doc("d1", Some("c1"), Some(1), true)], &mut read_seen);

        let stale = confirmed_from_documents(&[doc("d1", Some("c1"), Some(1), false)], &mut read_seen);
        assert!(stale[0].read);
    }

    #[test]
    fn test_pending_hidden_once_confirmed() {
        let mut read_seen = HashSet::new();
        let server = confirmed_from_documents(&[doc("d1", Some("p1"), Some(5), false)], &mut read_seen);
        let queue = vec![pending("p1", 3), pending("p2", 4)];

        let view = merge_view(&server, &[], &queue);
        let ids: Vec<_> = view.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["temp_p2", "d1"]);
    }

    #[test]
    fn test_order_by_created_at_with_stable_ties() {
        let mut read_seen = HashSet::new();
        let server = confirmed_from_documents(
            &[
                doc("d1", Some("c1"), Some(10), false),
                doc("d2", Some("c2"), None, false),
                doc("d3", Some("c3"), Some(10), false),
            ],
            &mut read_seen,
        );
        let awaiting = vec![pending("a1", 10)];
        let queue = vec![pending("q1", 1)];

        let view = merge_view(&server, &awaiting, &queue);
        let ids: Vec<_> = view.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["temp_q1", "d1", "d3", "temp_a1", "d2"]);
    }
}
