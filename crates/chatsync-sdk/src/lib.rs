//! ChatSync SDK - 离线优先的聊天消息同步引擎
//!
//! 本 SDK 让本地消息列表与远端只追加的消息集合保持一致：
//! - 📴 离线发送：消息先写入持久化队列，恢复网络后按序补发
//! - 🔁 幂等重试：同一条消息同一时刻至多一次远端写入
//! - 🧩 快照合并：服务端消息与待发送消息合并为唯一有序列表
//! - 👀 已读回执：他人消息各标记一次，失败后在下次快照重试
//! - ⚙️ 事件系统：视图刷新、网络状态与提示横幅统一广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatsync_sdk::{ChatSync, InMemoryRemote, ManualConnectivityListener, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .local_user("alice")
//!         .build();
//!
//!     let remote = Arc::new(InMemoryRemote::new());
//!     let listener = Arc::new(ManualConnectivityListener::new(true));
//!     let sdk = ChatSync::initialize(config, remote, listener).await?;
//!
//!     let id = sdk.send_message("Hello, World!", None).await?;
//!     println!("sent {}", id);
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod network;
pub mod remote;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod version;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{ChatSyncError, Result};
pub use events::{BannerKind, EventManager, SyncEvent};
pub use message::{ClientMessageId, Delivery, ImagePayload, Message};
pub use network::{ConnectivityEvent, ConnectivityListener, ConnectivityMonitor, ManualConnectivityListener};
pub use remote::{InMemoryRemote, NewDocument, RemoteChannel, RemoteDocument, Snapshot, SnapshotSource};
pub use sdk::ChatSync;
pub use storage::{CachedHistory, ChatCache, KvStore, LocalStore, MemoryStore, PendingQueue};
pub use sync::{FlushReport, SyncEngine, SyncStats};
pub use version::SDK_VERSION;
