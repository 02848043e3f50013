//! 离线发送演示
//!
//! 展示断网发送、恢复网络后自动补发、以及他人消息的已读回执

use chatsync_sdk::{
    ChatSync, InMemoryRemote, ManualConnectivityListener, SyncConfig, SyncEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 离线消息同步演示\n");
    println!("====================================\n");

    let data_dir = std::env::temp_dir().join("chatsync_offline_demo");
    let config = SyncConfig::builder()
        .data_dir(&data_dir)
        .local_user("alice")
        .build();

    let remote = Arc::new(InMemoryRemote::new());
    let listener = Arc::new(ManualConnectivityListener::new(true));

    println!("📦 正在初始化 SDK...");
    let sdk = ChatSync::initialize(config, remote.clone(), listener.clone()).await?;
    println!("✅ SDK 初始化完成\n");

    let mut events = sdk.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::Banner { kind } => println!("   🔔 {}", kind.text()),
                SyncEvent::TimelineReset { messages } => {
                    println!("   🧾 视图刷新: {} 条消息", messages.len())
                }
                _ => {}
            }
        }
    });

    println!("【在线发送】");
    sdk.send_message("Hi Bob!", None).await?;
    sleep(Duration::from_millis(100)).await;

    println!("\n【断开网络】");
    listener.set_online(false);
    remote.set_reachable(false);
    sleep(Duration::from_millis(100)).await;

    sdk.send_message("Are you there?", None).await?;
    sdk.send_message("I'm on the train", None).await?;
    println!("   待发送: {} 条", sdk.engine().pending_len());

    println!("\n【恢复网络】");
    remote.set_reachable(true);
    listener.set_online(true);
    sleep(Duration::from_millis(300)).await;
    println!("   待发送: {} 条", sdk.engine().pending_len());

    println!("\n【收到对方消息】");
    let id = remote.insert_foreign("bob", "Yes, I'm here");
    sleep(Duration::from_millis(100)).await;
    println!("   已读标记调用次数: {}", remote.mark_read_calls(&id));

    println!("\n【最终视图】");
    for message in sdk.messages().iter() {
        println!(
            "   [{}] {}: {} (read={})",
            message.id(),
            message.user,
            message.text,
            message.read
        );
    }

    println!("\n【登出】");
    sdk.clear_local_data()?;
    println!("   本地消息: {} 条", sdk.messages().len());

    sdk.shutdown().await?;
    println!("\n👋 演示结束");
    Ok(())
}
