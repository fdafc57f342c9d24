use crate::Services;
use crate::adapters::{Outbound, Outbox};
use crate::config::AppConfig;
use crate::event::{Context, MessageEvent};
use crate::plugins::run;
use crate::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(1);

/// 控制台适配器入口：标准输入逐行作为消息，回复打印到标准输出
///
/// 行首 `@<用户ID> ` 可临时切换发送者，便于模拟多个用户。
pub async fn entry(
    config: Arc<AppConfig>,
    services: Arc<Services>,
    outbox: Outbox,
    inbox: UnboundedReceiver<Outbound>,
) {
    info!(target: "Console", "已启动控制台模式。请输入指令 (例如: /绑定QQ)");
    info!(
        target: "Console",
        "模拟环境: User ID: {} ({}) | 管理员: {}",
        config.console.user_id,
        config.console.nickname,
        config.is_admin(&config.console.user_id)
    );

    let printer = tokio::spawn(print_outbound(inbox));

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();

    while let Ok(Some(line)) = reader.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = build_event(&config, line);
        let ctx = Context::new(event, config.clone(), services.clone(), outbox.clone());
        if let Err(e) = run(ctx).await {
            warn!(target: "Console", "处理消息时出错: {}", e);
        }
    }

    info!(target: "Console", "标准输入已关闭");
    printer.abort();
}

/// 解析一行输入为私聊消息事件
pub fn build_event(config: &AppConfig, line: &str) -> MessageEvent {
    let (caller_id, text) = match line.strip_prefix('@').and_then(|s| s.split_once(' ')) {
        Some((id, rest)) if !id.is_empty() => (id.to_string(), rest.trim()),
        _ => (config.console.user_id.clone(), line),
    };

    MessageEvent {
        message_id: MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed).to_string(),
        is_admin: config.is_admin(&caller_id),
        caller_id,
        group_id: None,
        text: text.to_string(),
    }
}

async fn print_outbound(mut inbox: UnboundedReceiver<Outbound>) {
    while let Some(out) = inbox.recv().await {
        println!(
            "\x1b[36m[Bot → {}] > \x1b[0m{}",
            out.target.caller_id,
            out.message.render()
        );
    }
}
