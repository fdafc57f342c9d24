use crate::event::{Context, Target};
use crate::message::Message;
use crate::plugins::PluginError;
use tokio::sync::mpsc;

pub mod console;

/// 待发送给宿主的一条消息
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub message: Message,
}

/// 插件与会话任务共用的发送端，由适配器消费
pub type Outbox = mpsc::UnboundedSender<Outbound>;

pub fn outbox() -> (Outbox, mpsc::UnboundedReceiver<Outbound>) {
    mpsc::unbounded_channel()
}

/// 发送消息到指定目标
pub fn send_msg(
    ctx: &Context,
    target: Target,
    message: impl Into<Message>,
) -> Result<(), PluginError> {
    ctx.outbox
        .send(Outbound {
            target,
            message: message.into(),
        })
        .map_err(|_| "消息通道已关闭")?;
    Ok(())
}

/// 回复当前事件（引用原消息）
pub fn reply(ctx: &Context, message: impl Into<Message>) -> Result<(), PluginError> {
    let mut base = Message::new();
    if !ctx.event.message_id.is_empty() {
        base = base.reply(&ctx.event.message_id);
    }
    let message = base.extend(message.into());
    send_msg(ctx, ctx.event.reply_target(), message)
}
