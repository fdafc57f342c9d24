use crate::adapters::reply;
use crate::command::{get_prefixes, match_any};
use crate::config::build_config;
use crate::error::BindError;
use crate::event::Context;
use crate::message::Message;
use crate::plugins::{PluginError, get_config};
use crate::warn;
use futures_util::future::BoxFuture;
use std::time::Duration;
use toml::Value;

pub mod config;

use config::BindConfig;

pub fn default_config() -> Value {
    build_config(BindConfig::default())
}

pub fn handle(ctx: Context) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let config: BindConfig = get_config(&ctx, "bind").unwrap_or_default();

        // 没有进行中的会话时，取消词交给后续插件
        if is_cancel_word(&ctx, &config) && ctx.services.sessions.cancel(ctx.caller_id()).await {
            return Ok(None);
        }

        if match_any(&ctx, &config.bind_commands).is_some() {
            start_binding(&ctx, &config).await?;
            return Ok(None);
        }

        if match_any(&ctx, &config.unbind_commands).is_some() {
            unbind(&ctx).await?;
            return Ok(None);
        }

        if match_any(&ctx, &config.query_commands).is_some() {
            query(&ctx).await?;
            return Ok(None);
        }

        Ok(Some(ctx))
    })
}

fn is_cancel_word(ctx: &Context, config: &BindConfig) -> bool {
    let text = ctx.event.text.trim();
    config.cancel_words.iter().any(|word| {
        text == word
            || get_prefixes(ctx)
                .iter()
                .any(|p| text.strip_prefix(p.as_str()) == Some(word.as_str()))
    })
}

async fn start_binding(ctx: &Context, config: &BindConfig) -> Result<(), PluginError> {
    let sessions = &ctx.services.sessions;
    match sessions.begin(&ctx.event.reply_target()).await {
        Ok((ticket, _task)) => {
            let cancel_hint = config
                .cancel_words
                .first()
                .map(|w| format!("，发送「{}」可取消", w))
                .unwrap_or_default();
            let msg = Message::new()
                .text("请使用手机 QQ 扫描二维码并确认登录：")
                .image(ticket.qr.to_file_ref())
                .text(format!(
                    "二维码 {} 内有效{}。",
                    format_duration(sessions.settings().timeout),
                    cancel_hint
                ));
            reply(ctx, msg)
        }
        Err(e) => {
            let mut text = e.user_message();
            match e {
                BindError::AlreadyBound { .. } => {
                    if let Some(cmd) = command_hint(ctx, &config.unbind_commands) {
                        text.push_str(&format!("\n解绑请发送 {}", cmd));
                    }
                }
                _ => warn!(target: "Plugin/Bind", "{} 无法开始绑定: {}", ctx.caller_id(), e),
            }
            reply(ctx, text)
        }
    }
}

/// 按当前配置拼出第一个可用的指令写法
fn command_hint(ctx: &Context, names: &[String]) -> Option<String> {
    let name = names.first()?;
    let prefix = get_prefixes(ctx).first().map(String::as_str).unwrap_or("");
    Some(format!("{}{}", prefix, name))
}

async fn unbind(ctx: &Context) -> Result<(), PluginError> {
    match ctx.services.store.unbind(ctx.caller_id()).await {
        Ok(record) => reply(ctx, format!("✅ 已解除与 QQ {} 的绑定。", record.qq_number)),
        Err(e) => reply(ctx, e.user_message()),
    }
}

async fn query(ctx: &Context) -> Result<(), PluginError> {
    if let Some(record) = ctx.services.store.lookup(ctx.caller_id()).await {
        let text = format!(
            "你已绑定 QQ {}\n绑定时间: {}\n验证状态: {}",
            record.qq_number,
            record.bind_time.format("%Y-%m-%d %H:%M:%S"),
            if record.verified { "扫码验证" } else { "管理员指定" }
        );
        return reply(ctx, text);
    }

    if ctx.services.sessions.is_pending(ctx.caller_id()).await {
        return reply(ctx, "⏳ 绑定进行中，请扫描二维码完成登录。");
    }
    reply(ctx, BindError::NotBound.user_message())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} 分钟", secs / 60)
    } else {
        format!("{} 秒", secs)
    }
}
