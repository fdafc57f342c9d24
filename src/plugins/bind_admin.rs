//! 管理员指令：直接读写绑定存储
//!
//! 强制绑定不走扫码流程，也不检查 QQ 号唯一性，记录标记为未验证。

use crate::adapters::reply;
use crate::command::match_command;
use crate::config::build_config;
use crate::error::BindError;
use crate::event::Context;
use crate::plugins::{PluginError, get_config};
use crate::store::{BindingRecord, BindingStore, is_valid_qq};
use crate::{info, warn};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use toml::Value;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub list_command: String,
    pub lookup_command: String,
    pub force_bind_command: String,
    pub force_unbind_command: String,
    /// 列表最多显示的条数
    pub list_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            list_command: "绑定列表".to_string(),
            lookup_command: "查绑定".to_string(),
            force_bind_command: "强制绑定".to_string(),
            force_unbind_command: "强制解绑".to_string(),
            list_limit: 50,
        }
    }
}

pub fn default_config() -> Value {
    build_config(Config::default())
}

enum Action {
    List,
    Lookup(Vec<String>),
    ForceBind(Vec<String>),
    ForceUnbind(Vec<String>),
}

pub fn handle(ctx: Context) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let config: Config = get_config(&ctx, "bind_admin").unwrap_or_default();

        let action = if match_command(&ctx, &config.list_command).is_some() {
            Action::List
        } else if let Some(m) = match_command(&ctx, &config.lookup_command) {
            Action::Lookup(m.args)
        } else if let Some(m) = match_command(&ctx, &config.force_bind_command) {
            Action::ForceBind(m.args)
        } else if let Some(m) = match_command(&ctx, &config.force_unbind_command) {
            Action::ForceUnbind(m.args)
        } else {
            return Ok(Some(ctx));
        };

        if let Err(e) = authorize(ctx.event.is_admin) {
            warn!(target: "Plugin/BindAdmin", "{} 尝试执行管理指令被拒绝", ctx.caller_id());
            reply(&ctx, e.user_message())?;
            return Ok(None);
        }

        let store = &ctx.services.store;
        let text = match action {
            Action::List => list_bindings(store, config.list_limit).await,
            Action::Lookup(args) => match args.first() {
                Some(qq) => lookup_account(store, qq).await,
                None => format!("用法: {} <QQ号>", config.lookup_command),
            },
            Action::ForceBind(args) => match (args.first(), args.get(1)) {
                (Some(caller_id), Some(qq)) => match force_bind(store, caller_id, qq).await {
                    Ok(record) => {
                        info!(
                            target: "Plugin/BindAdmin",
                            "{} 将 {} 强制绑定到 QQ {}",
                            ctx.caller_id(),
                            record.caller_id,
                            record.qq_number
                        );
                        format!("✅ 已将 {} 绑定到 QQ {}", record.caller_id, record.qq_number)
                    }
                    Err(e) => e.user_message(),
                },
                _ => format!("用法: {} <用户ID> <QQ号>", config.force_bind_command),
            },
            Action::ForceUnbind(args) => match args.first() {
                Some(qq) => match force_unbind(store, qq).await {
                    Ok(record) => {
                        info!(
                            target: "Plugin/BindAdmin",
                            "{} 强制解除了 {} 与 QQ {} 的绑定",
                            ctx.caller_id(),
                            record.caller_id,
                            record.qq_number
                        );
                        format!("✅ 已解除 {} 与 QQ {} 的绑定", record.caller_id, record.qq_number)
                    }
                    Err(BindError::NotBound) => format!("QQ {} 未被任何账号绑定。", qq),
                    Err(e) => e.user_message(),
                },
                None => format!("用法: {} <QQ号>", config.force_unbind_command),
            },
        };

        reply(&ctx, text)?;
        Ok(None)
    })
}

pub fn authorize(is_admin: bool) -> Result<(), BindError> {
    if is_admin { Ok(()) } else { Err(BindError::Unauthorized) }
}

pub async fn list_bindings(store: &BindingStore, limit: usize) -> String {
    let records = store.list().await;
    if records.is_empty() {
        return "暂无绑定记录。".to_string();
    }

    let mut lines = vec![format!("📋 绑定列表 (共 {} 条)", records.len())];
    for r in records.iter().take(limit) {
        lines.push(format!(
            "{} → {} [{}{}]",
            r.caller_id,
            r.qq_number,
            r.bind_time.format("%Y-%m-%d %H:%M"),
            if r.verified { "" } else { ", 未验证" }
        ));
    }
    if records.len() > limit {
        lines.push(format!("…… 其余 {} 条未显示", records.len() - limit));
    }
    lines.join("\n")
}

pub async fn lookup_account(store: &BindingStore, qq_number: &str) -> String {
    match store.lookup_by_account(qq_number).await {
        Some(r) => format!(
            "QQ {} 绑定于 {}\n绑定时间: {}",
            r.qq_number,
            r.caller_id,
            r.bind_time.format("%Y-%m-%d %H:%M:%S")
        ),
        None => format!("QQ {} 未被任何账号绑定。", qq_number),
    }
}

pub async fn force_bind(
    store: &BindingStore,
    caller_id: &str,
    qq_number: &str,
) -> Result<BindingRecord, BindError> {
    if !is_valid_qq(qq_number) {
        return Err(BindError::InvalidAccount(qq_number.to_string()));
    }
    Ok(store.bind(caller_id, qq_number, false).await)
}

pub async fn force_unbind(store: &BindingStore, qq_number: &str) -> Result<BindingRecord, BindError> {
    store.unbind_by_account(qq_number).await
}
