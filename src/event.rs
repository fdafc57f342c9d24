use crate::Services;
use crate::config::AppConfig;
use std::sync::Arc;

use crate::adapters::Outbox;

/// 宿主适配器投递进来的消息事件
///
/// 身份只有一个强类型字段 `caller_id`，由适配器在边界处确定；
/// `is_admin` 同样由宿主给出，插件只负责读取。
#[derive(Debug, Clone, Default)]
pub struct MessageEvent {
    pub message_id: String,
    pub caller_id: String,
    /// 群聊消息时为群号，私聊为 None
    pub group_id: Option<String>,
    pub text: String,
    pub is_admin: bool,
}

impl MessageEvent {
    pub fn new(caller_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// 回复的目标位置（群消息回到群里，私聊回到私聊）
    pub fn reply_target(&self) -> Target {
        Target {
            caller_id: self.caller_id.clone(),
            group_id: self.group_id.clone(),
        }
    }
}

/// 消息发送目标
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    pub caller_id: String,
    pub group_id: Option<String>,
}

impl Target {
    pub fn private(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            group_id: None,
        }
    }
}

/// 统一的上下文，包含事件数据、配置和共享服务
#[derive(Clone)]
pub struct Context {
    pub event: MessageEvent,
    pub config: Arc<AppConfig>,
    pub services: Arc<Services>,
    pub outbox: Outbox,
}

impl Context {
    pub fn new(
        event: MessageEvent,
        config: Arc<AppConfig>,
        services: Arc<Services>,
        outbox: Outbox,
    ) -> Self {
        Self {
            event,
            config,
            services,
            outbox,
        }
    }

    pub fn caller_id(&self) -> &str {
        &self.event.caller_id
    }
}
