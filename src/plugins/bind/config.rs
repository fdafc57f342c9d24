use crate::login::{ApiEndpoints, PollSettings};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BindConfig {
    pub enabled: bool,

    // 登录服务地址
    pub api_base: String,
    pub issue_path: String,
    pub status_path: String,
    pub token_param: String,
    /// 由本地生成令牌，随申请请求一起发送
    pub local_token: bool,
    pub request_timeout_secs: u64,

    // 轮询参数
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub retry_budget: u32,

    pub data_file: String,

    pub bind_commands: Vec<String>,
    pub unbind_commands: Vec<String>,
    pub query_commands: Vec<String>,
    /// 会话进行中时发送即取消 (可不带前缀)
    pub cancel_words: Vec<String>,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "http://127.0.0.1:8080".to_string(),
            issue_path: "/qrcode".to_string(),
            status_path: "/status".to_string(),
            token_param: "token".to_string(),
            local_token: false,
            request_timeout_secs: 10,
            poll_interval_secs: 3,
            timeout_secs: 300,
            retry_budget: 3,
            data_file: "data/bindings.json".to_string(),
            bind_commands: vec!["绑定QQ".into(), "bind".into()],
            unbind_commands: vec!["解绑QQ".into(), "unbind".into()],
            query_commands: vec!["我的绑定".into(), "mybind".into()],
            cancel_words: vec!["取消".into(), "cancel".into()],
        }
    }
}

impl BindConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            retry_budget: self.retry_budget,
        }
    }

    pub fn endpoints(&self) -> ApiEndpoints {
        ApiEndpoints {
            base: self.api_base.clone(),
            issue_path: self.issue_path.clone(),
            status_path: self.status_path.clone(),
            token_param: self.token_param.clone(),
            local_token: self.local_token,
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }
}
