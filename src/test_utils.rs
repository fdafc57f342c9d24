//! 测试辅助：按脚本回答的登录接口

use crate::Services;
use crate::adapters::{Outbound, Outbox, outbox};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::event::{Context, MessageEvent};
use crate::image_cache::ImageCache;
use crate::login::api::{LoginApi, QrArtifact, QrTicket, UpstreamStatus};
use crate::login::session::{PollSettings, SessionManager};
use crate::plugins::{get_plugins, run};
use crate::store::BindingStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

type Step = Result<UpstreamStatus, ApiError>;

/// 依次发放预设令牌；每个令牌的状态查询按脚本逐条返回，脚本耗尽后一直 Pending
pub struct ScriptedApi {
    tokens: Mutex<VecDeque<String>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fail_issue: bool,
    issue_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::with_tokens(&[])
    }

    pub fn with_tokens(tokens: &[&str]) -> Self {
        Self {
            tokens: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            scripts: Mutex::new(HashMap::new()),
            fail_issue: false,
            issue_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    /// 申请二维码总是返回 503
    pub fn failing() -> Self {
        Self {
            fail_issue: true,
            ..Self::new()
        }
    }

    pub fn script(&self, token: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(token.to_string(), steps.into());
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginApi for ScriptedApi {
    async fn issue_qr(&self) -> Result<QrTicket, ApiError> {
        let n = self.issue_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_issue {
            return Err(ApiError::Status(503));
        }
        let token = self
            .tokens
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("AUTO{}", n));
        Ok(QrTicket {
            qr: QrArtifact::Url(format!("https://qr.test/{}.png", token)),
            token,
        })
    }

    async fn check_status(&self, token: &str) -> Result<UpstreamStatus, ApiError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.scripts
            .lock()
            .unwrap()
            .get_mut(token)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Ok(UpstreamStatus::Pending))
    }
}

/// 临时目录中的存储 + 会话管理器 + 通知接收端
pub async fn manager_with(
    api: Arc<ScriptedApi>,
    settings: PollSettings,
) -> (
    Arc<SessionManager>,
    Arc<BindingStore>,
    UnboundedReceiver<Outbound>,
    TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BindingStore::open(dir.path().join("bindings.json")).await);
    let (tx, rx) = outbox();
    let manager = Arc::new(SessionManager::new(api, store.clone(), settings, tx));
    (manager, store, rx, dir)
}

/// 完整插件流水线的测试环境：默认配置 + 临时目录 + 脚本化上游
pub struct Harness {
    pub config: Arc<AppConfig>,
    pub services: Arc<Services>,
    pub api: Arc<ScriptedApi>,
    pub outbox: Outbox,
    pub inbox: UnboundedReceiver<Outbound>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(api: ScriptedApi) -> Self {
        let mut config = AppConfig {
            admins: vec!["admin".to_string()],
            ..AppConfig::default()
        };
        for plugin in get_plugins() {
            config
                .plugins
                .insert(plugin.name.to_string(), (plugin.default_config)());
        }

        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(api);
        let store = Arc::new(BindingStore::open(dir.path().join("bindings.json")).await);
        let (outbox, inbox) = outbox();
        let sessions = Arc::new(SessionManager::new(
            api.clone(),
            store.clone(),
            PollSettings::default(),
            outbox.clone(),
        ));
        let images = Arc::new(ImageCache::new(dir.path().join("images")));

        Self {
            config: Arc::new(config),
            services: Arc::new(Services::new(store, sessions, images)),
            api,
            outbox,
            inbox,
            dir,
        }
    }

    pub fn ctx(&self, caller_id: &str, text: &str) -> Context {
        let mut event = MessageEvent::new(caller_id, text);
        event.message_id = "1".to_string();
        event.is_admin = self.config.is_admin(caller_id);
        Context::new(
            event,
            self.config.clone(),
            self.services.clone(),
            self.outbox.clone(),
        )
    }

    /// 以 caller 身份发送一条消息并跑完插件流水线
    pub async fn send(&self, caller_id: &str, text: &str) {
        run(self.ctx(caller_id, text)).await.unwrap();
    }

    /// 取出目前为止的全部回复
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            out.push(msg);
        }
        out
    }

    /// 取出回复并拼接其文本
    pub fn drain_text(&mut self) -> String {
        self.drain()
            .iter()
            .map(|o| o.message.plain_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
