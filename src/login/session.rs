//! 扫码登录会话
//!
//! 每个 caller 同一时间最多一个进行中的会话。新会话会顶替旧会话：
//! 旧会话的停止通道被丢弃，其轮询任务在下一次等待时自行退出，且不会写入绑定。
//!
//! 状态流转：
//! `Pending → Confirmed | Expired | Cancelled`，终态不可再变。

use super::api::{LoginApi, QrArtifact, UpstreamStatus};
use crate::adapters::{Outbound, Outbox};
use crate::error::{BindError, ExclusiveBindError};
use crate::event::Target;
use crate::log::redact;
use crate::message::Message;
use crate::store::{BindingRecord, BindingStore, is_valid_qq};
use crate::{debug, info, warn};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// 允许连续失败的次数，超出后放弃会话
    pub retry_budget: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
            retry_budget: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }

    /// 终态拒绝任何迁移
    pub fn transition(self, next: SessionStatus) -> Option<SessionStatus> {
        if self.is_terminal() { None } else { Some(next) }
    }
}

/// 单次轮询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Pending,
    Confirmed(String),
    Expired,
    TransportError,
}

/// 轮询循环的最终结局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Bound(BindingRecord),
    Expired,
    Cancelled,
    /// 账号已被他人绑定，本次确认作废
    Conflict { qq_number: String },
    /// 会话期间 caller 已绑定了其他号码，本次确认作废
    AlreadyBound { qq_number: String },
    /// 上游连续失败超过重试预算
    Failed,
    /// 被同一 caller 的新会话顶替
    Superseded,
    /// 调用时没有对应会话
    NoSession,
}

impl SessionOutcome {
    /// 会话结束时所处的状态
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionOutcome::Bound(_) => SessionStatus::Confirmed,
            SessionOutcome::Expired | SessionOutcome::Failed => SessionStatus::Expired,
            SessionOutcome::Cancelled
            | SessionOutcome::Conflict { .. }
            | SessionOutcome::AlreadyBound { .. }
            | SessionOutcome::Superseded
            | SessionOutcome::NoSession => SessionStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTicket {
    pub qr: QrArtifact,
    pub session_token: String,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub caller_id: String,
    pub session_token: String,
    pub issued_at: DateTime<Local>,
    pub status: SessionStatus,
}

struct LiveSession {
    token: String,
    issued_at: DateTime<Local>,
    reply_to: Target,
    /// 发送 true 表示用户取消；Sender 被丢弃表示会话被顶替
    stop: watch::Sender<bool>,
}

enum Notice {
    Bound(String),
    Expired,
    Cancelled,
    Conflict(String),
    AlreadyBound(String),
    Failed,
}

impl Notice {
    fn message(&self) -> Message {
        let text = match self {
            Notice::Bound(qq) => format!("✅ 绑定成功！QQ: {}", qq),
            Notice::Expired => "⌛ 二维码已过期/登录超时，请重新发起绑定。".to_string(),
            Notice::Cancelled => "已取消本次绑定。".to_string(),
            Notice::Conflict(qq) => format!("❌ QQ {} 已被其他账号绑定，本次绑定已作废。", qq),
            Notice::AlreadyBound(qq) => {
                format!("⚠️ 你已绑定 QQ {}，本次扫码未生效。", qq)
            }
            Notice::Failed => "❌ 登录服务暂时不可用，请稍后再试。".to_string(),
        };
        Message::new().text(text)
    }
}

pub struct SessionManager {
    api: Arc<dyn LoginApi>,
    store: Arc<BindingStore>,
    settings: PollSettings,
    outbox: Outbox,
    sessions: Mutex<HashMap<String, LiveSession>>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn LoginApi>,
        store: Arc<BindingStore>,
        settings: PollSettings,
        outbox: Outbox,
    ) -> Self {
        Self {
            api,
            store,
            settings,
            outbox,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// 申请二维码并登记会话。已绑定的 caller 直接拒绝，不会请求上游。
    pub async fn start_session(&self, target: &Target) -> Result<LoginTicket, BindError> {
        let caller_id = &target.caller_id;
        if let Some(record) = self.store.lookup(caller_id).await {
            return Err(BindError::AlreadyBound {
                qq_number: record.qq_number,
            });
        }

        let ticket = self.api.issue_qr().await.map_err(|e| {
            warn!(target: "Login", "申请二维码失败 ({}): {}", caller_id, e);
            BindError::UpstreamUnavailable(e)
        })?;

        let (stop, _) = watch::channel(false);
        let session = LiveSession {
            token: ticket.token.clone(),
            issued_at: Local::now(),
            reply_to: target.clone(),
            stop,
        };

        // 旧会话的 Sender 随之丢弃，其轮询任务会看到通道关闭
        let previous = self.sessions.lock().await.insert(caller_id.clone(), session);
        if let Some(old) = previous {
            info!(target: "Login", "{} 的旧会话 {} 已被顶替", caller_id, redact(&old.token));
        }
        info!(target: "Login", "为 {} 创建登录会话 {}", caller_id, redact(&ticket.token));

        Ok(LoginTicket {
            qr: ticket.qr,
            session_token: ticket.token,
        })
    }

    /// 创建会话并在后台启动轮询任务
    pub async fn begin(
        self: &Arc<Self>,
        target: &Target,
    ) -> Result<(LoginTicket, JoinHandle<SessionOutcome>), BindError> {
        let ticket = self.start_session(target).await?;
        let manager = Arc::clone(self);
        let caller_id = target.caller_id.clone();
        let token = ticket.session_token.clone();
        let handle = tokio::spawn(async move { manager.drive(&caller_id, &token).await });
        Ok((ticket, handle))
    }

    /// 查询一次上游状态，所有错误都折叠为 TransportError
    pub async fn poll_once(&self, token: &str) -> PollResult {
        match self.api.check_status(token).await {
            Ok(UpstreamStatus::Pending) => PollResult::Pending,
            Ok(UpstreamStatus::Expired) => PollResult::Expired,
            Ok(UpstreamStatus::Confirmed(account)) if is_valid_qq(&account) => {
                PollResult::Confirmed(account)
            }
            Ok(UpstreamStatus::Confirmed(account)) => {
                warn!(target: "Login", "上游确认的账号格式无效: {}", account);
                PollResult::TransportError
            }
            Err(e) => {
                debug!(target: "Login", "轮询 {} 失败: {}", redact(token), e);
                PollResult::TransportError
            }
        }
    }

    /// 驱动 caller 当前会话直到终态
    pub async fn run_poll_loop(&self, caller_id: &str) -> SessionOutcome {
        let token = match self.sessions.lock().await.get(caller_id) {
            Some(s) => s.token.clone(),
            None => return SessionOutcome::NoSession,
        };
        self.drive(caller_id, &token).await
    }

    async fn drive(&self, caller_id: &str, token: &str) -> SessionOutcome {
        let (mut stop_rx, reply_to) = {
            let guard = self.sessions.lock().await;
            match guard.get(caller_id) {
                Some(s) if s.token == token => (s.stop.subscribe(), s.reply_to.clone()),
                Some(_) => return SessionOutcome::Superseded,
                None => return SessionOutcome::NoSession,
            }
        };

        let started = Instant::now();
        let mut failures = 0u32;

        loop {
            let stopped = tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => false,
                _ = stop_rx.changed() => true,
            };
            if stopped {
                return stop_outcome(caller_id, *stop_rx.borrow());
            }

            let result = tokio::select! {
                r = self.poll_once(token) => Some(r),
                _ = stop_rx.changed() => None,
            };
            let Some(result) = result else {
                return stop_outcome(caller_id, *stop_rx.borrow());
            };

            match result {
                PollResult::Confirmed(account) => {
                    return self.commit(caller_id, token, &reply_to, &account).await;
                }
                PollResult::Expired => {
                    return self
                        .finish(caller_id, token, &reply_to, Notice::Expired, SessionOutcome::Expired)
                        .await;
                }
                PollResult::Pending => failures = 0,
                PollResult::TransportError => {
                    failures += 1;
                    if failures > self.settings.retry_budget {
                        warn!(target: "Login", "{} 的会话连续失败 {} 次，放弃", caller_id, failures);
                        return self
                            .finish(caller_id, token, &reply_to, Notice::Failed, SessionOutcome::Failed)
                            .await;
                    }
                }
            }

            if started.elapsed() >= self.settings.timeout {
                info!(target: "Login", "{} 的会话超时", caller_id);
                return self
                    .finish(caller_id, token, &reply_to, Notice::Expired, SessionOutcome::Expired)
                    .await;
            }
        }
    }

    /// 只移除 token 仍匹配的会话
    async fn take_session(&self, caller_id: &str, token: &str) -> Option<LiveSession> {
        let mut guard = self.sessions.lock().await;
        if guard.get(caller_id).is_some_and(|s| s.token == token) {
            guard.remove(caller_id)
        } else {
            None
        }
    }

    async fn finish(
        &self,
        caller_id: &str,
        token: &str,
        reply_to: &Target,
        notice: Notice,
        outcome: SessionOutcome,
    ) -> SessionOutcome {
        if self.take_session(caller_id, token).await.is_none() {
            return SessionOutcome::Superseded;
        }
        self.notify(reply_to, notice);
        outcome
    }

    async fn commit(
        &self,
        caller_id: &str,
        token: &str,
        reply_to: &Target,
        account: &str,
    ) -> SessionOutcome {
        // 确认会话仍是当前会话后才写入
        if self.take_session(caller_id, token).await.is_none() {
            return SessionOutcome::Superseded;
        }

        match self.store.bind_exclusive(caller_id, account, true).await {
            Ok(record) => {
                info!(target: "Login", "{} 绑定 QQ {} 成功", caller_id, account);
                self.notify(reply_to, Notice::Bound(record.qq_number.clone()));
                SessionOutcome::Bound(record)
            }
            Err(ExclusiveBindError::AccountTaken { qq_number, owner }) => {
                warn!(target: "Login", "{} 扫码的 QQ {} 已属于 {}", caller_id, qq_number, owner);
                self.notify(reply_to, Notice::Conflict(qq_number.clone()));
                SessionOutcome::Conflict { qq_number }
            }
            Err(ExclusiveBindError::CallerBound { qq_number, .. }) => {
                warn!(target: "Login", "{} 会话期间已绑定 QQ {}，忽略扫码结果 {}", caller_id, qq_number, account);
                self.notify(reply_to, Notice::AlreadyBound(qq_number.clone()));
                SessionOutcome::AlreadyBound { qq_number }
            }
        }
    }

    /// 取消 caller 的进行中会话，返回是否存在会话
    pub async fn cancel(&self, caller_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(caller_id);
        match removed {
            Some(session) => {
                // 没有轮询任务订阅时发送会失败，会话已移除即可
                let _ = session.stop.send(true);
                info!(target: "Login", "{} 取消了会话 {}", caller_id, redact(&session.token));
                self.notify(&session.reply_to, Notice::Cancelled);
                true
            }
            None => false,
        }
    }

    /// 停止全部会话，不发送通知
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<LiveSession> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in &drained {
            let _ = session.stop.send(true);
        }
        if !drained.is_empty() {
            info!(target: "Login", "已停止 {} 个进行中的会话", drained.len());
        }
        drained.len()
    }

    pub async fn is_pending(&self, caller_id: &str) -> bool {
        self.sessions.lock().await.contains_key(caller_id)
    }

    pub async fn session_info(&self, caller_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().await.get(caller_id).map(|s| SessionInfo {
            caller_id: caller_id.to_string(),
            session_token: s.token.clone(),
            issued_at: s.issued_at,
            status: SessionStatus::Pending,
        })
    }

    fn notify(&self, target: &Target, notice: Notice) {
        let outbound = Outbound {
            target: target.clone(),
            message: notice.message(),
        };
        if self.outbox.send(outbound).is_err() {
            debug!(target: "Login", "消息通道已关闭，丢弃通知");
        }
    }
}

fn stop_outcome(caller_id: &str, cancelled: bool) -> SessionOutcome {
    if cancelled {
        debug!(target: "Login", "{} 的轮询因取消而结束", caller_id);
        SessionOutcome::Cancelled
    } else {
        debug!(target: "Login", "{} 的轮询因会话被顶替而结束", caller_id);
        SessionOutcome::Superseded
    }
}
