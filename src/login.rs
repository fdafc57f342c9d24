//! 扫码登录：上游接口客户端 + 会话轮询状态机

pub mod api;
pub mod session;

pub use api::{ApiEndpoints, HttpLoginApi, LoginApi, QrArtifact, QrTicket, UpstreamStatus};
pub use session::{
    LoginTicket, PollResult, PollSettings, SessionInfo, SessionManager, SessionOutcome,
    SessionStatus,
};
