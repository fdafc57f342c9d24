//! 二维码登录上游接口
//!
//! 上游协议并不稳定：不同版本的字段名、外层包装、状态码写法都不一样。
//! 这里尽量宽松地解析，实在认不出来的响应一律视为 `ApiError::Malformed`，
//! 由调用方当作一次失败的轮询处理。

use crate::error::ApiError;
use crate::log::redact;
use crate::debug;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

const TOKEN_KEYS: &[&str] = &["token", "qrsig", "session_token", "session", "key", "ticket"];
const QR_KEYS: &[&str] = &["qrcode", "qr_code", "qr", "image", "img", "qr_url", "url"];
const STATUS_KEYS: &[&str] = &["status", "state"];
const CODE_KEYS: &[&str] = &["retcode", "ret", "code"];
const ACCOUNT_KEYS: &[&str] = &["uin", "qq", "qq_number", "account", "account_id"];

/// 用户需要扫描的二维码
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrArtifact {
    /// 远程图片地址
    Url(String),
    /// 内联图片 (不含 data: 前缀的 base64)
    Base64(String),
}

impl QrArtifact {
    /// 从上游给出的原始字段解析，支持 URL / data URL / base64:// / 裸 base64
    pub fn from_payload(raw: &str) -> Result<Self, ApiError> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(QrArtifact::Url(raw.to_string()));
        }

        let payload = if let Some(rest) = raw.strip_prefix("base64://") {
            rest
        } else if raw.starts_with("data:image") {
            raw.split_once(',')
                .map(|(_, b)| b)
                .ok_or_else(|| ApiError::malformed("data URL 格式错误"))?
        } else {
            raw
        };

        // MIME 风格的 base64 会按固定宽度换行
        let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        match general_purpose::STANDARD.decode(&payload) {
            Ok(bytes) if !bytes.is_empty() => Ok(QrArtifact::Base64(payload)),
            _ => Err(ApiError::malformed("二维码字段既不是 URL 也不是有效的 base64")),
        }
    }

    /// 消息图片段可直接使用的 file 字段
    pub fn to_file_ref(&self) -> String {
        match self {
            QrArtifact::Url(u) => u.clone(),
            QrArtifact::Base64(b) => format!("base64://{}", b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrTicket {
    pub qr: QrArtifact,
    pub token: String,
}

/// 上游对一次状态查询的回答
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamStatus {
    Pending,
    Confirmed(String),
    Expired,
}

#[async_trait]
pub trait LoginApi: Send + Sync {
    /// 申请二维码及关联令牌
    async fn issue_qr(&self) -> Result<QrTicket, ApiError>;

    /// 查询令牌对应的登录状态
    async fn check_status(&self, token: &str) -> Result<UpstreamStatus, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub base: String,
    pub issue_path: String,
    pub status_path: String,
    /// 状态查询时携带令牌的参数名
    pub token_param: String,
    /// 本地生成令牌并随申请请求发送
    pub local_token: bool,
    pub request_timeout: Duration,
}

pub struct HttpLoginApi {
    client: reqwest::Client,
    issue_url: Url,
    status_url: Url,
    token_param: String,
    local_token: bool,
}

impl HttpLoginApi {
    pub fn new(endpoints: &ApiEndpoints) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(endpoints.request_timeout)
            .build()?;
        Ok(Self {
            client,
            issue_url: join_url(&endpoints.base, &endpoints.issue_path)?,
            status_url: join_url(&endpoints.base, &endpoints.status_path)?,
            token_param: endpoints.token_param.clone(),
            local_token: endpoints.local_token,
        })
    }

    async fn get_body(&self, url: Url) -> Result<String, ApiError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl LoginApi for HttpLoginApi {
    async fn issue_qr(&self) -> Result<QrTicket, ApiError> {
        let mut url = self.issue_url.clone();
        let local = if self.local_token {
            let token = generate_token();
            url.query_pairs_mut().append_pair(&self.token_param, &token);
            Some(token)
        } else {
            None
        };

        let body = self.get_body(url).await?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|e| ApiError::malformed(format!("申请二维码返回非 JSON: {}", e)))?;
        let ticket = parse_issue_response(&json, local)?;
        debug!(target: "LoginApi", "已申请二维码 token={}", redact(&ticket.token));
        Ok(ticket)
    }

    async fn check_status(&self, token: &str) -> Result<UpstreamStatus, ApiError> {
        let mut url = self.status_url.clone();
        url.query_pairs_mut().append_pair(&self.token_param, token);

        let body = self.get_body(url).await?;
        parse_status_body(&body)
    }
}

fn join_url(base: &str, path: &str) -> Result<Url, ApiError> {
    let base = base.trim_end_matches('/');
    let full = if path.is_empty() || path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };
    Url::parse(&full).map_err(|e| ApiError::malformed(format!("无效的接口地址 {}: {}", full, e)))
}

pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// data 包装层优先，其次外层
fn layers(body: &Value) -> Vec<&Value> {
    match body.get("data") {
        Some(inner) if inner.is_object() => vec![inner, body],
        _ => vec![body],
    }
}

fn pick<'a>(layers: &[&'a Value], keys: &[&str]) -> Option<&'a Value> {
    layers.iter().copied().find_map(|layer| {
        keys.iter()
            .find_map(|k| layer.get(*k).filter(|v| !v.is_null()))
    })
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_issue_response(body: &Value, local_token: Option<String>) -> Result<QrTicket, ApiError> {
    let layers = layers(body);

    let token = pick(&layers, TOKEN_KEYS)
        .and_then(as_text)
        .or(local_token)
        .ok_or_else(|| ApiError::malformed("申请二维码响应缺少令牌"))?;

    let raw_qr = pick(&layers, QR_KEYS)
        .and_then(as_text)
        .ok_or_else(|| ApiError::malformed("申请二维码响应缺少二维码"))?;

    Ok(QrTicket {
        qr: QrArtifact::from_payload(&raw_qr)?,
        token,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pending,
    Success,
    Expired,
}

/// QQ 网页扫码登录的返回码: 0 成功, 65 失效, 66 未扫描, 67 已扫描待确认
fn verdict_from_code(code: i64) -> Option<Verdict> {
    match code {
        0 => Some(Verdict::Success),
        65 => Some(Verdict::Expired),
        66 | 67 => Some(Verdict::Pending),
        _ => None,
    }
}

fn verdict_from_word(word: &str) -> Option<Verdict> {
    let w = word.trim().to_ascii_lowercase();
    if let Ok(code) = w.parse::<i64>() {
        return verdict_from_code(code);
    }
    match w.as_str() {
        "pending" | "waiting" | "wait" | "scanned" | "scanning" | "unscanned" | "not_scanned"
        | "init" | "created" => Some(Verdict::Pending),
        "confirmed" | "success" | "succeeded" | "ok" | "done" | "bound" | "authorized"
        | "logged_in" => Some(Verdict::Success),
        "expired" | "timeout" | "invalid" | "canceled" | "cancelled" | "refused" | "denied" => {
            Some(Verdict::Expired)
        }
        _ => None,
    }
}

fn verdict_from_value(v: &Value) -> Option<Verdict> {
    match v {
        Value::Number(n) => n.as_i64().and_then(verdict_from_code),
        Value::String(s) => verdict_from_word(s),
        _ => None,
    }
}

pub fn parse_status_response(body: &Value) -> Result<UpstreamStatus, ApiError> {
    let layers = layers(body);

    // 语义明确的 status/state 优先，通用的 code 字段兜底
    let verdict = pick(&layers, STATUS_KEYS)
        .and_then(verdict_from_value)
        .or_else(|| pick(&layers, CODE_KEYS).and_then(verdict_from_value))
        .ok_or_else(|| ApiError::malformed(format!("无法识别的状态响应: {}", body)))?;

    match verdict {
        Verdict::Pending => Ok(UpstreamStatus::Pending),
        Verdict::Expired => Ok(UpstreamStatus::Expired),
        Verdict::Success => pick(&layers, ACCOUNT_KEYS)
            .and_then(as_text)
            .map(UpstreamStatus::Confirmed)
            .ok_or_else(|| ApiError::malformed("登录成功但响应缺少账号")),
    }
}

static PTUI_CODE: OnceLock<Regex> = OnceLock::new();
static PTUI_UIN: OnceLock<Regex> = OnceLock::new();

/// 兼容 `ptuiCB('66','0','','0','二维码未失效。', '')` 形式的脚本响应
fn parse_ptui_callback(body: &str) -> Option<UpstreamStatus> {
    let code_re =
        PTUI_CODE.get_or_init(|| Regex::new(r"ptuiCB\(\s*'(\d+)'").expect("Invalid Regex"));
    let uin_re = PTUI_UIN.get_or_init(|| Regex::new(r"[?&]uin=(\d+)").expect("Invalid Regex"));

    let code: i64 = code_re.captures(body)?.get(1)?.as_str().parse().ok()?;
    match verdict_from_code(code)? {
        Verdict::Pending => Some(UpstreamStatus::Pending),
        Verdict::Expired => Some(UpstreamStatus::Expired),
        Verdict::Success => {
            let uin = uin_re.captures(body)?.get(1)?.as_str().to_string();
            Some(UpstreamStatus::Confirmed(uin))
        }
    }
}

pub fn parse_status_body(body: &str) -> Result<UpstreamStatus, ApiError> {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => parse_status_response(&json),
        Err(_) => parse_ptui_callback(body)
            .ok_or_else(|| ApiError::malformed("状态响应既不是 JSON 也不是已知脚本格式")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoints(base: &str, local_token: bool) -> ApiEndpoints {
        ApiEndpoints {
            base: base.to_string(),
            issue_path: "/qrcode".to_string(),
            status_path: "/status".to_string(),
            token_param: "token".to_string(),
            local_token,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn qr_payload_forms() {
        assert_eq!(
            QrArtifact::from_payload("https://qr.example/a.png").unwrap(),
            QrArtifact::Url("https://qr.example/a.png".into())
        );
        assert_eq!(
            QrArtifact::from_payload("data:image/png;base64,aGVsbG8=").unwrap(),
            QrArtifact::Base64("aGVsbG8=".into())
        );
        assert_eq!(
            QrArtifact::from_payload("base64://aGVsbG8=").unwrap().to_file_ref(),
            "base64://aGVsbG8="
        );
        assert!(QrArtifact::from_payload("not an image!").is_err());
        assert!(QrArtifact::from_payload("   ").is_err());
        assert!(QrArtifact::from_payload("data:image/png;base64").is_err());
    }

    #[test]
    fn wrapped_base64_is_accepted() {
        assert_eq!(
            QrArtifact::from_payload("aGVs\nbG8=").unwrap(),
            QrArtifact::Base64("aGVsbG8=".into())
        );
        assert_eq!(
            QrArtifact::from_payload("data:image/png;base64,aGVs\r\nbG8=").unwrap(),
            QrArtifact::Base64("aGVsbG8=".into())
        );
    }

    #[test]
    fn issue_response_variants() {
        let t = parse_issue_response(&json!({"token": "T1", "qrcode": "https://q/1.png"}), None)
            .unwrap();
        assert_eq!(t.token, "T1");

        let t = parse_issue_response(
            &json!({"code": 0, "data": {"qrsig": 12345, "image": "aGVsbG8="}}),
            None,
        )
        .unwrap();
        assert_eq!(t.token, "12345");
        assert_eq!(t.qr, QrArtifact::Base64("aGVsbG8=".into()));

        // 本地令牌模式下上游可以不返回令牌
        let t = parse_issue_response(&json!({"url": "https://q/2.png"}), Some("LOCAL".into()))
            .unwrap();
        assert_eq!(t.token, "LOCAL");

        assert!(parse_issue_response(&json!({"qrcode": "https://q/1.png"}), None).is_err());
        assert!(parse_issue_response(&json!({"token": "T1"}), None).is_err());
        assert!(parse_issue_response(&json!("oops"), None).is_err());
    }

    #[test]
    fn status_response_variants() {
        assert_eq!(
            parse_status_response(&json!({"status": "pending"})).unwrap(),
            UpstreamStatus::Pending
        );
        assert_eq!(
            parse_status_response(&json!({"code": 67})).unwrap(),
            UpstreamStatus::Pending
        );
        assert_eq!(
            parse_status_response(&json!({"state": "EXPIRED"})).unwrap(),
            UpstreamStatus::Expired
        );
        assert_eq!(
            parse_status_response(&json!({"status": "confirmed", "qq": 10001})).unwrap(),
            UpstreamStatus::Confirmed("10001".into())
        );
        // 外层 code 表示请求成功，真正的状态在 data 里
        assert_eq!(
            parse_status_response(&json!({"code": 0, "data": {"status": "waiting"}})).unwrap(),
            UpstreamStatus::Pending
        );
        assert_eq!(
            parse_status_response(&json!({"code": 0, "data": {"uin": "10002"}})).unwrap(),
            UpstreamStatus::Confirmed("10002".into())
        );
    }

    #[test]
    fn status_response_rejects_unknown_shapes() {
        assert!(parse_status_response(&json!({"status": "weird"})).is_err());
        assert!(parse_status_response(&json!({"msg": "hello"})).is_err());
        assert!(parse_status_response(&json!({"status": "success"})).is_err());
        assert!(parse_status_response(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn ptui_callback_body() {
        assert_eq!(
            parse_status_body("ptuiCB('66','0','','0','二维码未失效。', '')").unwrap(),
            UpstreamStatus::Pending
        );
        assert_eq!(
            parse_status_body("ptuiCB('65','0','','0','二维码已失效。', '')").unwrap(),
            UpstreamStatus::Expired
        );
        assert_eq!(
            parse_status_body(
                "ptuiCB('0','0','https://ptlogin2.qq.com/check_sig?pttype=1&uin=10003&service=ptqrlogin','0','登录成功！', 'nick')"
            )
            .unwrap(),
            UpstreamStatus::Confirmed("10003".into())
        );
        assert!(parse_status_body("<html>502 Bad Gateway</html>").is_err());
    }

    #[test]
    fn generated_tokens_are_alphanumeric() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpLoginApi::new(&endpoints("not a url", false)).is_err());
    }

    #[tokio::test]
    async fn http_issue_and_poll() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qrcode"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"token": "T1", "qrcode": "https://q/T1.png"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(query_param("token", "T1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "uin": "10001"})),
            )
            .mount(&server)
            .await;

        let api = HttpLoginApi::new(&endpoints(&server.uri(), false)).unwrap();
        let ticket = api.issue_qr().await.unwrap();
        assert_eq!(ticket.token, "T1");
        assert_eq!(ticket.qr, QrArtifact::Url("https://q/T1.png".into()));

        let status = api.check_status("T1").await.unwrap();
        assert_eq!(status, UpstreamStatus::Confirmed("10001".into()));
    }

    #[tokio::test]
    async fn http_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qrcode"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .mount(&server)
            .await;

        let api = HttpLoginApi::new(&endpoints(&server.uri(), false)).unwrap();
        assert!(matches!(api.issue_qr().await, Err(ApiError::Status(503))));
        assert!(matches!(
            api.check_status("T1").await,
            Err(ApiError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn local_token_is_sent_with_issue_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qrcode"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"qrcode": "https://q/x.png"})),
            )
            .mount(&server)
            .await;

        let api = HttpLoginApi::new(&endpoints(&server.uri(), true)).unwrap();
        let ticket = api.issue_qr().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let sent: Vec<String> = requests[0]
            .url
            .query_pairs()
            .filter(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(sent, vec![ticket.token]);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_transport_error() {
        // 端口 9 (discard) 上通常没有 HTTP 服务
        let api = HttpLoginApi::new(&endpoints("http://127.0.0.1:9", false)).unwrap();
        assert!(matches!(api.issue_qr().await, Err(ApiError::Transport(_))));
    }
}
