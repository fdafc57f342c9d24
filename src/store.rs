//! 绑定数据存储
//!
//! 内存中维护 caller_id → 绑定记录，磁盘上是单个 JSON 对象：
//!
//! ```json
//! { "<caller_id>": { "qq_number": "10001", "bind_time": "2025-01-01T12:00:00+08:00", "verified": true } }
//! ```
//!
//! 每次变更都整体重写文件，所有写操作由同一把锁串行化。

use crate::error::{BindError, ExclusiveBindError, PersistenceError};
use crate::{debug, error, info, warn};
use chrono::{DateTime, Local};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tokio::sync::Mutex;

static QQ_REGEX: OnceLock<Regex> = OnceLock::new();

fn qq_regex() -> &'static Regex {
    QQ_REGEX.get_or_init(|| Regex::new(r"^[1-9][0-9]{4,10}$").expect("Invalid Regex"))
}

/// QQ 号：5-11 位数字，不以 0 开头
pub fn is_valid_qq(s: &str) -> bool {
    qq_regex().is_match(s)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingRecord {
    pub caller_id: String,
    pub qq_number: String,
    pub bind_time: DateTime<Local>,
    pub verified: bool,
}

/// 落盘格式（caller_id 作为外层 key，不重复存储）
#[derive(Serialize)]
struct StoredBinding<'a> {
    qq_number: &'a str,
    bind_time: &'a DateTime<Local>,
    verified: bool,
}

pub struct BindingStore {
    path: PathBuf,
    records: Mutex<HashMap<String, BindingRecord>>,
}

impl BindingStore {
    /// 从文件加载。文件缺失或损坏时以空表启动，永不失败。
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path).await;
        info!(target: "BindStore", "已加载 {} 条绑定记录 ({})", records.len(), path.display());
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 插入或覆盖 caller_id 的绑定，不检查 QQ 号是否已被他人占用
    pub async fn bind(&self, caller_id: &str, qq_number: &str, verified: bool) -> BindingRecord {
        let mut guard = self.records.lock().await;
        let record = new_record(caller_id, qq_number, verified);
        guard.insert(caller_id.to_string(), record.clone());
        self.persist_locked(&guard).await;
        record
    }

    /// 检查后再写入，检查与写入在同一把锁内完成：
    /// caller 已绑定其他号码、或该号码属于他人时拒绝
    pub async fn bind_exclusive(
        &self,
        caller_id: &str,
        qq_number: &str,
        verified: bool,
    ) -> Result<BindingRecord, ExclusiveBindError> {
        let mut guard = self.records.lock().await;

        if let Some(existing) = guard.get(caller_id)
            && existing.qq_number != qq_number
        {
            return Err(ExclusiveBindError::CallerBound {
                caller_id: caller_id.to_string(),
                qq_number: existing.qq_number.clone(),
            });
        }

        if let Some(owner) = guard
            .values()
            .find(|r| r.qq_number == qq_number && r.caller_id != caller_id)
        {
            return Err(ExclusiveBindError::AccountTaken {
                qq_number: qq_number.to_string(),
                owner: owner.caller_id.clone(),
            });
        }

        let record = new_record(caller_id, qq_number, verified);
        guard.insert(caller_id.to_string(), record.clone());
        self.persist_locked(&guard).await;
        Ok(record)
    }

    pub async fn unbind(&self, caller_id: &str) -> Result<BindingRecord, BindError> {
        let mut guard = self.records.lock().await;
        let removed = guard.remove(caller_id).ok_or(BindError::NotBound)?;
        self.persist_locked(&guard).await;
        Ok(removed)
    }

    /// 按 QQ 号解绑（管理接口）
    pub async fn unbind_by_account(&self, qq_number: &str) -> Result<BindingRecord, BindError> {
        let mut guard = self.records.lock().await;
        let caller_id = guard
            .values()
            .find(|r| r.qq_number == qq_number)
            .map(|r| r.caller_id.clone())
            .ok_or(BindError::NotBound)?;
        let removed = guard.remove(&caller_id).ok_or(BindError::NotBound)?;
        self.persist_locked(&guard).await;
        Ok(removed)
    }

    pub async fn lookup(&self, caller_id: &str) -> Option<BindingRecord> {
        self.records.lock().await.get(caller_id).cloned()
    }

    /// 线性扫描，规模在数千条以内
    pub async fn lookup_by_account(&self, qq_number: &str) -> Option<BindingRecord> {
        self.records
            .lock()
            .await
            .values()
            .find(|r| r.qq_number == qq_number)
            .cloned()
    }

    /// 全部绑定，按绑定时间升序
    pub async fn list(&self) -> Vec<BindingRecord> {
        let mut all: Vec<BindingRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.bind_time
                .cmp(&b.bind_time)
                .then_with(|| a.caller_id.cmp(&b.caller_id))
        });
        all
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 立即写盘，返回写盘错误
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let guard = self.records.lock().await;
        write_snapshot(&self.path, &guard).await
    }

    /// 写盘失败只记录日志：内存数据在进程存活期间仍然有效，下次变更会整体重写
    async fn persist_locked(&self, records: &HashMap<String, BindingRecord>) {
        match write_snapshot(&self.path, records).await {
            Ok(()) => debug!(target: "BindStore", "已保存 {} 条绑定", records.len()),
            Err(e) => error!(
                target: "BindStore",
                "保存绑定数据失败 ({}): {}", self.path.display(), e
            ),
        }
    }
}

fn new_record(caller_id: &str, qq_number: &str, verified: bool) -> BindingRecord {
    BindingRecord {
        caller_id: caller_id.to_string(),
        qq_number: qq_number.to_string(),
        bind_time: Local::now(),
        verified,
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

async fn write_snapshot(
    path: &Path,
    records: &HashMap<String, BindingRecord>,
) -> Result<(), PersistenceError> {
    // BTreeMap 保证输出顺序稳定
    let snapshot: BTreeMap<&str, StoredBinding<'_>> = records
        .iter()
        .map(|(k, r)| {
            (
                k.as_str(),
                StoredBinding {
                    qq_number: &r.qq_number,
                    bind_time: &r.bind_time,
                    verified: r.verified,
                },
            )
        })
        .collect();
    let json = serde_json::to_string_pretty(&snapshot)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn load_records(path: &Path) -> HashMap<String, BindingRecord> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(target: "BindStore", "绑定文件不存在，将在首次绑定时创建");
            return HashMap::new();
        }
        Err(e) => {
            error!(target: "BindStore", "读取绑定文件失败，以空数据启动: {}", e);
            quarantine(path).await;
            return HashMap::new();
        }
    };

    let content = match String::from_utf8(bytes) {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "BindStore", "绑定文件不是有效的 UTF-8，以空数据启动: {}", e);
            quarantine(path).await;
            return HashMap::new();
        }
    };

    if content.trim().is_empty() {
        return HashMap::new();
    }

    let raw: HashMap<String, Value> = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "BindStore", "绑定文件已损坏，以空数据启动: {}", e);
            quarantine(path).await;
            return HashMap::new();
        }
    };

    let mut records = HashMap::with_capacity(raw.len());
    for (caller_id, value) in raw {
        match parse_entry(&caller_id, &value) {
            Some(r) => {
                records.insert(caller_id, r);
            }
            None => warn!(target: "BindStore", "跳过无法解析的绑定记录: {}", caller_id),
        }
    }
    records
}

/// 把无法加载的文件挪开，避免下一次写入覆盖它
async fn quarantine(path: &Path) {
    let backup = sibling(path, &format!(".corrupt-{}", Local::now().format("%Y%m%d%H%M%S")));
    match fs::rename(path, &backup).await {
        Ok(()) => warn!(target: "BindStore", "无法加载的文件已另存为 {}", backup.display()),
        Err(e) => error!(target: "BindStore", "备份无法加载的文件失败: {}", e),
    }
}

/// 兼容历史格式：值可能是完整对象，也可能只是一个 QQ 号
fn parse_entry(caller_id: &str, value: &Value) -> Option<BindingRecord> {
    let (qq_number, bind_time, verified) = match value {
        Value::String(_) | Value::Number(_) => (value_to_string(value)?, None, false),
        Value::Object(map) => {
            let qq = map
                .get("qq_number")
                .or_else(|| map.get("qq"))
                .and_then(value_to_string)?;
            let time = map.get("bind_time").and_then(parse_time);
            let verified = map.get("verified").and_then(Value::as_bool).unwrap_or(false);
            (qq, time, verified)
        }
        _ => return None,
    };

    if !is_valid_qq(&qq_number) {
        return None;
    }

    Some(BindingRecord {
        caller_id: caller_id.to_string(),
        qq_number,
        bind_time: bind_time.unwrap_or_else(Local::now),
        verified,
    })
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => n.as_u64().map(|x| x.to_string()),
        _ => None,
    }
}

/// RFC 3339 字符串或 Unix 时间戳（秒）
fn parse_time(v: &Value) -> Option<DateTime<Local>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Local)),
        Value::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp(secs, 0).map(|t| t.with_timezone(&Local))
        }
        _ => None,
    }
}
