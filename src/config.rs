use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use toml::Value;

use crate::{info, warn};

pub type ConfigError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 全局指令前缀（支持多个，如 ["/", "#"]）
    #[serde(default = "default_prefix")]
    pub command_prefix: Vec<String>,

    // 日志级别: debug / info / warn / error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // 拥有管理指令权限的用户 ID
    #[serde(default)]
    pub admins: Vec<String>,

    // 控制台适配器模拟的发送者
    #[serde(default)]
    pub console: ConsoleConfig,

    // 插件配置
    #[serde(flatten)]
    pub plugins: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsoleConfig {
    #[serde(default = "default_console_user")]
    pub user_id: String,
    #[serde(default = "default_console_nick")]
    pub nickname: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            user_id: default_console_user(),
            nickname: default_console_nick(),
        }
    }
}

impl AppConfig {
    /// 读取配置文件；不存在时写入默认配置
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let cfg = Self::with_plugin_defaults(Self::default());
            cfg.save(path).await?;
            info!(target: "Config", "已生成默认配置: {}", path.display());
            return Ok(cfg);
        }

        let content = fs::read_to_string(path).await?;
        let cfg: AppConfig = toml::from_str(&content)?;
        let merged = Self::with_plugin_defaults(cfg);
        Ok(merged)
    }

    /// 补齐缺失的插件配置段 (新增插件后旧配置文件也能工作)
    fn with_plugin_defaults(mut cfg: Self) -> Self {
        for plugin in crate::plugins::get_plugins() {
            if !cfg.plugins.contains_key(plugin.name) {
                warn!(target: "Config", "配置缺少 [{}]，使用默认值", plugin.name);
                cfg.plugins
                    .insert(plugin.name.to_string(), (plugin.default_config)());
            }
        }
        cfg
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, toml_string).await?;
        Ok(())
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }

    /// 插件是否启用 (缺省视为禁用)
    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.plugins
            .get(name)
            .and_then(|v| v.get("enabled"))
            .and_then(|x| x.as_bool())
            .unwrap_or(false)
    }
}

fn default_prefix() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_console_user() -> String {
    "console-user".to_string()
}

fn default_console_nick() -> String {
    "ConsoleUser".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_prefix(),
            log_level: default_log_level(),
            admins: Vec::new(),
            console: ConsoleConfig::default(),
            plugins: HashMap::new(),
        }
    }
}

/// 辅助函数：构建默认配置 Value，并确保包含 enabled 字段
pub fn build_config<T: Serialize>(data: T) -> Value {
    let mut val = Value::try_from(data).unwrap_or(Value::Table(Default::default()));
    if let Value::Table(ref mut map) = val
        && !map.contains_key("enabled")
    {
        map.insert("enabled".to_string(), Value::Boolean(true));
    }
    val
}
