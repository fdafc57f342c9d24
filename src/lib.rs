// lib.rs
//
// ================================================================================
// QQBind - QQ 账号扫码绑定
//
// 用户发送指令 → 申请登录二维码 → 后台轮询扫码状态 → 确认后写入绑定。
// 结构：插件流水线 | 会话状态机 | JSON 文件存储 | 控制台适配器
// ================================================================================

pub mod adapters;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod image_cache;
pub mod log;
pub mod login;
pub mod message;
pub mod plugins;
pub mod store;

#[cfg(test)]
mod test_utils;

use adapters::Outbox;
use config::AppConfig;
use error::ApiError;
use image_cache::ImageCache;
use login::{HttpLoginApi, SessionManager};
use plugins::bind::config::BindConfig;
use plugins::config_section;
use std::path::Path;
use std::sync::Arc;
use store::BindingStore;

/// 读取配置并应用日志级别
pub async fn load_config(path: impl AsRef<Path>) -> anyhow::Result<AppConfig> {
    let path = path.as_ref();
    let config = AppConfig::load_or_create(path)
        .await
        .map_err(|e| anyhow::anyhow!("加载配置 {} 失败: {}", path.display(), e))?;

    match log::Level::parse(&config.log_level) {
        Some(level) => log::set_level(level),
        None => crate::warn!(
            target: "System",
            "未知的日志级别 {}，使用 {:?}",
            config.log_level,
            log::level()
        ),
    }
    Ok(config)
}

/// 插件共享的长生命周期服务
pub struct Services {
    pub store: Arc<BindingStore>,
    pub sessions: Arc<SessionManager>,
    pub images: Arc<ImageCache>,
}

impl Services {
    pub fn new(
        store: Arc<BindingStore>,
        sessions: Arc<SessionManager>,
        images: Arc<ImageCache>,
    ) -> Self {
        Self {
            store,
            sessions,
            images,
        }
    }

    /// 按配置组装服务；登录接口地址无效时返回错误
    pub async fn from_config(config: &AppConfig, outbox: Outbox) -> Result<Self, ApiError> {
        let bind: BindConfig = config_section(config, "bind").unwrap_or_default();
        let image: plugins::image_proxy::Config =
            config_section(config, "image_proxy").unwrap_or_default();

        let api = Arc::new(HttpLoginApi::new(&bind.endpoints())?);
        let store = Arc::new(BindingStore::open(&bind.data_file).await);
        let sessions = Arc::new(SessionManager::new(
            api,
            store.clone(),
            bind.poll_settings(),
            outbox,
        ));
        let images = Arc::new(ImageCache::new(&image.cache_dir));

        crate::info!(
            target: "System",
            "登录服务: {} | 轮询间隔 {:?} | 超时 {:?}",
            bind.api_base,
            bind.poll_settings().interval,
            bind.poll_settings().timeout
        );

        Ok(Self::new(store, sessions, images))
    }

    /// 退出前停止所有会话并落盘
    pub async fn shutdown(&self) {
        self.sessions.cancel_all().await;
        if let Err(e) = self.store.flush().await {
            crate::error!(target: "System", "退出时保存绑定数据失败: {}", e);
        }
    }
}
