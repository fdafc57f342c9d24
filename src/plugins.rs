use crate::config::AppConfig;
use crate::event::Context;
use crate::{debug, info};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use toml::Value;

pub mod bind;
pub mod bind_admin;
pub mod image_proxy;

pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// 返回 `Some(ctx)` 交给下一个插件，`None` 表示事件已被消费
pub type PluginHandler = fn(Context) -> BoxFuture<'static, Result<Option<Context>, PluginError>>;

pub struct Plugin {
    pub name: &'static str,
    pub handler: PluginHandler,
    pub default_config: fn() -> Value,
}

static PLUGINS: OnceLock<Vec<Plugin>> = OnceLock::new();

/// 获取全局插件列表 (顺序即执行顺序)
pub fn get_plugins() -> &'static [Plugin] {
    PLUGINS.get_or_init(|| {
        vec![
            // 取消词需要先于其他插件拦截
            Plugin {
                name: "bind",
                handler: bind::handle,
                default_config: bind::default_config,
            },
            Plugin {
                name: "bind_admin",
                handler: bind_admin::handle,
                default_config: bind_admin::default_config,
            },
            Plugin {
                name: "image_proxy",
                handler: image_proxy::handle,
                default_config: image_proxy::default_config,
            },
        ]
    })
}

/// 输出插件启用情况
pub fn log_enabled(config: &AppConfig) {
    let plugins = get_plugins();
    let enabled: Vec<&str> = plugins
        .iter()
        .filter(|p| config.plugin_enabled(p.name))
        .map(|p| p.name)
        .collect();
    info!(
        target: "System",
        "插件已加载 (已启用 {}/{}): {}",
        enabled.len(),
        plugins.len(),
        enabled.join(", ")
    );
}

/// 运行插件流水线
pub async fn run(mut ctx: Context) -> Result<(), PluginError> {
    for plugin in get_plugins() {
        if !ctx.config.plugin_enabled(plugin.name) {
            continue;
        }

        match (plugin.handler)(ctx).await? {
            Some(next_ctx) => ctx = next_ctx,
            None => {
                debug!(target: "Plugin", "[{}] 已处理该消息", plugin.name);
                return Ok(());
            }
        }
    }
    Ok(())
}

/// 从全局配置中读取插件配置段
pub fn config_section<T>(config: &AppConfig, plugin_name: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    config
        .plugins
        .get(plugin_name)
        .and_then(|v| T::deserialize(v.clone()).ok())
}

pub fn get_config<T>(ctx: &Context, plugin_name: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    config_section(&ctx.config, plugin_name)
}
