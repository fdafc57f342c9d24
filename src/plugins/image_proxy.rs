use crate::adapters::send_msg;
use crate::command::match_any;
use crate::config::build_config;
use crate::event::Context;
use crate::message::Message;
use crate::plugins::{PluginError, get_config};
use crate::error;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use toml::Value;
use url::Url;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub commands: Vec<String>,
    /// 未提供参数时发送的图片
    pub default_url: String,
    pub cache_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            commands: vec!["helloworld".into()],
            default_url: "https://picsum.photos/400/300.jpg".to_string(),
            cache_dir: "data/cache/images".to_string(),
        }
    }
}

pub fn default_config() -> Value {
    build_config(Config::default())
}

pub fn handle(ctx: Context) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let config: Config = get_config(&ctx, "image_proxy").unwrap_or_default();
        let Some(matched) = match_any(&ctx, &config.commands) else {
            return Ok(Some(ctx));
        };

        let url = matched.args.first().unwrap_or(&config.default_url);
        let target = ctx.event.reply_target();

        match fetch(&ctx, url).await {
            Ok(path) => {
                let msg = Message::new()
                    .at(ctx.caller_id())
                    .text("来看这个图：")
                    .image(path)
                    .text("这是一个缓存的图片。");
                send_msg(&ctx, target, msg)?;
            }
            Err(e) => {
                error!(target: "Plugin/ImageProxy", "处理图片出错: {}", e);
                send_msg(&ctx, target, "抱歉,图片处理出现错误。")?;
            }
        }
        Ok(None)
    })
}

async fn fetch(ctx: &Context, url: &str) -> Result<String, PluginError> {
    let parsed = Url::parse(url)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("不支持的协议: {}", parsed.scheme()).into());
    }
    let path = ctx.services.images.fetch(parsed.as_str()).await?;
    Ok(path.display().to_string())
}
