//! 按 URL 缓存远程图片
//!
//! 文件名为 URL 的 md5，已存在则直接复用，不做过期刷新。

use crate::error::CacheError;
use crate::{debug, info};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ImageCache {
    dir: PathBuf,
    client: reqwest::Client,
}

impl ImageCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            dir: dir.into(),
            client,
        }
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{:x}.jpg", md5::compute(url.as_bytes())))
    }

    /// 返回本地缓存文件路径，未命中时下载
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, CacheError> {
        let path = self.cache_path(url);
        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(target: "ImageCache", "命中缓存: {}", path.display());
            return Ok(path);
        }

        let resp = self.client.get(url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(CacheError::Status(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await?;

        fs::create_dir_all(&self.dir).await?;
        // 先写临时文件，避免其他请求读到半截图片
        let part = path.with_extension("jpg.part");
        fs::write(&part, &bytes).await?;
        fs::rename(&part, &path).await?;

        info!(target: "ImageCache", "已缓存 {} ({} 字节)", url, bytes.len());
        Ok(path)
    }
}
