use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

use crate::config::ImageHostConfig;

/// 持久图床客户端。
///
/// 图床是外部协作方：上传成功返回稳定 URL；端点未配置或上传失败时
/// 返回 None，由调用方降级为内联存储，绝不向上传播为请求失败。
#[derive(Clone)]
pub struct ImageHostClient {
    client: reqwest::Client,
    endpoint: String,
    folder: String,
    headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

impl ImageHostClient {
    /// 未配置 upload_endpoint 时返回 None（功能禁用）。
    pub fn from_config(cfg: &ImageHostConfig) -> Option<Self> {
        let endpoint = cfg.upload_endpoint.as_deref()?.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .ok()?;

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if let Some(key) = cfg.api_key.as_deref()
            && !key.is_empty()
            && let Ok(v) = HeaderValue::from_str(key)
        {
            headers.insert("X-Api-Key", v);
        }

        Some(Self {
            client,
            endpoint,
            folder: cfg.folder.clone(),
            headers,
        })
    }

    /// 上传 base64 图像字节，成功返回稳定 URL。
    pub async fn upload(&self, data_b64: &str, mime: &str) -> Option<String> {
        let body = serde_json::json!({
            "data": data_b64,
            "mime": mime,
            "folder": self.folder,
        });

        let resp = match self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("图床上传请求失败（降级为内联存储）: {}", e);
                return None;
            }
        };

        if !resp.status().is_success() {
            tracing::warn!("图床上传返回 {}（降级为内联存储）", resp.status());
            return None;
        }

        match resp.json::<UploadResponse>().await {
            Ok(parsed) if !parsed.url.trim().is_empty() => Some(parsed.url),
            Ok(_) => {
                tracing::warn!("图床上传响应缺少 url（降级为内联存储）");
                None
            }
            Err(e) => {
                tracing::warn!("图床上传响应解析失败（降级为内联存储）: {}", e);
                None
            }
        }
    }
}
