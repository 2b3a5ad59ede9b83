use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;

use crate::config::GeminiConfig;
use crate::error::AppError;

use super::models::SegmentMask;

/// 发给上游的有序内容分片：文本段或内联 base64 图片。
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    InlineImage { mime: String, data: String },
}

/// Gemini generateContent 客户端。
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(cfg: &GeminiConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Internal(format!("初始化 HTTP Client 失败: {e}")))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    /// 调用上游生成接口，返回响应中的内容分片。
    ///
    /// 密钥被上游拒绝时返回 `InvalidCredential`，由调用方决定
    /// 是否触发自备密钥的降级清除；其余上游错误归为 Provider/Timeout。
    pub async fn generate_content(
        &self,
        api_key: &str,
        parts: &[ContentPart],
        temperature: Option<f64>,
    ) -> Result<Vec<ContentPart>, AppError> {
        let body = build_request_body(parts, temperature);

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(AppError::from)?;

        let status = resp.status();
        let raw = resp
            .text()
            .await
            .map_err(|e| AppError::Provider(format!("读取上游响应失败: {e}")))?;

        if !status.is_success() {
            if is_invalid_key_response(status, &raw) {
                return Err(AppError::InvalidCredential("上游拒绝了该 API 密钥".into()));
            }
            let brief: String = raw.chars().take(300).collect();
            return Err(AppError::Provider(format!("上游返回 {status}: {brief}")));
        }

        parse_response_parts(&raw)
    }
}

/// 上游"密钥无效"的判定：400/403 且错误体带有密钥无效标记。
pub fn is_invalid_key_response(status: StatusCode, body: &str) -> bool {
    (status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN)
        && (body.contains("API_KEY_INVALID") || body.contains("API key not valid"))
}

fn build_request_body(parts: &[ContentPart], temperature: Option<f64>) -> Value {
    let json_parts: Vec<Value> = parts
        .iter()
        .map(|p| match p {
            ContentPart::Text(t) => json!({ "text": t }),
            ContentPart::InlineImage { mime, data } => json!({
                "inline_data": { "mime_type": mime, "data": data }
            }),
        })
        .collect();

    let mut body = json!({
        "contents": [ { "parts": json_parts } ],
    });
    if let Some(t) = temperature {
        body["generationConfig"] = json!({ "temperature": t });
    }
    body
}

/// 解析 candidates[0].content.parts；缺失时返回空集合，由调用方判定 NoOutput。
fn parse_response_parts(raw: &str) -> Result<Vec<ContentPart>, AppError> {
    let v: Value =
        serde_json::from_str(raw).map_err(|e| AppError::Json(format!("解析上游响应失败: {e}")))?;

    let Some(parts) = v
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            out.push(ContentPart::Text(text.to_string()));
            continue;
        }
        // 响应侧字段是 camelCase（inlineData/mimeType），请求侧为 snake_case。
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
        if let Some(inline) = inline {
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(|m| m.as_str())
                .unwrap_or("image/png")
                .to_string();
            if let Some(data) = inline.get("data").and_then(|d| d.as_str()) {
                out.push(ContentPart::InlineImage {
                    mime,
                    data: data.to_string(),
                });
            }
        }
    }
    Ok(out)
}

/// 取出响应中的全部内联图片。
pub fn image_parts(parts: &[ContentPart]) -> Vec<(&str, &str)> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::InlineImage { mime, data } => Some((mime.as_str(), data.as_str())),
            _ => None,
        })
        .collect()
}

/// 取出响应中的第一段文本。
pub fn first_text(parts: &[ContentPart]) -> Option<&str> {
    parts.iter().find_map(|p| match p {
        ContentPart::Text(t) => Some(t.as_str()),
        _ => None,
    })
}

/// 解析分割模式的 JSON 文本应答。
///
/// 上游时常无视"不要加 markdown 围栏"的要求，解析前先剥掉围栏。
pub fn parse_segment_masks(text: &str) -> Result<Vec<SegmentMask>, AppError> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str::<Vec<SegmentMask>>(cleaned)
        .map_err(|e| AppError::Json(format!("解析分割结果失败: {e}")))
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 首行可能是 ```json 之类的语言标记，整行丢弃。
    let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or(rest);
    let rest = rest.trim();
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::{
        ContentPart, build_request_body, first_text, image_parts, is_invalid_key_response,
        parse_response_parts, parse_segment_masks,
    };
    use reqwest::StatusCode;

    #[test]
    fn invalid_key_detection_requires_status_and_marker() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        assert!(is_invalid_key_response(StatusCode::BAD_REQUEST, body));
        assert!(is_invalid_key_response(
            StatusCode::FORBIDDEN,
            r#"{"error":{"details":[{"reason":"API_KEY_INVALID"}]}}"#
        ));
        // 同样的标记出现在 500 上不算密钥无效。
        assert!(!is_invalid_key_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            body
        ));
        assert!(!is_invalid_key_response(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"quota exceeded"}}"#
        ));
    }

    #[test]
    fn response_parts_extract_text_and_images() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "here you go"},
                        {"inlineData": {"mimeType": "image/png", "data": "QUJD"}}
                    ]
                }
            }]
        }"#;
        let parts = parse_response_parts(raw).expect("parse");
        assert_eq!(parts.len(), 2);
        assert_eq!(first_text(&parts), Some("here you go"));
        let images = image_parts(&parts);
        assert_eq!(images, vec![("image/png", "QUJD")]);
    }

    #[test]
    fn missing_candidates_yield_empty_parts() {
        let raw = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parts = parse_response_parts(raw).expect("parse");
        assert!(parts.is_empty());
    }

    #[test]
    fn request_body_includes_temperature_only_when_set() {
        let parts = vec![ContentPart::Text("hi".into())];
        let with = build_request_body(&parts, Some(0.7));
        assert_eq!(with["generationConfig"]["temperature"], 0.7);
        let without = build_request_body(&parts, None);
        assert!(without.get("generationConfig").is_none());
    }

    #[test]
    fn request_body_uses_snake_case_inline_data() {
        let parts = vec![ContentPart::InlineImage {
            mime: "image/jpeg".into(),
            data: "QUJD".into(),
        }];
        let body = build_request_body(&parts, None);
        let part = &body["contents"][0]["parts"][0];
        assert_eq!(part["inline_data"]["mime_type"], "image/jpeg");
    }

    #[test]
    fn segment_masks_parse_with_and_without_fences() {
        let bare = r#"[{"label":"cat","box":[10,20,30,40],"mask":"QUJD"}]"#;
        let masks = parse_segment_masks(bare).expect("parse bare");
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].label, "cat");
        assert_eq!(masks[0].bounding_box, [10.0, 20.0, 30.0, 40.0]);

        let fenced = format!("```json\n{bare}\n```");
        let masks = parse_segment_masks(&fenced).expect("parse fenced");
        assert_eq!(masks.len(), 1);
    }

    #[test]
    fn malformed_segment_json_is_an_error() {
        assert!(parse_segment_masks("not json").is_err());
        // box 少一个元素也视为格式错误。
        assert!(parse_segment_masks(r#"[{"label":"x","box":[1,2,3],"mask":"QQ=="}]"#).is_err());
    }
}
