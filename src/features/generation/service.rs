use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as base64_engine;
use chrono::Utc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::account::credential::{self, ResolvedKey};
use crate::features::account::models::UserAccount;
use crate::features::account::quota;
use crate::features::account::storage::UserStore;
use crate::features::media::normalize;
use crate::features::media::upload::ImageHostClient;

use super::models::{
    EditRequest, GeneratedImage, GenerateRequest, GenerationRecord, GenerationResponse,
    InlineImageInput, SegmentRequest, SegmentResponse,
};
use super::prompt::{
    PromptSettings, build_edit_prompt, build_generation_prompt, build_segmentation_prompt,
};
use super::provider::{self, ContentPart, GeminiClient};
use super::storage::GenerationStore;

/// 生成编排服务。
///
/// 把额度检查、密钥选择、提示词组装、上游调用、图像后处理与
/// 记录落盘串成一条流水线；所有句柄在启动时注入。
pub struct GenerationService {
    users: Arc<UserStore>,
    generations: Arc<GenerationStore>,
    gemini: Arc<GeminiClient>,
    image_host: Option<Arc<ImageHostClient>>,
}

impl GenerationService {
    pub fn new(
        users: Arc<UserStore>,
        generations: Arc<GenerationStore>,
        gemini: Arc<GeminiClient>,
        image_host: Option<Arc<ImageHostClient>>,
    ) -> Self {
        Self {
            users,
            generations,
            gemini,
            image_host,
        }
    }

    /// 文生图。
    pub async fn generate(
        &self,
        subject: &str,
        req: GenerateRequest,
    ) -> Result<GenerationResponse, AppError> {
        if req.prompt.trim().is_empty() {
            return Err(AppError::Validation("prompt 不能为空".into()));
        }
        let settings = PromptSettings {
            temperature: req.temperature,
            seed: req.seed,
            width: req.width,
            height: req.height,
        };
        let prompt = build_generation_prompt(&req.prompt, &settings);

        let mut image_inputs = Vec::new();
        if let Some(reference) = &req.reference_image {
            image_inputs.push(to_part(reference)?);
        }

        self.run_pipeline(subject, req.prompt.clone(), prompt, image_inputs, settings, false)
            .await
    }

    /// 图生图（编辑）。
    pub async fn edit(
        &self,
        subject: &str,
        req: EditRequest,
    ) -> Result<GenerationResponse, AppError> {
        if req.instruction.trim().is_empty() {
            return Err(AppError::Validation("instruction 不能为空".into()));
        }
        let settings = PromptSettings {
            temperature: req.temperature,
            seed: req.seed,
            width: req.width,
            height: req.height,
        };
        let prompt = build_edit_prompt(&req.instruction, req.mask.is_some(), &settings);

        // 分片顺序：原图、蒙版、参考图；模板文案与该顺序对应。
        let mut image_inputs = vec![to_part(&req.image)?];
        if let Some(mask) = &req.mask {
            image_inputs.push(to_part(mask)?);
        }
        if let Some(reference) = &req.reference_image {
            image_inputs.push(to_part(reference)?);
        }

        self.run_pipeline(
            subject,
            req.instruction.clone(),
            prompt,
            image_inputs,
            settings,
            true,
        )
        .await
    }

    /// 图像分割：同样走额度与密钥，不落生成记录。
    pub async fn segment(
        &self,
        subject: &str,
        req: SegmentRequest,
    ) -> Result<SegmentResponse, AppError> {
        let config = AppConfig::global();
        let (user, key) = self.load_and_check(subject, config).await?;

        let parts = vec![
            ContentPart::Text(build_segmentation_prompt(req.query.as_deref())),
            to_part(&req.image)?,
        ];
        let result_parts = self.call_provider(&user, &key, &parts, None).await?;

        let text = provider::first_text(&result_parts)
            .ok_or_else(|| AppError::NoOutput("上游未返回分割结果".into()))?;
        let masks = provider::parse_segment_masks(text)?;

        self.settle_ledger(&user, &key, config).await?;
        Ok(SegmentResponse { masks })
    }

    /// 生成/编辑共用的主流水线。
    async fn run_pipeline(
        &self,
        subject: &str,
        instruction: String,
        prompt: String,
        image_inputs: Vec<ContentPart>,
        settings: PromptSettings,
        is_edit: bool,
    ) -> Result<GenerationResponse, AppError> {
        let config = AppConfig::global();
        let (user, key) = self.load_and_check(subject, config).await?;

        let mut parts = vec![ContentPart::Text(prompt)];
        parts.extend(image_inputs);

        let result_parts = self
            .call_provider(&user, &key, &parts, settings.temperature)
            .await?;

        let raw_images = provider::image_parts(&result_parts);
        if raw_images.is_empty() {
            return Err(AppError::NoOutput("上游未返回任何图片".into()));
        }

        // 后处理是尽力而为：解码失败的图原样透传，绝不因此失败。
        let target = match (settings.width, settings.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        };
        let mut images: Vec<GeneratedImage> = Vec::with_capacity(raw_images.len());
        for (mime, data) in raw_images {
            images.push(match base64_engine.decode(data) {
                Ok(bytes) => {
                    let normalized = normalize::normalize(&bytes, target, &config.media);
                    let changed = normalized != bytes;
                    GeneratedImage {
                        url: None,
                        data: base64_engine.encode(&normalized),
                        // 重新编码一律输出 PNG；未改动时保留上游的 MIME。
                        mime: if changed {
                            "image/png".to_string()
                        } else {
                            mime.to_string()
                        },
                    }
                }
                Err(_) => GeneratedImage {
                    url: None,
                    data: data.to_string(),
                    mime: mime.to_string(),
                },
            });
        }

        // 首图是记录的权威引用：图床可用且上传成功存 URL，否则内联。
        let mut image_url = None;
        if let Some(host) = &self.image_host {
            image_url = host.upload(&images[0].data, &images[0].mime).await;
        }
        images[0].url = image_url.clone();

        let record_id = Uuid::new_v4().to_string();
        let now_rfc3339 = Utc::now().to_rfc3339();
        let record = GenerationRecord {
            id: record_id.clone(),
            user_id: user.id,
            instruction,
            is_edit,
            temperature: settings.temperature,
            seed: settings.seed,
            width: settings.width.map(i64::from),
            height: settings.height.map(i64::from),
            image_url: image_url.clone(),
            image_data: if image_url.is_none() {
                Some(images[0].data.clone())
            } else {
                None
            },
            image_mime: Some(images[0].mime.clone()),
            status: "completed".to_string(),
            created_at: now_rfc3339,
        };
        self.generations.insert(&record).await?;

        self.settle_ledger(&user, &key, config).await?;

        Ok(GenerationResponse { record_id, images })
    }

    /// 流水线前半段：载入用户、额度检查、密钥选择。
    async fn load_and_check(
        &self,
        subject: &str,
        config: &AppConfig,
    ) -> Result<(UserAccount, ResolvedKey), AppError> {
        let user = self
            .users
            .find_by_subject(subject)
            .await?
            .ok_or_else(|| AppError::NotFound("账户不存在，请先同步".into()))?;

        // 额度不足时快速失败，不产生上游调用。
        let tz = config.quota_timezone();
        let now = Utc::now();
        if !quota::check_allowed(&user, now, tz, config.quota.daily_limit) {
            return Err(AppError::QuotaExceeded(format!(
                "今日 {} 次免费生成已用完，明日自动恢复，或录入自备密钥解除限制",
                config.quota.daily_limit
            )));
        }

        let key = credential::resolve(&self.users, &user, config).await?;
        Ok((user, key))
    }

    /// 调用上游；自备密钥被拒时执行降级清除并中止本次请求。
    ///
    /// 不会静默换用共享密钥重试：失效密钥背后的计费/额度状况
    /// 应该显式暴露给用户，由用户决定下一步。
    async fn call_provider(
        &self,
        user: &UserAccount,
        key: &ResolvedKey,
        parts: &[ContentPart],
        temperature: Option<f64>,
    ) -> Result<Vec<ContentPart>, AppError> {
        match self
            .gemini
            .generate_content(key.api_key(), parts, temperature)
            .await
        {
            Ok(parts) => Ok(parts),
            Err(AppError::InvalidCredential(_)) if !key.is_shared() => {
                let now_rfc3339 = Utc::now().to_rfc3339();
                if let Err(e) = self.users.clear_credential(&user.subject, &now_rfc3339).await {
                    tracing::warn!("清除失效密钥失败（用户 {}）: {}", user.subject, e);
                }
                Err(AppError::InvalidCredential(
                    "自备密钥被上游拒绝，已自动清除；请重新录入有效密钥，或使用免费额度".into(),
                ))
            }
            Err(AppError::InvalidCredential(msg)) => {
                // 共享密钥被拒属于服务端配置问题，对用户表现为上游故障。
                Err(AppError::Provider(format!("共享密钥被上游拒绝: {msg}")))
            }
            Err(e) => Err(e),
        }
    }

    /// 成功后的记账：共享密钥计入当日额度；lifetime 两种路径都累计。
    async fn settle_ledger(
        &self,
        user: &UserAccount,
        key: &ResolvedKey,
        config: &AppConfig,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let now_rfc3339 = now.to_rfc3339();
        if key.is_shared() {
            let tz = config.quota_timezone();
            let new_daily = quota::next_daily_count(user, now, tz);
            self.users
                .record_shared_success(&user.subject, new_daily, &now_rfc3339)
                .await?;
        } else {
            self.users
                .record_own_success(&user.subject, &now_rfc3339)
                .await?;
        }
        Ok(())
    }
}

fn to_part(input: &InlineImageInput) -> Result<ContentPart, AppError> {
    let data = input.data.trim();
    if data.is_empty() {
        return Err(AppError::Validation("图片数据不能为空".into()));
    }
    Ok(ContentPart::InlineImage {
        mime: input.mime.clone(),
        data: data.to_string(),
    })
}
