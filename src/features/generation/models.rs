use serde::{Deserialize, Serialize};

/// 生成记录（generations 表行）。
///
/// 成功一次写入一行，除删除外不再变更；`image_url` 与 `image_data`
/// 恰有其一是权威引用（图床可用则存 URL，否则内联 base64）。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GenerationRecord {
    pub id: String,
    pub user_id: i64,
    pub instruction: String,
    pub is_edit: bool,
    pub temperature: Option<f64>,
    pub seed: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
    pub image_mime: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// 内联图片输入：base64 字节 + MIME 类型。
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct InlineImageInput {
    /// base64 编码的图片字节
    pub data: String,
    /// MIME 类型，缺省按 PNG 处理
    #[serde(default = "InlineImageInput::default_mime")]
    pub mime: String,
}

impl InlineImageInput {
    fn default_mime() -> String {
        "image/png".to_string()
    }
}

/// 文生图请求
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct GenerateRequest {
    /// 自由文本描述
    pub prompt: String,
    /// 创作温度（影响风格指引分档）
    #[serde(default)]
    pub temperature: Option<f64>,
    /// 风格参考码（上游无原生 seed，折叠进提示词）
    #[serde(default)]
    pub seed: Option<i64>,
    /// 目标宽度（像素），与 height 同时给出才生效
    #[serde(default)]
    pub width: Option<u32>,
    /// 目标高度（像素）
    #[serde(default)]
    pub height: Option<u32>,
    /// 可选的风格参考图
    #[serde(default)]
    pub reference_image: Option<InlineImageInput>,
}

/// 图生图（编辑）请求
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EditRequest {
    /// 编辑指令
    pub instruction: String,
    /// 待编辑的原图
    pub image: InlineImageInput,
    /// 可选蒙版：只允许修改白色区域
    #[serde(default)]
    pub mask: Option<InlineImageInput>,
    /// 可选参考图
    #[serde(default)]
    pub reference_image: Option<InlineImageInput>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// 图像分割请求
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SegmentRequest {
    /// 待分割的图片
    pub image: InlineImageInput,
    /// 分割目标描述；缺省分割所有可辨识对象
    #[serde(default)]
    pub query: Option<String>,
}

/// 单个分割结果。
///
/// 上游以 JSON 文本形式返回：`box` 为 [x, y, w, h] 像素坐标，
/// `mask` 为二值蒙版的 base64 PNG。
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SegmentMask {
    pub label: String,
    #[serde(rename = "box")]
    #[schema(value_type = Vec<f64>)]
    pub bounding_box: [f64; 4],
    pub mask: String,
}

/// 分割响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SegmentResponse {
    pub masks: Vec<SegmentMask>,
}

/// 返回给调用方的单张生成图
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    /// 图床 URL（仅在持久化上传成功的图上出现）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// base64 编码的图片字节
    pub data: String,
    pub mime: String,
}

/// 生成/编辑响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    /// 本次生成的记录 ID
    pub record_id: String,
    pub images: Vec<GeneratedImage>,
}

/// 历史查询参数
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct HistoryQuery {
    /// 返回条数（默认 20，上限 100）
    pub limit: Option<i64>,
    /// 偏移量
    pub offset: Option<i64>,
}

/// 生成记录的 API 视图
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecordView {
    pub id: String,
    pub instruction: String,
    pub is_edit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_mime: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl From<GenerationRecord> for GenerationRecordView {
    fn from(r: GenerationRecord) -> Self {
        Self {
            id: r.id,
            instruction: r.instruction,
            is_edit: r.is_edit,
            temperature: r.temperature,
            seed: r.seed,
            width: r.width,
            height: r.height,
            image_url: r.image_url,
            image_data: r.image_data,
            image_mime: r.image_mime,
            status: r.status,
            created_at: r.created_at,
        }
    }
}

/// 历史列表响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationListResponse {
    pub items: Vec<GenerationRecordView>,
    pub limit: i64,
    pub offset: i64,
}
