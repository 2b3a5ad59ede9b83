use serde::{Deserialize, Serialize};

/// 用户账户（users 表行）。
///
/// `daily_generation_count` 在跨天后是"懒惰过期"的：只有当
/// `last_generation_date` 落在今天（参考时区）时才有效，
/// 判定逻辑见 `quota` 模块。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserAccount {
    pub id: i64,
    /// 外部主体 ID（网关验证后的 opaque 标识）
    pub subject: String,
    pub email: String,
    /// 加密后的自备密钥（base64(nonce ‖ ciphertext)）
    pub own_credential: Option<String>,
    /// 派生标志，存储层保证与 own_credential 的有无一致
    pub has_own_credential: bool,
    /// 累计成功生成次数（自备/共享密钥都计）
    pub lifetime_generation_count: i64,
    /// 当日成功生成次数（相对 last_generation_date 才有意义）
    pub daily_generation_count: i64,
    /// 最近一次共享密钥生成成功的时刻（RFC3339 UTC）
    pub last_generation_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// 账户同步请求（首次登录后由前端调用）
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SyncRequest {
    /// 邮箱；缺省时回退网关注入的 X-Auth-Email
    #[serde(default)]
    pub email: Option<String>,
}

/// 额度状态
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    /// 今日已用次数（自备密钥用户恒为 0，不计数）
    pub used_today: i64,
    /// 每日上限（共享密钥）
    pub daily_limit: u32,
    /// 今日剩余次数；自备密钥用户为 None（不限量）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    /// 是否不限量（持有自备密钥）
    pub unlimited: bool,
}

/// 账户信息响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub subject: String,
    pub email: String,
    pub has_own_credential: bool,
    pub lifetime_generation_count: i64,
    pub quota: QuotaStatus,
}

/// 录入自备密钥请求
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CredentialRequest {
    /// 上游生成服务的 API 密钥（明文，服务端加密后存储）
    pub api_key: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[schema(example = json!({"ok": true}))]
pub struct OkResponse {
    pub ok: bool,
}
