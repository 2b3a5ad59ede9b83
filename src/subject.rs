use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// 网关注入的已验证用户身份。
///
/// 身份校验由上游认证网关完成，本服务只信任其注入的
/// `X-Auth-Subject`（必填）与 `X-Auth-Email`（同步时使用）头，
/// 不做任何进一步验证。
#[derive(Debug, Clone)]
pub struct AuthSubject {
    /// 外部主体 ID（opaque，作为用户主键使用）
    pub subject: String,
    /// 网关附带的邮箱（可选）
    pub email: Option<String>,
}

fn header_str(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthSubject
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = header_str(parts, "x-auth-subject")
            .ok_or_else(|| AppError::Auth("缺少 X-Auth-Subject 身份头".into()))?;
        let email = header_str(parts, "x-auth-email");
        Ok(AuthSubject { subject, email })
    }
}
