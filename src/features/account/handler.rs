use axum::{
    Router,
    extract::State,
    response::Json,
    routing::{get, post, put},
};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::state::AppState;
use crate::subject::AuthSubject;

use super::models::{AccountResponse, CredentialRequest, OkResponse, QuotaStatus, SyncRequest, UserAccount};
use super::{credential, quota};

pub fn create_account_router() -> Router<AppState> {
    Router::new()
        .route("/account/sync", post(sync_account))
        .route("/account", get(get_account).delete(delete_account))
        .route(
            "/account/credential",
            put(put_credential).delete(delete_credential),
        )
}

fn account_response(user: &UserAccount) -> AccountResponse {
    let config = AppConfig::global();
    let tz = config.quota_timezone();
    let now = chrono::Utc::now();
    let limit = config.quota.daily_limit;
    AccountResponse {
        subject: user.subject.clone(),
        email: user.email.clone(),
        has_own_credential: user.has_own_credential,
        lifetime_generation_count: user.lifetime_generation_count,
        quota: QuotaStatus {
            used_today: if user.has_own_credential {
                0
            } else {
                quota::effective_daily_count(user, now, tz)
            },
            daily_limit: limit,
            remaining: quota::remaining(user, now, tz, limit),
            unlimited: user.has_own_credential,
        },
    }
}

/// 账户同步：首次登录后建行，已存在则刷新邮箱。
#[utoipa::path(
    post,
    path = "/account/sync",
    summary = "同步账户",
    request_body = SyncRequest,
    responses(
        (status = 200, description = "账户信息", body = AccountResponse),
        (status = 401, description = "缺少身份头", body = crate::error::ProblemDetails),
    ),
    tag = "Account"
)]
pub async fn sync_account(
    State(state): State<AppState>,
    auth: AuthSubject,
    Json(body): Json<SyncRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    let email = body
        .email
        .or(auth.email)
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::Validation("缺少邮箱（body.email 或 X-Auth-Email）".into()))?;

    let now = chrono::Utc::now().to_rfc3339();
    let user = state
        .users
        .upsert_on_sync(&auth.subject, &email, &now)
        .await?;
    Ok(Json(account_response(&user)))
}

/// 查询账户与额度状态。
#[utoipa::path(
    get,
    path = "/account",
    summary = "查询账户",
    responses(
        (status = 200, description = "账户信息", body = AccountResponse),
        (status = 404, description = "账户不存在", body = crate::error::ProblemDetails),
    ),
    tag = "Account"
)]
pub async fn get_account(
    State(state): State<AppState>,
    auth: AuthSubject,
) -> Result<Json<AccountResponse>, AppError> {
    let user = state
        .users
        .find_by_subject(&auth.subject)
        .await?
        .ok_or_else(|| AppError::NotFound("账户不存在，请先同步".into()))?;
    Ok(Json(account_response(&user)))
}

/// 录入自备密钥（服务端加密存储，后续生成不再受每日额度限制）。
#[utoipa::path(
    put,
    path = "/account/credential",
    summary = "录入自备密钥",
    request_body = CredentialRequest,
    responses(
        (status = 200, description = "保存成功", body = OkResponse),
        (status = 404, description = "账户不存在", body = crate::error::ProblemDetails),
        (status = 422, description = "密钥为空", body = crate::error::ProblemDetails),
    ),
    tag = "Account"
)]
pub async fn put_credential(
    State(state): State<AppState>,
    auth: AuthSubject,
    Json(body): Json<CredentialRequest>,
) -> Result<Json<OkResponse>, AppError> {
    let api_key = body.api_key.trim();
    if api_key.is_empty() {
        return Err(AppError::Validation("api_key 不能为空".into()));
    }

    let config = AppConfig::global();
    let encrypted = credential::encrypt_credential(&config.credentials.secret, api_key)?;

    let now = chrono::Utc::now().to_rfc3339();
    let updated = state
        .users
        .set_credential(&auth.subject, &encrypted, &now)
        .await?;
    if !updated {
        return Err(AppError::NotFound("账户不存在，请先同步".into()));
    }
    Ok(Json(OkResponse { ok: true }))
}

/// 删除自备密钥，回到免费额度。
///
/// 当天的旧计数保留在存储里：若仍在同一天，旧计数随删除重新生效。
#[utoipa::path(
    delete,
    path = "/account/credential",
    summary = "删除自备密钥",
    responses(
        (status = 200, description = "删除成功", body = OkResponse),
        (status = 404, description = "账户不存在", body = crate::error::ProblemDetails),
    ),
    tag = "Account"
)]
pub async fn delete_credential(
    State(state): State<AppState>,
    auth: AuthSubject,
) -> Result<Json<OkResponse>, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let updated = state.users.clear_credential(&auth.subject, &now).await?;
    if !updated {
        return Err(AppError::NotFound("账户不存在，请先同步".into()));
    }
    Ok(Json(OkResponse { ok: true }))
}

/// 删除账户；名下生成记录级联删除。
#[utoipa::path(
    delete,
    path = "/account",
    summary = "删除账户",
    responses(
        (status = 200, description = "删除成功", body = OkResponse),
        (status = 404, description = "账户不存在", body = crate::error::ProblemDetails),
    ),
    tag = "Account"
)]
pub async fn delete_account(
    State(state): State<AppState>,
    auth: AuthSubject,
) -> Result<Json<OkResponse>, AppError> {
    let deleted = state.users.delete_by_subject(&auth.subject).await?;
    if !deleted {
        return Err(AppError::NotFound("账户不存在".into()));
    }
    Ok(Json(OkResponse { ok: true }))
}
