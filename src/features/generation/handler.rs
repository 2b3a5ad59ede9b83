use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
};

use crate::error::AppError;
use crate::state::AppState;
use crate::subject::AuthSubject;

use super::models::{
    EditRequest, GenerateRequest, GenerationListResponse, GenerationRecordView,
    GenerationResponse, HistoryQuery, SegmentRequest, SegmentResponse,
};

pub fn create_generation_router() -> Router<AppState> {
    Router::new()
        .route("/images/generate", post(generate_image))
        .route("/images/edit", post(edit_image))
        .route("/images/segment", post(segment_image))
        .route("/images", get(list_generations))
        .route(
            "/images/:id",
            get(get_generation).delete(delete_generation),
        )
}

/// 文生图。
#[utoipa::path(
    post,
    path = "/images/generate",
    summary = "文生图",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "生成成功", body = GenerationResponse),
        (status = 404, description = "账户不存在", body = crate::error::ProblemDetails),
        (status = 429, description = "今日额度已用完", body = crate::error::ProblemDetails),
        (status = 502, description = "上游失败或无输出", body = crate::error::ProblemDetails),
    ),
    tag = "Generation"
)]
pub async fn generate_image(
    State(state): State<AppState>,
    auth: AuthSubject,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerationResponse>, AppError> {
    let resp = state.service.generate(&auth.subject, body).await?;
    Ok(Json(resp))
}

/// 图生图（编辑）。
#[utoipa::path(
    post,
    path = "/images/edit",
    summary = "编辑图片",
    request_body = EditRequest,
    responses(
        (status = 200, description = "编辑成功", body = GenerationResponse),
        (status = 429, description = "今日额度已用完", body = crate::error::ProblemDetails),
    ),
    tag = "Generation"
)]
pub async fn edit_image(
    State(state): State<AppState>,
    auth: AuthSubject,
    Json(body): Json<EditRequest>,
) -> Result<Json<GenerationResponse>, AppError> {
    let resp = state.service.edit(&auth.subject, body).await?;
    Ok(Json(resp))
}

/// 图像分割。
#[utoipa::path(
    post,
    path = "/images/segment",
    summary = "图像分割",
    request_body = SegmentRequest,
    responses(
        (status = 200, description = "分割成功", body = SegmentResponse),
        (status = 429, description = "今日额度已用完", body = crate::error::ProblemDetails),
    ),
    tag = "Generation"
)]
pub async fn segment_image(
    State(state): State<AppState>,
    auth: AuthSubject,
    Json(body): Json<SegmentRequest>,
) -> Result<Json<SegmentResponse>, AppError> {
    let resp = state.service.segment(&auth.subject, body).await?;
    Ok(Json(resp))
}

/// 生成历史（按时间倒序分页）。
#[utoipa::path(
    get,
    path = "/images",
    summary = "生成历史",
    params(HistoryQuery),
    responses(
        (status = 200, description = "历史列表", body = GenerationListResponse),
        (status = 404, description = "账户不存在", body = crate::error::ProblemDetails),
    ),
    tag = "Generation"
)]
pub async fn list_generations(
    State(state): State<AppState>,
    auth: AuthSubject,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<GenerationListResponse>, AppError> {
    let user = state
        .users
        .find_by_subject(&auth.subject)
        .await?
        .ok_or_else(|| AppError::NotFound("账户不存在，请先同步".into()))?;

    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let items = state
        .generations
        .list_for_user(user.id, limit, offset)
        .await?
        .into_iter()
        .map(GenerationRecordView::from)
        .collect();

    Ok(Json(GenerationListResponse {
        items,
        limit,
        offset,
    }))
}

/// 读取单条生成记录（仅限本人）。
#[utoipa::path(
    get,
    path = "/images/{id}",
    summary = "查询生成记录",
    params(("id" = String, Path, description = "记录 ID")),
    responses(
        (status = 200, description = "记录详情", body = GenerationRecordView),
        (status = 404, description = "记录不存在", body = crate::error::ProblemDetails),
    ),
    tag = "Generation"
)]
pub async fn get_generation(
    State(state): State<AppState>,
    auth: AuthSubject,
    Path(id): Path<String>,
) -> Result<Json<GenerationRecordView>, AppError> {
    let user = state
        .users
        .find_by_subject(&auth.subject)
        .await?
        .ok_or_else(|| AppError::NotFound("账户不存在，请先同步".into()))?;

    let record = state
        .generations
        .find_for_user(&id, user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("记录不存在".into()))?;
    Ok(Json(record.into()))
}

/// 删除单条生成记录（仅限本人）；不影响账户本身。
#[utoipa::path(
    delete,
    path = "/images/{id}",
    summary = "删除生成记录",
    params(("id" = String, Path, description = "记录 ID")),
    responses(
        (status = 200, description = "删除成功", body = crate::features::account::models::OkResponse),
        (status = 404, description = "记录不存在", body = crate::error::ProblemDetails),
    ),
    tag = "Generation"
)]
pub async fn delete_generation(
    State(state): State<AppState>,
    auth: AuthSubject,
    Path(id): Path<String>,
) -> Result<Json<crate::features::account::models::OkResponse>, AppError> {
    let user = state
        .users
        .find_by_subject(&auth.subject)
        .await?
        .ok_or_else(|| AppError::NotFound("账户不存在，请先同步".into()))?;

    let deleted = state.generations.delete_for_user(&id, user.id).await?;
    if !deleted {
        return Err(AppError::NotFound("记录不存在".into()));
    }
    Ok(Json(crate::features::account::models::OkResponse {
        ok: true,
    }))
}
