//! 代币权限变更 API
//!
//! mint/freeze权限的转移与撤销。撤销（new_authority = null）在链上
//! 不可逆，接口层不做额外确认，审批由上游流程负责。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::{
        middleware::AuthInfo,
        response::{success_response, ApiResponse},
    },
    app_state::AppState,
    domain::{AuthorityKind, MutationStatus},
    error::AppError,
    repository::AuthorityMutationRequest,
    service::authority_service::{AuthorityError, SubmitAuthorityMutation},
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AuthorityMutationReq {
    /// 幂等键；省略时服务端生成
    pub request_id: Option<Uuid>,
    pub mint_address: String,
    pub authority_kind: AuthorityKind,
    /// null = 撤销权限（不可逆）
    pub new_authority: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthorityMutationResp {
    pub request_id: Uuid,
    pub mint_address: String,
    pub authority_kind: AuthorityKind,
    pub new_authority: Option<String>,
    /// 呈现状态；TimedOut上报为"unconfirmed"（交易仍可能上链，
    /// 与failed严格区分）
    pub status: String,
    pub signature: Option<String>,
    pub error: Option<String>,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub confirmed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn presentation_status(status: MutationStatus) -> &'static str {
    match status {
        MutationStatus::TimedOut => "unconfirmed",
        other => other.to_db_string(),
    }
}

impl From<AuthorityMutationRequest> for AuthorityMutationResp {
    fn from(request: AuthorityMutationRequest) -> Self {
        Self {
            request_id: request.id,
            mint_address: request.mint_address,
            authority_kind: request.authority_kind,
            new_authority: request.new_authority,
            status: presentation_status(request.status).to_string(),
            signature: request.signature,
            error: request.error,
            submitted_at: request.submitted_at,
            confirmed_at: request.confirmed_at,
            created_at: request.created_at,
        }
    }
}

impl From<AuthorityError> for AppError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::InvalidAddress(msg) => AppError::invalid_address(msg),
            AuthorityError::Conflict { existing } => AppError::conflict(format!(
                "a non-terminal request {} already exists for this mint and authority kind",
                existing
            )),
            AuthorityError::NotFound => AppError::not_found("Authority request not found"),
            AuthorityError::InvalidState(msg) => AppError::bad_request(msg),
            AuthorityError::Internal(e) => AppError::internal(e.to_string()),
        }
    }
}

/// 提交权限变更请求
#[utoipa::path(
    post,
    path = "/api/v1/token/authority",
    request_body = AuthorityMutationReq,
    responses(
        (status = 200, description = "请求已受理；status反映提交结果"),
        (status = 400, description = "地址无效"),
        (status = 401, description = "缺少调用方身份"),
        (status = 409, description = "同一(mint, kind)已存在非终态请求")
    ),
    tag = "authority"
)]
pub async fn submit_mutation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<AuthorityMutationReq>,
) -> Result<Json<ApiResponse<AuthorityMutationResp>>, AppError> {
    tracing::info!(
        caller = %auth.user_id,
        mint = %req.mint_address,
        kind = %req.authority_kind,
        revoke = req.new_authority.is_none(),
        "Authority mutation requested"
    );

    let request = state
        .authority_service
        .submit(SubmitAuthorityMutation {
            request_id: req.request_id,
            mint_address: req.mint_address,
            authority_kind: req.authority_kind,
            new_authority: req.new_authority,
        })
        .await?;

    success_response(request.into())
}

/// 查询权限变更请求状态
#[utoipa::path(
    get,
    path = "/api/v1/token/authority/{id}",
    params(("id" = Uuid, Path, description = "请求ID")),
    responses(
        (status = 200, description = "请求详情"),
        (status = 404, description = "请求不存在")
    ),
    tag = "authority"
)]
pub async fn get_mutation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AuthorityMutationResp>>, AppError> {
    tracing::debug!(caller = %auth.user_id, request_id = %id, "Authority request status queried");

    let request = state.authority_service.get(id).await?;

    success_response(request.into())
}

/// 取消尚未提交的请求
#[utoipa::path(
    post,
    path = "/api/v1/token/authority/{id}/cancel",
    params(("id" = Uuid, Path, description = "请求ID")),
    responses(
        (status = 200, description = "请求已取消"),
        (status = 400, description = "请求已提交或已达终态，不可取消"),
        (status = 404, description = "请求不存在")
    ),
    tag = "authority"
)]
pub async fn cancel_mutation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AuthorityMutationResp>>, AppError> {
    tracing::info!(caller = %auth.user_id, request_id = %id, "Authority request cancellation");

    let request = state.authority_service.cancel(id).await?;

    success_response(request.into())
}
