//! 存款地址 API
//!
//! 地址按(user, asset)确定性签发：重复请求返回同一地址，
//! 轮换后旧地址保留历史、新地址用下一个派生索引。

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    api::{
        middleware::AuthInfo,
        response::{success_response, ApiResponse},
    },
    app_state::AppState,
    error::AppError,
    repository::DepositAddress,
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DepositAddressReq {
    /// 资产标识，如 "SPL-USDX"
    pub asset: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DepositAddressResp {
    pub address: String,
    pub asset: String,
    pub derivation_index: i64,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<DepositAddress> for DepositAddressResp {
    fn from(record: DepositAddress) -> Self {
        let active = record.is_active();
        Self {
            address: record.address,
            asset: record.asset,
            derivation_index: record.derivation_index,
            active,
            created_at: record.created_at,
        }
    }
}

fn validate_asset(asset: &str) -> Result<(), AppError> {
    if asset.is_empty() || asset.len() > 32 {
        return Err(AppError::bad_request(
            "asset must be a non-empty identifier of at most 32 chars",
        ));
    }
    if !asset
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::bad_request(
            "asset may only contain alphanumerics, '-' and '_'",
        ));
    }
    Ok(())
}

/// 获取或创建存款地址（幂等）
#[utoipa::path(
    post,
    path = "/api/v1/deposit/address",
    request_body = DepositAddressReq,
    responses(
        (status = 200, description = "用户在该资产下的唯一活跃地址"),
        (status = 400, description = "资产标识无效"),
        (status = 401, description = "缺少调用方身份")
    ),
    tag = "deposit"
)]
pub async fn get_or_create_address(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<DepositAddressReq>,
) -> Result<Json<ApiResponse<DepositAddressResp>>, AppError> {
    validate_asset(&req.asset)?;

    let record = state
        .deposit_service
        .get_or_create(auth.user_id, &req.asset)
        .await?;

    success_response(record.into())
}

/// 轮换存款地址：旧地址标记superseded，随即以下一个派生索引签发新地址
#[utoipa::path(
    post,
    path = "/api/v1/deposit/address/rotate",
    request_body = DepositAddressReq,
    responses(
        (status = 200, description = "新签发的活跃地址"),
        (status = 400, description = "资产标识无效")
    ),
    tag = "deposit"
)]
pub async fn rotate_address(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<DepositAddressReq>,
) -> Result<Json<ApiResponse<DepositAddressResp>>, AppError> {
    validate_asset(&req.asset)?;

    let superseded = state
        .deposit_service
        .supersede(auth.user_id, &req.asset)
        .await?;

    if let Some(old) = &superseded {
        info!(
            user_id = %auth.user_id,
            asset = %req.asset,
            old_address = %old.address,
            "Deposit address rotation requested"
        );
    }

    let record = state
        .deposit_service
        .get_or_create(auth.user_id, &req.asset)
        .await?;

    success_response(record.into())
}

/// 用户全部地址记录（含已轮换的历史地址）
#[utoipa::path(
    get,
    path = "/api/v1/deposit/addresses",
    responses(
        (status = 200, description = "地址列表")
    ),
    tag = "deposit"
)]
pub async fn list_addresses(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<ApiResponse<Vec<DepositAddressResp>>>, AppError> {
    let mut records = state.deposit_service.list_for_user(auth.user_id).await?;
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    success_response(records.into_iter().map(Into::into).collect())
}
