//! 调用方身份中间件
//!
//! 本服务部署在API网关之后，认证由网关完成；这里只信任并解析
//! 网关注入的 X-User-Id 头，注入到请求扩展供handler使用。
//! 直接暴露本服务属于部署错误。

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::error::AppError;

/// 调用方身份（从网关头中提取）
#[derive(Debug, Clone, Copy)]
pub struct AuthInfo {
    pub user_id: Uuid,
}

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    if req.method() == axum::http::Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    let user_id = req
        .headers()
        .get("X-User-Id")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Missing X-User-Id header"))?;

    let user_id = Uuid::parse_str(user_id)
        .map_err(|_| AppError::unauthorized("X-User-Id is not a valid UUID"))?;

    req.extensions_mut().insert(AuthInfo { user_id });

    Ok(next.run(req).await)
}
