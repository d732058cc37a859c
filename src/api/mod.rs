use std::sync::Arc;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::{
    api::middleware::{auth_middleware, trace_id_middleware},
    app_state::AppState,
};

pub mod authority_api;
pub mod deposit_api;
pub mod handlers;
pub mod middleware;
pub mod response; // 统一响应格式

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::healthz,
        handlers::api_health,
        deposit_api::get_or_create_address,
        deposit_api::rotate_address,
        deposit_api::list_addresses,
        authority_api::submit_mutation,
        authority_api::get_mutation,
        authority_api::cancel_mutation,
    ),
    components(schemas(
        handlers::HealthResponse,
        deposit_api::DepositAddressReq,
        deposit_api::DepositAddressResp,
        authority_api::AuthorityMutationReq,
        authority_api::AuthorityMutationResp,
        crate::domain::AuthorityKind,
        crate::domain::MutationStatus,
    )),
    tags(
        (name = "deposit", description = "存款地址签发与轮换"),
        (name = "authority", description = "代币权限变更编排"),
        (name = "health", description = "健康检查")
    )
)]
struct ApiDoc;

pub fn routes(state: Arc<AppState>) -> Router {
    // 公开路由（探针与文档，不需要调用方身份）
    let public_routes = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/v1/health", get(handlers::api_health))
        .merge(utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()));

    // 存款地址路由：需要网关注入的用户身份
    let deposit_routes = Router::new()
        .route(
            "/api/v1/deposit/address",
            post(deposit_api::get_or_create_address),
        )
        .route(
            "/api/v1/deposit/address/rotate",
            post(deposit_api::rotate_address),
        )
        .route("/api/v1/deposit/addresses", get(deposit_api::list_addresses))
        .layer(from_fn(auth_middleware));

    // 权限变更路由：与存款路由同样要求网关注入的调用方身份，
    // 撤销等不可逆操作必须可归因到具体操作者
    let authority_routes = Router::new()
        .route(
            "/api/v1/token/authority",
            post(authority_api::submit_mutation),
        )
        .route(
            "/api/v1/token/authority/:id",
            get(authority_api::get_mutation),
        )
        .route(
            "/api/v1/token/authority/:id/cancel",
            post(authority_api::cancel_mutation),
        )
        .layer(from_fn(auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(deposit_routes)
        .merge(authority_routes)
        .layer(from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::Config,
        domain::RootKeyMaterial,
    };

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    /// 惰性连接池：路由测试在中间件层终止，不触达数据库
    fn test_router() -> Router {
        std::env::set_var("ROOT_MNEMONIC", TEST_MNEMONIC);
        let config = Config::from_env().unwrap();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://root@localhost:26257/mintgate_test?sslmode=disable")
            .unwrap();
        let root_key = RootKeyMaterial::from_mnemonic(TEST_MNEMONIC).unwrap();
        routes(Arc::new(AppState::build(pool, config, root_key)))
    }

    #[tokio::test]
    async fn test_authority_routes_require_caller_identity() {
        let body = serde_json::json!({
            "mint_address": "So11111111111111111111111111111111111111112",
            "authority_kind": "mint",
            "new_authority": null,
        });

        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/token/authority")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_deposit_routes_require_caller_identity() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/deposit/address")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"asset":"SPL-X"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_endpoint_is_public() {
        let response = test_router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
