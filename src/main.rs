//! MintGate 主入口

use std::sync::Arc;

use anyhow::{Context, Result};
use mintgate::{
    api,
    app_state::AppState,
    config::Config,
    domain::RootKeyMaterial,
    infrastructure::{db, logging},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量与配置
    dotenvy::dotenv().ok();

    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => Config::from_env_and_file(Some(path.as_str()))?,
        Err(_) => Config::from_env()?,
    };
    config.validate()?;

    // 2. 结构化日志
    logging::init_logging(&config.logging);

    tracing::info!("Starting MintGate token custody backend");

    // 3. 根密钥：解析失败是致命错误，绝不能用错误的密钥树启动
    let root_key = RootKeyMaterial::from_mnemonic(&config.keys.root_mnemonic)
        .context("Root key material is invalid, refusing to start")?;

    // 4. 数据库
    let pool = db::init_pool(&config.database).await?;
    tracing::info!("Database connected");

    // 生产环境建议单独运行迁移
    if std::env::var("SKIP_MIGRATIONS").is_err() {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Database migrations failed")?;
        tracing::info!("Database migrations completed");
    } else {
        tracing::info!("Database migrations skipped (SKIP_MIGRATIONS set)");
    }

    // 5. 装配应用状态
    let state = Arc::new(AppState::build(pool, config.clone(), root_key));

    // 6. 后台确认追踪
    let tracker = state.confirmation_tracker.clone();
    tokio::spawn(async move {
        tracker.start_background_monitor().await;
    });
    tracing::info!("Confirmation tracker started");

    // 7. HTTP服务
    let app = api::routes(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("Server listening on http://{}", config.server.bind_addr);
    tracing::info!("Swagger UI: http://{}/docs", config.server.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
