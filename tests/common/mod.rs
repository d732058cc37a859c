//! 测试辅助模块

use mintgate::infrastructure::db::PgPool;

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// 测试数据库URL
pub fn test_database_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://root@localhost:26257/mintgate_test?sslmode=disable".into())
}

/// 创建测试数据库连接池并应用迁移
pub async fn create_test_pool() -> PgPool {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_database_url())
        .await
        .expect("Failed to create test database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    pool
}

/// 清理测试数据（按依赖顺序删除）
pub async fn cleanup_test_data(pool: &PgPool) {
    for table in [
        "reconciliation_events",
        "authority_requests",
        "deposit_addresses",
    ] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(pool)
            .await
            .expect("Failed to clean test table");
    }
}
