// 权限变更请求 Repository
//
// 并发约束依赖部分唯一索引 uq_authority_requests_open：
// 每个(mint_address, authority_kind)至多一条非终态请求。
// 状态转换在SQL层用WHERE status守卫，保证同一请求的单writer语义。

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{AuthorityKind, MutationStatus};

// ============ 领域模型 ============

/// 权限变更请求
///
/// 由AuthorityMutator独占创建；ConfirmationTracker只转换status，
/// 从不发起新请求。
#[derive(Debug, Clone)]
pub struct AuthorityMutationRequest {
    pub id: Uuid,
    pub mint_address: String,
    pub authority_kind: AuthorityKind,
    /// None = 撤销权限（链上不可逆）
    pub new_authority: Option<String>,
    pub status: MutationStatus,
    pub signature: Option<String>,
    pub error: Option<String>,
    pub poll_attempts: i32,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub confirmed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// 创建请求参数
#[derive(Debug, Clone)]
pub struct NewAuthorityRequest {
    /// 幂等键：客户端提供或服务端生成一次
    pub request_id: Uuid,
    pub mint_address: String,
    pub authority_kind: AuthorityKind,
    pub new_authority: Option<String>,
}

type RequestRow = (
    Uuid,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    i32,
    Option<chrono::DateTime<chrono::Utc>>,
    Option<chrono::DateTime<chrono::Utc>>,
    chrono::DateTime<chrono::Utc>,
    chrono::DateTime<chrono::Utc>,
);

fn row_to_request(row: RequestRow) -> Result<AuthorityMutationRequest> {
    let (
        id,
        mint_address,
        kind_str,
        new_authority,
        status_str,
        signature,
        error,
        poll_attempts,
        submitted_at,
        confirmed_at,
        created_at,
        updated_at,
    ) = row;

    let authority_kind = AuthorityKind::parse(&kind_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown authority kind in DB: {}", kind_str))?;
    let status = MutationStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown request status in DB: {}", status_str))?;

    Ok(AuthorityMutationRequest {
        id,
        mint_address,
        authority_kind,
        new_authority,
        status,
        signature,
        error,
        poll_attempts,
        submitted_at,
        confirmed_at,
        created_at,
        updated_at,
    })
}

const SELECT_COLUMNS: &str =
    "id, mint_address, authority_kind, new_authority, status, signature, error, \
     poll_attempts::INT4 as poll_attempts, submitted_at, confirmed_at, created_at, updated_at";

// ============ Repository Trait ============

#[async_trait]
pub trait AuthorityRequestRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthorityMutationRequest>>;

    /// 查询(mint, kind)的非终态请求
    async fn find_open(
        &self,
        mint_address: &str,
        kind: AuthorityKind,
    ) -> Result<Option<AuthorityMutationRequest>>;

    /// 原子插入Pending请求
    ///
    /// 返回None表示该(mint, kind)已有非终态请求（claim竞争失败）。
    async fn try_insert_pending(
        &self,
        params: NewAuthorityRequest,
    ) -> Result<Option<AuthorityMutationRequest>>;

    /// Pending → Submitted，记录交易签名和提交时间
    async fn mark_submitted(&self, id: Uuid, signature: &str) -> Result<bool>;

    /// Pending|Submitted → Failed，记录错误
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Submitted → Confirmed，记录确认时间
    async fn mark_confirmed(&self, id: Uuid) -> Result<bool>;

    /// Submitted → TimedOut（交易仍可能上链，与Failed区分）
    async fn mark_timed_out(&self, id: Uuid) -> Result<bool>;

    /// Pending → Cancelled（已提交的请求不可取消）
    async fn mark_cancelled(&self, id: Uuid) -> Result<bool>;

    /// 批量拉取待确认请求（按提交时间排序）
    async fn list_submitted(&self, limit: i64) -> Result<Vec<AuthorityMutationRequest>>;

    /// 增加轮询计数（用于退避）
    async fn increment_poll_attempts(&self, id: Uuid) -> Result<()>;

    /// 插入对账事件；request_id唯一约束保证恰好一次
    ///
    /// 返回true表示本次插入成功（应发布事件），false表示已存在。
    async fn insert_reconciliation_event(&self, request_id: Uuid, reason: &str) -> Result<bool>;
}

// ============ PostgreSQL 实现 ============

pub struct PgAuthorityRequestRepository {
    pool: PgPool,
}

impl PgAuthorityRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorityRequestRepository for PgAuthorityRequestRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthorityMutationRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM authority_requests WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    async fn find_open(
        &self,
        mint_address: &str,
        kind: AuthorityKind,
    ) -> Result<Option<AuthorityMutationRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM authority_requests
             WHERE mint_address = $1 AND authority_kind = $2
               AND status IN ('pending', 'submitted')",
            SELECT_COLUMNS
        ))
        .bind(mint_address)
        .bind(kind.to_db_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    async fn try_insert_pending(
        &self,
        params: NewAuthorityRequest,
    ) -> Result<Option<AuthorityMutationRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "INSERT INTO authority_requests (id, mint_address, authority_kind, new_authority, status)
             VALUES ($1, $2, $3, $4, 'pending')
             ON CONFLICT (mint_address, authority_kind)
                 WHERE status IN ('pending', 'submitted') DO NOTHING
             RETURNING {}",
            SELECT_COLUMNS
        ))
        .bind(params.request_id)
        .bind(&params.mint_address)
        .bind(params.authority_kind.to_db_string())
        .bind(&params.new_authority)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    async fn mark_submitted(&self, id: Uuid, signature: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE authority_requests
             SET status = 'submitted',
                 signature = $1,
                 submitted_at = CURRENT_TIMESTAMP,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = $2 AND status = 'pending'",
        )
        .bind(signature)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE authority_requests
             SET status = 'failed',
                 error = $1,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = $2 AND status IN ('pending', 'submitted')",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_confirmed(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE authority_requests
             SET status = 'confirmed',
                 confirmed_at = CURRENT_TIMESTAMP,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND status = 'submitted'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_timed_out(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE authority_requests
             SET status = 'timed_out',
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND status = 'submitted'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE authority_requests
             SET status = 'cancelled',
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_submitted(&self, limit: i64) -> Result<Vec<AuthorityMutationRequest>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM authority_requests
             WHERE status = 'submitted'
             ORDER BY submitted_at ASC
             LIMIT $1",
            SELECT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_request).collect()
    }

    async fn increment_poll_attempts(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE authority_requests
             SET poll_attempts = poll_attempts + 1,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_reconciliation_event(&self, request_id: Uuid, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO reconciliation_events (id, request_id, reason)
             VALUES ($1, $2, $3)
             ON CONFLICT (request_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(request_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
