// 存款地址账本 Repository
//
// 账本只追加：记录从不删除，替换地址 = 旧记录标记superseded + 新记录。
// 并发claim依赖部分唯一索引 uq_deposit_addresses_active，
// 不使用进程内锁（服务可能多实例部署）。

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

// ============ 领域模型 ============

/// 存款地址记录
///
/// 不变量：每个(user_id, asset)至多一条未被替换的记录；
/// address可由(根密钥, user_id, derivation_index)确定性复现。
#[derive(Debug, Clone)]
pub struct DepositAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub asset: String,
    pub address: String,
    pub derivation_index: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub superseded_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DepositAddress {
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }
}

/// 创建存款地址参数
#[derive(Debug, Clone)]
pub struct NewDepositAddress {
    pub user_id: Uuid,
    pub asset: String,
    pub address: String,
    pub derivation_index: i64,
}

type DepositAddressRow = (
    Uuid,
    Uuid,
    String,
    String,
    i64,
    chrono::DateTime<chrono::Utc>,
    Option<chrono::DateTime<chrono::Utc>>,
);

fn row_to_address(row: DepositAddressRow) -> DepositAddress {
    let (id, user_id, asset, address, derivation_index, created_at, superseded_at) = row;
    DepositAddress {
        id,
        user_id,
        asset,
        address,
        derivation_index,
        created_at,
        superseded_at,
    }
}

const SELECT_COLUMNS: &str =
    "id, user_id, asset, address, derivation_index::BIGINT as derivation_index, \
     created_at, superseded_at";

// ============ Repository Trait ============

#[async_trait]
pub trait DepositAddressRepository: Send + Sync {
    /// 查询(user_id, asset)的活跃地址记录
    async fn find_active(&self, user_id: Uuid, asset: &str) -> Result<Option<DepositAddress>>;

    /// 下一个派生索引（(user_id, asset)命名空间内单调，从0开始）
    async fn next_derivation_index(&self, user_id: Uuid, asset: &str) -> Result<i64>;

    /// 原子插入活跃记录（insert-if-absent claim）
    ///
    /// 返回None表示并发竞争中输给了另一个writer（活跃记录已存在），
    /// 调用方应重新读取并返回胜者的记录。
    async fn try_insert_active(&self, params: NewDepositAddress)
        -> Result<Option<DepositAddress>>;

    /// 标记记录已被替换（唯一的变更路径，从不删除历史）
    async fn supersede(&self, id: Uuid) -> Result<bool>;

    /// 列出用户全部地址记录（含已替换的历史）
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<DepositAddress>>;
}

// ============ PostgreSQL 实现 ============

pub struct PgDepositAddressRepository {
    pool: PgPool,
}

impl PgDepositAddressRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositAddressRepository for PgDepositAddressRepository {
    async fn find_active(&self, user_id: Uuid, asset: &str) -> Result<Option<DepositAddress>> {
        let row = sqlx::query_as::<_, DepositAddressRow>(&format!(
            "SELECT {} FROM deposit_addresses
             WHERE user_id = $1 AND asset = $2 AND superseded_at IS NULL",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .bind(asset)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_address))
    }

    async fn next_derivation_index(&self, user_id: Uuid, asset: &str) -> Result<i64> {
        let (next,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(derivation_index) + 1, 0)::BIGINT
             FROM deposit_addresses
             WHERE user_id = $1 AND asset = $2",
        )
        .bind(user_id)
        .bind(asset)
        .fetch_one(&self.pool)
        .await?;

        Ok(next)
    }

    async fn try_insert_active(
        &self,
        params: NewDepositAddress,
    ) -> Result<Option<DepositAddress>> {
        // ON CONFLICT对准部分唯一索引：活跃记录已存在时不插入，
        // RETURNING为空即表示输掉了claim竞争
        let row = sqlx::query_as::<_, DepositAddressRow>(&format!(
            "INSERT INTO deposit_addresses (id, user_id, asset, address, derivation_index)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, asset) WHERE superseded_at IS NULL DO NOTHING
             RETURNING {}",
            SELECT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(params.user_id)
        .bind(&params.asset)
        .bind(&params.address)
        .bind(params.derivation_index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_address))
    }

    async fn supersede(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deposit_addresses
             SET superseded_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND superseded_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<DepositAddress>> {
        let rows = sqlx::query_as::<_, DepositAddressRow>(&format!(
            "SELECT {} FROM deposit_addresses
             WHERE user_id = $1
             ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_address).collect())
    }
}
