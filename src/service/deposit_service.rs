// 存款地址签发服务
//
// getOrCreate语义：查活跃记录 → 未命中则派生并原子插入 → 竞争输家回读胜者记录。
// 同一(user, asset)的重复调用永远返回同一地址（确定性 + 幂等）。

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::{
    domain::RootKeyMaterial,
    infrastructure::event_bus::{DomainEvent, EventBus},
    repository::{is_unique_violation, DepositAddress, DepositAddressRepository, NewDepositAddress},
};

/// claim竞争的重读上限。每次失败意味着另一个writer刚插入了
/// 活跃记录，下一轮find_active即可命中
const MAX_CLAIM_ATTEMPTS: u32 = 3;

pub struct DepositService {
    repo: Arc<dyn DepositAddressRepository>,
    root_key: Arc<RootKeyMaterial>,
    events: EventBus,
}

impl DepositService {
    pub fn new(
        repo: Arc<dyn DepositAddressRepository>,
        root_key: Arc<RootKeyMaterial>,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            root_key,
            events,
        }
    }

    /// 获取或创建用户的存款地址
    ///
    /// 派生索引在(user_id, asset)命名空间内分配，从0开始；
    /// 索引与记录在同一语句中持久化，不可能复用。
    pub async fn get_or_create(&self, user_id: Uuid, asset: &str) -> Result<DepositAddress> {
        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            if let Some(existing) = self
                .repo
                .find_active(user_id, asset)
                .await
                .context("Failed to look up active deposit address")?
            {
                return Ok(existing);
            }

            let index = self
                .repo
                .next_derivation_index(user_id, asset)
                .await
                .context("Failed to allocate derivation index")?;

            let address = self.root_key.derive(user_id, index as u32).address();

            match self
                .repo
                .try_insert_active(NewDepositAddress {
                    user_id,
                    asset: asset.to_string(),
                    address: address.clone(),
                    derivation_index: index,
                })
                .await
            {
                Ok(Some(record)) => {
                    tracing::info!(
                        user_id = %user_id,
                        asset = %asset,
                        address = %record.address,
                        derivation_index = record.derivation_index,
                        "Deposit address issued"
                    );

                    self.events.publish(DomainEvent::DepositAddressIssued {
                        user_id,
                        asset: asset.to_string(),
                        address: record.address.clone(),
                    });

                    return Ok(record);
                }
                Ok(None) => {
                    // 输掉claim竞争，回读胜者的记录
                    tracing::debug!(
                        user_id = %user_id,
                        asset = %asset,
                        attempt = attempt,
                        "Lost deposit address claim race, re-reading winner"
                    );
                }
                Err(e) if is_unique_violation(&e) => {
                    // 索引唯一约束竞争，同样回读
                    tracing::debug!(
                        user_id = %user_id,
                        asset = %asset,
                        attempt = attempt,
                        "Derivation index claimed concurrently, re-reading"
                    );
                }
                Err(e) => return Err(e).context("Failed to persist deposit address"),
            }
        }

        // 竞争耗尽重读上限后活跃记录必然存在
        self.repo
            .find_active(user_id, asset)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No active deposit address after {} claim attempts",
                    MAX_CLAIM_ATTEMPTS
                )
            })
    }

    /// 替换地址：旧记录标记superseded（唯一变更路径，历史保留），
    /// 新记录由下一次get_or_create以新索引签发
    pub async fn supersede(&self, user_id: Uuid, asset: &str) -> Result<Option<DepositAddress>> {
        let Some(active) = self.repo.find_active(user_id, asset).await? else {
            return Ok(None);
        };

        let superseded = self
            .repo
            .supersede(active.id)
            .await
            .context("Failed to supersede deposit address")?;

        if !superseded {
            // 另一个writer先一步替换了它
            return Ok(None);
        }

        tracing::info!(
            user_id = %user_id,
            asset = %asset,
            address = %active.address,
            "Deposit address superseded"
        );

        Ok(Some(active))
    }

    /// 用户全部地址记录（含历史）
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DepositAddress>> {
        self.repo.list_by_user(user_id).await
    }
}
