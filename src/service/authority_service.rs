// 权限变更编排服务
//
// 请求生命周期：校验 → 冲突检查 → Pending持久化 → 签名提交 → Submitted，
// 之后交给ConfirmationTracker追踪最终性。
// 提交失败不自动重试：权限变更是高风险操作，自动重试可能用
// 不同nonce双重提交，必须由调用方显式发起新请求。

use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use crate::{
    domain::{AuthorityKind, DerivedSigner, MutationStatus},
    repository::{
        is_unique_violation, AuthorityMutationRequest, AuthorityRequestRepository,
        NewAuthorityRequest,
    },
    service::{rpc_client::ChainRpc, transaction_builder},
    utils::address_validator::AddressValidator,
};

/// 权限变更业务错误
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// 同一(mint, kind)已存在非终态请求；调用方需等待终态或显式取消
    #[error("conflicting non-terminal request {existing} for this mint and authority kind")]
    Conflict { existing: Uuid },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("request not found")]
    NotFound,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// 提交参数
#[derive(Debug, Clone)]
pub struct SubmitAuthorityMutation {
    /// 幂等键；未提供时服务端生成一次
    pub request_id: Option<Uuid>,
    pub mint_address: String,
    pub authority_kind: AuthorityKind,
    /// None = 撤销权限（链上不可逆）
    pub new_authority: Option<String>,
}

pub struct AuthorityService {
    repo: Arc<dyn AuthorityRequestRepository>,
    rpc: Arc<dyn ChainRpc>,
    /// 当前权限持有者（平台签名密钥，启动时派生一次）
    authority_signer: Arc<DerivedSigner>,
}

impl AuthorityService {
    pub fn new(
        repo: Arc<dyn AuthorityRequestRepository>,
        rpc: Arc<dyn ChainRpc>,
        authority_signer: Arc<DerivedSigner>,
    ) -> Self {
        Self {
            repo,
            rpc,
            authority_signer,
        }
    }

    /// 提交权限变更请求
    ///
    /// 幂等性：相同request_id的重复提交返回已有请求，不产生重复记录。
    /// 提交失败的请求以Failed状态返回（错误记录在请求上），不抛HTTP错误。
    pub async fn submit(
        &self,
        params: SubmitAuthorityMutation,
    ) -> Result<AuthorityMutationRequest, AuthorityError> {
        if !AddressValidator::validate(&params.mint_address) {
            return Err(AuthorityError::InvalidAddress(format!(
                "mint address is not a valid base58 pubkey: {}",
                params.mint_address
            )));
        }

        if let Some(new_authority) = &params.new_authority {
            if !AddressValidator::validate(new_authority) {
                return Err(AuthorityError::InvalidAddress(format!(
                    "new authority is not a valid base58 pubkey: {}",
                    new_authority
                )));
            }
        }

        // 幂等重放：同一request_id直接返回已有请求，不做任何变更
        if let Some(request_id) = params.request_id {
            if let Some(existing) = self
                .repo
                .find_by_id(request_id)
                .await
                .context("Failed to look up request by idempotency key")?
            {
                tracing::debug!(
                    request_id = %request_id,
                    status = %existing.status,
                    "Idempotent replay, returning existing request"
                );
                return Ok(existing);
            }
        }

        // 冲突检查：同一(mint, kind)至多一条非终态请求。
        // 持有相同request_id的非终态请求是并发重放而非冲突
        if let Some(open) = self
            .repo
            .find_open(&params.mint_address, params.authority_kind)
            .await
            .context("Failed to check for open requests")?
        {
            if params.request_id == Some(open.id) {
                return Ok(open);
            }
            return Err(AuthorityError::Conflict { existing: open.id });
        }

        let request_id = params.request_id.unwrap_or_else(Uuid::new_v4);

        let insert_result = self
            .repo
            .try_insert_pending(NewAuthorityRequest {
                request_id,
                mint_address: params.mint_address.clone(),
                authority_kind: params.authority_kind,
                new_authority: params.new_authority.clone(),
            })
            .await;

        let request = match insert_result {
            Ok(Some(request)) => request,
            Ok(None) => {
                // 竞争中另一个writer先建立了非终态请求。
                // 对手方可能持有相同的request_id（同幂等键并发提交），
                // 先按id重放，否则按(mint, kind)报冲突
                if let Some(existing) = self
                    .repo
                    .find_by_id(request_id)
                    .await
                    .context("Failed to re-read request after claim race")?
                {
                    return Ok(existing);
                }
                let open = self
                    .repo
                    .find_open(&params.mint_address, params.authority_kind)
                    .await
                    .context("Failed to re-read open request after claim race")?;
                return Err(match open {
                    Some(winner) => AuthorityError::Conflict { existing: winner.id },
                    None => AuthorityError::Internal(anyhow::anyhow!(
                        "claim race lost but no open request visible"
                    )),
                });
            }
            // ON CONFLICT只仲裁(mint, kind)部分唯一索引；同request_id的
            // 并发插入触发主键23505，按幂等重放处理而非报错
            Err(e) if is_unique_violation(&e) => {
                return self
                    .repo
                    .find_by_id(request_id)
                    .await
                    .context("Failed to re-read request after duplicate id insert")?
                    .ok_or_else(|| {
                        AuthorityError::Internal(anyhow::anyhow!(
                            "duplicate id insert but request {} not visible",
                            request_id
                        ))
                    });
            }
            Err(e) => {
                return Err(AuthorityError::Internal(
                    e.context("Failed to persist pending request"),
                ));
            }
        };

        tracing::info!(
            request_id = %request.id,
            mint = %request.mint_address,
            kind = %request.authority_kind,
            revoke = request.new_authority.is_none(),
            "Authority mutation request accepted"
        );

        // 构造 + 签名 + 提交
        let wire = transaction_builder::build_set_authority_tx(
            &self.authority_signer,
            &params.mint_address,
            params.authority_kind,
            params.new_authority.as_deref(),
        )?;

        match self.rpc.submit_transaction(&wire).await {
            Ok(signature) => {
                let transitioned = self
                    .repo
                    .mark_submitted(request.id, &signature)
                    .await
                    .context("Failed to mark request submitted")?;
                if !transitioned {
                    tracing::warn!(
                        request_id = %request.id,
                        "Request left pending state before submission could be recorded"
                    );
                }
            }
            Err(e) => {
                // 记录在请求上并返回Failed记录；不自动重试
                tracing::warn!(
                    request_id = %request.id,
                    error = %e,
                    "Network submission failed, marking request failed"
                );
                self.repo
                    .mark_failed(request.id, &e.to_string())
                    .await
                    .context("Failed to mark request failed")?;
            }
        }

        self.repo
            .find_by_id(request.id)
            .await
            .context("Failed to re-read request after submission")?
            .ok_or_else(|| AuthorityError::Internal(anyhow::anyhow!("request vanished")))
    }

    /// 取消请求
    ///
    /// 仅允许取消Pending请求。一旦Submitted，交易可能仍会上链，
    /// 取消只会误导调用方，因此拒绝。
    pub async fn cancel(&self, request_id: Uuid) -> Result<AuthorityMutationRequest, AuthorityError> {
        let request = self
            .repo
            .find_by_id(request_id)
            .await
            .context("Failed to look up request")?
            .ok_or(AuthorityError::NotFound)?;

        match request.status {
            MutationStatus::Pending => {}
            MutationStatus::Submitted => {
                return Err(AuthorityError::InvalidState(
                    "request already submitted; the transaction may still land on-chain".into(),
                ));
            }
            terminal => {
                return Err(AuthorityError::InvalidState(format!(
                    "request already in terminal state: {}",
                    terminal
                )));
            }
        }

        if !self
            .repo
            .mark_cancelled(request_id)
            .await
            .context("Failed to cancel request")?
        {
            return Err(AuthorityError::InvalidState(
                "request is no longer pending".into(),
            ));
        }

        tracing::info!(request_id = %request_id, "Authority mutation request cancelled");

        self.repo
            .find_by_id(request_id)
            .await
            .context("Failed to re-read cancelled request")?
            .ok_or(AuthorityError::NotFound)
    }

    /// 查询请求状态
    pub async fn get(
        &self,
        request_id: Uuid,
    ) -> Result<AuthorityMutationRequest, AuthorityError> {
        self.repo
            .find_by_id(request_id)
            .await
            .context("Failed to look up request")?
            .ok_or(AuthorityError::NotFound)
    }
}
