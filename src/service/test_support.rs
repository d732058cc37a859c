// 服务层测试共用夹具
//
// MemoryAuthorityRepo用单把锁复现数据库的原子claim与状态守卫；
// MockChainRpc维护一张模拟链上mint权限表，会像真实节点一样
// 拒绝无权限签名者的set-authority。

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    domain::{AuthorityKind, MutationStatus},
    repository::{AuthorityMutationRequest, AuthorityRequestRepository, NewAuthorityRequest},
    service::{
        rpc_client::{ChainRpc, RpcError, SignatureStatus},
        transaction_builder,
    },
};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

// ============ 内存Repository ============

#[derive(Default)]
pub struct MemoryAuthorityRepo {
    rows: Mutex<HashMap<Uuid, AuthorityMutationRequest>>,
    reconciled: Mutex<HashSet<Uuid>>,
}

impl MemoryAuthorityRepo {
    /// 回拨提交时间，模拟长时间未确认的请求
    pub fn age_submission(&self, id: Uuid, by: chrono::Duration) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            row.submitted_at = row.submitted_at.map(|t| t - by);
        }
    }

    /// 回拨最近写入时间，模拟退避窗口已过
    pub fn age_updated_at(&self, id: Uuid, by: chrono::Duration) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            row.updated_at = row.updated_at - by;
        }
    }

    pub fn reconciliation_event_count(&self) -> usize {
        self.reconciled.lock().unwrap().len()
    }
}

#[async_trait]
impl AuthorityRequestRepository for MemoryAuthorityRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthorityMutationRequest>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn find_open(
        &self,
        mint_address: &str,
        kind: AuthorityKind,
    ) -> Result<Option<AuthorityMutationRequest>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|r| {
                r.mint_address == mint_address
                    && r.authority_kind == kind
                    && !r.status.is_terminal()
            })
            .cloned())
    }

    async fn try_insert_pending(
        &self,
        params: NewAuthorityRequest,
    ) -> Result<Option<AuthorityMutationRequest>> {
        let mut rows = self.rows.lock().unwrap();

        let open_exists = rows.values().any(|r| {
            r.mint_address == params.mint_address
                && r.authority_kind == params.authority_kind
                && !r.status.is_terminal()
        });
        if open_exists {
            return Ok(None);
        }

        let now = chrono::Utc::now();
        let record = AuthorityMutationRequest {
            id: params.request_id,
            mint_address: params.mint_address,
            authority_kind: params.authority_kind,
            new_authority: params.new_authority,
            status: MutationStatus::Pending,
            signature: None,
            error: None,
            poll_attempts: 0,
            submitted_at: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn mark_submitted(&self, id: Uuid, signature: &str) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == MutationStatus::Pending => {
                row.status = MutationStatus::Submitted;
                row.signature = Some(signature.to_string());
                row.submitted_at = Some(chrono::Utc::now());
                row.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row)
                if matches!(
                    row.status,
                    MutationStatus::Pending | MutationStatus::Submitted
                ) =>
            {
                row.status = MutationStatus::Failed;
                row.error = Some(error.to_string());
                row.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_confirmed(&self, id: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == MutationStatus::Submitted => {
                row.status = MutationStatus::Confirmed;
                row.confirmed_at = Some(chrono::Utc::now());
                row.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_timed_out(&self, id: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == MutationStatus::Submitted => {
                row.status = MutationStatus::TimedOut;
                row.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == MutationStatus::Pending => {
                row.status = MutationStatus::Cancelled;
                row.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_submitted(&self, limit: i64) -> Result<Vec<AuthorityMutationRequest>> {
        let rows = self.rows.lock().unwrap();
        let mut submitted: Vec<_> = rows
            .values()
            .filter(|r| r.status == MutationStatus::Submitted)
            .cloned()
            .collect();
        submitted.sort_by_key(|r| r.submitted_at);
        submitted.truncate(limit as usize);
        Ok(submitted)
    }

    async fn increment_poll_attempts(&self, id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            row.poll_attempts += 1;
            row.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn insert_reconciliation_event(&self, request_id: Uuid, _reason: &str) -> Result<bool> {
        Ok(self.reconciled.lock().unwrap().insert(request_id))
    }
}

// ============ 模拟链RPC ============

pub struct MockChainRpc {
    /// 模拟链状态：(mint, kind) → 当前权限地址（None = 已撤销）
    authorities: Mutex<HashMap<(String, AuthorityKind), Option<String>>>,
    /// 已接受交易的状态脚本：signature → 依次返回的状态（耗尽后重复末项）
    status_scripts: Mutex<HashMap<String, VecDeque<SignatureStatus>>>,
    submissions: Mutex<Vec<String>>,
    status_polls: Mutex<u64>,
    fail_submission_with: Mutex<Option<String>>,
    rate_limit_status_polls: Mutex<u32>,
    service_authority: String,
    next_signature: Mutex<u64>,
}

impl MockChainRpc {
    pub fn new(service_authority: &str) -> Self {
        Self {
            authorities: Mutex::new(HashMap::new()),
            status_scripts: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            status_polls: Mutex::new(0),
            fail_submission_with: Mutex::new(None),
            rate_limit_status_polls: Mutex::new(0),
            service_authority: service_authority.to_string(),
            next_signature: Mutex::new(0),
        }
    }

    /// 登记一个mint与freeze权限都由平台持有的mint
    pub fn register_mint(&self, mint_address: &str) {
        let mut authorities = self.authorities.lock().unwrap();
        for kind in [AuthorityKind::Mint, AuthorityKind::Freeze] {
            authorities.insert(
                (mint_address.to_string(), kind),
                Some(self.service_authority.clone()),
            );
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn status_poll_count(&self) -> u64 {
        *self.status_polls.lock().unwrap()
    }

    pub fn fail_next_submission(&self, message: &str) {
        *self.fail_submission_with.lock().unwrap() = Some(message.to_string());
    }

    /// 为指定签名设置状态脚本，每次轮询消费一项
    pub fn script_statuses(&self, signature: &str, statuses: Vec<SignatureStatus>) {
        self.status_scripts
            .lock()
            .unwrap()
            .insert(signature.to_string(), statuses.into());
    }

    /// 接下来n次状态轮询返回限流
    pub fn rate_limit_next_polls(&self, n: u32) {
        *self.rate_limit_status_polls.lock().unwrap() = n;
    }

    pub fn set_authority_on_chain(
        &self,
        mint_address: &str,
        kind: AuthorityKind,
        authority: Option<&str>,
    ) {
        self.authorities.lock().unwrap().insert(
            (mint_address.to_string(), kind),
            authority.map(|s| s.to_string()),
        );
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn submit_transaction(&self, tx_base64: &str) -> Result<String, RpcError> {
        self.submissions.lock().unwrap().push(tx_base64.to_string());

        if let Some(message) = self.fail_submission_with.lock().unwrap().take() {
            return Err(RpcError::Transport(message));
        }

        let instruction = transaction_builder::decode_set_authority_tx(tx_base64)
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        let key = (instruction.mint_address.clone(), instruction.authority_kind);
        let mut authorities = self.authorities.lock().unwrap();
        match authorities.get(&key) {
            Some(Some(current)) if *current == instruction.current_authority => {}
            Some(None) => {
                return Err(RpcError::Node {
                    code: -32002,
                    message: "authority has been revoked".into(),
                });
            }
            _ => {
                return Err(RpcError::Node {
                    code: -32002,
                    message: "signer is not the current authority".into(),
                });
            }
        }
        // 网络接受即视为权限已变更（确认只是时间问题）
        authorities.insert(key, instruction.new_authority.clone());

        let mut counter = self.next_signature.lock().unwrap();
        *counter += 1;
        Ok(format!("MockSig{}", *counter))
    }

    async fn get_signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError> {
        *self.status_polls.lock().unwrap() += 1;
        {
            let mut remaining = self.rate_limit_status_polls.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RpcError::RateLimited);
            }
        }

        let mut scripts = self.status_scripts.lock().unwrap();
        match scripts.get_mut(signature) {
            Some(script) => {
                if script.len() > 1 {
                    Ok(script.pop_front().unwrap_or(SignatureStatus::Processing))
                } else {
                    Ok(script
                        .front()
                        .cloned()
                        .unwrap_or(SignatureStatus::Processing))
                }
            }
            None => Ok(SignatureStatus::Processing),
        }
    }

    async fn get_authority(
        &self,
        mint_address: &str,
        kind: AuthorityKind,
    ) -> Result<Option<String>, RpcError> {
        let authorities = self.authorities.lock().unwrap();
        Ok(authorities
            .get(&(mint_address.to_string(), kind))
            .cloned()
            .flatten())
    }
}
