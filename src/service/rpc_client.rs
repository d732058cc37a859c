// 链RPC客户端 - 生产级实现
// 核心只依赖抽象能力 {submit, get_status, get_authority}，
// 具体区块链客户端是外部协作者

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{config::ChainConfig, domain::AuthorityKind};

/// RPC层错误
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    /// 节点限流，调用方应退避后重试（仅轮询场景；提交从不自动重试）
    #[error("rate limited by RPC node")]
    RateLimited,
    #[error("rpc error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("unexpected rpc response: {0}")]
    Malformed(String),
}

/// 交易最终性状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// 网络尚未确认
    Processing,
    /// 已最终确认
    Confirmed,
    /// 链上执行失败
    Failed(String),
}

// ============ 抽象能力 ============

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// 提交已签名交易，返回交易签名
    ///
    /// 使用短的固定超时；失败不在本层重试（权限变更是高风险操作，
    /// 重试可能用不同nonce双重提交）。
    async fn submit_transaction(&self, tx_base64: &str) -> Result<String, RpcError>;

    /// 查询交易最终性状态
    async fn get_signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError>;

    /// 读取mint当前的权限地址（None = 权限已撤销）
    async fn get_authority(
        &self,
        mint_address: &str,
        kind: AuthorityKind,
    ) -> Result<Option<String>, RpcError>;
}

// ============ JSON-RPC 实现 ============

pub struct JsonRpcChainClient {
    http_client: reqwest::Client,
    rpc_url: String,
}

impl JsonRpcChainClient {
    pub fn new(config: &ChainConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.submit_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            rpc_url: config.rpc_url.clone(),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcError::RateLimited);
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        if let Some(err) = payload.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            // 部分节点通过JSON-RPC错误码报限流
            if code == 429 || message.to_lowercase().contains("too many requests") {
                return Err(RpcError::RateLimited);
            }
            return Err(RpcError::Node { code, message });
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Malformed("missing result field".into()))
    }
}

#[async_trait]
impl ChainRpc for JsonRpcChainClient {
    async fn submit_transaction(&self, tx_base64: &str) -> Result<String, RpcError> {
        let result = self
            .rpc_call(
                "sendTransaction",
                json!([tx_base64, { "encoding": "base64" }]),
            )
            .await?;

        let signature = result
            .as_str()
            .ok_or_else(|| RpcError::Malformed("sendTransaction result is not a string".into()))?
            .to_string();

        tracing::info!(signature = %signature, "Transaction submitted to network");

        Ok(signature)
    }

    async fn get_signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError> {
        let result = self
            .rpc_call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            )
            .await?;

        let entry = result
            .get("value")
            .and_then(|v| v.get(0))
            .ok_or_else(|| RpcError::Malformed("missing status value".into()))?;

        if entry.is_null() {
            return Ok(SignatureStatus::Processing);
        }

        if let Some(err) = entry.get("err") {
            if !err.is_null() {
                return Ok(SignatureStatus::Failed(err.to_string()));
            }
        }

        match entry.get("confirmationStatus").and_then(Value::as_str) {
            Some("finalized") | Some("confirmed") => Ok(SignatureStatus::Confirmed),
            _ => Ok(SignatureStatus::Processing),
        }
    }

    async fn get_authority(
        &self,
        mint_address: &str,
        kind: AuthorityKind,
    ) -> Result<Option<String>, RpcError> {
        let result = self
            .rpc_call(
                "getAccountInfo",
                json!([mint_address, { "encoding": "jsonParsed" }]),
            )
            .await?;

        let info = result
            .pointer("/value/data/parsed/info")
            .ok_or_else(|| RpcError::Malformed("mint account not parseable".into()))?;

        let field = match kind {
            AuthorityKind::Mint => "mintAuthority",
            AuthorityKind::Freeze => "freezeAuthority",
        };

        Ok(info
            .get(field)
            .and_then(Value::as_str)
            .map(|s| s.to_string()))
    }
}
