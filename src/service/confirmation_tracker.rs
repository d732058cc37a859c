// 确认追踪器 - 后台轮询已提交的权限变更请求直至终态
//
// 每轮批量拉取Submitted请求，逐个查询网络最终性：
//   Confirmed → mark_confirmed + 确认事件
//   链上失败 → mark_failed
//   确认窗口耗尽仍Processing → mark_timed_out + 恰好一次对账事件
// TimedOut与Failed严格区分：超时的交易仍可能上链，只能上报"未确认"。

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use rand::Rng;

use crate::{
    config::TrackerConfig,
    infrastructure::event_bus::{DomainEvent, EventBus},
    repository::{AuthorityMutationRequest, AuthorityRequestRepository},
    service::rpc_client::{ChainRpc, RpcError, SignatureStatus},
};

/// 单请求退避上限：即使轮询计数很高，也不能让请求长期失去观测
const MAX_POLL_BACKOFF_SECS: u64 = 60;

pub struct ConfirmationTracker {
    repo: Arc<dyn AuthorityRequestRepository>,
    rpc: Arc<dyn ChainRpc>,
    events: EventBus,
    config: TrackerConfig,
}

/// 单轮处理结果
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub confirmed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// 本轮是否碰到限流（监控循环据此拉长下一轮间隔）
    pub rate_limited: bool,
}

impl ConfirmationTracker {
    pub fn new(
        repo: Arc<dyn AuthorityRequestRepository>,
        rpc: Arc<dyn ChainRpc>,
        events: EventBus,
        config: TrackerConfig,
    ) -> Self {
        Self {
            repo,
            rpc,
            events,
            config,
        }
    }

    /// 启动后台监控任务（持续运行）
    ///
    /// 间隔带随机抖动，多实例部署时错开轮询峰值；
    /// 限流轮之后额外退避一个基础间隔。
    pub async fn start_background_monitor(self: Arc<Self>) {
        let base = self.config.poll_interval_secs;

        tracing::info!(
            interval_secs = base,
            timeout_secs = self.config.confirmation_timeout_secs,
            "Confirmation tracker started"
        );

        loop {
            let jitter_ms = rand::thread_rng().gen_range(0..=base * 500);
            tokio::time::sleep(Duration::from_secs(base) + Duration::from_millis(jitter_ms)).await;

            match self.poll_once().await {
                Ok(outcome) => {
                    if outcome.confirmed + outcome.failed + outcome.timed_out > 0 {
                        tracing::info!(
                            confirmed = outcome.confirmed,
                            failed = outcome.failed,
                            timed_out = outcome.timed_out,
                            "Confirmation tracker batch settled requests"
                        );
                    }
                    if outcome.rate_limited {
                        tracing::warn!("RPC rate limit hit, backing off one extra interval");
                        tokio::time::sleep(Duration::from_secs(base)).await;
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Confirmation tracker batch failed");
                }
            }
        }
    }

    /// 处理一批已提交请求
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let submitted = self
            .repo
            .list_submitted(self.config.batch_size)
            .await
            .context("Failed to list submitted requests")?;

        let mut outcome = PollOutcome::default();

        for request in submitted {
            // 每请求退避：上一轮未确认/被限流的请求按poll_attempts推迟重查。
            // 确认窗口已耗尽的请求不受退避约束，保证及时转TimedOut
            if !self.confirmation_window_elapsed(&request) && !self.due_for_poll(&request) {
                continue;
            }

            match self.track_request(&request).await {
                Ok(settled) => match settled {
                    Some(SettledAs::Confirmed) => outcome.confirmed += 1,
                    Some(SettledAs::Failed) => outcome.failed += 1,
                    Some(SettledAs::TimedOut) => outcome.timed_out += 1,
                    None => {}
                },
                Err(TrackError::RateLimited) => {
                    // 本轮剩余请求留到下一轮，避免继续打节点
                    self.repo.increment_poll_attempts(request.id).await?;
                    outcome.rate_limited = true;
                    break;
                }
                Err(TrackError::Other(e)) => {
                    tracing::warn!(
                        request_id = %request.id,
                        error = ?e,
                        "Failed to track request, will retry next round"
                    );
                    self.repo.increment_poll_attempts(request.id).await?;
                }
            }
        }

        Ok(outcome)
    }

    async fn track_request(
        &self,
        request: &AuthorityMutationRequest,
    ) -> Result<Option<SettledAs>, TrackError> {
        let Some(signature) = request.signature.as_deref() else {
            // Submitted必然带签名，缺失说明账本被外部改动
            return Err(TrackError::Other(anyhow::anyhow!(
                "submitted request {} has no signature",
                request.id
            )));
        };

        let status = match self.rpc.get_signature_status(signature).await {
            Ok(status) => status,
            Err(RpcError::RateLimited) => return Err(TrackError::RateLimited),
            Err(e) => return Err(TrackError::Other(e.into())),
        };

        match status {
            SignatureStatus::Confirmed => {
                if self.config.verify_onchain_authority {
                    self.verify_authority(request).await;
                }

                let transitioned = self
                    .repo
                    .mark_confirmed(request.id)
                    .await
                    .map_err(TrackError::Other)?;
                if !transitioned {
                    return Ok(None);
                }

                tracing::info!(
                    request_id = %request.id,
                    mint = %request.mint_address,
                    kind = %request.authority_kind,
                    signature = %signature,
                    "Authority mutation confirmed"
                );

                self.events.publish(DomainEvent::AuthorityMutationConfirmed {
                    request_id: request.id,
                    mint_address: request.mint_address.clone(),
                    authority_kind: request.authority_kind,
                    signature: signature.to_string(),
                });

                Ok(Some(SettledAs::Confirmed))
            }
            SignatureStatus::Failed(reason) => {
                let transitioned = self
                    .repo
                    .mark_failed(request.id, &reason)
                    .await
                    .map_err(TrackError::Other)?;
                if !transitioned {
                    return Ok(None);
                }

                tracing::warn!(
                    request_id = %request.id,
                    mint = %request.mint_address,
                    reason = %reason,
                    "Authority mutation failed on-chain"
                );

                Ok(Some(SettledAs::Failed))
            }
            SignatureStatus::Processing => {
                if self.confirmation_window_elapsed(request) {
                    self.time_out_request(request, signature).await?;
                    return Ok(Some(SettledAs::TimedOut));
                }

                self.repo
                    .increment_poll_attempts(request.id)
                    .await
                    .map_err(TrackError::Other)?;
                Ok(None)
            }
        }
    }

    /// 请求是否到达下一次轮询时间
    ///
    /// 延迟 = poll_interval * poll_attempts（线性退避，封顶60s），
    /// 以最近一次状态写入（updated_at）为基准。
    fn due_for_poll(&self, request: &AuthorityMutationRequest) -> bool {
        if request.poll_attempts <= 0 {
            return true;
        }
        let delay_secs = (self.config.poll_interval_secs)
            .saturating_mul(request.poll_attempts as u64)
            .min(MAX_POLL_BACKOFF_SECS);
        chrono::Utc::now() - request.updated_at >= chrono::Duration::seconds(delay_secs as i64)
    }

    fn confirmation_window_elapsed(&self, request: &AuthorityMutationRequest) -> bool {
        let Some(submitted_at) = request.submitted_at else {
            return false;
        };
        let window = chrono::Duration::seconds(self.config.confirmation_timeout_secs as i64);
        chrono::Utc::now() - submitted_at >= window
    }

    /// Submitted → TimedOut，并发出恰好一次的对账事件
    async fn time_out_request(
        &self,
        request: &AuthorityMutationRequest,
        signature: &str,
    ) -> Result<(), TrackError> {
        let transitioned = self
            .repo
            .mark_timed_out(request.id)
            .await
            .map_err(TrackError::Other)?;
        if !transitioned {
            return Ok(());
        }

        tracing::warn!(
            request_id = %request.id,
            mint = %request.mint_address,
            signature = %signature,
            "Authority mutation unconfirmed within window, flagged for reconciliation"
        );

        // request_id唯一约束保证重复超时路径只插入一次；
        // 只有真正插入的那次才发布事件
        let inserted = self
            .repo
            .insert_reconciliation_event(request.id, "confirmation window elapsed")
            .await
            .map_err(TrackError::Other)?;

        if inserted {
            self.events
                .publish(DomainEvent::AuthorityMutationUnconfirmed {
                    request_id: request.id,
                    mint_address: request.mint_address.clone(),
                    authority_kind: request.authority_kind,
                    signature: signature.to_string(),
                });
        }

        Ok(())
    }

    /// 回读链上权限值核对（仅告警，不改状态：网络确认即为事实）
    async fn verify_authority(&self, request: &AuthorityMutationRequest) {
        match self
            .rpc
            .get_authority(&request.mint_address, request.authority_kind)
            .await
        {
            Ok(on_chain) => {
                if on_chain != request.new_authority {
                    tracing::warn!(
                        request_id = %request.id,
                        mint = %request.mint_address,
                        expected = ?request.new_authority,
                        actual = ?on_chain,
                        "On-chain authority does not match confirmed request"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request.id,
                    error = %e,
                    "Failed to verify on-chain authority after confirmation"
                );
            }
        }
    }
}

enum SettledAs {
    Confirmed,
    Failed,
    TimedOut,
}

enum TrackError {
    RateLimited,
    Other(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        domain::{AuthorityKind, MutationStatus, RootKeyMaterial},
        repository::NewAuthorityRequest,
        service::test_support::{MemoryAuthorityRepo, MockChainRpc, TEST_MNEMONIC},
    };

    const MINT: &str = "So11111111111111111111111111111111111111112";

    fn tracker_config(timeout_secs: u64) -> TrackerConfig {
        TrackerConfig {
            poll_interval_secs: 1,
            confirmation_timeout_secs: timeout_secs,
            batch_size: 50,
            verify_onchain_authority: false,
        }
    }

    struct Fixture {
        tracker: ConfirmationTracker,
        repo: Arc<MemoryAuthorityRepo>,
        rpc: Arc<MockChainRpc>,
        events: EventBus,
    }

    fn fixture(config: TrackerConfig) -> Fixture {
        let signer = RootKeyMaterial::from_mnemonic(TEST_MNEMONIC)
            .unwrap()
            .derive_service_authority();
        let repo = Arc::new(MemoryAuthorityRepo::default());
        let rpc = Arc::new(MockChainRpc::new(&signer.address()));
        rpc.register_mint(MINT);
        let events = EventBus::new(16);

        Fixture {
            tracker: ConfirmationTracker::new(repo.clone(), rpc.clone(), events.clone(), config),
            repo,
            rpc,
            events,
        }
    }

    /// 直接在repo里建立一条Submitted请求
    async fn submitted_request(
        repo: &MemoryAuthorityRepo,
        signature: &str,
        new_authority: Option<&str>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        repo.try_insert_pending(NewAuthorityRequest {
            request_id: id,
            mint_address: MINT.to_string(),
            authority_kind: AuthorityKind::Mint,
            new_authority: new_authority.map(|s| s.to_string()),
        })
        .await
        .unwrap()
        .unwrap();
        assert!(repo.mark_submitted(id, signature).await.unwrap());
        id
    }

    #[tokio::test]
    async fn test_confirmation_within_window() {
        let f = fixture(tracker_config(180));
        let id = submitted_request(&f.repo, "sig-a", Some("11111111111111111111111111111111")).await;
        f.rpc.script_statuses("sig-a", vec![SignatureStatus::Confirmed]);

        let mut events = f.events.subscribe();
        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.confirmed, 1);

        let request = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(request.status, MutationStatus::Confirmed);
        assert_eq!(request.signature.as_deref(), Some("sig-a"));
        assert!(request.confirmed_at.is_some());

        let envelope = events.try_recv().unwrap();
        assert!(matches!(
            envelope.event,
            DomainEvent::AuthorityMutationConfirmed { request_id, .. } if request_id == id
        ));
    }

    #[tokio::test]
    async fn test_still_processing_increments_attempts_only() {
        let f = fixture(tracker_config(180));
        let id = submitted_request(&f.repo, "sig-b", None).await;

        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.confirmed + outcome.failed + outcome.timed_out, 0);

        let request = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(request.status, MutationStatus::Submitted);
        assert_eq!(request.poll_attempts, 1);
    }

    #[tokio::test]
    async fn test_onchain_failure_marks_failed() {
        let f = fixture(tracker_config(180));
        let id = submitted_request(&f.repo, "sig-c", None).await;
        f.rpc.script_statuses(
            "sig-c",
            vec![SignatureStatus::Failed("InstructionError".into())],
        );

        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.failed, 1);

        let request = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(request.status, MutationStatus::Failed);
        assert!(request.error.as_deref().unwrap().contains("InstructionError"));
    }

    #[tokio::test]
    async fn test_window_elapsed_becomes_timed_out_not_failed() {
        let f = fixture(tracker_config(60));
        let id = submitted_request(&f.repo, "sig-d", None).await;
        // 提交时间回拨到窗口之外，状态查询一直Processing
        f.repo.age_submission(id, chrono::Duration::seconds(120));

        let mut events = f.events.subscribe();
        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.timed_out, 1);

        let request = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(request.status, MutationStatus::TimedOut);
        // 超时不是失败：error字段保持为空
        assert!(request.error.is_none());

        let envelope = events.try_recv().unwrap();
        match envelope.event {
            DomainEvent::AuthorityMutationUnconfirmed {
                request_id,
                signature,
                ..
            } => {
                assert_eq!(request_id, id);
                assert_eq!(signature, "sig-d");
            }
            other => panic!("expected unconfirmed event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconciliation_event_emitted_exactly_once() {
        let f = fixture(tracker_config(60));
        let id = submitted_request(&f.repo, "sig-e", None).await;
        f.repo.age_submission(id, chrono::Duration::seconds(120));

        f.tracker.poll_once().await.unwrap();
        // 第二轮：请求已是TimedOut，不再出现在Submitted批次里
        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.timed_out, 0);
        assert_eq!(f.repo.reconciliation_event_count(), 1);

        // 即便对账插入被直接重放，唯一约束也兜底
        let inserted = f
            .repo
            .insert_reconciliation_event(id, "confirmation window elapsed")
            .await
            .unwrap();
        assert!(!inserted);
        assert_eq!(f.repo.reconciliation_event_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_backs_off_without_state_change() {
        let f = fixture(tracker_config(180));
        let id = submitted_request(&f.repo, "sig-f", None).await;
        f.rpc.rate_limit_next_polls(1);

        let outcome = f.tracker.poll_once().await.unwrap();
        assert!(outcome.rate_limited);

        let request = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(request.status, MutationStatus::Submitted);
        assert_eq!(request.poll_attempts, 1);

        // 退避窗口过后正常确认
        f.repo.age_updated_at(id, chrono::Duration::seconds(5));
        f.rpc.script_statuses("sig-f", vec![SignatureStatus::Confirmed]);
        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.confirmed, 1);
    }

    #[tokio::test]
    async fn test_backed_off_request_not_repolled_immediately() {
        let f = fixture(tracker_config(180));
        let id = submitted_request(&f.repo, "sig-j", None).await;
        f.rpc.rate_limit_next_polls(1);

        // 第一轮：被限流，计入一次轮询
        f.tracker.poll_once().await.unwrap();
        assert_eq!(f.rpc.status_poll_count(), 1);
        assert_eq!(f.repo.find_by_id(id).await.unwrap().unwrap().poll_attempts, 1);

        // 紧接着的第二轮：退避窗口未到，不触达RPC
        f.tracker.poll_once().await.unwrap();
        assert_eq!(f.rpc.status_poll_count(), 1);
        assert_eq!(f.repo.find_by_id(id).await.unwrap().unwrap().poll_attempts, 1);

        // 窗口过后恢复轮询
        f.repo.age_updated_at(id, chrono::Duration::seconds(5));
        f.tracker.poll_once().await.unwrap();
        assert_eq!(f.rpc.status_poll_count(), 2);
    }

    #[tokio::test]
    async fn test_backoff_does_not_delay_timeout() {
        let f = fixture(tracker_config(60));
        let id = submitted_request(&f.repo, "sig-k", None).await;

        // 高轮询计数的请求在窗口耗尽后仍立即转TimedOut
        for _ in 0..10 {
            f.repo.increment_poll_attempts(id).await.unwrap();
        }
        f.repo.age_submission(id, chrono::Duration::seconds(120));

        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.timed_out, 1);
        assert_eq!(
            f.repo.find_by_id(id).await.unwrap().unwrap().status,
            MutationStatus::TimedOut
        );
    }

    #[tokio::test]
    async fn test_authority_verification_mismatch_does_not_block_confirmation() {
        let mut config = tracker_config(180);
        config.verify_onchain_authority = true;
        let f = fixture(config);

        let id = submitted_request(&f.repo, "sig-g", Some("11111111111111111111111111111111")).await;
        f.rpc.script_statuses("sig-g", vec![SignatureStatus::Confirmed]);
        // 链上值与请求不一致（仅产生告警）
        f.rpc
            .set_authority_on_chain(MINT, AuthorityKind::Mint, None);

        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.confirmed, 1);
        let request = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(request.status, MutationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_batch_settles_mixed_outcomes() {
        let f = fixture(tracker_config(60));

        // 同一mint的freeze + 另一请求需要不同(mint,kind)
        let confirmed_id = submitted_request(&f.repo, "sig-h", None).await;
        f.rpc.script_statuses("sig-h", vec![SignatureStatus::Confirmed]);

        let timed_out_id = {
            let id = Uuid::new_v4();
            f.repo
                .try_insert_pending(NewAuthorityRequest {
                    request_id: id,
                    mint_address: MINT.to_string(),
                    authority_kind: AuthorityKind::Freeze,
                    new_authority: None,
                })
                .await
                .unwrap()
                .unwrap();
            assert!(f.repo.mark_submitted(id, "sig-i").await.unwrap());
            f.repo.age_submission(id, chrono::Duration::seconds(120));
            id
        };

        let outcome = f.tracker.poll_once().await.unwrap();
        assert_eq!(outcome.confirmed, 1);
        assert_eq!(outcome.timed_out, 1);

        assert_eq!(
            f.repo.find_by_id(confirmed_id).await.unwrap().unwrap().status,
            MutationStatus::Confirmed
        );
        assert_eq!(
            f.repo.find_by_id(timed_out_id).await.unwrap().unwrap().status,
            MutationStatus::TimedOut
        );
    }
}
