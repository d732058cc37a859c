//! 应用共享状态
//!
//! 服务在启动时装配一次，handler通过State共享

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    config::Config,
    domain::RootKeyMaterial,
    infrastructure::event_bus::EventBus,
    repository::{PgAuthorityRequestRepository, PgDepositAddressRepository},
    service::{
        authority_service::AuthorityService, confirmation_tracker::ConfirmationTracker,
        deposit_service::DepositService, rpc_client::JsonRpcChainClient,
    },
};

pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub events: EventBus,
    pub deposit_service: Arc<DepositService>,
    pub authority_service: Arc<AuthorityService>,
    pub confirmation_tracker: Arc<ConfirmationTracker>,
}

impl AppState {
    /// 装配全部服务
    ///
    /// 根密钥在这里解析一次；此后助记词不再离开RootKeyMaterial。
    pub fn build(pool: PgPool, config: Config, root_key: RootKeyMaterial) -> Self {
        let events = EventBus::default();
        let root_key = Arc::new(root_key);

        let deposit_repo = Arc::new(PgDepositAddressRepository::new(pool.clone()));
        let authority_repo = Arc::new(PgAuthorityRequestRepository::new(pool.clone()));
        let rpc = Arc::new(JsonRpcChainClient::new(&config.chain));

        let deposit_service = Arc::new(DepositService::new(
            deposit_repo,
            root_key.clone(),
            events.clone(),
        ));

        let authority_signer = Arc::new(root_key.derive_service_authority());
        let authority_service = Arc::new(AuthorityService::new(
            authority_repo.clone(),
            rpc.clone(),
            authority_signer,
        ));

        let confirmation_tracker = Arc::new(ConfirmationTracker::new(
            authority_repo,
            rpc,
            events.clone(),
            config.tracker.clone(),
        ));

        Self {
            pool,
            config,
            events,
            deposit_service,
            authority_service,
            confirmation_tracker,
        }
    }
}
