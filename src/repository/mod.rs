pub mod authority_requests;
pub mod deposit_addresses;

pub use authority_requests::{
    AuthorityMutationRequest, AuthorityRequestRepository, NewAuthorityRequest,
    PgAuthorityRequestRepository,
};
pub use deposit_addresses::{
    DepositAddress, DepositAddressRepository, NewDepositAddress, PgDepositAddressRepository,
};

/// 判断anyhow错误链中是否为唯一约束违规（23505）
pub(crate) fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| match e {
                sqlx::Error::Database(db_err) => db_err.code().map(|c| c == "23505"),
                _ => None,
            })
            .unwrap_or(false)
    })
}
