pub mod authority_service;
pub mod confirmation_tracker;
pub mod deposit_service;
pub mod rpc_client;
pub mod transaction_builder;

#[cfg(test)]
pub(crate) mod test_support;
