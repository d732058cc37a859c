//! 领域模型

pub mod authority;
pub mod derivation;

pub use authority::{AuthorityKind, MutationStatus};
pub use derivation::{DerivationError, DerivedSigner, RootKeyMaterial};
