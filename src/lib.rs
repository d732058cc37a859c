//! MintGate - 代币托管后端
//!
//! 两项职责：按用户确定性签发存款地址；编排代币mint/freeze权限的
//! 链上变更并追踪最终性。根助记词只在启动时解析一次，
//! 此后仅派生公钥离开签名边界。

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod repository;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        domain::{AuthorityKind, MutationStatus, RootKeyMaterial},
        error::{AppError, AppErrorCode},
    };
}
