//! 权限变更请求的统一状态定义

use std::fmt;

use serde::{Deserialize, Serialize};

/// 代币权限类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityKind {
    /// 铸币权限
    Mint,
    /// 冻结权限
    Freeze,
}

impl AuthorityKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Freeze => "freeze",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mint" => Some(Self::Mint),
            "freeze" => Some(Self::Freeze),
            _ => None,
        }
    }
}

impl fmt::Display for AuthorityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// 权限变更请求状态机
///
/// Pending → {Submitted, Failed, Cancelled}
/// Submitted → {Confirmed, Failed, TimedOut}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// 请求已持久化，尚未提交到网络
    Pending,

    /// 已提交到网络，等待最终确认
    Submitted,

    /// 网络已最终确认
    Confirmed,

    /// 失败（提交失败或链上执行失败）
    Failed,

    /// 确认窗口内未确认。交易仍可能上链，与Failed严格区分，
    /// 只能作为"未确认"上报，需要对账跟进
    TimedOut,

    /// 提交前被调用方取消
    Cancelled,
}

impl MutationStatus {
    /// 是否为最终状态（不可再转换）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// 验证状态转换合法性
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use MutationStatus::*;

        match (self, target) {
            (Pending, Submitted) | (Pending, Failed) | (Pending, Cancelled) => true,

            (Submitted, Confirmed) | (Submitted, Failed) | (Submitted, TimedOut) => true,

            // 最终状态不可转换
            _ => false,
        }
    }

    /// 转换为数据库字符串
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// 从数据库字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "confirmed" => Some(Self::Confirmed),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
