// Event Bus 框架
// 异步事件发布/订阅，用于对账等需要人工/自动跟进的事件

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::AuthorityKind;

// ============ 事件类型定义 ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    /// 权限变更请求在确认窗口内未确认（TimedOut）
    /// 交易仍可能上链，需要对账跟进，不得静默重试
    AuthorityMutationUnconfirmed {
        request_id: Uuid,
        mint_address: String,
        authority_kind: AuthorityKind,
        signature: String,
    },
    /// 权限变更已最终确认
    AuthorityMutationConfirmed {
        request_id: Uuid,
        mint_address: String,
        authority_kind: AuthorityKind,
        signature: String,
    },
    /// 新存款地址已签发
    DepositAddressIssued {
        user_id: Uuid,
        asset: String,
        address: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: DomainEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

// ============ Event Bus ============

/// 进程内事件总线（broadcast语义，慢订阅者丢弃旧事件）
///
/// 对账事件的恰好一次保证不依赖总线，由reconciliation_events表的
/// 唯一约束提供；总线只负责通知在线订阅者。
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件（无订阅者时不报错）
    pub fn publish(&self, event: DomainEvent) {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event,
            published_at: chrono::Utc::now(),
        };

        match self.sender.send(envelope) {
            Ok(subscribers) => {
                tracing::debug!(subscribers = subscribers, "Domain event published");
            }
            Err(_) => {
                tracing::debug!("Domain event published with no active subscribers");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
