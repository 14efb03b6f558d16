//! Fire-and-forget notification dispatch.
//!
//! Invoked after booking/ticket state changes. Delivery failure is
//! logged and never rolls back the orchestration that triggered it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    BookingConfirmed,
    TicketPurchased,
    DepositConfirmed,
    OrderReverted,
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub member_id: Option<Uuid>,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> Result<(), String>;
}

/// Default dispatcher: structured log lines only. A push/webhook
/// dispatcher plugs in behind the same trait.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<(), String> {
        info!(
            kind = ?event.kind,
            member_id = ?event.member_id,
            title = %event.title,
            body = %event.body,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Spawn the dispatch so the caller never waits on delivery.
pub fn dispatch(notifier: Arc<dyn Notifier>, event: NotificationEvent) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(event).await {
            warn!(error = %e, "notification delivery failed");
        }
    });
}
