//! Listeners for the progress events queued by stage handlers.

use async_trait::async_trait;
use tracing::info;

use super::handler_registry::{EventHandler, HandlerContext, HandlerPriority, Reaction};
use crate::domain::errors::HandlerError;
use crate::domain::models::{Event, EventKind};

/// Event kinds stage handlers put on the queue.
pub const OBSERVED_EVENTS: &[EventKind] = &[
    EventKind::StageCompleted,
    EventKind::ToolInvoked,
    EventKind::Evaluation,
];

/// Forwards queued events to the session notifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationForwarder;

#[async_trait]
impl EventHandler for NotificationForwarder {
    fn name(&self) -> &'static str {
        "notification_forwarder"
    }

    fn priority(&self) -> HandlerPriority {
        HandlerPriority::HIGH
    }

    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<Reaction, HandlerError> {
        ctx.notifier.publish(&ctx.session_id, event.clone());
        Ok(Reaction::None)
    }
}

/// Writes every observed event to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditLogger;

#[async_trait]
impl EventHandler for AuditLogger {
    fn name(&self) -> &'static str {
        "audit_logger"
    }

    fn priority(&self) -> HandlerPriority {
        HandlerPriority::LOW
    }

    async fn handle(&self, event: &Event, _ctx: &HandlerContext) -> Result<Reaction, HandlerError> {
        info!(
            event_id = %event.meta().id(),
            sequence = event.meta().sequence(),
            kind = %event.kind(),
            message = %event.to_message(),
            "Pipeline event"
        );
        Ok(Reaction::None)
    }
}
