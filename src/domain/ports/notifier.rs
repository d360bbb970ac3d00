use crate::domain::models::{Event, SessionId};

/// Outward sink for progress events.
///
/// `publish` is fire-and-forget: it never waits on a consumer and never fails
/// the caller.
pub trait NotifierSink: Send + Sync {
    fn publish(&self, session_id: &SessionId, event: Event);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl NotifierSink for NullNotifier {
    fn publish(&self, _session_id: &SessionId, _event: Event) {}
}
