//! Outward boundary of the engine: submit, subscribe, poll, cancel.
//!
//! Every submitted question runs as its own tokio task with its own queue,
//! notifier channel and cancellation token. Sessions share only the handler
//! registry and the collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::message_bus::{MessageBus, RunOptions};
use super::notifier::{EventStream, NotifierHub, SessionChannel};
use super::retry::RetryPolicy;
use super::stage_handlers::default_registry;
use crate::domain::errors::{ConfigurationError, FailureReason, PipelineError, PipelineResult};
use crate::domain::models::{Command, Config, Session, SessionId, SessionOutcome, Stage};
use crate::domain::ports::Collaborators;

struct SessionEntry {
    cancel: CancellationToken,
    /// Handed to the first subscriber. Until then it keeps buffered events
    /// for a late subscriber.
    channel: Option<Arc<SessionChannel>>,
    finished: watch::Receiver<Option<Arc<Session>>>,
}

/// Sessions by id plus the order in which they finished.
#[derive(Default)]
struct SessionTable {
    entries: HashMap<SessionId, SessionEntry>,
    finished: VecDeque<SessionId>,
    retain_finished: usize,
}

impl SessionTable {
    fn get(&self, session_id: &SessionId) -> PipelineResult<&SessionEntry> {
        self.entries
            .get(session_id)
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.clone()))
    }

    /// Record a finished run and evict the oldest finished sessions beyond
    /// the retention bound.
    fn mark_finished(&mut self, session_id: SessionId) {
        self.finished.push_back(session_id);
        while self.finished.len() > self.retain_finished {
            let Some(evicted) = self.finished.pop_front() else {
                break;
            };
            if self.entries.remove(&evicted).is_some() {
                debug!(session_id = %evicted, "Finished session evicted");
            }
        }
    }
}

/// Runs questions through the pipeline, one task per session.
pub struct PipelineService {
    bus: Arc<MessageBus>,
    hub: Arc<NotifierHub>,
    sessions: Arc<RwLock<SessionTable>>,
    shutdown: CancellationToken,
}

impl PipelineService {
    pub fn new(bus: MessageBus, hub: NotifierHub) -> Self {
        let retain_finished = hub.config().retain_finished;
        Self {
            bus: Arc::new(bus),
            hub: Arc::new(hub),
            sessions: Arc::new(RwLock::new(SessionTable {
                retain_finished,
                ..SessionTable::default()
            })),
            shutdown: CancellationToken::new(),
        }
    }

    fn table(&self) -> RwLockReadGuard<'_, SessionTable> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, SessionTable> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wire the standard handlers around the given collaborators.
    pub fn from_config(
        config: &Config,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigurationError> {
        let registry = default_registry(&config.retrieval)?;
        let bus = MessageBus::new(
            Arc::new(registry),
            Arc::new(collaborators),
            RetryPolicy::from_config(&config.retry),
            config.timeouts.clone(),
        );
        Ok(Self::new(bus, NotifierHub::new(config.notifier.clone())))
    }

    /// Start a run for `text`. Must be called from within a tokio runtime.
    pub fn submit_question(
        &self,
        text: &str,
        session_id: Option<SessionId>,
    ) -> PipelineResult<SessionId> {
        let question = text.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }
        let session_id = session_id.unwrap_or_default();

        let mut table = self.table_mut();
        if table.entries.contains_key(&session_id) {
            return Err(PipelineError::SessionAlreadyExists(session_id));
        }

        let cancel = self.shutdown.child_token();
        let channel = self.hub.open(&session_id);
        let (done_tx, done_rx) = watch::channel(None);
        table.entries.insert(
            session_id.clone(),
            SessionEntry {
                cancel: cancel.clone(),
                channel: Some(channel),
                finished: done_rx,
            },
        );
        drop(table);

        let bus = Arc::clone(&self.bus);
        let sessions = Arc::clone(&self.sessions);
        let options = RunOptions {
            cancel,
            notifier: self.hub.clone(),
        };
        let seed = Command::question(session_id.clone(), question);
        let run_id = session_id.clone();
        tokio::spawn(async move {
            let session = bus.run_with(seed, options).await;
            // Under the lock: a woken waiter sees retention already applied
            let mut table = sessions.write().unwrap_or_else(PoisonError::into_inner);
            done_tx.send_replace(Some(Arc::new(session)));
            table.mark_finished(run_id);
        });

        info!(%session_id, "Question submitted");
        Ok(session_id)
    }

    /// Lazy stream of the session's events, ending after `EndOfStream`.
    ///
    /// Only one subscriber per session. Events published before subscribing
    /// are buffered up to the channel capacity. The stream owns the buffer
    /// from then on, so it is freed once the stream is dropped.
    pub fn subscribe(&self, session_id: &SessionId) -> PipelineResult<EventStream> {
        let mut table = self.table_mut();
        let entry = table
            .entries
            .get_mut(session_id)
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.clone()))?;
        entry
            .channel
            .take()
            .and_then(|channel| channel.subscribe())
            .ok_or_else(|| PipelineError::AlreadySubscribed(session_id.clone()))
    }

    /// Final answer, rejection reason, failure, or pending.
    pub fn get_result(&self, session_id: &SessionId) -> PipelineResult<SessionOutcome> {
        let table = self.table();
        let outcome = table
            .get(session_id)?
            .finished
            .borrow()
            .as_ref()
            .map_or(SessionOutcome::Pending, |session| session.outcome());
        Ok(outcome)
    }

    /// Request cooperative cancellation. A finished session is unaffected.
    pub fn cancel(&self, session_id: &SessionId) -> PipelineResult<()> {
        let table = self.table();
        let entry = table.get(session_id)?;
        debug!(%session_id, "Cancellation requested");
        entry.cancel.cancel();
        Ok(())
    }

    /// Wait for the session to reach a terminal status.
    pub async fn wait(&self, session_id: &SessionId) -> PipelineResult<Arc<Session>> {
        let mut finished = self.table().get(session_id)?.finished.clone();
        let session = finished
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                PipelineError::Failed(FailureReason::Fatal {
                    stage: Stage::initial(),
                    message: "pipeline task ended without a result".to_string(),
                })
            })?
            .clone();
        session.ok_or_else(|| PipelineError::SessionNotFound(session_id.clone()))
    }

    /// Drop the record of a finished session. Running sessions are kept.
    pub fn remove(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        let mut table = self.table_mut();
        let finished = table.entries.get(session_id)?.finished.borrow().clone()?;
        table.entries.remove(session_id);
        table.finished.retain(|id| id != session_id);
        Some(finished)
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.table()
            .entries
            .values()
            .filter(|e| e.finished.borrow().is_none())
            .count()
    }

    /// Sessions the service still tracks, running or finished.
    pub fn tracked_sessions(&self) -> usize {
        self.table().entries.len()
    }

    /// Events held for sessions nobody has subscribed to yet.
    pub fn buffered_events(&self) -> usize {
        self.table()
            .entries
            .values()
            .filter_map(|e| e.channel.as_ref())
            .map(|channel| channel.len())
            .sum()
    }

    /// Cancel every running session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn notifier(&self) -> &NotifierHub {
        &self.hub
    }
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("bus", &self.bus)
            .field("active_sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}
