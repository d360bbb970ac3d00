//! Per-session notification channels.
//!
//! Each session owns one bounded buffer of events for the outward transport.
//! Producers never wait: when the buffer is full the configured
//! [`OverflowPolicy`] discards either the oldest buffered event or the new
//! one. Terminal notifications and the end-of-stream marker are never the
//! ones discarded: they evict the oldest progress event, so a subscriber
//! learns how its session ended. Capacity is at least
//! [`NotifierConfig::MIN_CAPACITY`], which leaves room for both. The channel
//! closes after `EndOfStream` and is removed from the hub.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::domain::models::{Event, EventKind, NotifierConfig, OverflowPolicy, SessionId};
use crate::domain::ports::NotifierSink;

/// Stream of events for one session; ends when the channel closes.
pub type EventStream = BoxStream<'static, Event>;

#[derive(Debug, Default)]
struct ChannelState {
    buffer: VecDeque<Event>,
    closed: bool,
    dropped: u64,
}

/// Bounded, single-consumer event buffer for one session.
#[derive(Debug)]
pub struct SessionChannel {
    session_id: SessionId,
    state: Mutex<ChannelState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    subscribed: AtomicBool,
}

fn must_deliver(event: &Event) -> bool {
    event.kind().is_terminal() || event.kind() == EventKind::EndOfStream
}

impl SessionChannel {
    pub fn new(session_id: SessionId, capacity: usize, policy: OverflowPolicy) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            state: Mutex::new(ChannelState::default()),
            notify: Notify::new(),
            capacity: capacity.max(NotifierConfig::MIN_CAPACITY),
            policy,
            subscribed: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Buffer an event. Returns `false` if the event was discarded.
    pub fn push(&self, event: Event) -> bool {
        let keep = must_deliver(&event);
        {
            let mut state = self.state();
            if state.closed {
                return false;
            }
            if state.buffer.len() >= self.capacity {
                state.dropped += 1;
                if self.policy == OverflowPolicy::DropNewest && !keep {
                    trace!(session_id = %self.session_id, kind = %event.kind(), "Notifier full, dropping newest");
                    return false;
                }
                let victim = state
                    .buffer
                    .iter()
                    .position(|buffered| !must_deliver(buffered))
                    .unwrap_or(0);
                if let Some(evicted) = state.buffer.remove(victim) {
                    trace!(session_id = %self.session_id, kind = %evicted.kind(), "Notifier full, dropping oldest");
                }
            }
            state.buffer.push_back(event);
        }
        self.notify.notify_one();
        true
    }

    /// Stop accepting events. Buffered events remain readable.
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Events discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.state().dropped
    }

    pub fn len(&self) -> usize {
        self.state().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next event, waiting if none is buffered. `None` once closed and drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state();
                if let Some(event) = state.buffer.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Claim the single consumer slot. Returns `None` if already claimed.
    pub fn subscribe(self: &Arc<Self>) -> Option<EventStream> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let channel = Arc::clone(self);
        Some(
            stream::unfold(channel, |channel| async move {
                channel.recv().await.map(|event| (event, channel))
            })
            .boxed(),
        )
    }
}

/// Routes published events to the channel of their session.
#[derive(Debug)]
pub struct NotifierHub {
    channels: RwLock<HashMap<SessionId, Arc<SessionChannel>>>,
    config: NotifierConfig,
}

impl NotifierHub {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Open the channel for a session, or return the one already open.
    pub fn open(&self, session_id: &SessionId) -> Arc<SessionChannel> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(channels.entry(session_id.clone()).or_insert_with(|| {
            SessionChannel::new(session_id.clone(), self.config.capacity, self.config.overflow)
        }))
    }

    pub fn channel(&self, session_id: &SessionId) -> Option<Arc<SessionChannel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Close a session's channel and drop the hub's handle to it.
    pub fn close(&self, session_id: &SessionId) {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if let Some(channel) = removed {
            channel.close();
            if channel.dropped() > 0 {
                debug!(%session_id, dropped = channel.dropped(), "Notifier channel closed with dropped events");
            }
        }
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotifierSink for NotifierHub {
    fn publish(&self, session_id: &SessionId, event: Event) {
        let Some(channel) = self.channel(session_id) else {
            trace!(%session_id, kind = %event.kind(), "No open channel, event discarded");
            return;
        };
        let end_of_stream = event.kind() == EventKind::EndOfStream;
        channel.push(event);
        if end_of_stream {
            self.close(session_id);
        }
    }
}
