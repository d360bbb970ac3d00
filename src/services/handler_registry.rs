//! Handler registry: static routing table from message kind to handler.
//!
//! Every command kind resolves to exactly one handler; this is checked when
//! the registry is built, so dispatch never meets a missing or ambiguous
//! command route. Event kinds resolve to zero or more listeners ordered by
//! priority. The registry is immutable once built and shared between all
//! concurrent sessions.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::domain::errors::{ConfigurationError, HandlerError};
use crate::domain::models::{Command, CommandKind, Event, EventKind, SessionId};
use crate::domain::ports::{Collaborators, NotifierSink};

/// Everything a handler invocation may use besides the message itself.
#[derive(Clone)]
pub struct HandlerContext {
    pub session_id: SessionId,
    /// 1-based attempt number for the command being handled.
    pub attempt: u32,
    pub collaborators: Arc<Collaborators>,
    pub notifier: Arc<dyn NotifierSink>,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("session_id", &self.session_id)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Result of a successful command handler.
///
/// At most one follow-up command. A handler that finishes the pipeline sets
/// `answer` instead of `next`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub next: Option<Command>,
    pub answer: Option<String>,
    pub events: Vec<Event>,
}

impl CommandOutput {
    pub fn next(command: Command) -> Self {
        Self {
            next: Some(command),
            ..Self::default()
        }
    }

    pub fn complete(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            ..Self::default()
        }
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }
}

/// Handles one command kind.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError>;
}

/// Priority for event listeners (lower runs first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandlerPriority(pub u32);

impl HandlerPriority {
    pub const SYSTEM: Self = Self(0);
    pub const HIGH: Self = Self(100);
    pub const NORMAL: Self = Self(500);
    pub const LOW: Self = Self(1000);
}

impl Default for HandlerPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// What an event listener can produce. Listeners never produce commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    EmitEvents(Vec<Event>),
    None,
}

/// Listener for one or more event kinds.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> HandlerPriority {
        HandlerPriority::NORMAL
    }

    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<Reaction, HandlerError>;
}

/// Collects registrations and validates them into a [`HandlerRegistry`].
pub struct HandlerRegistryBuilder {
    commands: Vec<Option<Arc<dyn CommandHandler>>>,
    events: Vec<Vec<Arc<dyn EventHandler>>>,
}

impl Default for HandlerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self {
            commands: vec![None; CommandKind::COUNT],
            events: vec![Vec::new(); EventKind::COUNT],
        }
    }

    /// Register the handler for a command kind. A second registration for
    /// the same kind is refused.
    pub fn register_command(
        &mut self,
        kind: CommandKind,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<&mut Self, ConfigurationError> {
        let slot = &mut self.commands[kind.index()];
        if slot.is_some() {
            return Err(ConfigurationError::DuplicateCommandHandler(kind));
        }
        *slot = Some(handler);
        Ok(self)
    }

    /// Add a listener for an event kind.
    pub fn register_event(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        let listeners = &mut self.events[kind.index()];
        listeners.push(handler);
        listeners.sort_by_key(|h| h.priority());
        self
    }

    /// Add a listener for several event kinds at once.
    pub fn register_listener(
        &mut self,
        kinds: &[EventKind],
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        for kind in kinds {
            self.register_event(*kind, Arc::clone(&handler));
        }
        self
    }

    /// Fails if any command kind has no handler.
    pub fn build(self) -> Result<HandlerRegistry, ConfigurationError> {
        let mut commands = Vec::with_capacity(CommandKind::COUNT);
        for (kind, slot) in CommandKind::ALL.into_iter().zip(self.commands) {
            match slot {
                Some(handler) => commands.push(handler),
                None => return Err(ConfigurationError::MissingCommandHandler(kind)),
            }
        }
        Ok(HandlerRegistry {
            commands,
            events: self.events,
        })
    }
}

/// Immutable routing table.
pub struct HandlerRegistry {
    commands: Vec<Arc<dyn CommandHandler>>,
    events: Vec<Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// The single handler for a command kind.
    pub fn resolve_command(&self, kind: CommandKind) -> &Arc<dyn CommandHandler> {
        &self.commands[kind.index()]
    }

    /// Listeners for an event kind, in priority order. May be empty.
    pub fn resolve_event(&self, kind: EventKind) -> &[Arc<dyn EventHandler>] {
        &self.events[kind.index()]
    }

    pub fn listener_count(&self) -> usize {
        self.events.iter().map(Vec::len).sum()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let commands: Vec<_> = CommandKind::ALL
            .iter()
            .map(|k| (k.as_str(), self.commands[k.index()].name()))
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("commands", &commands)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
