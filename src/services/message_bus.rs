//! Dispatch bus: drains one session's message queue to a terminal status.
//!
//! Messages are processed breadth-first. Every dequeued message is recorded
//! on the session trail before its handler runs. Command handlers may be
//! retried on transient failures; event listeners are best-effort and can
//! only produce more events. Status updates, retry notices and the terminal
//! notifications go straight to the session notifier and are never queued.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::handler_registry::{CommandOutput, HandlerContext, HandlerRegistry, Reaction};
use super::retry::RetryPolicy;
use crate::domain::errors::{FailureReason, HandlerError};
use crate::domain::models::{
    Command, CommandPayload, Event, EventPayload, Message, Session, SessionId, SessionStatus,
    TimeoutConfig,
};
use crate::domain::ports::{Collaborators, NotifierSink, NullNotifier};

/// Per-run inputs that are not shared between sessions.
#[derive(Clone)]
pub struct RunOptions {
    pub cancel: CancellationToken,
    pub notifier: Arc<dyn NotifierSink>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            notifier: Arc::new(NullNotifier),
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

enum Dispatch {
    Continue(CommandOutput),
    Rejected(String),
    Failed(FailureReason),
}

/// Executes pipeline runs. Cheap to share; holds no per-session state.
pub struct MessageBus {
    registry: Arc<HandlerRegistry>,
    collaborators: Arc<Collaborators>,
    retry: RetryPolicy,
    timeouts: TimeoutConfig,
}

impl MessageBus {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        collaborators: Arc<Collaborators>,
        retry: RetryPolicy,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            registry,
            collaborators,
            retry,
            timeouts,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run a seed command to completion without cancellation or notifications.
    pub async fn run(&self, seed: Command) -> Session {
        self.run_with(seed, RunOptions::default()).await
    }

    pub async fn run_with(&self, seed: Command, options: RunOptions) -> Session {
        let span = info_span!("session", session_id = %seed.correlation_id());
        self.drain(seed, options).instrument(span).await
    }

    async fn drain(&self, seed: Command, options: RunOptions) -> Session {
        let RunOptions { cancel, notifier } = options;
        let mut session = Session::new(seed.correlation_id().clone(), seed.payload().question());
        let mut queue: VecDeque<Message> = VecDeque::from([Message::from(seed)]);
        let mut answer: Option<String> = None;
        let mut rejected_answer: Option<String> = None;

        info!(question = %session.question, "Pipeline started");

        while let Some(message) = queue.pop_front() {
            if cancel.is_cancelled() {
                let stage = session.stage;
                Self::fail(&mut session, FailureReason::Cancelled { stage });
                break;
            }

            let position = session.record(&message);
            debug!(position, kind = %message.kind(), pending = queue.len(), "Dequeued message");

            let command = match message {
                Message::Event(event) => {
                    self.dispatch_event(&event, &notifier, &mut queue).await;
                    continue;
                }
                Message::Command(command) => command,
            };

            let stage = command.kind().stage();
            if stage.is_processing() {
                if let Err(err) = session.advance(stage) {
                    Self::fail(
                        &mut session,
                        FailureReason::IllegalTransition {
                            from: err.from,
                            to: err.to,
                        },
                    );
                    break;
                }
                notifier.publish(&session.id, command.event(EventPayload::StatusUpdate { stage }));
            }

            match self
                .dispatch_command(&mut session, position, &command, &cancel, &notifier)
                .await
            {
                Dispatch::Continue(output) => {
                    queue.extend(output.events.into_iter().map(Message::from));
                    if let Some(next) = output.next {
                        queue.push_back(next.into());
                    }
                    if output.answer.is_some() {
                        answer = output.answer;
                    }
                }
                Dispatch::Rejected(reason) => {
                    let flushed = queue.len();
                    queue.clear();
                    match session.reject(reason.clone()) {
                        Ok(()) => {
                            info!(%stage, %reason, flushed, "Request rejected");
                            if let CommandPayload::FinalCheck { answer, .. } = command.payload() {
                                rejected_answer = Some(answer.clone());
                            }
                        }
                        Err(err) => Self::fail(
                            &mut session,
                            FailureReason::IllegalTransition {
                                from: err.from,
                                to: err.to,
                            },
                        ),
                    }
                    break;
                }
                Dispatch::Failed(reason) => {
                    Self::fail(&mut session, reason);
                    break;
                }
            }
        }

        if !session.is_terminal() {
            match answer {
                Some(answer) => {
                    if let Err(err) = session.complete(answer) {
                        Self::fail(
                            &mut session,
                            FailureReason::IllegalTransition {
                                from: err.from,
                                to: err.to,
                            },
                        );
                    } else {
                        info!(messages = session.trail().len(), "Pipeline completed");
                    }
                }
                None => {
                    let stage = session.stage;
                    Self::fail(&mut session, FailureReason::Stalled { stage });
                }
            }
        }

        Self::publish_outcome(&session, rejected_answer, notifier.as_ref());
        session
    }

    async fn dispatch_command(
        &self,
        session: &mut Session,
        position: usize,
        command: &Command,
        cancel: &CancellationToken,
        notifier: &Arc<dyn NotifierSink>,
    ) -> Dispatch {
        let stage = command.kind().stage();
        let handler = self.registry.resolve_command(command.kind());
        let budget = self.timeouts.for_stage(stage);
        let mut schedule = self.retry.schedule();
        let mut attempt = 0;

        loop {
            attempt += 1;
            session.note_attempt(position);
            let ctx = self.context(&session.id, attempt, notifier);

            let result = match timeout(budget, handler.handle(command, &ctx)).await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::TimedOut(budget)),
            };

            // The call was allowed to finish; its result is discarded.
            if cancel.is_cancelled() {
                return Dispatch::Failed(FailureReason::Cancelled { stage });
            }

            let err = match result {
                Ok(output) => {
                    if attempt > 1 {
                        debug!(%stage, attempts = attempt, "Handler succeeded after retries");
                    }
                    return Dispatch::Continue(output);
                }
                Err(HandlerError::Rejected(reason)) => return Dispatch::Rejected(reason),
                Err(err) => err,
            };

            session.note_error(position, err.to_string());

            if !self.retry.should_retry(&err, attempt) {
                let reason = match err {
                    HandlerError::Fatal(message) => FailureReason::Fatal { stage, message },
                    other if other.is_retryable() => FailureReason::RetryExhausted {
                        stage,
                        attempts: attempt,
                        last_error: other.to_string(),
                    },
                    other => FailureReason::Fatal {
                        stage,
                        message: other.to_string(),
                    },
                };
                return Dispatch::Failed(reason);
            }

            let delay = schedule.next_delay();
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            warn!(
                handler = handler.name(),
                %stage,
                attempt,
                delay_ms,
                error = %err,
                "Transient handler failure, retrying"
            );
            notifier.publish(
                &session.id,
                command.event(EventPayload::RetryScheduled {
                    stage,
                    attempt: attempt + 1,
                    delay_ms,
                    reason: err.to_string(),
                }),
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    return Dispatch::Failed(FailureReason::Cancelled { stage });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn dispatch_event(
        &self,
        event: &Event,
        notifier: &Arc<dyn NotifierSink>,
        queue: &mut VecDeque<Message>,
    ) {
        let listeners = self.registry.resolve_event(event.kind());
        if listeners.is_empty() {
            return;
        }
        let ctx = self.context(event.correlation_id(), 1, notifier);
        let budget = Duration::from_millis(self.timeouts.default_ms);

        for listener in listeners {
            match timeout(budget, listener.handle(event, &ctx)).await {
                Ok(Ok(Reaction::EmitEvents(events))) => {
                    queue.extend(events.into_iter().map(Message::from));
                }
                Ok(Ok(Reaction::None)) => {}
                Ok(Err(err)) => {
                    warn!(listener = listener.name(), kind = %event.kind(), error = %err, "Event listener failed");
                }
                Err(_) => {
                    warn!(listener = listener.name(), kind = %event.kind(), "Event listener timed out");
                }
            }
        }
    }

    fn context(
        &self,
        session_id: &SessionId,
        attempt: u32,
        notifier: &Arc<dyn NotifierSink>,
    ) -> HandlerContext {
        HandlerContext {
            session_id: session_id.clone(),
            attempt,
            collaborators: Arc::clone(&self.collaborators),
            notifier: Arc::clone(notifier),
        }
    }

    fn fail(session: &mut Session, reason: FailureReason) {
        if reason.is_cancelled() {
            warn!(reason = %reason, "Pipeline cancelled");
        } else {
            error!(reason = %reason, "Pipeline failed");
        }
        session.fail(reason);
    }

    fn publish_outcome(session: &Session, rejected_answer: Option<String>, notifier: &dyn NotifierSink) {
        let question = session.question.clone();
        let payload = match session.status {
            SessionStatus::Running => return,
            SessionStatus::Completed => EventPayload::ResponseReady {
                question,
                answer: session.result.clone().unwrap_or_default(),
            },
            SessionStatus::Rejected => {
                let reason = session.rejection.clone().unwrap_or_default();
                match rejected_answer {
                    Some(answer) => EventPayload::AnswerRejected {
                        question,
                        answer,
                        reason,
                    },
                    None => EventPayload::RequestRejected { question, reason },
                }
            }
            SessionStatus::Failed => EventPayload::RequestFailed {
                question,
                reason: session
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            },
        };
        notifier.publish(&session.id, Event::new(session.id.clone(), payload));
        notifier.publish(&session.id, Event::new(session.id.clone(), EventPayload::EndOfStream));
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory;
    use crate::domain::models::{CommandKind, EventKind, Stage};
    use crate::services::handler_registry::{CommandHandler, EventHandler};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Routes every command kind to a scripted handler.
    struct Scripted(fn(&Command) -> Result<CommandOutput, HandlerError>);

    #[async_trait]
    impl CommandHandler for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn handle(
            &self,
            command: &Command,
            _ctx: &HandlerContext,
        ) -> Result<CommandOutput, HandlerError> {
            (self.0)(command)
        }
    }

    struct Echo(AtomicU32);

    #[async_trait]
    impl EventHandler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, event: &Event, _ctx: &HandlerContext) -> Result<Reaction, HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Reaction::EmitEvents(vec![event.derive(EventPayload::ToolInvoked {
                tool: "echo".into(),
                succeeded: true,
            })]))
        }
    }

    fn bus_with(handler: fn(&Command) -> Result<CommandOutput, HandlerError>) -> MessageBus {
        bus_with_listener(handler, None)
    }

    fn bus_with_listener(
        handler: fn(&Command) -> Result<CommandOutput, HandlerError>,
        listener: Option<Arc<dyn EventHandler>>,
    ) -> MessageBus {
        let mut builder = HandlerRegistry::builder();
        for kind in CommandKind::ALL {
            builder.register_command(kind, Arc::new(Scripted(handler))).unwrap();
        }
        if let Some(listener) = listener {
            builder.register_event(EventKind::StageCompleted, listener);
        }
        MessageBus::new(
            Arc::new(builder.build().unwrap()),
            Arc::new(memory::offline_collaborators()),
            RetryPolicy::no_retry(),
            TimeoutConfig::default(),
        )
    }

    fn skip_to_generate(command: &Command) -> Result<CommandOutput, HandlerError> {
        match command.kind() {
            CommandKind::Question => Ok(CommandOutput::next(command.follow_up(
                CommandPayload::GenerateResponse {
                    question: "q".into(),
                    refined_question: "q".into(),
                    context: Default::default(),
                },
            ))),
            _ => Ok(CommandOutput::default()),
        }
    }

    fn stop_after_question(_command: &Command) -> Result<CommandOutput, HandlerError> {
        Ok(CommandOutput::default())
    }

    fn reject_at_question(_command: &Command) -> Result<CommandOutput, HandlerError> {
        Err(HandlerError::Rejected("nope".into()))
    }

    fn question_then_check_with_event(command: &Command) -> Result<CommandOutput, HandlerError> {
        match command.kind() {
            CommandKind::Question => Ok(CommandOutput::next(command.follow_up(CommandPayload::Check {
                question: "q".into(),
            }))
            .with_event(command.event(EventPayload::StageCompleted {
                stage: Stage::Question,
                detail: "seeded".into(),
            }))),
            _ => Err(HandlerError::Fatal("stop".into())),
        }
    }

    #[tokio::test]
    async fn test_skipping_stages_fails_with_illegal_transition() {
        let bus = bus_with(skip_to_generate);
        let session = bus.run(Command::question(SessionId::new(), "q")).await;
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(
            session.failure,
            Some(FailureReason::IllegalTransition {
                from: Stage::Question,
                to: Stage::Generating
            })
        );
    }

    #[tokio::test]
    async fn test_empty_queue_without_answer_is_stalled() {
        let bus = bus_with(stop_after_question);
        let session = bus.run(Command::question(SessionId::new(), "q")).await;
        assert_eq!(
            session.failure,
            Some(FailureReason::Stalled {
                stage: Stage::Question
            })
        );
        assert_eq!(session.trail().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_outside_guardrail_stage_fails() {
        let bus = bus_with(reject_at_question);
        let session = bus.run(Command::question(SessionId::new(), "q")).await;
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(matches!(
            session.failure,
            Some(FailureReason::IllegalTransition {
                to: Stage::Rejected,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_events_are_drained_breadth_first_and_listeners_cannot_emit_commands() {
        let echo = Arc::new(Echo(AtomicU32::new(0)));
        let bus = bus_with_listener(question_then_check_with_event, Some(echo.clone()));
        let session = bus.run(Command::question(SessionId::new(), "q")).await;

        let kinds: Vec<String> = session.trail().iter().map(|e| e.kind.to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "command:Question",
                "event:StageCompleted",
                "command:Check",
            ]
        );
        assert_eq!(echo.0.load(Ordering::SeqCst), 1);
        // The fatal failure at Check flushed the ToolInvoked reaction.
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.trail()[2].error.as_deref(), Some("Fatal: stop"));
    }
}
