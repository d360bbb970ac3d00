//! End-to-end runs of the standard pipeline against in-memory collaborators.

mod common;

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use askbus::adapters::memory::{
    self, CannedGenerator, ExtractiveGenerator, KeywordGuardrail, StaticRetriever,
    StaticToolExecutor,
};
use askbus::domain::models::{
    Command, CommandKind, Event, EventKind, EventPayload, MessageKind, ScoredDocument, SessionId,
    SessionOutcome, SessionStatus, Stage, TimeoutConfig,
};
use askbus::domain::ports::{Collaborators, NullNotifier};
use askbus::services::{PipelineService, RetryPolicy, RunOptions};
use askbus::FailureReason;
use common::*;

fn seed(text: &str) -> Command {
    Command::question(SessionId::new(), text)
}

#[tokio::test]
async fn test_scenario_question_answers_from_tool() {
    let bus = bus(scenario_collaborators(), RetryPolicy::no_retry());
    let session = bus.run(seed(SCENARIO_QUESTION)).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("42"));
    assert_eq!(session.stages(), Stage::PROCESSING.to_vec());
    assert_eq!(session.history().len(), 7);
    assert_eq!(session.stage, Stage::Completed);
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn test_no_tools_selected_generates_from_retrieved_document() {
    let collaborators = Collaborators {
        retriever: Arc::new(StaticRetriever::new(vec![ScoredDocument::new(
            "x-april",
            "Series X reached 42 in April",
            0.0,
        )])),
        tools: Arc::new(StaticToolExecutor::new()),
        generator: Arc::new(CannedGenerator::new("42")),
        ..memory::offline_collaborators()
    };
    let bus = bus(collaborators, RetryPolicy::no_retry());
    let session = bus.run(seed(SCENARIO_QUESTION)).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("42"));
    assert_eq!(session.history().len(), 7);
    assert_eq!(session.stages(), Stage::PROCESSING.to_vec());
    assert!(!session
        .trail()
        .iter()
        .any(|e| e.message.kind() == MessageKind::Event(EventKind::ToolInvoked)));
}

#[tokio::test]
async fn test_history_is_seven_stage_commands_in_order() {
    let bus = bus(scenario_collaborators(), RetryPolicy::no_retry());
    let session = bus.run(seed(SCENARIO_QUESTION)).await;

    let kinds: Vec<_> = session
        .history()
        .iter()
        .map(|entry| entry.message.kind().to_string())
        .collect();
    let expected: Vec<_> = CommandKind::ALL[1..]
        .iter()
        .map(|kind| format!("command:{}", kind.as_str()))
        .collect();
    assert_eq!(kinds, expected);

    // Positions in the full trail strictly increase
    let positions: Vec<_> = session.history().iter().map(|e| e.position).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    // Seed and listener events are on the trail but not in the history
    assert!(session.trail().len() > session.history().len());
    assert_eq!(session.trail()[0].stage, Some(Stage::Question));
}

#[tokio::test]
async fn test_inbound_rejection_short_circuits() {
    let collaborators = Collaborators {
        guardrail: Arc::new(KeywordGuardrail::new().block_inbound("password")),
        ..scenario_collaborators()
    };
    let bus = bus(collaborators, RetryPolicy::no_retry());
    let session = bus.run(seed("What is the admin password?")).await;

    assert_eq!(session.status, SessionStatus::Rejected);
    assert_eq!(session.stage, Stage::Rejected);
    assert_eq!(session.stages(), vec![Stage::Checking]);
    assert_eq!(session.result, None);
    assert_eq!(
        session.outcome(),
        SessionOutcome::Rejected {
            reason: "inbound content mentions 'password'".into()
        }
    );
    // Nothing is dequeued after the rejecting command
    let last = session.trail().last().unwrap();
    assert_eq!(last.stage, Some(Stage::Checking));
}

#[tokio::test]
async fn test_outbound_rejection_reports_the_answer() {
    let collaborators = Collaborators {
        guardrail: Arc::new(KeywordGuardrail::new().block_outbound("42")),
        ..scenario_collaborators()
    };
    let service = PipelineService::from_config(&config_with_retry(1), collaborators).unwrap();
    let id = service.submit_question(SCENARIO_QUESTION, None).unwrap();
    let events: Vec<Event> = service.subscribe(&id).unwrap().collect().await;
    let session = service.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Rejected);
    assert_eq!(session.history().len(), 7);
    let rejected = events
        .iter()
        .find_map(|e| match e.payload() {
            EventPayload::AnswerRejected { answer, .. } => Some(answer.clone()),
            _ => None,
        })
        .expect("AnswerRejected published");
    assert_eq!(rejected, "42");
    assert!(!events.iter().any(|e| e.kind() == EventKind::ResponseReady));
}

#[tokio::test]
async fn test_empty_retrieval_still_answers() {
    let collaborators = Collaborators {
        retriever: Arc::new(StaticRetriever::empty()),
        generator: Arc::new(ExtractiveGenerator),
        ..memory::offline_collaborators()
    };
    let bus = bus(collaborators, RetryPolicy::no_retry());
    let session = bus.run(seed("What happened to Q in June?")).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.result.as_deref(), Some(ExtractiveGenerator::NO_CONTEXT));
    assert_eq!(session.history().len(), 7);
}

#[tokio::test]
async fn test_transient_generator_failures_are_retried() {
    let generator = Arc::new(FlakyGenerator::new(2, "recovered"));
    let collaborators = Collaborators {
        generator: generator.clone(),
        ..scenario_collaborators()
    };
    let bus = bus(collaborators, fast_retry(3));
    let session = bus.run(seed(SCENARIO_QUESTION)).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("recovered"));
    assert_eq!(generator.calls(), 3);
    assert_eq!(session.history().len(), 7);

    let generate = session
        .history()
        .into_iter()
        .find(|e| e.stage == Some(Stage::Generating))
        .unwrap();
    assert_eq!(generate.attempts, 3);
    assert!(generate.error.as_deref().unwrap_or_default().contains("overloaded"));
}

#[tokio::test]
async fn test_retry_bound_is_total_attempts() {
    let generator = Arc::new(FlakyGenerator::new(3, "never"));
    let collaborators = Collaborators {
        generator: generator.clone(),
        ..scenario_collaborators()
    };
    let bus = bus(collaborators, fast_retry(3));
    let session = bus.run(seed(SCENARIO_QUESTION)).await;

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(generator.calls(), 3);
    assert!(matches!(
        session.failure,
        Some(FailureReason::RetryExhausted {
            stage: Stage::Generating,
            attempts: 3,
            ..
        })
    ));
    assert_eq!(session.stage, Stage::Failed);
}

#[tokio::test]
async fn test_non_transient_failure_is_not_retried() {
    let collaborators = Collaborators {
        generator: Arc::new(BrokenGenerator),
        ..scenario_collaborators()
    };
    let bus = bus(collaborators, fast_retry(5));
    let session = bus.run(seed(SCENARIO_QUESTION)).await;

    let Some(FailureReason::Fatal { stage, message }) = &session.failure else {
        panic!("expected a fatal failure, got {:?}", session.failure)
    };
    assert_eq!(*stage, Stage::Generating);
    assert!(message.contains("prompt too long"));
    let generate = session.history().into_iter().last().unwrap();
    assert_eq!(generate.attempts, 1);
}

#[tokio::test]
async fn test_stage_timeout_counts_as_transient() {
    let collaborators = Collaborators {
        generator: Arc::new(SlowGenerator(Duration::from_secs(5))),
        ..scenario_collaborators()
    };
    let timeouts = TimeoutConfig {
        default_ms: 30_000,
        stages: HashMap::from([(Stage::Generating, 20)]),
    };
    let bus = bus_with_timeouts(collaborators, fast_retry(2), timeouts);
    let session = bus.run(seed(SCENARIO_QUESTION)).await;

    assert!(matches!(
        session.failure,
        Some(FailureReason::RetryExhausted {
            stage: Stage::Generating,
            attempts: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancellation_during_reranking_stops_after_three_stages() {
    let token = CancellationToken::new();
    let collaborators = Collaborators {
        reranker: Arc::new(CancellingReranker(token.clone())),
        ..scenario_collaborators()
    };
    let bus = bus(collaborators, RetryPolicy::no_retry());
    let options = RunOptions {
        cancel: token,
        notifier: Arc::new(NullNotifier),
    };
    let session = bus.run_with(seed(SCENARIO_QUESTION), options).await;

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.history().len(), 3);
    assert_eq!(
        session.failure,
        Some(FailureReason::Cancelled {
            stage: Stage::Reranking
        })
    );
    assert!(session.failure.as_ref().is_some_and(FailureReason::is_cancelled));
}

#[tokio::test]
async fn test_notifications_follow_stage_order_and_end_the_stream() {
    let service = PipelineService::from_config(&config_with_retry(1), scenario_collaborators())
        .unwrap();
    let id = service.submit_question(SCENARIO_QUESTION, None).unwrap();
    let events: Vec<Event> = service.subscribe(&id).unwrap().collect().await;

    let started: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e.payload() {
            EventPayload::StatusUpdate { stage } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(started, Stage::PROCESSING.to_vec());

    let tail: Vec<_> = events.iter().rev().take(2).map(Event::kind).collect();
    assert_eq!(tail, vec![EventKind::EndOfStream, EventKind::ResponseReady]);
    assert!(events.iter().all(|e| e.correlation_id() == &id));
    assert!(events
        .iter()
        .any(|e| matches!(e.payload(), EventPayload::ToolInvoked { tool, succeeded: true } if tool == "max_value")));
    assert!(events
        .iter()
        .any(|e| matches!(e.payload(), EventPayload::Evaluation { approved: true, .. })));

    // Every event is renderable for the transport
    for event in &events {
        assert!(!event.to_message().is_empty());
        let line = event.to_event_string();
        assert!(line.starts_with("event:") || line.starts_with("data:"));
    }

    assert_eq!(
        service.get_result(&id).unwrap(),
        SessionOutcome::Answered {
            answer: "42".into()
        }
    );
}

#[tokio::test]
async fn test_retries_are_announced_to_the_subscriber() {
    let collaborators = Collaborators {
        generator: Arc::new(FlakyGenerator::new(1, "ok")),
        ..scenario_collaborators()
    };
    let service = PipelineService::from_config(&config_with_retry(2), collaborators).unwrap();
    let id = service.submit_question(SCENARIO_QUESTION, None).unwrap();
    let events: Vec<Event> = service.subscribe(&id).unwrap().collect().await;

    let retries: Vec<_> = events
        .iter()
        .filter_map(|e| match e.payload() {
            EventPayload::RetryScheduled { stage, attempt, .. } => Some((*stage, *attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(Stage::Generating, 2)]);
}

#[tokio::test]
async fn test_failed_session_publishes_request_failed() {
    let collaborators = Collaborators {
        generator: Arc::new(BrokenGenerator),
        ..scenario_collaborators()
    };
    let service = PipelineService::from_config(&config_with_retry(1), collaborators).unwrap();
    let id = service.submit_question(SCENARIO_QUESTION, None).unwrap();
    let events: Vec<Event> = service.subscribe(&id).unwrap().collect().await;

    let kinds: Vec<_> = events.iter().rev().take(2).map(Event::kind).collect();
    assert_eq!(kinds, vec![EventKind::EndOfStream, EventKind::RequestFailed]);
    assert!(matches!(
        service.get_result(&id).unwrap(),
        SessionOutcome::Failed {
            reason: FailureReason::Fatal { .. }
        }
    ));
}
