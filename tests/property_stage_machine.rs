//! Property-based tests for the stage machine and session invariants
//!
//! Tests the following properties:
//! 1. Terminal stages accept no transition
//! 2. Only the next stage, Failed, or Rejected from a guardrail stage is legal
//! 3. A session's history is always an ordered prefix of the processing stages
//! 4. Notifier channels never exceed their capacity

use proptest::prelude::*;
use std::sync::Arc;

use askbus::adapters::memory::KeywordGuardrail;
use askbus::domain::models::{Event, EventPayload, OverflowPolicy, SessionId, SessionStatus, Stage};
use askbus::domain::ports::Collaborators;
use askbus::services::{RetryPolicy, SessionChannel};

mod common;

fn stage_strategy() -> impl Strategy<Value = Stage> {
    prop::sample::select(Stage::ALL.to_vec())
}

fn policy_strategy() -> impl Strategy<Value = OverflowPolicy> {
    prop_oneof![Just(OverflowPolicy::DropOldest), Just(OverflowPolicy::DropNewest)]
}

proptest! {
    #[test]
    fn proptest_terminal_stages_are_final(from in stage_strategy(), to in stage_strategy()) {
        if from.is_terminal() {
            prop_assert!(from.transition(to).is_err());
        }
    }

    #[test]
    fn proptest_transition_table(from in stage_strategy(), to in stage_strategy()) {
        let expected = !from.is_terminal()
            && (from.next() == Some(to)
                || to == Stage::Failed
                || (to == Stage::Rejected && from.may_reject()));
        prop_assert_eq!(from.can_transition_to(to), expected);
        match from.transition(to) {
            Ok(stage) => prop_assert_eq!(stage, to),
            Err(err) => {
                prop_assert_eq!(err.from, from);
                prop_assert_eq!(err.to, to);
            }
        }
    }

    #[test]
    fn proptest_stage_names_round_trip(stage in stage_strategy()) {
        prop_assert_eq!(stage.as_str().parse::<Stage>(), Ok(stage));
    }

    #[test]
    fn proptest_channel_is_bounded(
        capacity in 2usize..16,
        pushes in 0usize..64,
        policy in policy_strategy(),
    ) {
        let session = SessionId::new();
        let channel = SessionChannel::new(session.clone(), capacity, policy);
        for _ in 0..pushes {
            channel.push(Event::new(session.clone(), EventPayload::StatusUpdate { stage: Stage::Retrieving }));
        }
        prop_assert!(channel.len() <= capacity);
        prop_assert_eq!(channel.len(), pushes.min(capacity));
        prop_assert_eq!(channel.dropped(), pushes.saturating_sub(capacity) as u64);

        // Terminal notifications are delivered even when full
        prop_assert!(channel.push(Event::new(session.clone(), EventPayload::EndOfStream)));
        prop_assert!(channel.len() <= capacity);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn proptest_history_is_ordered_prefix(
        block_inbound in any::<bool>(),
        block_outbound in any::<bool>(),
    ) {
        let mut guardrail = KeywordGuardrail::new();
        if block_inbound {
            guardrail = guardrail.block_inbound("april");
        }
        if block_outbound {
            guardrail = guardrail.block_outbound("42");
        }
        let collaborators = Collaborators {
            guardrail: Arc::new(guardrail),
            ..common::scenario_collaborators()
        };
        let bus = common::bus(collaborators, RetryPolicy::no_retry());
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let session = runtime.block_on(bus.run(askbus::Command::question(
            SessionId::new(),
            common::SCENARIO_QUESTION,
        )));

        let stages = session.stages();
        prop_assert_eq!(&stages[..], &Stage::PROCESSING[..stages.len()]);
        prop_assert!(session.stage.is_terminal());

        let expected_len = if block_inbound { 1 } else { 7 };
        prop_assert_eq!(stages.len(), expected_len);
        let expected_status = if block_inbound || block_outbound {
            SessionStatus::Rejected
        } else {
            SessionStatus::Completed
        };
        prop_assert_eq!(session.status, expected_status);
        prop_assert_eq!(session.result.is_some(), expected_status == SessionStatus::Completed);
    }
}
