//! Additional unit tests for rolling state machine transitions

use rolling_upgrade::controller::state_machine::{
    RollingEvent, RollingPhase, RollingState, RollingStateMachine, TransitionContext,
    TransitionResult,
};

fn ctx(node_count: usize, old_members: usize, new_members: usize) -> TransitionContext {
    TransitionContext {
        node_count,
        old_members,
        new_members,
    }
}

mod transition_context_tests {
    use super::*;

    #[test]
    fn test_live_members() {
        assert_eq!(ctx(3, 2, 1).live_members(), 3);
    }

    #[test]
    fn test_within_bounds() {
        let c = ctx(3, 3, 0);
        assert!(c.within_bounds(2));
        assert!(c.within_bounds(3));
        assert!(c.within_bounds(4));
        assert!(!c.within_bounds(1));
        assert!(!c.within_bounds(5));
    }

    #[test]
    fn test_within_bounds_single_node() {
        let c = ctx(1, 1, 0);
        assert!(c.within_bounds(0));
        assert!(c.within_bounds(2));
        assert!(!c.within_bounds(3));
    }
}

mod transition_tests {
    use super::*;

    #[test]
    fn test_pending_to_forming_source() {
        let result = RollingStateMachine::shared().transition(
            RollingPhase::Pending,
            RollingEvent::ConfigurationValidated,
            &ctx(3, 0, 0),
        );
        assert!(matches!(
            result,
            TransitionResult::Success {
                to: RollingPhase::FormingSource,
                ..
            }
        ));
    }

    #[test]
    fn test_steady_to_joining() {
        let result = RollingStateMachine::shared().transition(
            RollingPhase::Steady,
            RollingEvent::NewNodeStarted,
            &ctx(3, 3, 0),
        );
        assert!(matches!(
            result,
            TransitionResult::Success {
                to: RollingPhase::Joining,
                ..
            }
        ));
    }

    #[test]
    fn test_join_blocked_when_already_over() {
        let result = RollingStateMachine::shared().transition(
            RollingPhase::Steady,
            RollingEvent::NewNodeStarted,
            &ctx(3, 3, 1),
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_completion_guard() {
        let machine = RollingStateMachine::shared();
        let early = machine.transition(
            RollingPhase::Steady,
            RollingEvent::AllNodesReplaced,
            &ctx(2, 1, 1),
        );
        assert!(matches!(early, TransitionResult::GuardFailed { .. }));

        let done = machine.transition(
            RollingPhase::Steady,
            RollingEvent::AllNodesReplaced,
            &ctx(2, 0, 2),
        );
        assert!(matches!(
            done,
            TransitionResult::Success {
                to: RollingPhase::Completed,
                ..
            }
        ));
    }

    #[test]
    fn test_timeout_only_while_converging() {
        let machine = RollingStateMachine::shared();
        assert!(machine.can_transition(RollingPhase::Joining, RollingEvent::TimeoutOccurred));
        assert!(machine.can_transition(RollingPhase::Leaving, RollingEvent::TimeoutOccurred));
        assert!(!machine.can_transition(RollingPhase::Steady, RollingEvent::TimeoutOccurred));
        assert!(!machine.can_transition(RollingPhase::Added, RollingEvent::TimeoutOccurred));
    }

    #[test]
    fn test_invalid_transition_from_terminal() {
        let result = RollingStateMachine::shared().transition(
            RollingPhase::Completed,
            RollingEvent::NewNodeStarted,
            &ctx(3, 0, 3),
        );
        assert_eq!(
            result,
            TransitionResult::InvalidTransition {
                current: RollingPhase::Completed,
                event: RollingEvent::NewNodeStarted,
            }
        );
    }

    #[test]
    fn test_valid_events_from_steady() {
        let events = RollingStateMachine::shared().valid_events(RollingPhase::Steady);
        assert!(events.contains(&RollingEvent::NewNodeStarted));
        assert!(events.contains(&RollingEvent::AllNodesReplaced));
        assert!(events.contains(&RollingEvent::ErrorOccurred));
        assert!(!events.contains(&RollingEvent::JoinConverged));
    }
}

mod rolling_state_tests {
    use super::*;

    #[test]
    fn test_counts_follow_iterations() {
        let mut state = RollingState::new(2);
        state.apply(RollingEvent::ConfigurationValidated).unwrap();
        state.apply(RollingEvent::BaselineVerified).unwrap();

        state.apply(RollingEvent::NewNodeStarted).unwrap();
        assert_eq!((state.old_members(), state.new_members()), (2, 1));
        state.apply(RollingEvent::JoinConverged).unwrap();
        state.apply(RollingEvent::OldNodeStopped).unwrap();
        assert_eq!((state.old_members(), state.new_members()), (1, 1));
        state.apply(RollingEvent::ShrinkConverged).unwrap();
        assert_eq!(state.iterations(), 1);
        assert_eq!(state.phase(), RollingPhase::Steady);
    }

    #[test]
    fn test_rejected_event_leaves_state_unchanged() {
        let mut state = RollingState::new(2);
        let before = state.clone();
        assert!(state.apply(RollingEvent::BaselineVerified).is_err());
        assert_eq!(state, before);
    }
}
