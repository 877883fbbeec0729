// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for the rolling upgrade
//!
//! These tests use proptest to generate random configurations and verify that:
//! 1. The state machine never panics on any event sequence and never leaves
//!    the membership bounds during the loop
//! 2. Random node counts and convergence delays always end with `nodeCount`
//!    new-version members
//! 3. Any injected fault still releases every node exactly once
//! 4. Version reference parsing never panics

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use rolling_upgrade::config::{MAX_NODES, VersionReference, validate_configuration};
use rolling_upgrade::controller::state_machine::{
    RollingEvent, RollingPhase, RollingState, RollingStateMachine, TransitionContext,
};
use rolling_upgrade::driver::RunSide;

use common::*;

// =============================================================================
// Strategies
// =============================================================================

fn rolling_event() -> impl Strategy<Value = RollingEvent> {
    prop_oneof![
        Just(RollingEvent::ConfigurationValidated),
        Just(RollingEvent::BaselineVerified),
        Just(RollingEvent::NewNodeStarted),
        Just(RollingEvent::JoinConverged),
        Just(RollingEvent::OldNodeStopped),
        Just(RollingEvent::ShrinkConverged),
        Just(RollingEvent::AllNodesReplaced),
        Just(RollingEvent::ErrorOccurred),
        Just(RollingEvent::TimeoutOccurred),
    ]
}

fn rolling_phase() -> impl Strategy<Value = RollingPhase> {
    prop_oneof![
        Just(RollingPhase::Pending),
        Just(RollingPhase::FormingSource),
        Just(RollingPhase::Steady),
        Just(RollingPhase::Joining),
        Just(RollingPhase::Added),
        Just(RollingPhase::Leaving),
        Just(RollingPhase::Completed),
        Just(RollingPhase::Failed),
    ]
}

/// One fault that aborts a run
fn aborting_fault() -> impl Strategy<Value = Faults> {
    prop_oneof![
        Just(Faults {
            join_never: true,
            ..Faults::default()
        }),
        Just(Faults {
            shrink_never: true,
            ..Faults::default()
        }),
        Just(Faults {
            baseline_hidden: 1,
            ..Faults::default()
        }),
        Just(Faults {
            corrupt_probe_after: Some(1),
            ..Faults::default()
        }),
        (0usize..3).prop_map(|k| Faults {
            fail_start: Some((RunSide::From, k)),
            ..Faults::default()
        }),
        (0usize..3).prop_map(|k| Faults {
            fail_start: Some((RunSide::To, k)),
            ..Faults::default()
        }),
        Just(Faults {
            panic_on_start: Some(RunSide::To),
            ..Faults::default()
        }),
    ]
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// =============================================================================
// State machine
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Any event sequence is either applied or rejected, never panics,
    /// and accepted steps keep membership within one node of node count
    #[test]
    fn prop_state_machine_never_panics(
        node_count in 1usize..8,
        events in prop::collection::vec(rolling_event(), 0..40),
    ) {
        let mut state = RollingState::new(node_count);
        for event in events {
            let before = state.clone();
            match state.apply(event) {
                Ok(()) => {
                    if matches!(
                        state.phase(),
                        RollingPhase::Joining | RollingPhase::Added | RollingPhase::Leaving
                    ) {
                        let ctx = state.context();
                        prop_assert!(ctx.within_bounds(ctx.live_members()),
                            "{:?} out of bounds after {:?}", ctx, event);
                    }
                }
                Err(_) => prop_assert_eq!(&state, &before),
            }
            prop_assert!(state.old_members() <= node_count);
            prop_assert!(state.new_members() <= node_count);
        }
    }

    /// Property: Transition lookup is total over phases, events and counts
    #[test]
    fn prop_transition_total(
        phase in rolling_phase(),
        event in rolling_event(),
        node_count in 0usize..6,
        old_members in 0usize..8,
        new_members in 0usize..8,
    ) {
        let ctx = TransitionContext { node_count, old_members, new_members };
        let _ = RollingStateMachine::shared().transition(phase, event, &ctx);
    }

    /// Property: Terminal phases accept no events
    #[test]
    fn prop_terminal_phases_are_final(event in rolling_event()) {
        let machine = RollingStateMachine::shared();
        prop_assert!(!machine.can_transition(RollingPhase::Completed, event));
        prop_assert!(!machine.can_transition(RollingPhase::Failed, event));
    }
}

// =============================================================================
// Orchestration against the simulated cluster
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: Delays within the verifier budget always converge on the new version
    #[test]
    fn prop_random_delays_always_succeed(
        node_count in 1usize..6,
        join_delay_polls in 0usize..=5,
        shrink_delay_polls in 0usize..=5,
        xsite in any::<bool>(),
    ) {
        let sim = SimulatedCluster::new().with_faults(Faults {
            join_delay_polls,
            shrink_delay_polls,
            ..Faults::default()
        });
        let mut config = config(node_count);
        config.xsite = xsite;
        let sites = config.sites();

        let report = block_on(sim.orchestrator(config).perform_upgrade()).unwrap();

        prop_assert_eq!(report.sites.len(), sites.len());
        for site in &report.sites {
            prop_assert_eq!(site.final_members, node_count);
            prop_assert_eq!(site.iterations, node_count);
            prop_assert!(site.nodes.iter().all(|n| n.version == VERSION_TO));
        }
        for site in &sites {
            let history = sim.live_history(site);
            let start = history.iter().position(|&l| l == node_count).unwrap();
            prop_assert!(history[start..]
                .iter()
                .all(|&l| l + 1 >= node_count && l <= node_count + 1));
        }
        prop_assert_eq!(sim.running_nodes(), 0);
    }

    /// Property: Any single aborting fault still releases everything exactly once
    #[test]
    fn prop_faults_always_clean_up(
        node_count in 1usize..5,
        faults in aborting_fault(),
    ) {
        let sim = SimulatedCluster::new().with_faults(faults);
        let result = block_on(sim.orchestrator(config(node_count)).perform_upgrade());

        // fail_start past the last node never fires
        if let Err(err) = result {
            prop_assert!(err.exit_code() != 0);
        }
        prop_assert_eq!(sim.running_nodes(), 0);
        prop_assert_eq!(sim.artifacts_released(RunSide::From), 1);
        prop_assert_eq!(sim.artifacts_released(RunSide::To), 1);
    }
}

// =============================================================================
// Configuration
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Parsing any string yields a reference or an error, never a panic
    #[test]
    fn prop_version_parse_never_panics(raw in ".*") {
        let _ = raw.parse::<VersionReference>();
    }

    /// Property: Parsed references print back to an equivalent reference
    #[test]
    fn prop_version_display_reparses(raw in "(image://|file:///)?[a-z0-9][a-z0-9._:-]{0,20}") {
        if let Ok(reference) = raw.parse::<VersionReference>() {
            let again: VersionReference = reference.to_string().parse().unwrap();
            prop_assert_eq!(again, reference);
        }
    }

    /// Property: Labels are always container-name safe
    #[test]
    fn prop_version_label_is_safe(raw in ".{1,40}") {
        if let Ok(reference) = raw.parse::<VersionReference>() {
            let label = reference.label();
            prop_assert!(!label.is_empty());
            prop_assert!(label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
        }
    }

    /// Property: Node counts outside the supported range are always rejected
    #[test]
    fn prop_node_count_range(node_count in 0usize..100) {
        let result = validate_configuration(&config(node_count));
        prop_assert_eq!(result.is_ok(), (1..=MAX_NODES).contains(&node_count));
    }
}
