//! Finite state machine for the per-site rolling loop
//!
//! Every topology change the orchestrator makes is recorded as an event.
//! The transition table rejects out-of-order steps and the guards keep live
//! membership within one node of the configured size.
//!
//! ## Phase Flow
//!
//! ```text
//! Pending → FormingSource → Steady → Joining → Added → Leaving → Steady …
//!                                  ↘ (all old nodes replaced) Completed
//!                 ↓ (any non-terminal phase)
//!               Failed
//! ```

use std::fmt;
use std::sync::LazyLock;

use crate::controller::error::{UpgradeError, UpgradeResult};

/// Phases of one site's rolling upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollingPhase {
    /// Configuration not yet validated
    Pending,
    /// Old-version nodes starting and being seeded
    FormingSource,
    /// Membership equals the configured node count
    Steady,
    /// A new-version node was started and is joining
    Joining,
    /// The new node joined, membership is one over
    Added,
    /// An old-version node was stopped and is leaving
    Leaving,
    /// Every old node was replaced
    Completed,
    /// The run aborted
    Failed,
}

impl RollingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RollingPhase::Completed | RollingPhase::Failed)
    }
}

impl fmt::Display for RollingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollingPhase::Pending => write!(f, "Pending"),
            RollingPhase::FormingSource => write!(f, "FormingSource"),
            RollingPhase::Steady => write!(f, "Steady"),
            RollingPhase::Joining => write!(f, "Joining"),
            RollingPhase::Added => write!(f, "Added"),
            RollingPhase::Leaving => write!(f, "Leaving"),
            RollingPhase::Completed => write!(f, "Completed"),
            RollingPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events that trigger state transitions in the rolling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollingEvent {
    /// Versions and node count accepted
    ConfigurationValidated,
    /// Old cluster formed with the expected membership
    BaselineVerified,
    /// One new-version node started
    NewNodeStarted,
    /// Membership reached node count + 1
    JoinConverged,
    /// One old-version node stopped
    OldNodeStopped,
    /// Membership shrank back to node count
    ShrinkConverged,
    /// No old nodes remain
    AllNodesReplaced,
    /// Any failure
    ErrorOccurred,
    /// Convergence wait exhausted its budget
    TimeoutOccurred,
}

impl fmt::Display for RollingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollingEvent::ConfigurationValidated => write!(f, "ConfigurationValidated"),
            RollingEvent::BaselineVerified => write!(f, "BaselineVerified"),
            RollingEvent::NewNodeStarted => write!(f, "NewNodeStarted"),
            RollingEvent::JoinConverged => write!(f, "JoinConverged"),
            RollingEvent::OldNodeStopped => write!(f, "OldNodeStopped"),
            RollingEvent::ShrinkConverged => write!(f, "ShrinkConverged"),
            RollingEvent::AllNodesReplaced => write!(f, "AllNodesReplaced"),
            RollingEvent::ErrorOccurred => write!(f, "ErrorOccurred"),
            RollingEvent::TimeoutOccurred => write!(f, "TimeoutOccurred"),
        }
    }
}

/// Membership counts available to guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    /// Configured nodes per site
    pub node_count: usize,
    /// Live old-version members
    pub old_members: usize,
    /// Live new-version members
    pub new_members: usize,
}

impl TransitionContext {
    pub fn live_members(&self) -> usize {
        self.old_members + self.new_members
    }

    /// Live membership stays within one node of the configured size
    pub fn within_bounds(&self, live: usize) -> bool {
        live + 1 >= self.node_count && live <= self.node_count + 1
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct RollingTransition {
    pub from: RollingPhase,
    pub to: RollingPhase,
    pub event: RollingEvent,
    pub description: &'static str,
}

impl RollingTransition {
    const fn new(
        from: RollingPhase,
        to: RollingPhase,
        event: RollingEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: RollingPhase,
        to: RollingPhase,
        event: RollingEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: RollingPhase,
        event: RollingEvent,
    },
    GuardFailed {
        from: RollingPhase,
        to: RollingPhase,
        event: RollingEvent,
        reason: String,
    },
}

/// Transition table for the rolling loop
pub struct RollingStateMachine {
    transitions: Vec<RollingTransition>,
}

impl Default for RollingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

static MACHINE: LazyLock<RollingStateMachine> = LazyLock::new(RollingStateMachine::new);

impl RollingStateMachine {
    pub fn new() -> Self {
        use RollingEvent as E;
        use RollingPhase as P;

        let mut transitions = vec![
            RollingTransition::new(
                P::Pending,
                P::FormingSource,
                E::ConfigurationValidated,
                "Configuration valid, starting old-version nodes",
            ),
            RollingTransition::new(
                P::FormingSource,
                P::Steady,
                E::BaselineVerified,
                "Baseline membership verified",
            ),
            RollingTransition::new(
                P::Steady,
                P::Joining,
                E::NewNodeStarted,
                "New-version node started",
            ),
            RollingTransition::new(
                P::Joining,
                P::Added,
                E::JoinConverged,
                "New node joined the cluster",
            ),
            RollingTransition::new(
                P::Added,
                P::Leaving,
                E::OldNodeStopped,
                "Old-version node stopped",
            ),
            RollingTransition::new(
                P::Leaving,
                P::Steady,
                E::ShrinkConverged,
                "Cluster shrank back to node count",
            ),
            RollingTransition::new(
                P::Steady,
                P::Completed,
                E::AllNodesReplaced,
                "Every old node replaced",
            ),
            RollingTransition::new(
                P::Joining,
                P::Failed,
                E::TimeoutOccurred,
                "New node did not join in time",
            ),
            RollingTransition::new(
                P::Leaving,
                P::Failed,
                E::TimeoutOccurred,
                "Cluster did not shrink in time",
            ),
        ];

        for phase in [
            P::Pending,
            P::FormingSource,
            P::Steady,
            P::Joining,
            P::Added,
            P::Leaving,
        ] {
            transitions.push(RollingTransition::new(
                phase,
                P::Failed,
                E::ErrorOccurred,
                "Run aborted",
            ));
        }

        Self { transitions }
    }

    /// Shared instance of the transition table
    pub fn shared() -> &'static RollingStateMachine {
        &MACHINE
    }

    pub fn transition(
        &self,
        current: RollingPhase,
        event: RollingEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: RollingPhase, event: RollingEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    pub fn valid_events(&self, phase: RollingPhase) -> Vec<RollingEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == phase)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &RollingTransition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            // Guard: a node can only be added when membership is at node count
            RollingEvent::NewNodeStarted => {
                if ctx.old_members == 0 {
                    Some("No old-version nodes left to replace".to_string())
                } else if !ctx.within_bounds(ctx.live_members() + 1) {
                    Some(format!(
                        "Adding a node would bring membership to {} (node count {})",
                        ctx.live_members() + 1,
                        ctx.node_count
                    ))
                } else {
                    None
                }
            }

            RollingEvent::OldNodeStopped => {
                if ctx.old_members == 0 {
                    Some("No old-version node is running".to_string())
                } else if !ctx.within_bounds(ctx.live_members() - 1) {
                    Some(format!(
                        "Stopping a node would bring membership to {} (node count {})",
                        ctx.live_members() - 1,
                        ctx.node_count
                    ))
                } else {
                    None
                }
            }

            RollingEvent::AllNodesReplaced => {
                if ctx.old_members != 0 || ctx.new_members != ctx.node_count {
                    Some(format!(
                        "{} old and {} new members remain, expected 0 and {}",
                        ctx.old_members, ctx.new_members, ctx.node_count
                    ))
                } else {
                    None
                }
            }

            _ => None,
        }
    }
}

/// Rolling progress of one site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingState {
    node_count: usize,
    phase: RollingPhase,
    old_members: usize,
    new_members: usize,
    iterations: usize,
}

impl RollingState {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            phase: RollingPhase::Pending,
            old_members: 0,
            new_members: 0,
            iterations: 0,
        }
    }

    pub fn phase(&self) -> RollingPhase {
        self.phase
    }

    pub fn old_members(&self) -> usize {
        self.old_members
    }

    pub fn new_members(&self) -> usize {
        self.new_members
    }

    /// Completed add/remove iterations
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn context(&self) -> TransitionContext {
        TransitionContext {
            node_count: self.node_count,
            old_members: self.old_members,
            new_members: self.new_members,
        }
    }

    /// Apply an event, updating phase and member counts
    pub fn apply(&mut self, event: RollingEvent) -> UpgradeResult<()> {
        let result = RollingStateMachine::shared().transition(self.phase, event, &self.context());
        match result {
            TransitionResult::Success { to, .. } => {
                match event {
                    RollingEvent::BaselineVerified => self.old_members = self.node_count,
                    RollingEvent::NewNodeStarted => self.new_members += 1,
                    RollingEvent::OldNodeStopped => self.old_members -= 1,
                    RollingEvent::ShrinkConverged => self.iterations += 1,
                    _ => {}
                }
                self.phase = to;
                Ok(())
            }
            TransitionResult::InvalidTransition { current, event } => {
                Err(UpgradeError::InvalidTransition {
                    from: current.to_string(),
                    event: event.to_string(),
                    reason: "not allowed from this phase".to_string(),
                })
            }
            TransitionResult::GuardFailed {
                from,
                event,
                reason,
                ..
            } => Err(UpgradeError::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
                reason,
            }),
        }
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self, error: &UpgradeError) {
        if self.phase.is_terminal() {
            return;
        }
        let event = if error.is_timeout() {
            RollingEvent::TimeoutOccurred
        } else {
            RollingEvent::ErrorOccurred
        };
        if self.apply(event).is_err() {
            // Timeouts outside a convergence wait still fail the site
            self.phase = RollingPhase::Failed;
        }
    }
}
