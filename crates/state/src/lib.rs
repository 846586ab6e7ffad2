//! Two-level mission state machine.
//!
//! A flat match-based `StateMachine::transition(event) -> Mode` shape (one
//! mode enum, logged transitions) generalized into two levels: an outer
//! `MissionPhase` the whole run moves through once, and an inner
//! `ExplorationState` that only runs while the mission is in
//! `ExploringMaze`. `engine::Engine`/`explorer::Explorer` own instances of
//! both and feed them events derived from sensor and planner state each
//! tick; neither machine owns any sensing or planning logic itself.

use tracing::info;
use types::{ExplorationState, MissionPhase};

/// Events that drive the outer mission-phase machine.
#[derive(Debug, Clone, Copy)]
pub enum MissionEvent {
    /// Explored ratio reached the threshold, or no reachable frontier
    /// remains and an exit has been confirmed.
    ExplorationComplete,
    /// The robot arrived within tolerance of the start point while
    /// `ReturningToStart`. `exit_confirmed` decides whether the mission
    /// continues on to the exit or simply ends here.
    ArrivedAtStart { exit_confirmed: bool },
    /// The robot arrived within tolerance of the recorded exit pose while
    /// `GoingToExit`.
    ArrivedAtExit,
}

/// Outer mission-phase state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissionStateMachine {
    phase: MissionPhase,
}

impl MissionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> MissionPhase {
        self.phase
    }

    /// Process an event, returning the (possibly unchanged) new phase.
    pub fn transition(&mut self, event: MissionEvent) -> MissionPhase {
        let old_phase = self.phase;

        self.phase = match (self.phase, event) {
            (MissionPhase::ExploringMaze, MissionEvent::ExplorationComplete) => {
                MissionPhase::ReturningToStart
            }
            (
                MissionPhase::ReturningToStart,
                MissionEvent::ArrivedAtStart {
                    exit_confirmed: true,
                },
            ) => MissionPhase::GoingToExit,
            (MissionPhase::GoingToExit, MissionEvent::ArrivedAtExit) => {
                MissionPhase::MissionComplete
            }
            (phase, _) => phase,
        };

        if self.phase != old_phase {
            info!(?old_phase, new_phase = ?self.phase, ?event, "Mission phase transition");
        }

        self.phase
    }
}

/// Events that drive the inner exploration-state machine. Only meaningful
/// while the mission phase is `ExploringMaze`.
#[derive(Debug, Clone, Copy)]
pub enum ExplorationEvent {
    /// The frontier engine produced a target and the planner routed a path to it.
    TargetSelected,
    /// The current path was driven to completion.
    FollowingComplete,
    /// The front sector of the scan showed a near obstacle; the path was
    /// invalidated.
    PathBlocked,
    /// `scan_inefficiency` exceeded the threshold with no exit confirmed
    /// yet.
    ExitCandidateTriggered,
    /// Re-measurement at the confirmation target still showed high
    /// inefficiency; `exit_pose` was recorded.
    ExitConfirmed,
    /// Re-measurement dropped back below threshold; resume ordinary search.
    ExitNotConfirmed,
    /// The robot reached the inward point past the exit pose.
    ReturnedToMaze,
}

/// Inner exploration-state machine (active only during `EXPLORING_MAZE`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplorationStateMachine {
    state: ExplorationState,
}

impl ExplorationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExplorationState {
        self.state
    }

    pub fn transition(&mut self, event: ExplorationEvent) -> ExplorationState {
        let old_state = self.state;

        self.state = match (self.state, event) {
            // The exit-candidate interrupt can fire from either ordinary
            // sub-state, but not while already confirming or returning.
            (
                ExplorationState::FindTarget | ExplorationState::FollowPath,
                ExplorationEvent::ExitCandidateTriggered,
            ) => ExplorationState::ConfirmingExit,

            (ExplorationState::FindTarget, ExplorationEvent::TargetSelected) => {
                ExplorationState::FollowPath
            }
            (ExplorationState::FollowPath, ExplorationEvent::FollowingComplete) => {
                ExplorationState::FindTarget
            }
            (ExplorationState::FollowPath, ExplorationEvent::PathBlocked) => {
                ExplorationState::FindTarget
            }

            (ExplorationState::ConfirmingExit, ExplorationEvent::ExitConfirmed) => {
                ExplorationState::ReturningToMaze
            }
            (ExplorationState::ConfirmingExit, ExplorationEvent::ExitNotConfirmed) => {
                ExplorationState::FindTarget
            }
            (ExplorationState::ReturningToMaze, ExplorationEvent::ReturnedToMaze) => {
                ExplorationState::FindTarget
            }

            (state, _) => state,
        };

        if self.state != old_state {
            info!(?old_state, new_state = ?self.state, ?event, "Exploration state transition");
        }

        self.state
    }
}
