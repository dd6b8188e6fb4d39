//! Suite phase state machine

use serde::Serialize;

use crate::error::{HarnessError, Result};

/// Where a suite is in its setup → tests → teardown sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuitePhase {
    Uninitialized,
    EnvironmentStarting,
    EnvironmentReady,
    ProcessStarting,
    ProcessReady,
    Asserting,
    ProcessTornDown,
    EnvironmentTornDown,
}

impl SuitePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::EnvironmentStarting => "environment_starting",
            Self::EnvironmentReady => "environment_ready",
            Self::ProcessStarting => "process_starting",
            Self::ProcessReady => "process_ready",
            Self::Asserting => "asserting",
            Self::ProcessTornDown => "process_torn_down",
            Self::EnvironmentTornDown => "environment_torn_down",
        }
    }

    pub fn can_transition_to(&self, next: SuitePhase) -> bool {
        use SuitePhase::*;
        matches!(
            (self, next),
            (Uninitialized, EnvironmentStarting)
                | (EnvironmentStarting, EnvironmentReady)
                | (EnvironmentStarting, EnvironmentTornDown)
                | (EnvironmentReady, ProcessStarting)
                | (EnvironmentReady, EnvironmentTornDown)
                | (ProcessStarting, ProcessReady)
                | (ProcessStarting, ProcessTornDown)
                | (ProcessReady, Asserting)
                | (ProcessReady, ProcessTornDown)
                | (Asserting, ProcessTornDown)
                | (ProcessTornDown, ProcessStarting)
                | (ProcessTornDown, EnvironmentTornDown)
        )
    }

    /// A test case is in progress
    pub fn in_case(&self) -> bool {
        matches!(
            self,
            Self::ProcessStarting | Self::ProcessReady | Self::Asserting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EnvironmentTornDown)
    }
}

impl std::fmt::Display for SuitePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current phase plus validated transitions
#[derive(Debug)]
pub struct PhaseTracker {
    phase: SuitePhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: SuitePhase::Uninitialized,
        }
    }

    pub fn current(&self) -> SuitePhase {
        self.phase
    }

    pub fn advance(&mut self, next: SuitePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(HarnessError::Lifecycle(format!("{} -> {}", self.phase, next)));
        }
        tracing::debug!(from = %self.phase, to = %next, "Suite phase transition");
        self.phase = next;
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
