//! Measurement run state.
//!
//! Tracks which protocol is running, how far it got and how it ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Measurement protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// Full Ids-Vds sweep at every gate step
    IdsVdsVsGate,
    /// Drain-source resistance against gate voltage at fixed drain bias
    RdsVsGate,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementKind::IdsVdsVsGate => write!(f, "Ids-Vds vs Vg"),
            MeasurementKind::RdsVsGate => write!(f, "Rds vs Vg"),
        }
    }
}

/// Run lifecycle.
///
/// # State Machine
///
/// ```text
/// Idle ──run──> Initializing ──init ok──> Running ──last step──> Complete
///                    │                       │
///                    │init failed            ├──cancel──> Stopped
///                    ▼                       │
///                  Error <───────────────────┘ bus / payload / file error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No run since start-up
    Idle,
    /// Opening instrument sessions
    Initializing,
    /// Sourcing, sweeping and recording
    Running,
    /// Every step recorded
    Complete,
    /// Cancelled by the operator
    Stopped,
    /// Ended by an error
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Initializing => write!(f, "Initializing"),
            RunState::Running => write!(f, "Running"),
            RunState::Complete => write!(f, "Complete"),
            RunState::Stopped => write!(f, "Stopped"),
            RunState::Error => write!(f, "Error"),
        }
    }
}

impl RunState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        matches!(
            self,
            RunState::Idle | RunState::Complete | RunState::Stopped | RunState::Error
        )
    }

    /// True while instruments are in use.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Initializing | RunState::Running)
    }
}

/// Progress of the current or last run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    /// Lifecycle state
    pub state: RunState,
    /// Protocol of the current or last run
    pub kind: Option<MeasurementKind>,
    /// Output file / plot series counter, starting at 1
    pub step: u32,
    /// Gate voltage of the current step [V]
    pub gate_voltage: Option<f64>,
    /// Drain bias of the current step [V] (resistance runs)
    pub drain_voltage: Option<f64>,
    /// Samples written in this run
    pub sample_count: usize,
    /// Start of the current or last run
    pub started_at: Option<DateTime<Utc>>,
    /// Error that ended the last run
    pub last_error: Option<String>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            kind: None,
            step: 0,
            gate_voltage: None,
            drain_voltage: None,
            sample_count: 0,
            started_at: None,
            last_error: None,
        }
    }
}

impl RunStatus {
    /// Status of a freshly started run.
    pub fn starting(kind: MeasurementKind) -> Self {
        Self {
            state: RunState::Initializing,
            kind: Some(kind),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(RunState::Idle.can_begin());
        assert!(RunState::Error.can_begin());
        assert!(RunState::Stopped.can_begin());
        assert!(!RunState::Running.can_begin());
        assert!(!RunState::Initializing.can_begin());
        assert!(RunState::Initializing.is_active());
        assert!(!RunState::Complete.is_active());
    }

    #[test]
    fn test_starting_status() {
        let status = RunStatus::starting(MeasurementKind::RdsVsGate);
        assert_eq!(status.state, RunState::Initializing);
        assert_eq!(status.kind, Some(MeasurementKind::RdsVsGate));
        assert_eq!(status.sample_count, 0);
        assert!(status.started_at.is_some());
    }

    #[test]
    fn test_display() {
        assert_eq!(RunState::Complete.to_string(), "Complete");
        assert_eq!(MeasurementKind::IdsVdsVsGate.to_string(), "Ids-Vds vs Vg");
    }
}
