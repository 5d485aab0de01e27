//! Session progress tracking
//!
//! The tracker keeps the latest [`ProgressSnapshot`] per session and pushes
//! every update to at most one live subscriber. Late subscribers get the
//! stored snapshot first, so nothing published before they connected is lost.

pub mod stream;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use stream::{ProgressSubscription, StreamFrame};
pub use tracker::ProgressTracker;

/// Session lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Pending,
    Verifying,
    Completed,
    Error,
}

impl Step {
    /// No further updates are expected after a terminal step.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Verifying => write!(f, "verifying"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Latest known state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub step: Step,
    /// 0-100
    pub progress: u8,
    pub completed_units: usize,
    pub total_units: usize,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(
        session_id: impl Into<String>,
        step: Step,
        completed_units: usize,
        total_units: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            step,
            progress: percent(completed_units, total_units),
            completed_units,
            total_units,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn verifying(session_id: impl Into<String>, completed_units: usize, total_units: usize) -> Self {
        Self::new(
            session_id,
            Step::Verifying,
            completed_units,
            total_units,
            format!("{completed_units}/{total_units} validators complete"),
        )
    }

    /// Terminal success. Progress is always 100.
    pub fn completed(session_id: impl Into<String>, total_units: usize) -> Self {
        let mut snapshot = Self::new(
            session_id,
            Step::Completed,
            total_units,
            total_units,
            "Verification complete",
        );
        snapshot.progress = 100;
        snapshot
    }

    /// Terminal failure, keeping whatever progress was reached.
    pub fn error(
        session_id: impl Into<String>,
        completed_units: usize,
        total_units: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::new(session_id, Step::Error, completed_units, total_units, message)
    }
}

/// `round(100 * done / total)`, 0 when there is nothing to do.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (100.0 * done as f64 / total as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Events delivered to a live subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// First event on every subscription.
    Connected {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    Progress(ProgressSnapshot),
    Completed(ProgressSnapshot),
    Error(ProgressSnapshot),
}

impl ProgressEvent {
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::Connected {
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Terminal event for a snapshot, if its step is terminal.
    pub fn terminal(snapshot: &ProgressSnapshot) -> Option<Self> {
        match snapshot.step {
            Step::Completed => Some(Self::Completed(snapshot.clone())),
            Step::Error => Some(Self::Error(snapshot.clone())),
            Step::Pending | Step::Verifying => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Connected { timestamp, .. } => *timestamp,
            Self::Progress(s) | Self::Completed(s) | Self::Error(s) => s.timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Progress(_) => "progress",
            Self::Completed(_) => "completed",
            Self::Error(_) => "error",
        }
    }

    pub fn snapshot(&self) -> Option<&ProgressSnapshot> {
        match self {
            Self::Connected { .. } => None,
            Self::Progress(s) | Self::Completed(s) | Self::Error(s) => Some(s),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub is_processing: bool,
    pub progress: u8,
    pub current_step: Step,
    pub completed_units: usize,
    pub total_units: usize,
    pub last_update: DateTime<Utc>,
    /// Snapshot is older than the staleness threshold.
    pub is_expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(10, 32), 31);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(32, 32), 100);
        assert_eq!(percent(0, 0), 0);
    }

    #[test]
    fn test_completed_snapshot_is_full() {
        let s = ProgressSnapshot::completed("s1", 32);
        assert_eq!(s.progress, 100);
        assert_eq!(s.completed_units, 32);
        assert!(s.step.is_terminal());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ProgressEvent::Progress(ProgressSnapshot::verifying("s1", 4, 16));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["step"], "verifying");
        assert_eq!(json["progress"], 25);
        assert_eq!(json["session_id"], "s1");

        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "progress");
    }

    #[test]
    fn test_terminal_event_mapping() {
        assert!(ProgressEvent::terminal(&ProgressSnapshot::verifying("s", 1, 2)).is_none());
        let done = ProgressEvent::terminal(&ProgressSnapshot::completed("s", 2)).unwrap();
        assert_eq!(done.event_type(), "completed");
        let failed = ProgressEvent::terminal(&ProgressSnapshot::error("s", 1, 2, "boom")).unwrap();
        assert_eq!(failed.snapshot().unwrap().message, "boom");
    }
}
