//! Job records and the lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a conversion job.
///
/// Transitions only move forward: `created → inprogress → {finished, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    InProgress,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "inprogress",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "inprogress" => Some(Self::InProgress),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// `inprogress → inprogress` is allowed so a redelivered message can
    /// resume a job whose previous worker died.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Created, Self::InProgress) => true,
            (Self::Created, Self::Failed) => true,
            (Self::InProgress, Self::InProgress) => true,
            (Self::InProgress, Self::Finished | Self::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single book conversion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub is_high_priority: bool,
    pub url: String,
    pub requester_ip: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub url: String,
    #[serde(default)]
    pub high_priority: bool,
    #[serde(default)]
    pub requester_ip: String,
}

impl Job {
    /// Build a fresh job in the `created` state.
    pub fn new(input: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Created,
            is_high_priority: input.high_priority,
            url: input.url,
            requester_ip: input.requester_ip,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            JobStatus::Created,
            JobStatus::InProgress,
            JobStatus::Finished,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            "\"inprogress\""
        );
    }

    #[test]
    fn test_transitions_never_regress() {
        use JobStatus::*;
        assert!(Created.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Finished));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(InProgress));

        assert!(!InProgress.can_transition_to(Created));
        assert!(!Finished.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Finished));
        assert!(!Finished.can_transition_to(Finished));
    }

    #[test]
    fn test_new_job_serializes_camel_case() {
        let job = Job::new(NewJob {
            url: "https://chem.example.org/Bookshelves/Intro".to_string(),
            high_priority: true,
            requester_ip: "10.0.0.1".to_string(),
        });
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "created");
        assert_eq!(value["isHighPriority"], true);
        assert_eq!(value["requesterIp"], "10.0.0.1");
        assert!(value.get("createdAt").is_some());
    }
}
