use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Request lifecycle. All transitions are one-directional and irreversible:
/// `pending_approval -> {approved | rejected}`, `approved -> actioned`,
/// `actioned -> closed`. `rejected` and `closed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    PendingApproval,
    Approved,
    Rejected,
    Actioned,
    Closed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::PendingApproval => "pending_approval",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Actioned => "actioned",
            RequestStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending_approval" => Ok(RequestStatus::PendingApproval),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "actioned" => Ok(RequestStatus::Actioned),
            "closed" => Ok(RequestStatus::Closed),
            other => Err(WorkflowError::validation(format!("unknown request status `{other}`"))),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manager's decision on a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }

    pub fn resulting_status(&self) -> RequestStatus {
        match self {
            Decision::Approved => RequestStatus::Approved,
            Decision::Rejected => RequestStatus::Rejected,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            _ => Err(WorkflowError::validation(
                "Invalid status. Must be \"approved\" or \"rejected\".",
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkRequest {
    pub id: RequestId,
    pub title: String,
    pub description: String,
    pub created_by: UserId,
    pub assigned_to: UserId,
    /// The assignee's manager captured at creation time. Never recomputed,
    /// even if the org linkage changes later.
    pub assigned_to_manager_id: UserId,
    pub status: RequestStatus,
    pub manager_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkRequest {
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self.status, next),
            (RequestStatus::PendingApproval, RequestStatus::Approved)
                | (RequestStatus::PendingApproval, RequestStatus::Rejected)
                | (RequestStatus::Approved, RequestStatus::Actioned)
                | (RequestStatus::Actioned, RequestStatus::Closed)
        )
    }

    pub fn transition_to(&mut self, next: RequestStatus) -> Result<(), WorkflowError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(WorkflowError::conflict(format!(
            "Request is {}. Cannot move to {next}.",
            self.status
        )))
    }
}

/// A request joined with the usernames of its creator, assignee, and
/// snapshot manager, as returned by Get and List.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: WorkRequest,
    pub created_by_username: String,
    pub assigned_to_username: String,
    pub assigned_to_manager_username: String,
}
