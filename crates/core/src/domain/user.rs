use serde::{Deserialize, Serialize};

use crate::domain::request::WorkRequest;
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Account role. Carries the role-specific visibility predicate so callers
/// never branch on raw role strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
        }
    }

    /// Single visibility predicate shared by Get, List, and the dashboard
    /// scope: employees see requests they created or are assigned to;
    /// managers see requests they created or are the snapshot manager for.
    pub fn can_view(&self, viewer: UserId, request: &WorkRequest) -> bool {
        match self {
            Role::Employee => request.created_by == viewer || request.assigned_to == viewer,
            Role::Manager => {
                request.assigned_to_manager_id == viewer || request.created_by == viewer
            }
        }
    }
}

impl std::str::FromStr for Role {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            other => Err(WorkflowError::validation(format!(
                "Role must be employee or manager, got `{other}`."
            ))),
        }
    }
}

/// Full directory row, credential hash included. Never serialized outward;
/// the API-facing shapes below omit the hash entirely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub manager_id: Option<UserId>,
}

/// A user joined with their manager's username. The manager side is a left
/// association: employees without a manager still resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserWithManager {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub manager_id: Option<UserId>,
    pub manager_username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmployeeSummary {
    pub id: UserId,
    pub username: String,
}
