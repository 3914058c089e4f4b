use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use reqflow_core::domain::approval::ApprovalRecord;
use reqflow_core::domain::request::{Decision, RequestDetail, RequestId, RequestStatus, WorkRequest};
use reqflow_core::domain::user::{EmployeeSummary, Role, User, UserId, UserWithManager};
use reqflow_core::errors::WorkflowError;

pub mod request;
pub mod user;

pub use request::SqlRequestRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// A uniqueness constraint fired (the only one in this schema is the
    /// case-insensitive username).
    #[error("unique constraint violated")]
    UniqueViolation,
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        let unique = error
            .as_database_error()
            .is_some_and(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation);
        if unique {
            RepositoryError::UniqueViolation
        } else {
            RepositoryError::Database(error)
        }
    }
}

impl From<RepositoryError> for WorkflowError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::UniqueViolation => {
                WorkflowError::conflict("Resource already exists.")
            }
            other => WorkflowError::Storage(other.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub manager_id: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct NewRequest {
    pub title: String,
    pub description: String,
    pub created_by: UserId,
    pub assigned_to: UserId,
    pub assigned_to_manager_id: UserId,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: NewUser) -> Result<User, RepositoryError>;
    /// Case-insensitive username lookup; includes the credential hash for
    /// verification, so the result must never leave the auth path.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_with_manager(
        &self,
        id: UserId,
    ) -> Result<Option<UserWithManager>, RepositoryError>;
    async fn list_employees(&self) -> Result<Vec<EmployeeSummary>, RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert(&self, request: NewRequest) -> Result<WorkRequest, RepositoryError>;
    async fn find_by_id(&self, id: RequestId) -> Result<Option<WorkRequest>, RepositoryError>;
    async fn find_detail(&self, id: RequestId) -> Result<Option<RequestDetail>, RepositoryError>;
    async fn list_visible(
        &self,
        role: Role,
        viewer: UserId,
    ) -> Result<Vec<RequestDetail>, RepositoryError>;
    /// (total, pending, completed) over the viewer's visible requests.
    async fn counts_visible(
        &self,
        role: Role,
        viewer: UserId,
    ) -> Result<(i64, i64, i64), RepositoryError>;
    /// Applies a manager decision as one transaction: a conditional status
    /// update (`WHERE status = 'pending_approval'`) plus the approval audit
    /// row. Returns false (and writes nothing) when the request was no
    /// longer pending.
    async fn record_decision(
        &self,
        id: RequestId,
        decision: Decision,
        manager_id: UserId,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    /// Reads back the audit entry for a decided request. At most one exists
    /// per request because decisions are write-once.
    async fn decision_for(&self, id: RequestId)
        -> Result<Option<ApprovalRecord>, RepositoryError>;
    /// Conditional transition: `UPDATE ... WHERE id = ? AND status = ?`.
    /// Returns false when the precondition no longer held.
    async fn transition(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}
