use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::request::{Decision, RequestId};
use crate::domain::user::UserId;

/// Immutable audit-trail entry, appended once per approval decision.
/// Never updated after the fact: a request carries at most one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApprovalRecord {
    pub request_id: RequestId,
    pub manager_id: UserId,
    pub status: Decision,
    pub decided_at: DateTime<Utc>,
}
