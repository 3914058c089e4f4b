pub mod config;
pub mod dashboard;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use dashboard::{efficiency, DashboardCounts};
pub use domain::approval::ApprovalRecord;
pub use domain::request::{Decision, RequestDetail, RequestId, RequestStatus, WorkRequest};
pub use domain::user::{EmployeeSummary, Role, User, UserId, UserWithManager};
pub use errors::WorkflowError;
