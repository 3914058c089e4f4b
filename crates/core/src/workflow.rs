//! Pure authorization and precondition guards for the request state machine.
//!
//! Each guard inspects already-loaded state and returns the typed error the
//! boundary maps to a status code. Persistence (and the conditional writes
//! that make the transitions race-safe) lives in the repository layer; these
//! functions decide, they do not mutate.

use crate::domain::request::{Decision, RequestStatus, WorkRequest};
use crate::domain::user::{Role, UserId, UserWithManager};
use crate::errors::WorkflowError;

/// Validates a Create call and resolves the manager to snapshot.
///
/// The assignee is passed as loaded from the directory (`None` when the id
/// did not resolve) so this stays free of I/O.
pub fn validate_create(
    created_by: UserId,
    assigned_to: UserId,
    assignee: Option<&UserWithManager>,
) -> Result<UserId, WorkflowError> {
    if created_by == assigned_to {
        return Err(WorkflowError::validation("Cannot assign a request to yourself."));
    }

    let assignee = match assignee {
        Some(user) if user.role == Role::Employee => user,
        _ => {
            return Err(WorkflowError::not_found(
                "Assigned user does not exist or is not an employee.",
            ))
        }
    };

    assignee
        .manager_id
        .ok_or_else(|| WorkflowError::validation("Assigned employee does not have a manager."))
}

/// Guards ApproveOrReject: only the snapshot manager may decide, and only
/// while the request is still pending.
pub fn authorize_decision(
    request: &WorkRequest,
    manager_id: UserId,
    decision: Decision,
) -> Result<(), WorkflowError> {
    if !request.can_transition_to(decision.resulting_status()) {
        return Err(WorkflowError::conflict(format!(
            "Request is already {}. Cannot {}.",
            request.status,
            decision.as_str()
        )));
    }

    if request.assigned_to_manager_id != manager_id {
        return Err(WorkflowError::forbidden(
            "You are not the manager assigned to approve this request.",
        ));
    }

    Ok(())
}

/// Guards Action: assignee only, and only once the manager has approved.
pub fn authorize_action(request: &WorkRequest, employee_id: UserId) -> Result<(), WorkflowError> {
    if request.assigned_to != employee_id {
        return Err(WorkflowError::forbidden("You are not assigned to this request."));
    }

    if !request.manager_approved || !request.can_transition_to(RequestStatus::Actioned) {
        return Err(WorkflowError::conflict(
            "Request must be approved by your manager before it can be actioned.",
        ));
    }

    Ok(())
}

/// Guards Close: assignee only, and only from `actioned`.
pub fn authorize_close(request: &WorkRequest, employee_id: UserId) -> Result<(), WorkflowError> {
    if request.assigned_to != employee_id {
        return Err(WorkflowError::forbidden("You are not assigned to this request."));
    }

    if !request.can_transition_to(RequestStatus::Closed) {
        return Err(WorkflowError::conflict("Request must be actioned before it can be closed."));
    }

    Ok(())
}

/// Guards Get through the same predicate List scopes by.
pub fn authorize_view(
    role: Role,
    viewer: UserId,
    request: &WorkRequest,
) -> Result<(), WorkflowError> {
    if role.can_view(viewer, request) {
        return Ok(());
    }

    Err(WorkflowError::forbidden("You do not have permission to view this request."))
}
