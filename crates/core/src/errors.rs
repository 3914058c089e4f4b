use thiserror::Error;

/// Closed error taxonomy for the request workflow.
///
/// Every operation surfaces one of these kinds; the HTTP boundary maps them
/// to status codes without inspecting message text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    /// Malformed or semantically invalid input (self-assignment, short
    /// password, bad decision value, missing manager).
    #[error("{0}")]
    Validation(String),
    /// Login failure. Deliberately carries no detail: a missing username and
    /// a wrong password must be indistinguishable to the caller.
    #[error("Invalid credentials")]
    Auth,
    /// Actor is authenticated but not permitted to touch this entity.
    #[error("{0}")]
    Forbidden(String),
    /// Referenced entity does not exist (or is not eligible, e.g. assigning
    /// to a manager account).
    #[error("{0}")]
    NotFound(String),
    /// Illegal state transition, including a lost conditional update when
    /// two actors race on the same request.
    #[error("{0}")]
    Conflict(String),
    /// Storage-layer failure. Fatal to the current operation; the detail is
    /// logged server-side and never shown to the caller.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}
