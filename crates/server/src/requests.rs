//! Request workflow: the orchestration service and its HTTP surface.
//!
//! `WorkflowService` owns the load -> guard -> conditional-write shape of
//! every transition. The guards in `reqflow_core::workflow` decide; the
//! repository's conditional updates make the decision race-safe. When a
//! conditional write loses a race the service re-reads the row and re-runs
//! the guard so the caller gets the same error a straight loss would have
//! produced.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use reqflow_core::dashboard::DashboardCounts;
use reqflow_core::domain::request::{
    Decision, RequestDetail, RequestId, RequestStatus, WorkRequest,
};
use reqflow_core::domain::user::{Role, UserId};
use reqflow_core::errors::WorkflowError;
use reqflow_core::workflow;
use reqflow_db::{NewRequest, RequestRepository, UserRepository};

use crate::auth::AuthUser;
use crate::error::{ApiError, Json};
use crate::state::AppState;

/// Create inputs after transport decoding, before validation.
#[derive(Clone, Debug)]
pub struct CreateRequestInput {
    pub title: String,
    pub description: String,
    pub assigned_to: UserId,
}

pub struct WorkflowService {
    users: Arc<dyn UserRepository>,
    requests: Arc<dyn RequestRepository>,
}

impl WorkflowService {
    pub fn new(users: Arc<dyn UserRepository>, requests: Arc<dyn RequestRepository>) -> Self {
        Self { users, requests }
    }

    pub async fn create(
        &self,
        created_by: UserId,
        input: CreateRequestInput,
    ) -> Result<RequestDetail, WorkflowError> {
        if input.title.trim().is_empty() {
            return Err(WorkflowError::validation("Title is required"));
        }
        if input.description.trim().is_empty() {
            return Err(WorkflowError::validation("Description is required"));
        }

        let assignee = self.users.find_with_manager(input.assigned_to).await?;
        let manager_id =
            workflow::validate_create(created_by, input.assigned_to, assignee.as_ref())?;

        let created = self
            .requests
            .insert(NewRequest {
                title: input.title.trim().to_string(),
                description: input.description.trim().to_string(),
                created_by,
                assigned_to: input.assigned_to,
                assigned_to_manager_id: manager_id,
            })
            .await?;

        // Stand-in for a real notification channel: the snapshot manager is
        // told a decision is waiting for them.
        let manager_username = assignee
            .as_ref()
            .and_then(|user| user.manager_username.as_deref())
            .unwrap_or("unknown");
        tracing::info!(
            event_name = "workflow.request_created",
            request_id = created.id.0,
            created_by = created.created_by.0,
            assigned_to = created.assigned_to.0,
            manager_id = manager_id.0,
            manager_username,
            "request created, awaiting manager approval"
        );

        self.detail(created.id).await
    }

    pub async fn decide(
        &self,
        id: RequestId,
        manager_id: UserId,
        decision: Decision,
    ) -> Result<RequestDetail, WorkflowError> {
        let request = self.load(id).await?;
        workflow::authorize_decision(&request, manager_id, decision)?;

        let applied = self.requests.record_decision(id, decision, manager_id, Utc::now()).await?;
        if !applied {
            // Lost the race: re-read and re-guard so the error names the
            // status that actually won.
            let current = self.load(id).await?;
            workflow::authorize_decision(&current, manager_id, decision)?;
            return Err(WorkflowError::conflict(
                "Request was updated concurrently. Please retry.",
            ));
        }

        tracing::info!(
            event_name = "workflow.request_decided",
            request_id = id.0,
            manager_id = manager_id.0,
            decision = decision.as_str(),
            "manager decision recorded"
        );

        self.detail(id).await
    }

    pub async fn action(
        &self,
        id: RequestId,
        employee_id: UserId,
    ) -> Result<RequestDetail, WorkflowError> {
        let request = self.load(id).await?;
        workflow::authorize_action(&request, employee_id)?;

        let applied = self
            .requests
            .transition(id, RequestStatus::Approved, RequestStatus::Actioned, Utc::now())
            .await?;
        if !applied {
            let current = self.load(id).await?;
            workflow::authorize_action(&current, employee_id)?;
            return Err(WorkflowError::conflict(
                "Request was updated concurrently. Please retry.",
            ));
        }

        tracing::info!(
            event_name = "workflow.request_actioned",
            request_id = id.0,
            employee_id = employee_id.0,
            "request actioned"
        );

        self.detail(id).await
    }

    pub async fn close(
        &self,
        id: RequestId,
        employee_id: UserId,
    ) -> Result<RequestDetail, WorkflowError> {
        let request = self.load(id).await?;
        workflow::authorize_close(&request, employee_id)?;

        let applied = self
            .requests
            .transition(id, RequestStatus::Actioned, RequestStatus::Closed, Utc::now())
            .await?;
        if !applied {
            let current = self.load(id).await?;
            workflow::authorize_close(&current, employee_id)?;
            return Err(WorkflowError::conflict(
                "Request was updated concurrently. Please retry.",
            ));
        }

        tracing::info!(
            event_name = "workflow.request_closed",
            request_id = id.0,
            employee_id = employee_id.0,
            "request closed"
        );

        self.detail(id).await
    }

    pub async fn get(
        &self,
        id: RequestId,
        role: Role,
        viewer: UserId,
    ) -> Result<RequestDetail, WorkflowError> {
        let detail = self
            .requests
            .find_detail(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Request not found"))?;

        workflow::authorize_view(role, viewer, &detail.request)?;
        Ok(detail)
    }

    pub async fn list(
        &self,
        role: Role,
        viewer: UserId,
    ) -> Result<Vec<RequestDetail>, WorkflowError> {
        Ok(self.requests.list_visible(role, viewer).await?)
    }

    pub async fn dashboard(
        &self,
        role: Role,
        viewer: UserId,
    ) -> Result<DashboardCounts, WorkflowError> {
        let (total, pending, completed) = self.requests.counts_visible(role, viewer).await?;
        Ok(DashboardCounts::new(total, pending, completed))
    }

    async fn load(&self, id: RequestId) -> Result<WorkRequest, WorkflowError> {
        self.requests
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Request not found"))
    }

    async fn detail(&self, id: RequestId) -> Result<RequestDetail, WorkflowError> {
        self.requests
            .find_detail(id)
            .await?
            .ok_or_else(|| WorkflowError::Storage(format!("request {id} vanished mid-operation")))
    }
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRequestPayload {
    pub title: String,
    pub description: String,
    pub assigned_to: i64,
}

#[derive(Debug, Deserialize)]
pub struct DecisionPayload {
    pub status: String,
}

pub fn router(state: AppState) -> Router {
    // `dashboard-counts` is a literal segment, so it wins over `{id}`.
    Router::new()
        .route("/requests", post(create).get(list))
        .route("/requests/dashboard-counts", get(dashboard))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/approve", put(approve))
        .route("/requests/{id}/action", put(action))
        .route("/requests/{id}/close", put(close))
        .with_state(state)
}

async fn create(
    State(state): State<AppState>,
    viewer: AuthUser,
    Json(payload): Json<CreateRequestPayload>,
) -> Result<(StatusCode, Json<RequestDetail>), ApiError> {
    let viewer = viewer.require(Role::Employee)?;
    let detail = state
        .workflow
        .create(
            viewer.id,
            CreateRequestInput {
                title: payload.title,
                description: payload.description,
                assigned_to: UserId(payload.assigned_to),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn list(
    State(state): State<AppState>,
    viewer: AuthUser,
) -> Result<Json<Vec<RequestDetail>>, ApiError> {
    Ok(Json(state.workflow.list(viewer.role, viewer.id).await?))
}

async fn dashboard(
    State(state): State<AppState>,
    viewer: AuthUser,
) -> Result<Json<DashboardCounts>, ApiError> {
    Ok(Json(state.workflow.dashboard(viewer.role, viewer.id).await?))
}

async fn get_request(
    State(state): State<AppState>,
    viewer: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<RequestDetail>, ApiError> {
    Ok(Json(state.workflow.get(RequestId(id), viewer.role, viewer.id).await?))
}

async fn approve(
    State(state): State<AppState>,
    viewer: AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<DecisionPayload>,
) -> Result<Json<RequestDetail>, ApiError> {
    let viewer = viewer.require(Role::Manager)?;
    let decision: Decision = payload.status.parse()?;
    Ok(Json(state.workflow.decide(RequestId(id), viewer.id, decision).await?))
}

async fn action(
    State(state): State<AppState>,
    viewer: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<RequestDetail>, ApiError> {
    let viewer = viewer.require(Role::Employee)?;
    Ok(Json(state.workflow.action(RequestId(id), viewer.id).await?))
}

async fn close(
    State(state): State<AppState>,
    viewer: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<RequestDetail>, ApiError> {
    let viewer = viewer.require(Role::Employee)?;
    Ok(Json(state.workflow.close(RequestId(id), viewer.id).await?))
}


/// End-to-end coverage of the HTTP surface: the bearer-token gate, the role
/// gates, and the JSON shapes, exercised through the merged router.
#[cfg(test)]
mod router_tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use reqflow_core::config::AuthConfig;
    use reqflow_db::{connect_with_settings, migrations};

    use crate::auth;
    use crate::state::AppState;

    async fn app() -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let auth_config = AuthConfig {
            jwt_secret: "router-test-secret".to_string().into(),
            token_ttl_secs: 3600,
            remember_me_ttl_secs: 7 * 24 * 3600,
        };
        let state = AppState::new(pool, &auth_config);
        auth::router(state.clone()).merge(super::router(state))
    }

    async fn send(router: &Router, method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    /// Registers a user and returns a fresh session token for them.
    async fn register_and_login(router: &Router, username: &str, role: &str, manager_id: Option<i64>) -> String {
        let (status, _) = send(
            router,
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "username": username,
                "password": "hunter22",
                "role": role,
                "manager_id": manager_id,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            router,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": username, "password": "hunter22" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().expect("token").to_string()
    }

    #[tokio::test]
    async fn requests_without_a_token_are_unauthorized() {
        let router = app().await;

        let (status, body) = send(&router, "GET", "/requests", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["message"].is_string());

        let (status, _) =
            send(&router, "GET", "/requests", Some("not-a-real-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let router = app().await;
        register_and_login(&router, "alice", "employee", None).await;

        let wrong_password = send(
            &router,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong-pass" })),
        )
        .await;
        let unknown_user = send(
            &router,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "nobody", "password": "hunter22" })),
        )
        .await;

        assert_eq!(wrong_password.0, StatusCode::BAD_REQUEST);
        assert_eq!(wrong_password, unknown_user);
        assert_eq!(wrong_password.1["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn malformed_bodies_use_the_message_error_shape() {
        let router = app().await;
        let token = register_and_login(&router, "alice", "employee", None).await;

        // Missing required field.
        let (status, body) = send(
            &router,
            "POST",
            "/requests",
            Some(&token),
            Some(json!({ "description": "d", "assigned_to": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["message"].as_str().expect("message field");
        assert!(message.contains("title"), "message should name the missing field: {message}");

        // Body that is not JSON at all.
        let request = Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .expect("request");
        let response = router.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value: Value = serde_json::from_slice(&bytes).expect("json body");
        assert!(value["message"].is_string());
    }

    #[tokio::test]
    async fn login_accepts_any_username_casing() {
        let router = app().await;
        register_and_login(&router, "alice", "employee", None).await;

        let (status, body) = send(
            &router,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "ALICE", "password": "hunter22" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["username"], "alice");
    }

    #[tokio::test]
    async fn role_gates_reject_with_forbidden() {
        let router = app().await;
        let manager = register_and_login(&router, "carol", "manager", None).await;
        let employee = register_and_login(&router, "alice", "employee", None).await;

        // An employee cannot decide.
        let (status, body) = send(
            &router,
            "PUT",
            "/requests/1/approve",
            Some(&employee),
            Some(json!({ "status": "approved" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "You do not have the necessary permissions");

        // A manager cannot create.
        let (status, _) = send(
            &router,
            "POST",
            "/requests",
            Some(&manager),
            Some(json!({ "title": "t", "description": "d", "assigned_to": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn lifecycle_over_http_reports_the_documented_shapes() {
        let router = app().await;
        // Registration order fixes the ids: carol 1, alice 2, bob 3.
        let carol = register_and_login(&router, "carol", "manager", None).await;
        let alice = register_and_login(&router, "alice", "employee", None).await;
        let bob = register_and_login(&router, "bob", "employee", Some(1)).await;

        let (status, created) = send(
            &router,
            "POST",
            "/requests",
            Some(&alice),
            Some(json!({
                "title": "Provision laptop",
                "description": "New starter laptop build",
                "assigned_to": 3,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending_approval");
        assert_eq!(created["created_by_username"], "alice");
        assert_eq!(created["assigned_to_manager_username"], "carol");
        let id = created["id"].as_i64().expect("id");

        let (status, decided) = send(
            &router,
            "PUT",
            &format!("/requests/{id}/approve"),
            Some(&carol),
            Some(json!({ "status": "approved" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decided["status"], "approved");

        let (status, body) = send(
            &router,
            "PUT",
            &format!("/requests/{id}/approve"),
            Some(&carol),
            Some(json!({ "status": "bogus" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid status. Must be \"approved\" or \"rejected\".");

        let (status, _) =
            send(&router, "PUT", &format!("/requests/{id}/action"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, closed) =
            send(&router, "PUT", &format!("/requests/{id}/close"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(closed["status"], "closed");

        // dashboard-counts resolves as a literal route, not as `{id}`.
        let (status, counts) =
            send(&router, "GET", "/requests/dashboard-counts", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(counts["totalRequests"], 1);
        assert_eq!(counts["pendingRequests"], 0);
        assert_eq!(counts["completedRequests"], 1);
        assert_eq!(counts["efficiency"], 100.0);
    }

    #[tokio::test]
    async fn duplicate_usernames_differ_only_in_case_still_conflict() {
        let router = app().await;
        register_and_login(&router, "alice", "employee", None).await;

        let (status, body) = send(
            &router,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "ALICE", "password": "hunter22" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Username is already taken.");
    }

    #[tokio::test]
    async fn employee_directory_requires_a_session() {
        let router = app().await;
        let token = register_and_login(&router, "alice", "employee", None).await;

        let (status, _) = send(&router, "GET", "/auth/employees", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&router, "GET", "/auth/employees", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["username"], "alice");
    }
}
