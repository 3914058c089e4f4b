use std::sync::Arc;

use reqflow_core::config::AuthConfig;
use reqflow_db::{DbPool, SqlRequestRepository, SqlUserRepository, UserRepository};

use crate::auth::TokenSigner;
use crate::requests::WorkflowService;

/// Shared handler state: the pool (health checks), the token signer, the
/// user directory, and the workflow engine. Everything here is cheap to
/// clone per request.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub tokens: Arc<TokenSigner>,
    pub users: Arc<dyn UserRepository>,
    pub workflow: Arc<WorkflowService>,
}

impl AppState {
    pub fn new(db_pool: DbPool, auth: &AuthConfig) -> Self {
        let users: Arc<dyn UserRepository> = Arc::new(SqlUserRepository::new(db_pool.clone()));
        let requests = Arc::new(SqlRequestRepository::new(db_pool.clone()));
        let workflow = Arc::new(WorkflowService::new(users.clone(), requests));

        Self { db_pool, tokens: Arc::new(TokenSigner::new(auth)), users, workflow }
    }
}
