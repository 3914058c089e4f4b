//! User directory surface: registration, login, employee listing, and the
//! bearer-token identity extractor the rest of the API hangs off.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use password_hash::rand_core::OsRng;
use password_hash::SaltString;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use reqflow_core::config::AuthConfig;
use reqflow_core::domain::user::{Role, UserId};
use reqflow_core::errors::WorkflowError;
use reqflow_db::RepositoryError;

use crate::error::{ApiError, Json};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Argon2id hash with default parameters and a fresh random salt.
pub fn hash_password(raw: &str) -> Result<String, WorkflowError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(raw.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| WorkflowError::Storage(format!("password hashing failed: {e}")))
}

/// Constant `false` on any parse or verification failure; the caller only
/// ever surfaces the uniform `Invalid credentials` error.
pub fn verify_password(raw: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| Argon2::default().verify_password(raw.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Session tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer/verifier for session tokens, built once from `AuthConfig`.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl_secs: u64,
    remember_me_ttl_secs: u64,
}

impl TokenSigner {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            token_ttl_secs: config.token_ttl_secs,
            remember_me_ttl_secs: config.remember_me_ttl_secs,
        }
    }

    pub fn issue(
        &self,
        user_id: UserId,
        role: Role,
        remember_me: bool,
    ) -> Result<String, WorkflowError> {
        let ttl = if remember_me { self.remember_me_ttl_secs } else { self.token_ttl_secs };
        let iat = Utc::now().timestamp();
        let claims = Claims { sub: user_id.0, role, iat, exp: iat + ttl as i64 };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| WorkflowError::Storage(format!("token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token.".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Identity extractor
// ---------------------------------------------------------------------------

/// Verified caller identity. Extracting this runs token verification, so it
/// rejects with 401 before any handler (or role check) executes.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser {
    pub id: UserId,
    pub role: Role,
}

impl AuthUser {
    /// Role gate for restricted routes; mismatches are 403, never 401.
    pub fn require(self, role: Role) -> Result<Self, ApiError> {
        if self.role == role {
            Ok(self)
        } else {
            Err(WorkflowError::forbidden("You do not have the necessary permissions").into())
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Missing Authorization header.".to_string())
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("Authorization header must be a bearer token.".to_string())
        })?;

        let claims = state.tokens.verify(token.trim())?;
        Ok(AuthUser { id: UserId(claims.sub), role: claims.role })
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    pub password: String,
    pub role: Option<String>,
    /// Optional org linkage so an employee can be registered under a
    /// manager in one call.
    pub manager_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct UserBody {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserBody,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserBody,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/employees", get(employees))
        .with_state(state)
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let username = payload.username.trim().to_string();
    if username.is_empty() {
        return Err(WorkflowError::validation("Username is required").into());
    }
    if payload.password.chars().count() < 6 {
        return Err(WorkflowError::validation(
            "Please enter a password with 6 or more characters",
        )
        .into());
    }

    let role = match payload.role.as_deref() {
        Some(raw) => raw.parse::<Role>()?,
        None => Role::Employee,
    };

    let manager_id = match payload.manager_id {
        Some(raw) => {
            let manager = state.users.find_with_manager(UserId(raw)).await?;
            match manager {
                Some(user) if user.role == Role::Manager => Some(user.id),
                _ => {
                    return Err(WorkflowError::validation(
                        "manager_id must reference an existing manager account.",
                    )
                    .into())
                }
            }
        }
        None => None,
    };

    let password_hash = hash_password(&payload.password)?;
    let created = state
        .users
        .insert(reqflow_db::NewUser { username, password_hash, role, manager_id })
        .await
        .map_err(|error| match error {
            RepositoryError::UniqueViolation => {
                WorkflowError::conflict("Username is already taken.")
            }
            other => other.into(),
        })?;

    tracing::info!(
        event_name = "directory.user_registered",
        user_id = created.id.0,
        role = created.role.as_str(),
        "user registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserBody { id: created.id, username: created.username, role: created.role },
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .users
        .find_by_username(payload.username.trim())
        .await?
        .ok_or(WorkflowError::Auth)?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(WorkflowError::Auth.into());
    }

    let token = state.tokens.issue(user.id, user.role, payload.remember_me)?;

    tracing::info!(
        event_name = "directory.user_logged_in",
        user_id = user.id.0,
        remember_me = payload.remember_me,
        "session token issued"
    );

    Ok(Json(LoginResponse {
        token,
        user: UserBody { id: user.id, username: user.username, role: user.role },
    }))
}

async fn employees(
    State(state): State<AppState>,
    _viewer: AuthUser,
) -> Result<Json<Vec<reqflow_core::domain::user::EmployeeSummary>>, ApiError> {
    Ok(Json(state.users.list_employees().await?))
}

#[cfg(test)]
mod tests {
    use reqflow_core::config::AuthConfig;
    use reqflow_core::domain::user::{Role, UserId};

    use super::{hash_password, verify_password, TokenSigner};

    fn auth_config(secret: &str) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.to_string().into(),
            token_ttl_secs: 3600,
            remember_me_ttl_secs: 7 * 24 * 3600,
        }
    }

    #[test]
    fn password_hash_round_trips_and_rejects_wrong_password() {
        let hash = hash_password("hunter22").expect("hash");
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }

    #[test]
    fn verify_tolerates_garbage_stored_hashes() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn token_round_trips_identity_claims() {
        let signer = TokenSigner::new(&auth_config("test-secret"));
        let token = signer.issue(UserId(7), Role::Manager, false).expect("issue");

        let claims = signer.verify(&token).expect("verify");
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.role, Role::Manager);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn remember_me_extends_the_expiry() {
        let signer = TokenSigner::new(&auth_config("test-secret"));
        let short = signer.issue(UserId(1), Role::Employee, false).expect("issue");
        let long = signer.issue(UserId(1), Role::Employee, true).expect("issue");

        let short_claims = signer.verify(&short).expect("verify");
        let long_claims = signer.verify(&long).expect("verify");
        assert!(long_claims.exp > short_claims.exp);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        use chrono::Utc;
        use jsonwebtoken::{encode, EncodingKey, Header};

        let signer = TokenSigner::new(&auth_config("test-secret"));
        // Expired two hours ago, well outside the default leeway.
        let iat = Utc::now().timestamp() - 7200;
        let claims = super::Claims { sub: 1, role: Role::Employee, iat, exp: iat + 60 };
        let token =
            encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret"))
                .expect("encode");

        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let signer = TokenSigner::new(&auth_config("secret-a"));
        let other = TokenSigner::new(&auth_config("secret-b"));

        let token = other.issue(UserId(1), Role::Employee, false).expect("issue");
        assert!(signer.verify(&token).is_err());
        assert!(signer.verify("garbage.token.value").is_err());
    }
}
