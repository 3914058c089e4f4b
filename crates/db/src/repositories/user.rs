use chrono::Utc;
use sqlx::Row;

use reqflow_core::domain::user::{EmployeeSummary, Role, User, UserId, UserWithManager};

use super::{NewUser, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_role(raw: &str) -> Result<Role, RepositoryError> {
    raw.parse::<Role>().map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let username: String =
        row.try_get("username").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let password_hash: String =
        row.try_get("password_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let role: String = row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let manager_id: Option<i64> =
        row.try_get("manager_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(User {
        id: UserId(id),
        username,
        password_hash,
        role: parse_role(&role)?,
        manager_id: manager_id.map(UserId),
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn insert(&self, user: NewUser) -> Result<User, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, role, manager_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.manager_id.map(|id| id.0))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: UserId(result.last_insert_rowid()),
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            manager_id: user.manager_id,
        })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, role, manager_id
             FROM users WHERE username = ? COLLATE NOCASE",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_user(r)?)),
            None => Ok(None),
        }
    }

    async fn find_with_manager(
        &self,
        id: UserId,
    ) -> Result<Option<UserWithManager>, RepositoryError> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.role, u.manager_id, m.username AS manager_username
             FROM users u
             LEFT JOIN users m ON u.manager_id = m.id
             WHERE u.id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let user_id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let username: String =
            row.try_get("username").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let role: String =
            row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let manager_id: Option<i64> =
            row.try_get("manager_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let manager_username: Option<String> =
            row.try_get("manager_username").map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(Some(UserWithManager {
            id: UserId(user_id),
            username,
            role: parse_role(&role)?,
            manager_id: manager_id.map(UserId),
            manager_username,
        }))
    }

    async fn list_employees(&self) -> Result<Vec<EmployeeSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, username FROM users WHERE role = 'employee' ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: i64 =
                    row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let username: String =
                    row.try_get("username").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(EmployeeSummary { id: UserId(id), username })
            })
            .collect()
    }
}
