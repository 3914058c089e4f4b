use chrono::{DateTime, Utc};
use sqlx::Row;

use reqflow_core::domain::approval::ApprovalRecord;
use reqflow_core::domain::request::{
    Decision, RequestDetail, RequestId, RequestStatus, WorkRequest,
};
use reqflow_core::domain::user::{Role, UserId};

use super::{NewRequest, RepositoryError, RequestRepository};
use crate::DbPool;

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// The one SQL rendering of `Role::can_view`. List and the dashboard counts
/// both go through this so the two scopes cannot drift apart.
fn visibility_filter(role: Role) -> &'static str {
    match role {
        Role::Employee => "(r.created_by = ? OR r.assigned_to = ?)",
        Role::Manager => "(r.assigned_to_manager_id = ? OR r.created_by = ?)",
    }
}

const REQUEST_COLUMNS: &str = "r.id, r.title, r.description, r.created_by, r.assigned_to, \
     r.assigned_to_manager_id, r.status, r.manager_approved, r.created_at, r.updated_at";

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp `{raw}`: {e}")))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<WorkRequest, RepositoryError> {
    let status: String = decode(row.try_get("status"))?;
    let created_at: String = decode(row.try_get("created_at"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;

    Ok(WorkRequest {
        id: RequestId(decode(row.try_get("id"))?),
        title: decode(row.try_get("title"))?,
        description: decode(row.try_get("description"))?,
        created_by: UserId(decode(row.try_get("created_by"))?),
        assigned_to: UserId(decode(row.try_get("assigned_to"))?),
        assigned_to_manager_id: UserId(decode(row.try_get("assigned_to_manager_id"))?),
        status: status
            .parse::<RequestStatus>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        manager_approved: decode(row.try_get("manager_approved"))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_detail(row: &sqlx::sqlite::SqliteRow) -> Result<RequestDetail, RepositoryError> {
    Ok(RequestDetail {
        request: row_to_request(row)?,
        created_by_username: decode(row.try_get("created_by_username"))?,
        assigned_to_username: decode(row.try_get("assigned_to_username"))?,
        assigned_to_manager_username: decode(row.try_get("assigned_to_manager_username"))?,
    })
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn insert(&self, request: NewRequest) -> Result<WorkRequest, RepositoryError> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO requests (title, description, created_by, assigned_to,
                                   assigned_to_manager_id, status, manager_approved,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'pending_approval', 0, ?, ?)",
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.created_by.0)
        .bind(request.assigned_to.0)
        .bind(request.assigned_to_manager_id.0)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        Ok(WorkRequest {
            id: RequestId(result.last_insert_rowid()),
            title: request.title,
            description: request.description,
            created_by: request.created_by,
            assigned_to: request.assigned_to,
            assigned_to_manager_id: request.assigned_to_manager_id,
            status: RequestStatus::PendingApproval,
            manager_approved: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<WorkRequest>, RepositoryError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests r WHERE r.id = ?");
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn find_detail(&self, id: RequestId) -> Result<Option<RequestDetail>, RepositoryError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS},
                    u1.username AS created_by_username,
                    u2.username AS assigned_to_username,
                    m.username AS assigned_to_manager_username
             FROM requests r
             JOIN users u1 ON r.created_by = u1.id
             JOIN users u2 ON r.assigned_to = u2.id
             JOIN users m ON r.assigned_to_manager_id = m.id
             WHERE r.id = ?"
        );
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(ref r) => Ok(Some(row_to_detail(r)?)),
            None => Ok(None),
        }
    }

    async fn list_visible(
        &self,
        role: Role,
        viewer: UserId,
    ) -> Result<Vec<RequestDetail>, RepositoryError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS},
                    u1.username AS created_by_username,
                    u2.username AS assigned_to_username,
                    m.username AS assigned_to_manager_username
             FROM requests r
             JOIN users u1 ON r.created_by = u1.id
             JOIN users u2 ON r.assigned_to = u2.id
             JOIN users m ON r.assigned_to_manager_id = m.id
             WHERE {}
             ORDER BY r.created_at DESC, r.id DESC",
            visibility_filter(role)
        );
        let rows = sqlx::query(&sql).bind(viewer.0).bind(viewer.0).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_detail).collect()
    }

    async fn counts_visible(
        &self,
        role: Role,
        viewer: UserId,
    ) -> Result<(i64, i64, i64), RepositoryError> {
        let sql = format!(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN r.status != 'closed' THEN 1 ELSE 0 END), 0) AS pending,
                    COALESCE(SUM(CASE WHEN r.status = 'closed' THEN 1 ELSE 0 END), 0) AS completed
             FROM requests r
             WHERE {}",
            visibility_filter(role)
        );
        let row = sqlx::query(&sql).bind(viewer.0).bind(viewer.0).fetch_one(&self.pool).await?;

        Ok((
            decode(row.try_get("total"))?,
            decode(row.try_get("pending"))?,
            decode(row.try_get("completed"))?,
        ))
    }

    async fn record_decision(
        &self,
        id: RequestId,
        decision: Decision,
        manager_id: UserId,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE requests SET status = ?, manager_approved = ?, updated_at = ?
             WHERE id = ? AND status = 'pending_approval'",
        )
        .bind(decision.resulting_status().as_str())
        .bind(decision == Decision::Approved)
        .bind(decided_at.to_rfc3339())
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO approvals (request_id, manager_id, status, decided_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(manager_id.0)
        .bind(decision.as_str())
        .bind(decided_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn decision_for(
        &self,
        id: RequestId,
    ) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT request_id, manager_id, status, decided_at
             FROM approvals WHERE request_id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = decode(row.try_get("status"))?;
            let decided_at: String = decode(row.try_get("decided_at"))?;
            Ok(ApprovalRecord {
                request_id: RequestId(decode(row.try_get("request_id"))?),
                manager_id: UserId(decode(row.try_get("manager_id"))?),
                status: status
                    .parse::<Decision>()
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                decided_at: parse_timestamp(&decided_at)?,
            })
        })
        .transpose()
    }

    async fn transition(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE requests SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(updated_at.to_rfc3339())
        .bind(id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use reqflow_core::domain::request::{Decision, RequestStatus};
    use reqflow_core::domain::user::{Role, UserId};

    use crate::repositories::{
        NewRequest, NewUser, RequestRepository, SqlUserRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    use super::SqlRequestRepository;

    /// Seeds employee 1, employee 2 (managed by 3), manager 3 and returns
    /// (pool, their ids in that order).
    async fn seeded() -> (DbPool, UserId, UserId, UserId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let users = SqlUserRepository::new(pool.clone());
        let manager = users
            .insert(NewUser {
                username: "carol".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                role: Role::Manager,
                manager_id: None,
            })
            .await
            .expect("manager");
        let creator = users
            .insert(NewUser {
                username: "alice".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                role: Role::Employee,
                manager_id: None,
            })
            .await
            .expect("creator");
        let assignee = users
            .insert(NewUser {
                username: "bob".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                role: Role::Employee,
                manager_id: Some(manager.id),
            })
            .await
            .expect("assignee");

        (pool, creator.id, assignee.id, manager.id)
    }

    fn new_request(creator: UserId, assignee: UserId, manager: UserId, title: &str) -> NewRequest {
        NewRequest {
            title: title.to_string(),
            description: "details".to_string(),
            created_by: creator,
            assigned_to: assignee,
            assigned_to_manager_id: manager,
        }
    }

    #[tokio::test]
    async fn insert_starts_pending_and_round_trips() {
        let (pool, creator, assignee, manager) = seeded().await;
        let repo = SqlRequestRepository::new(pool);

        let created = repo
            .insert(new_request(creator, assignee, manager, "Provision laptop"))
            .await
            .expect("insert");
        assert_eq!(created.status, RequestStatus::PendingApproval);
        assert!(!created.manager_approved);

        let loaded = repo.find_by_id(created.id).await.expect("find").expect("present");
        assert_eq!(loaded.title, "Provision laptop");
        assert_eq!(loaded.assigned_to_manager_id, manager);
        assert_eq!(loaded.status, RequestStatus::PendingApproval);
    }

    #[tokio::test]
    async fn detail_carries_all_three_usernames() {
        let (pool, creator, assignee, manager) = seeded().await;
        let repo = SqlRequestRepository::new(pool);
        let created =
            repo.insert(new_request(creator, assignee, manager, "Audit access")).await.expect("insert");

        let detail = repo.find_detail(created.id).await.expect("find").expect("present");
        assert_eq!(detail.created_by_username, "alice");
        assert_eq!(detail.assigned_to_username, "bob");
        assert_eq!(detail.assigned_to_manager_username, "carol");
    }

    #[tokio::test]
    async fn record_decision_is_write_once() {
        let (pool, creator, assignee, manager) = seeded().await;
        let repo = SqlRequestRepository::new(pool.clone());
        let created =
            repo.insert(new_request(creator, assignee, manager, "Rotate keys")).await.expect("insert");

        let applied = repo
            .record_decision(created.id, Decision::Approved, manager, Utc::now())
            .await
            .expect("decision");
        assert!(applied);

        let loaded = repo.find_by_id(created.id).await.expect("find").expect("present");
        assert_eq!(loaded.status, RequestStatus::Approved);
        assert!(loaded.manager_approved);

        // Second decision loses the conditional update and writes nothing.
        let raced = repo
            .record_decision(created.id, Decision::Rejected, manager, Utc::now())
            .await
            .expect("raced decision");
        assert!(!raced);

        let audit = repo
            .decision_for(created.id)
            .await
            .expect("audit")
            .expect("audit row present");
        assert_eq!(audit.manager_id, manager);
        assert_eq!(audit.status, Decision::Approved, "losing decision must not overwrite");

        let approvals: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approvals WHERE request_id = ?")
            .bind(created.id.0)
            .fetch_one(&pool)
            .await
            .expect("count approvals");
        assert_eq!(approvals, 1, "losing decision must not append an audit row");
    }

    #[tokio::test]
    async fn transition_only_fires_from_the_expected_status() {
        let (pool, creator, assignee, manager) = seeded().await;
        let repo = SqlRequestRepository::new(pool);
        let created =
            repo.insert(new_request(creator, assignee, manager, "Ship fix")).await.expect("insert");

        // Still pending: the approved -> actioned precondition does not hold.
        let moved = repo
            .transition(created.id, RequestStatus::Approved, RequestStatus::Actioned, Utc::now())
            .await
            .expect("transition");
        assert!(!moved);

        repo.record_decision(created.id, Decision::Approved, manager, Utc::now())
            .await
            .expect("decision");
        let moved = repo
            .transition(created.id, RequestStatus::Approved, RequestStatus::Actioned, Utc::now())
            .await
            .expect("transition");
        assert!(moved);

        let loaded = repo.find_by_id(created.id).await.expect("find").expect("present");
        assert_eq!(loaded.status, RequestStatus::Actioned);
    }

    #[tokio::test]
    async fn list_is_scoped_and_most_recent_first() {
        let (pool, creator, assignee, manager) = seeded().await;
        let users = SqlUserRepository::new(pool.clone());
        let outsider = users
            .insert(NewUser {
                username: "dave".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                role: Role::Employee,
                manager_id: Some(manager),
            })
            .await
            .expect("outsider");

        let repo = SqlRequestRepository::new(pool);
        let first =
            repo.insert(new_request(creator, assignee, manager, "first")).await.expect("insert");
        let second =
            repo.insert(new_request(creator, assignee, manager, "second")).await.expect("insert");

        let for_creator = repo.list_visible(Role::Employee, creator).await.expect("list");
        assert_eq!(
            for_creator.iter().map(|d| d.request.id).collect::<Vec<_>>(),
            vec![second.id, first.id],
            "newest first"
        );

        let for_outsider = repo.list_visible(Role::Employee, outsider.id).await.expect("list");
        assert!(for_outsider.is_empty(), "unrelated employee sees nothing");

        let for_manager = repo.list_visible(Role::Manager, manager).await.expect("list");
        assert_eq!(for_manager.len(), 2);
    }

    #[tokio::test]
    async fn counts_follow_the_list_scope() {
        let (pool, creator, assignee, manager) = seeded().await;
        let repo = SqlRequestRepository::new(pool);
        let req =
            repo.insert(new_request(creator, assignee, manager, "only")).await.expect("insert");

        repo.record_decision(req.id, Decision::Approved, manager, Utc::now())
            .await
            .expect("decision");
        repo.transition(req.id, RequestStatus::Approved, RequestStatus::Actioned, Utc::now())
            .await
            .expect("action");
        repo.transition(req.id, RequestStatus::Actioned, RequestStatus::Closed, Utc::now())
            .await
            .expect("close");

        let (total, pending, completed) =
            repo.counts_visible(Role::Employee, creator).await.expect("counts");
        assert_eq!((total, pending, completed), (1, 0, 1));

        let (total, pending, completed) =
            repo.counts_visible(Role::Manager, manager).await.expect("counts");
        assert_eq!((total, pending, completed), (1, 0, 1));
    }
}
