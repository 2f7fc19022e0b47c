use crate::domain::Session;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Viewer,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    List,
    Update,
    Delete,
}

impl AdminAction {
    pub fn parse(s: Option<&str>) -> Result<Self, AdminError> {
        match s.map(str::trim) {
            Some("list") => Ok(AdminAction::List),
            Some("update") => Ok(AdminAction::Update),
            Some("delete") => Ok(AdminAction::Delete),
            Some(other) => Err(AdminError::BadRequest(format!("unknown action: {other}"))),
            None => Err(AdminError::BadRequest("action is required".to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AdminResponse {
    List { users: Vec<UserRole> },
    Updated { success: bool, user_id: Uuid, role: Role },
    Deleted { success: bool, user_id: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminError {
    Unauthorized,
    BadRequest(String),
    Forbidden(String),
    Store(String),
}

impl AdminError {
    pub fn status_code(&self) -> u16 {
        match self {
            AdminError::Unauthorized => 401,
            AdminError::BadRequest(_) => 400,
            AdminError::Forbidden(_) => 403,
            AdminError::Store(_) => 500,
        }
    }
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::Unauthorized => f.write_str("authentication required"),
            AdminError::BadRequest(msg) | AdminError::Forbidden(msg) => f.write_str(msg),
            AdminError::Store(msg) => write!(f, "role store error: {msg}"),
        }
    }
}

impl std::error::Error for AdminError {}

/// Persistence for user roles.
#[async_trait::async_trait]
pub trait RoleStore: Send + Sync {
    async fn role_of(&self, user_id: Uuid) -> anyhow::Result<Option<Role>>;

    async fn list_users(&self) -> anyhow::Result<Vec<UserRole>>;

    async fn set_role(&self, user_id: Uuid, role: Role) -> anyhow::Result<()>;

    /// `false` when no such user exists.
    async fn delete_user(&self, user_id: Uuid) -> anyhow::Result<bool>;
}

/// Runs one admin action for `caller`.
///
/// Only admins may act, and update/delete may not target the caller's own account.
pub async fn execute_admin_action(
    store: &dyn RoleStore,
    caller: &Session,
    action: AdminAction,
    request: AdminRequest,
) -> Result<AdminResponse, AdminError> {
    let caller_role = store
        .role_of(caller.user_id)
        .await
        .map_err(|e| AdminError::Store(format!("{e:#}")))?;
    if caller_role != Some(Role::Admin) {
        return Err(AdminError::Forbidden("admin role required".to_string()));
    }

    match action {
        AdminAction::List => {
            let users = store
                .list_users()
                .await
                .map_err(|e| AdminError::Store(format!("{e:#}")))?;
            Ok(AdminResponse::List { users })
        }
        AdminAction::Update => {
            let user_id = target_user(caller, &request, "modify")?;
            let role = request
                .role
                .as_deref()
                .ok_or_else(|| AdminError::BadRequest("role is required".to_string()))?;
            let role = Role::parse(role)
                .ok_or_else(|| AdminError::BadRequest(format!("invalid role: {role}")))?;

            store
                .set_role(user_id, role)
                .await
                .map_err(|e| AdminError::Store(format!("{e:#}")))?;
            tracing::info!(admin = %caller.user_id, %user_id, role = role.as_str(), "user role updated");
            Ok(AdminResponse::Updated {
                success: true,
                user_id,
                role,
            })
        }
        AdminAction::Delete => {
            let user_id = target_user(caller, &request, "delete")?;
            let deleted = store
                .delete_user(user_id)
                .await
                .map_err(|e| AdminError::Store(format!("{e:#}")))?;
            if !deleted {
                return Err(AdminError::BadRequest(format!("unknown user: {user_id}")));
            }
            tracing::info!(admin = %caller.user_id, %user_id, "user deleted");
            Ok(AdminResponse::Deleted {
                success: true,
                user_id,
            })
        }
    }
}

fn target_user(caller: &Session, request: &AdminRequest, verb: &str) -> Result<Uuid, AdminError> {
    let user_id = request
        .user_id
        .ok_or_else(|| AdminError::BadRequest("user_id is required".to_string()))?;
    if user_id == caller.user_id {
        return Err(AdminError::Forbidden(format!(
            "cannot {verb} your own account"
        )));
    }
    Ok(user_id)
}

/// `user_roles` table in the store's Postgres database.
#[derive(Debug, Clone)]
pub struct PgRoleStore {
    pool: sqlx::PgPool,
}

impl PgRoleStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RoleStore for PgRoleStore {
    async fn role_of(&self, user_id: Uuid) -> anyhow::Result<Option<Role>> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = $1")
                .persistent(false)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .context("select user_roles failed")?;
        Ok(role.as_deref().and_then(Role::parse))
    }

    async fn list_users(&self) -> anyhow::Result<Vec<UserRole>> {
        let rows = sqlx::query_as::<_, (Uuid, Option<String>, String, Option<DateTime<Utc>>)>(
            "SELECT user_id, email, role, created_at \
             FROM user_roles \
             ORDER BY created_at ASC NULLS LAST, user_id ASC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .context("list user_roles failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for (user_id, email, role, created_at) in rows {
            let Some(role) = Role::parse(&role) else {
                tracing::warn!(%user_id, role = %role, "unknown role in user_roles; skipping");
                continue;
            };
            out.push(UserRole {
                user_id,
                email,
                role,
                created_at,
            });
        }
        Ok(out)
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .persistent(false)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .context("upsert user_roles failed")?;
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .persistent(false)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("delete user_roles failed")?;
        Ok(res.rows_affected() > 0)
    }
}
