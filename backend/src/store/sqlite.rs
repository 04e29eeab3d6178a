use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::models::grant::PermissionGrant;
use crate::models::user::{User, UserInfo};

/// SQLite-backed store for user identities and permission grants.
pub struct GatewayStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl GatewayStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = if let Some(stripped) = database_url.strip_prefix("sqlite:") {
            stripped
        } else {
            database_url
        };

        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                issuer TEXT NOT NULL,
                audience TEXT NOT NULL,
                name TEXT,
                username TEXT NOT NULL,
                email TEXT,
                context_id TEXT NOT NULL,
                context_title TEXT,
                context_label TEXT,
                resource_link_id TEXT,
                resource_link_title TEXT,
                platform_guid TEXT,
                platform_name TEXT,
                platform_version TEXT,
                roles TEXT NOT NULL,
                session_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_login_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                UNIQUE (subject, issuer)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS permission_grants (
                id TEXT PRIMARY KEY,
                course_id TEXT NOT NULL,
                chatflow_id TEXT NOT NULL,
                allowed_roles TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                UNIQUE (course_id, chatflow_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_grants_course_id ON permission_grants(course_id)",
            [],
        )?;

        tracing::info!("Gateway store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create or update the user for (subject, issuer), rotating the session
    /// id and refreshing context/roles. The email is only overwritten when
    /// the platform shared one on this launch.
    pub fn upsert_user(&self, info: &UserInfo, session_id: &str) -> Result<User, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now();

        let existing: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT id, created_at, email FROM users WHERE subject = ?1 AND issuer = ?2",
                params![info.subject, info.issuer],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        let roles_json = serde_json::to_string(&info.roles)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match existing {
            Some((id, created_at, db_email)) => {
                conn.execute(
                    "UPDATE users SET
                        audience = ?1, name = ?2, username = ?3,
                        email = COALESCE(?4, email),
                        context_id = ?5, context_title = ?6, context_label = ?7,
                        resource_link_id = ?8, resource_link_title = ?9,
                        platform_guid = ?10, platform_name = ?11, platform_version = ?12,
                        roles = ?13, session_id = ?14, last_login_at = ?15, active = 1
                     WHERE id = ?16",
                    params![
                        info.audience,
                        info.name,
                        info.username,
                        info.email,
                        info.context_id,
                        info.context_title,
                        info.context_label,
                        info.resource_link_id,
                        info.resource_link_title,
                        info.platform_guid,
                        info.platform_name,
                        info.platform_version,
                        roles_json,
                        session_id,
                        now.to_rfc3339(),
                        id,
                    ],
                )?;

                let created = parse_timestamp(&created_at, now);

                Ok(User {
                    id,
                    subject: info.subject.clone(),
                    issuer: info.issuer.clone(),
                    audience: info.audience.clone(),
                    name: info.name.clone(),
                    username: info.username.clone(),
                    email: info.email.clone().or(db_email),
                    context_id: info.context_id.clone(),
                    context_title: info.context_title.clone(),
                    context_label: info.context_label.clone(),
                    resource_link_id: info.resource_link_id.clone(),
                    resource_link_title: info.resource_link_title.clone(),
                    platform_guid: info.platform_guid.clone(),
                    platform_name: info.platform_name.clone(),
                    platform_version: info.platform_version.clone(),
                    roles: info.roles.clone(),
                    session_id: session_id.to_string(),
                    created_at: created,
                    last_login_at: now,
                    active: true,
                })
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO users (
                        id, subject, issuer, audience, name, username, email,
                        context_id, context_title, context_label,
                        resource_link_id, resource_link_title,
                        platform_guid, platform_name, platform_version,
                        roles, session_id, created_at, last_login_at, active
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, 1)",
                    params![
                        id,
                        info.subject,
                        info.issuer,
                        info.audience,
                        info.name,
                        info.username,
                        info.email,
                        info.context_id,
                        info.context_title,
                        info.context_label,
                        info.resource_link_id,
                        info.resource_link_title,
                        info.platform_guid,
                        info.platform_name,
                        info.platform_version,
                        roles_json,
                        session_id,
                        now.to_rfc3339(),
                        now.to_rfc3339(),
                    ],
                )?;

                tracing::info!(
                    "Created new user: {} ({} @ {})",
                    id,
                    info.subject,
                    info.issuer
                );

                Ok(User {
                    id,
                    subject: info.subject.clone(),
                    issuer: info.issuer.clone(),
                    audience: info.audience.clone(),
                    name: info.name.clone(),
                    username: info.username.clone(),
                    email: info.email.clone(),
                    context_id: info.context_id.clone(),
                    context_title: info.context_title.clone(),
                    context_label: info.context_label.clone(),
                    resource_link_id: info.resource_link_id.clone(),
                    resource_link_title: info.resource_link_title.clone(),
                    platform_guid: info.platform_guid.clone(),
                    platform_name: info.platform_name.clone(),
                    platform_version: info.platform_version.clone(),
                    roles: info.roles.clone(),
                    session_id: session_id.to_string(),
                    created_at: now,
                    last_login_at: now,
                    active: true,
                })
            }
        }
    }

    /// Fetch a user by id.
    pub fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT id, subject, issuer, audience, name, username, email,
                    context_id, context_title, context_label,
                    resource_link_id, resource_link_title,
                    platform_guid, platform_name, platform_version,
                    roles, session_id, created_at, last_login_at, active
             FROM users WHERE id = ?1",
            params![user_id],
            map_user_row,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Flip the active flag. Returns false if the user does not exist.
    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE users SET active = ?1 WHERE id = ?2",
            params![active as i32, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Count stored users (diagnostics).
    pub fn count_users(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Create a grant, or refresh roles and reactivate if one already exists
    /// for the (course, chatflow) pair.
    pub fn upsert_grant(
        &self,
        course_id: &str,
        chatflow_id: &str,
        allowed_roles: &[String],
    ) -> Result<PermissionGrant, StoreError> {
        let conn = self.lock()?;
        let grant = PermissionGrant::new(
            course_id.to_string(),
            chatflow_id.to_string(),
            allowed_roles.to_vec(),
        );
        let roles_json = serde_json::to_string(allowed_roles)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO permission_grants (id, course_id, chatflow_id, allowed_roles, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT (course_id, chatflow_id)
             DO UPDATE SET allowed_roles = excluded.allowed_roles, active = 1",
            params![
                grant.id,
                grant.course_id,
                grant.chatflow_id,
                roles_json,
                grant.created_at.to_rfc3339(),
            ],
        )?;

        // Read back: on conflict the original row id and created_at survive.
        let stored = conn.query_row(
            "SELECT id, course_id, chatflow_id, allowed_roles, active, created_at
             FROM permission_grants WHERE course_id = ?1 AND chatflow_id = ?2",
            params![course_id, chatflow_id],
            map_grant_row,
        )?;
        Ok(stored)
    }

    /// Active grants for a course, as consulted by the permission resolver.
    pub fn active_grants_for_course(
        &self,
        course_id: &str,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, course_id, chatflow_id, allowed_roles, active, created_at
             FROM permission_grants WHERE course_id = ?1 AND active = 1",
        )?;
        let grants = stmt
            .query_map(params![course_id], map_grant_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(grants)
    }

    /// All grants, active or not (admin listing).
    pub fn list_grants(&self) -> Result<Vec<PermissionGrant>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, course_id, chatflow_id, allowed_roles, active, created_at
             FROM permission_grants ORDER BY created_at DESC",
        )?;
        let grants = stmt
            .query_map([], map_grant_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(grants)
    }

    /// Deactivate a grant. Returns false if it does not exist.
    pub fn set_grant_active(&self, grant_id: &str, active: bool) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE permission_grants SET active = ?1 WHERE id = ?2",
            params![active as i32, grant_id],
        )?;
        Ok(changed > 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let roles_json: String = row.get(15)?;
    let created_at: String = row.get(17)?;
    let last_login_at: String = row.get(18)?;
    let now = Utc::now();
    Ok(User {
        id: row.get(0)?,
        subject: row.get(1)?,
        issuer: row.get(2)?,
        audience: row.get(3)?,
        name: row.get(4)?,
        username: row.get(5)?,
        email: row.get(6)?,
        context_id: row.get(7)?,
        context_title: row.get(8)?,
        context_label: row.get(9)?,
        resource_link_id: row.get(10)?,
        resource_link_title: row.get(11)?,
        platform_guid: row.get(12)?,
        platform_name: row.get(13)?,
        platform_version: row.get(14)?,
        roles: serde_json::from_str(&roles_json).unwrap_or_default(),
        session_id: row.get(16)?,
        created_at: parse_timestamp(&created_at, now),
        last_login_at: parse_timestamp(&last_login_at, now),
        active: row.get::<_, i32>(19)? != 0,
    })
}

fn map_grant_row(row: &Row<'_>) -> rusqlite::Result<PermissionGrant> {
    let roles_json: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(PermissionGrant {
        id: row.get(0)?,
        course_id: row.get(1)?,
        chatflow_id: row.get(2)?,
        allowed_roles: serde_json::from_str(&roles_json).unwrap_or_default(),
        active: row.get::<_, i32>(4)? != 0,
        created_at: parse_timestamp(&created_at, Utc::now()),
    })
}

fn parse_timestamp(value: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info() -> UserInfo {
        UserInfo {
            subject: "u1".to_string(),
            issuer: "https://platform.test".to_string(),
            audience: "client1".to_string(),
            name: Some("Ada Lovelace".to_string()),
            username: "ada".to_string(),
            email: None,
            context_id: "course-42".to_string(),
            context_title: Some("Analytical Engines".to_string()),
            context_label: Some("AE-101".to_string()),
            resource_link_id: Some("link-1".to_string()),
            resource_link_title: None,
            platform_guid: Some("moodle-guid".to_string()),
            platform_name: Some("moodle".to_string()),
            platform_version: Some("4.3".to_string()),
            roles: vec!["http://purl.imsglobal.org/vocab/lis/v2/membership#Learner".to_string()],
        }
    }

    #[test]
    fn test_file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("gateway.db");
        let url = format!("sqlite:{}", db_path.display());

        // Parent directory is created on first open.
        let store = GatewayStore::new(&url).unwrap();
        store.upsert_user(&test_info(), "sess-1").unwrap();
        drop(store);

        let reopened = GatewayStore::new(&url).unwrap();
        assert_eq!(reopened.count_users().unwrap(), 1);
        let user = reopened
            .find_user(&reopened.upsert_user(&test_info(), "sess-2").unwrap().id)
            .unwrap()
            .unwrap();
        assert_eq!(user.session_id, "sess-2");
    }

    fn store() -> GatewayStore {
        GatewayStore::new(":memory:").unwrap()
    }

    #[test]
    fn test_upsert_creates_user_with_fields() {
        let store = store();
        let user = store.upsert_user(&test_info(), "sess-1").unwrap();
        assert_eq!(user.subject, "u1");
        assert_eq!(user.context_id, "course-42");
        assert_eq!(user.session_id, "sess-1");
        assert!(user.active);
        assert_eq!(store.count_users().unwrap(), 1);
    }

    #[test]
    fn test_upsert_twice_is_single_record() {
        let store = store();
        let first = store.upsert_user(&test_info(), "sess-1").unwrap();
        let second = store.upsert_user(&test_info(), "sess-1").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.subject, second.subject);
        assert_eq!(store.count_users().unwrap(), 1);
        assert!(second.last_login_at >= first.last_login_at);
    }

    #[test]
    fn test_relogin_rotates_session_and_refreshes_roles() {
        let store = store();
        let first = store.upsert_user(&test_info(), "sess-1").unwrap();

        let mut info = test_info();
        info.roles =
            vec!["http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor".to_string()];
        let second = store.upsert_user(&info, "sess-2").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.session_id, "sess-2");
        assert_eq!(second.roles, info.roles);

        let stored = store.find_user(&first.id).unwrap().unwrap();
        assert_eq!(stored.session_id, "sess-2");
        assert_eq!(stored.roles, info.roles);
    }

    #[test]
    fn test_email_preserved_when_absent_on_relogin() {
        let store = store();
        let mut info = test_info();
        info.email = Some("ada@example.com".to_string());
        let user = store.upsert_user(&info, "sess-1").unwrap();

        info.email = None;
        let updated = store.upsert_user(&info, "sess-2").unwrap();
        assert_eq!(updated.email, Some("ada@example.com".to_string()));

        let stored = store.find_user(&user.id).unwrap().unwrap();
        assert_eq!(stored.email, Some("ada@example.com".to_string()));
    }

    #[test]
    fn test_different_issuer_is_separate_user() {
        let store = store();
        store.upsert_user(&test_info(), "sess-1").unwrap();
        let mut other = test_info();
        other.issuer = "https://other.test".to_string();
        store.upsert_user(&other, "sess-2").unwrap();
        assert_eq!(store.count_users().unwrap(), 2);
    }

    #[test]
    fn test_deactivated_user_reactivates_on_login() {
        let store = store();
        let user = store.upsert_user(&test_info(), "sess-1").unwrap();
        assert!(store.set_user_active(&user.id, false).unwrap());
        assert!(!store.find_user(&user.id).unwrap().unwrap().active);

        let relogged = store.upsert_user(&test_info(), "sess-2").unwrap();
        assert!(relogged.active);
        assert!(store.find_user(&user.id).unwrap().unwrap().active);
    }

    #[test]
    fn test_set_user_active_unknown_user() {
        let store = store();
        assert!(!store.set_user_active("nope", false).unwrap());
    }

    #[test]
    fn test_find_user_missing_returns_none() {
        let store = store();
        assert!(store.find_user("missing").unwrap().is_none());
    }

    #[test]
    fn test_grant_upsert_and_listing() {
        let store = store();
        let grant = store
            .upsert_grant("course-42", "wf-9", &["Learner".to_string()])
            .unwrap();
        assert!(grant.active);

        let grants = store.active_grants_for_course("course-42").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].chatflow_id, "wf-9");

        assert!(store.active_grants_for_course("course-7").unwrap().is_empty());
    }

    #[test]
    fn test_grant_conflict_updates_roles_in_place() {
        let store = store();
        let first = store
            .upsert_grant("course-42", "wf-9", &["Learner".to_string()])
            .unwrap();
        let second = store
            .upsert_grant("course-42", "wf-9", &["Instructor".to_string()])
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.allowed_roles, vec!["Instructor".to_string()]);
        assert_eq!(store.list_grants().unwrap().len(), 1);
    }

    #[test]
    fn test_deactivated_grant_hidden_from_active_listing() {
        let store = store();
        let grant = store
            .upsert_grant("course-42", "wf-9", &["Learner".to_string()])
            .unwrap();
        assert!(store.set_grant_active(&grant.id, false).unwrap());
        assert!(store.active_grants_for_course("course-42").unwrap().is_empty());
        assert_eq!(store.list_grants().unwrap().len(), 1);
    }
}
