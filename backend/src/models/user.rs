use chrono::{DateTime, Utc};
use serde::Serialize;

/// Normalized user information extracted from a validated LTI launch token.
///
/// Ephemeral: produced once per launch and consumed by the identity store.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    /// Subject claim from the platform.
    pub subject: String,
    /// Platform issuer URL.
    pub issuer: String,
    /// Audience (the tool's client id).
    pub audience: String,
    /// Display name from the token, if present.
    pub name: Option<String>,
    /// Resolved username (see precedence rules in the claim extractor).
    pub username: String,
    /// Email, if the platform shared one.
    pub email: Option<String>,
    /// Course/context id the launch came from.
    pub context_id: String,
    pub context_title: Option<String>,
    pub context_label: Option<String>,
    pub resource_link_id: Option<String>,
    pub resource_link_title: Option<String>,
    pub platform_guid: Option<String>,
    pub platform_name: Option<String>,
    pub platform_version: Option<String>,
    /// Role URIs asserted by the platform for this context.
    pub roles: Vec<String>,
}

/// Persisted user record, unique per (subject, issuer).
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub subject: String,
    pub issuer: String,
    pub audience: String,
    pub name: Option<String>,
    pub username: String,
    pub email: Option<String>,
    pub context_id: String,
    pub context_title: Option<String>,
    pub context_label: Option<String>,
    pub resource_link_id: Option<String>,
    pub resource_link_title: Option<String>,
    pub platform_guid: Option<String>,
    pub platform_name: Option<String>,
    pub platform_version: Option<String>,
    pub roles: Vec<String>,
    /// Session identifier rotated on every login.
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
    /// Deactivated users keep their record but cannot authenticate.
    pub active: bool,
}

impl User {
    /// Membership test over role URIs; order-insensitive.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
