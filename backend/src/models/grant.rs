use chrono::{DateTime, Utc};
use serde::Serialize;

/// A persisted rule authorizing a set of roles within a course to access a
/// chatflow. Grants are additive; there is no deny/override semantics.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionGrant {
    pub id: String,
    /// Course/context id the grant applies to.
    pub course_id: String,
    /// Flowise chatflow id being granted.
    pub chatflow_id: String,
    /// Role URIs allowed to access the chatflow.
    pub allowed_roles: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl PermissionGrant {
    pub fn new(course_id: String, chatflow_id: String, allowed_roles: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            course_id,
            chatflow_id,
            allowed_roles,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// True if any of the given roles is covered by this grant.
    pub fn covers_any(&self, roles: &[String]) -> bool {
        self.allowed_roles.iter().any(|allowed| roles.contains(allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_new_grant_is_active_with_uuid() {
        let grant = PermissionGrant::new(
            "course-42".to_string(),
            "wf-9".to_string(),
            vec!["Learner".to_string()],
        );
        assert!(grant.active);
        assert!(Uuid::parse_str(&grant.id).is_ok());
        assert_eq!(grant.course_id, "course-42");
        assert_eq!(grant.chatflow_id, "wf-9");
    }

    #[test]
    fn test_covers_any_intersection() {
        let grant = PermissionGrant::new(
            "c".to_string(),
            "w".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        assert!(grant.covers_any(&["b".to_string(), "z".to_string()]));
        assert!(!grant.covers_any(&["z".to_string()]));
    }

    #[test]
    fn test_covers_any_empty_roles_is_false() {
        let grant = PermissionGrant::new("c".to_string(), "w".to_string(), vec!["a".to_string()]);
        assert!(!grant.covers_any(&[]));
    }
}
