use std::collections::HashSet;
use std::sync::Arc;

use crate::store::{GatewayStore, StoreError};

/// Decides chatflow access from stored per-course grants.
///
/// Grants are consulted fresh on every request; they can change at any time
/// and there is no invalidation channel to make caching safe.
pub struct PermissionResolver {
    store: Arc<GatewayStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<GatewayStore>) -> Self {
        Self { store }
    }

    /// Access is granted iff at least one active grant for (course, chatflow)
    /// has a role intersecting the user's role set. Empty role set never
    /// grants anything.
    pub fn can_access(
        &self,
        course_id: &str,
        roles: &[String],
        chatflow_id: &str,
    ) -> Result<bool, StoreError> {
        if roles.is_empty() {
            return Ok(false);
        }
        let grants = self.store.active_grants_for_course(course_id)?;
        Ok(grants
            .iter()
            .any(|grant| grant.chatflow_id == chatflow_id && grant.covers_any(roles)))
    }

    /// Union of chatflow ids across all active grants for the course that
    /// intersect the user's roles.
    pub fn list_accessible_chatflows(
        &self,
        course_id: &str,
        roles: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if roles.is_empty() {
            return Ok(HashSet::new());
        }
        let grants = self.store.active_grants_for_course(course_id)?;
        Ok(grants
            .into_iter()
            .filter(|grant| grant.covers_any(roles))
            .map(|grant| grant.chatflow_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEARNER: &str = "http://purl.imsglobal.org/vocab/lis/v2/membership#Learner";
    const INSTRUCTOR: &str = "http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor";

    fn resolver() -> (PermissionResolver, Arc<GatewayStore>) {
        let store = Arc::new(GatewayStore::new(":memory:").unwrap());
        (PermissionResolver::new(store.clone()), store)
    }

    fn roles(role: &str) -> Vec<String> {
        vec![role.to_string()]
    }

    #[test]
    fn test_granted_role_can_access() {
        let (resolver, store) = resolver();
        store
            .upsert_grant("course-42", "wf-9", &roles(LEARNER))
            .unwrap();
        assert!(resolver
            .can_access("course-42", &roles(LEARNER), "wf-9")
            .unwrap());
    }

    #[test]
    fn test_ungranted_chatflow_denied() {
        let (resolver, store) = resolver();
        store
            .upsert_grant("course-42", "wf-9", &roles(LEARNER))
            .unwrap();
        assert!(!resolver
            .can_access("course-42", &roles(LEARNER), "wf-10")
            .unwrap());
    }

    #[test]
    fn test_other_course_denied() {
        let (resolver, store) = resolver();
        store
            .upsert_grant("course-42", "wf-9", &roles(LEARNER))
            .unwrap();
        assert!(!resolver
            .can_access("course-7", &roles(LEARNER), "wf-9")
            .unwrap());
    }

    #[test]
    fn test_empty_role_set_fails_closed() {
        let (resolver, store) = resolver();
        store
            .upsert_grant("course-42", "wf-9", &roles(LEARNER))
            .unwrap();
        assert!(!resolver.can_access("course-42", &[], "wf-9").unwrap());
        assert!(resolver
            .list_accessible_chatflows("course-42", &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_role_not_in_grant_denied() {
        let (resolver, store) = resolver();
        store
            .upsert_grant("course-42", "wf-9", &roles(INSTRUCTOR))
            .unwrap();
        assert!(!resolver
            .can_access("course-42", &roles(LEARNER), "wf-9")
            .unwrap());
    }

    #[test]
    fn test_adding_grant_is_monotonic() {
        let (resolver, store) = resolver();
        assert!(!resolver
            .can_access("course-42", &roles(LEARNER), "wf-9")
            .unwrap());

        store
            .upsert_grant("course-42", "wf-9", &roles(LEARNER))
            .unwrap();

        // Newly true for the granted pair...
        assert!(resolver
            .can_access("course-42", &roles(LEARNER), "wf-9")
            .unwrap());
        // ...unchanged for every other (course, chatflow) pair.
        assert!(!resolver
            .can_access("course-42", &roles(LEARNER), "wf-10")
            .unwrap());
        assert!(!resolver
            .can_access("course-7", &roles(LEARNER), "wf-9")
            .unwrap());
    }

    #[test]
    fn test_deactivated_grant_denied() {
        let (resolver, store) = resolver();
        let grant = store
            .upsert_grant("course-42", "wf-9", &roles(LEARNER))
            .unwrap();
        store.set_grant_active(&grant.id, false).unwrap();
        assert!(!resolver
            .can_access("course-42", &roles(LEARNER), "wf-9")
            .unwrap());
    }

    #[test]
    fn test_list_accessible_is_union_over_grants() {
        let (resolver, store) = resolver();
        store
            .upsert_grant("course-42", "wf-9", &roles(LEARNER))
            .unwrap();
        store
            .upsert_grant("course-42", "wf-10", &roles(LEARNER))
            .unwrap();
        store
            .upsert_grant("course-42", "wf-11", &roles(INSTRUCTOR))
            .unwrap();

        let accessible = resolver
            .list_accessible_chatflows("course-42", &roles(LEARNER))
            .unwrap();
        assert_eq!(accessible.len(), 2);
        assert!(accessible.contains("wf-9"));
        assert!(accessible.contains("wf-10"));
        assert!(!accessible.contains("wf-11"));
    }

    #[test]
    fn test_multi_role_user_matches_any_grant_role() {
        let (resolver, store) = resolver();
        store
            .upsert_grant("course-42", "wf-9", &roles(INSTRUCTOR))
            .unwrap();
        let both = vec![LEARNER.to_string(), INSTRUCTOR.to_string()];
        assert!(resolver.can_access("course-42", &both, "wf-9").unwrap());
    }
}
