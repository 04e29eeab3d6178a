use crate::auth::token::ValidatedClaims;
use crate::models::user::UserInfo;

/// Map validated launch claims into a normalized user-info record.
///
/// Pure: missing optional fields propagate as None, nothing fails here.
pub fn extract(claims: &ValidatedClaims) -> UserInfo {
    let username = resolve_username(claims);
    let email = claims
        .email
        .clone()
        .filter(|e| !e.is_empty())
        .or_else(|| claims.custom_email.clone().filter(|e| !e.is_empty()));

    let (context_id, context_title, context_label) = match &claims.context {
        Some(ctx) => (ctx.id.clone(), ctx.title.clone(), ctx.label.clone()),
        None => (String::new(), None, None),
    };

    let (resource_link_id, resource_link_title) = match &claims.resource_link {
        Some(link) => (Some(link.id.clone()), link.title.clone()),
        None => (None, None),
    };

    let (platform_guid, platform_name, platform_version) = match &claims.platform {
        Some(p) => (p.guid.clone(), p.name.clone(), p.version.clone()),
        None => (None, None, None),
    };

    UserInfo {
        subject: claims.subject.clone(),
        issuer: claims.issuer.clone(),
        audience: claims.audience.clone(),
        name: claims.name.clone(),
        username,
        email,
        context_id,
        context_title,
        context_label,
        resource_link_id,
        resource_link_title,
        platform_guid,
        platform_name,
        platform_version,
        roles: claims.roles.clone(),
    }
}

/// Username precedence: token preferred_username, custom-claim username,
/// display name, then a synthesized fallback.
fn resolve_username(claims: &ValidatedClaims) -> String {
    let candidates = [
        claims.preferred_username.as_deref(),
        claims.custom_username.as_deref(),
        claims.name.as_deref(),
    ];
    for candidate in candidates.into_iter().flatten() {
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    format!("User {}", claims.subject)
}

const INSTRUCTOR_ROLE_MARKERS: &[&str] = &["#Instructor", "#ContentDeveloper", "#Manager"];

/// Advisory classification for the UI. Authorization always goes through the
/// permission resolver, never through these helpers.
pub fn is_instructor(roles: &[String]) -> bool {
    roles.iter().any(|role| {
        INSTRUCTOR_ROLE_MARKERS
            .iter()
            .any(|marker| role.ends_with(marker))
            || role == "Instructor"
    })
}

pub fn is_learner(roles: &[String]) -> bool {
    roles
        .iter()
        .any(|role| role.ends_with("#Learner") || role == "Learner")
}
