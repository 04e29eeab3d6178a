//! Shared helpers for unit and integration tests.

use crate::config::{
    Config, CorsConfig, DatabaseConfig, FlowiseConfig, GateConfig, LoggingConfig, LtiConfig,
    ServerConfig, SessionConfig,
};
use crate::models::user::{User, UserInfo};
use crate::AppState;

pub const TEST_ISSUER: &str = "https://platform.test";
pub const TEST_CLIENT_ID: &str = "client1";
pub const TEST_DEPLOYMENT_ID: &str = "dep-1";

pub const LEARNER_ROLE: &str = "http://purl.imsglobal.org/vocab/lis/v2/membership#Learner";
pub const INSTRUCTOR_ROLE: &str = "http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor";

pub fn test_config(flowise_base_url: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        lti: LtiConfig {
            issuer: TEST_ISSUER.to_string(),
            client_id: TEST_CLIENT_ID.to_string(),
            deployment_id: TEST_DEPLOYMENT_ID.to_string(),
            auth_login_url: format!("{}/auth", TEST_ISSUER),
            key_set_url: format!("{}/jwks", TEST_ISSUER),
            redirect_url: "https://tool.test/api/lti/callback".to_string(),
            tool_jwks: None,
        },
        session: SessionConfig {
            secret: "test-session-secret".to_string(),
            ttl_hours: 8,
            secure_cookies: false,
        },
        flowise: FlowiseConfig {
            base_url: flowise_base_url.to_string(),
            api_key: None,
        },
        database: DatabaseConfig {
            url: ":memory:".to_string(),
        },
        gate: GateConfig {
            max_requests: 1000,
            window_secs: 60,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        cors: CorsConfig {
            origins: "*".to_string(),
        },
    }
}

/// App state wired against an in-memory database. The platform key set is
/// fetched lazily, so no network is needed until a token is decoded.
pub fn test_state(flowise_base_url: &str) -> AppState {
    AppState::new(test_config(flowise_base_url)).expect("test state")
}

pub fn test_user_info(subject: &str, roles: Vec<&str>) -> UserInfo {
    UserInfo {
        subject: subject.to_string(),
        issuer: TEST_ISSUER.to_string(),
        audience: TEST_CLIENT_ID.to_string(),
        name: Some("Ada Lovelace".to_string()),
        username: "ada".to_string(),
        email: Some("ada@example.com".to_string()),
        context_id: "course-42".to_string(),
        context_title: Some("Intro to Computing".to_string()),
        context_label: Some("CS101".to_string()),
        resource_link_id: Some("link-1".to_string()),
        resource_link_title: None,
        platform_guid: None,
        platform_name: None,
        platform_version: None,
        roles: roles.into_iter().map(String::from).collect(),
    }
}

/// Seed a user and mint a Cookie header value carrying a valid session.
pub fn login_as(state: &AppState, subject: &str, roles: Vec<&str>) -> (User, String) {
    let info = test_user_info(subject, roles);
    let user = state
        .store
        .upsert_user(&info, &uuid::Uuid::new_v4().to_string())
        .expect("seed user");
    let token = state.sessions.issue(&user).expect("issue session");
    let header = format!("{}={}", crate::auth::SESSION_COOKIE, token);
    (user, header)
}
