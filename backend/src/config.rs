use serde::Deserialize;

/// Application configuration, loaded from an optional `config.toml` plus
/// environment variables (`LTI__ISSUER`, `SESSION__SECRET`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub lti: LtiConfig,
    pub session: SessionConfig,
    pub flowise: FlowiseConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// LTI 1.3 platform registration.
#[derive(Debug, Clone, Deserialize)]
pub struct LtiConfig {
    /// Platform issuer URL (e.g. https://moodle.example.edu).
    pub issuer: String,
    /// Client id assigned to this tool by the platform.
    pub client_id: String,
    /// Deployment id assigned to this tool registration.
    pub deployment_id: String,
    /// Platform OIDC authorization endpoint for the login redirect.
    pub auth_login_url: String,
    /// Platform JWKS endpoint for id_token signature verification.
    pub key_set_url: String,
    /// This tool's callback URL, sent as redirect_uri.
    pub redirect_url: String,
    /// Tool public key set served on /api/lti/jwks (inline JWKS JSON).
    #[serde(default)]
    pub tool_jwks: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC secret for the internal session credential.
    pub secret: String,
    /// Session lifetime in hours.
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: u64,
    /// Production cookie policy: Secure + SameSite=None. The cross-site
    /// form-post login flow requires SameSite=None once HTTPS is in play;
    /// development falls back to SameSite=Lax over plain HTTP.
    #[serde(default)]
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowiseConfig {
    /// Flowise base URL (e.g. http://localhost:3000).
    pub base_url: String,
    /// Optional Flowise API key, sent as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Request gate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Requests allowed per client address per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Fixed rate-limit window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_session_ttl_hours() -> u64 {
    8
}

fn default_database_url() -> String {
    "sqlite:./data/gateway.db".to_string()
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origins() -> String {
    "*".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

impl Config {
    /// Load configuration from `config.toml` (optional) layered with
    /// environment variables using `__` as the section separator.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [lti]
            issuer = "https://platform.test"
            client_id = "client1"
            deployment_id = "dep-1"
            auth_login_url = "https://platform.test/auth"
            key_set_url = "https://platform.test/jwks"
            redirect_url = "https://tool.test/api/lti/callback"

            [session]
            secret = "test-secret"

            [flowise]
            base_url = "http://localhost:3000"
        "#
    }

    fn load_from_str(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_from_str(minimal_toml());
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.ttl_hours, 8);
        assert!(!config.session.secure_cookies);
        assert_eq!(config.gate.max_requests, 100);
        assert_eq!(config.gate.window_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.cors.origins, "*");
        assert!(config.lti.tool_jwks.is_none());
        assert!(config.flowise.api_key.is_none());
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let toml = format!(
            "{}\n[gate]\nmax_requests = 5\nwindow_secs = 10\n[server]\nport = 9999\n",
            minimal_toml()
        );
        let config = load_from_str(&toml);
        assert_eq!(config.gate.max_requests, 5);
        assert_eq!(config.gate.window_secs, 10);
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_missing_required_section_fails() {
        let result: Result<Config, _> = config::Config::builder()
            .add_source(config::File::from_str(
                "[server]\nport = 1\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }
}
