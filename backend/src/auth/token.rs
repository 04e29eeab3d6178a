use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::LtiConfig;

/// The only launch message type this tool handles.
pub const RESOURCE_LINK_REQUEST: &str = "LtiResourceLinkRequest";
/// Supported LTI protocol version.
pub const LTI_VERSION: &str = "1.3.0";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Token has expired")]
    ExpiredToken,
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),
    #[error("Invalid audience")]
    InvalidAudience,
    #[error("Missing required claim: {0}")]
    MissingClaim(&'static str),
    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),
    #[error("Unsupported LTI version: {0}")]
    UnsupportedVersion(String),
    #[error("Unknown deployment id: {0}")]
    InvalidDeployment(String),
    #[error("Unknown or expired login state")]
    InvalidState,
    #[error("Nonce does not match the pending login")]
    NonceMismatch,
    #[error("Key set fetch error: {0}")]
    KeyFetch(String),
    #[error("No platform key found for kid: {0}")]
    KeyNotFound(String),
}

/// Raw claims decoded from a platform id_token, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLtiClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
    pub message_type: Option<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
    pub version: Option<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    pub deployment_id: Option<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri")]
    pub target_link_uri: Option<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/context")]
    pub context: Option<ContextClaim>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link")]
    pub resource_link: Option<ResourceLinkClaim>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/roles")]
    pub roles: Vec<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/tool_platform")]
    pub tool_platform: Option<PlatformClaim>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/custom")]
    pub custom: Option<CustomClaims>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContextClaim {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResourceLinkClaim {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlatformClaim {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Custom claims this tool understands (platform-configured overrides).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CustomClaims {
    #[serde(default)]
    pub user_username: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

/// Typed claim set produced once by the validator; downstream code never
/// touches URI-keyed claim bags.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: String,
    pub nonce: String,
    pub deployment_id: String,
    pub target_link_uri: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    pub context: Option<ContextClaim>,
    pub resource_link: Option<ResourceLinkClaim>,
    pub roles: Vec<String>,
    pub platform: Option<PlatformClaim>,
    pub custom_username: Option<String>,
    pub custom_email: Option<String>,
}

/// JWKS document published by the platform.
#[derive(Debug, Deserialize)]
struct KeySetResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Fetches and caches the platform's public keys, keyed by kid.
///
/// Fetching is lazy: the first launch (or an unknown kid after key rotation)
/// triggers a refresh.
pub struct PlatformKeyStore {
    http_client: Client,
    key_set_url: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl PlatformKeyStore {
    pub fn new(key_set_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            key_set_url: key_set_url.to_string(),
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub async fn refresh(&self) -> Result<(), AuthError> {
        tracing::info!("Fetching platform key set from {}", self.key_set_url);

        let response: KeySetResponse = self
            .http_client
            .get(&self.key_set_url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        let mut keys = self.keys.write().await;
        keys.clear();

        for jwk in response.keys {
            if jwk.kty == "RSA" {
                if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
                    match DecodingKey::from_rsa_components(n, e) {
                        Ok(key) => {
                            keys.insert(jwk.kid.clone(), key);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to parse RSA key {}: {}", jwk.kid, e);
                        }
                    }
                }
            }
        }

        tracing::info!("Loaded {} platform keys", keys.len());
        Ok(())
    }

    pub async fn get(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }
}

/// Validates inbound LTI 1.3 launch tokens: RS256 signature against the
/// platform key set, then the protocol claim checks.
pub struct LtiTokenValidator {
    keys: PlatformKeyStore,
    issuer: String,
    client_id: String,
    deployment_id: String,
}

impl LtiTokenValidator {
    pub fn new(config: &LtiConfig) -> Self {
        Self {
            keys: PlatformKeyStore::new(&config.key_set_url),
            issuer: config.issuer.clone(),
            client_id: config.client_id.clone(),
            deployment_id: config.deployment_id.clone(),
        }
    }

    /// Decode and verify the token signature, returning raw claims.
    ///
    /// An unknown kid triggers one key-set refetch before failing, so
    /// platform key rotation does not strand launches.
    pub async fn decode(&self, raw_token: &str) -> Result<RawLtiClaims, AuthError> {
        let header =
            decode_header(raw_token).map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("missing kid in token header".to_string()))?;

        let key = match self.keys.get(&kid).await {
            Some(key) => key,
            None => {
                self.keys.refresh().await?;
                self.keys
                    .get(&kid)
                    .await
                    .ok_or_else(|| AuthError::KeyNotFound(kid.clone()))?
            }
        };

        // Signature only here; expiry, audience and the LTI protocol claims
        // are all checked in validate() against the typed claim set.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);

        let token_data =
            decode::<RawLtiClaims>(raw_token, &key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::MalformedToken(e.to_string()),
            })?;

        Ok(token_data.claims)
    }

    /// Run the LTI protocol checks over decoded claims.
    ///
    /// Check order: required-claim presence, expiry, issuer allow-list,
    /// audience, message type, version, deployment id.
    pub fn validate(&self, raw: RawLtiClaims) -> Result<ValidatedClaims, AuthError> {
        let issuer = raw.iss.ok_or(AuthError::MissingClaim("iss"))?;
        let subject = raw.sub.ok_or(AuthError::MissingClaim("sub"))?;
        let aud = raw.aud.ok_or(AuthError::MissingClaim("aud"))?;
        let exp = raw.exp.ok_or(AuthError::MissingClaim("exp"))?;
        raw.iat.ok_or(AuthError::MissingClaim("iat"))?;
        let nonce = raw.nonce.ok_or(AuthError::MissingClaim("nonce"))?;
        let deployment_id = raw
            .deployment_id
            .ok_or(AuthError::MissingClaim("deployment_id"))?;
        let target_link_uri = raw
            .target_link_uri
            .ok_or(AuthError::MissingClaim("target_link_uri"))?;
        let version = raw.version.ok_or(AuthError::MissingClaim("version"))?;
        let message_type = raw
            .message_type
            .ok_or(AuthError::MissingClaim("message_type"))?;

        if exp <= Utc::now().timestamp() as u64 {
            return Err(AuthError::ExpiredToken);
        }

        // Platforms are inconsistent about the www prefix in their issuer URL.
        if !issuer_variants(&self.issuer).contains(&issuer) {
            return Err(AuthError::InvalidIssuer(issuer));
        }

        if !audience_matches(&aud, &self.client_id) {
            return Err(AuthError::InvalidAudience);
        }

        if message_type != RESOURCE_LINK_REQUEST {
            return Err(AuthError::UnsupportedMessageType(message_type));
        }

        if version != LTI_VERSION {
            return Err(AuthError::UnsupportedVersion(version));
        }

        if deployment_id != self.deployment_id {
            return Err(AuthError::InvalidDeployment(deployment_id));
        }

        let (custom_username, custom_email) = match raw.custom {
            Some(custom) => (custom.user_username, custom.user_email),
            None => (None, None),
        };

        Ok(ValidatedClaims {
            subject,
            issuer,
            audience: self.client_id.clone(),
            nonce,
            deployment_id,
            target_link_uri,
            name: raw.name,
            email: raw.email,
            preferred_username: raw.preferred_username,
            context: raw.context,
            resource_link: raw.resource_link,
            roles: raw.roles,
            platform: raw.tool_platform,
            custom_username,
            custom_email,
        })
    }

    /// Decode, verify and validate in one step.
    pub async fn decode_and_validate(&self, raw_token: &str) -> Result<ValidatedClaims, AuthError> {
        let raw = self.decode(raw_token).await?;
        self.validate(raw)
    }
}

/// The configured issuer plus its with/without-www variant.
fn issuer_variants(configured: &str) -> Vec<String> {
    let mut variants = vec![configured.to_string()];
    if let Some(idx) = configured.find("://") {
        let (scheme, rest) = configured.split_at(idx + 3);
        let toggled = if let Some(stripped) = rest.strip_prefix("www.") {
            format!("{}{}", scheme, stripped)
        } else {
            format!("{}www.{}", scheme, rest)
        };
        variants.push(toggled);
    }
    variants
}

/// The aud claim may be a single string or an array of strings.
fn audience_matches(aud: &serde_json::Value, client_id: &str) -> bool {
    match aud {
        serde_json::Value::String(s) => s == client_id,
        serde_json::Value::Array(items) => items
            .iter()
            .any(|item| item.as_str() == Some(client_id)),
        _ => false,
    }
}
