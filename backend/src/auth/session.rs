use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::models::user::User;
use crate::store::GatewayStore;

/// Name of the HTTP-only session cookie.
pub const SESSION_COOKIE: &str = "lti_session";

/// Claims carried by the internal session credential: the minimal identity
/// needed for authorization and display, nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Stored user record id.
    pub uid: String,
    /// Platform subject.
    pub sub: String,
    /// Platform issuer.
    pub iss: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: String,
    pub roles: Vec<String>,
    pub context_id: String,
    /// Session identifier rotated on every login.
    pub session_id: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No session cookie present")]
    MissingCookie,
    #[error("Invalid session credential")]
    InvalidCredential,
    #[error("Session has expired")]
    Expired,
    #[error("Account is deactivated")]
    Inactive,
    #[error("Session error: {0}")]
    Internal(String),
}

/// Issues and verifies the internal session credential (HS256, fixed TTL)
/// and builds the cookie that carries it.
pub struct Sessions {
    secret: String,
    ttl: Duration,
    secure_cookies: bool,
}

impl Sessions {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            ttl: Duration::hours(config.ttl_hours as i64),
            secure_cookies: config.secure_cookies,
        }
    }

    /// Mint a signed credential for the user.
    pub fn issue(&self, user: &User) -> Result<String, SessionError> {
        self.issue_at(user, Utc::now())
    }

    /// Mint a credential as of a given instant.
    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<String, SessionError> {
        let claims = SessionClaims {
            uid: user.id.clone(),
            sub: user.subject.clone(),
            iss: user.issuer.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            roles: user.roles.clone(),
            context_id: user.context_id.clone(),
            session_id: user.session_id.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| SessionError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify signature and expiry of a credential.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::InvalidCredential,
        })
    }

    /// Full session check for a request: cookie present, credential valid,
    /// and the account still active. Credential validity alone is not
    /// sufficient; a user deactivated after issuance must be rejected.
    pub fn resolve(
        &self,
        jar: &CookieJar,
        store: &GatewayStore,
    ) -> Result<(SessionClaims, User), SessionError> {
        let cookie = jar.get(SESSION_COOKIE).ok_or(SessionError::MissingCookie)?;
        let claims = self.verify(cookie.value())?;
        let user = store
            .find_user(&claims.uid)
            .map_err(|e| SessionError::Internal(e.to_string()))?
            .ok_or(SessionError::InvalidCredential)?;
        if !user.active {
            return Err(SessionError::Inactive);
        }
        Ok((claims, user))
    }

    /// Build the session cookie. The cross-site form-post login flow needs
    /// SameSite=None in production; browsers only accept that combined with
    /// Secure, so development over plain HTTP uses Lax.
    pub fn cookie(&self, token: String) -> Cookie<'static> {
        let same_site = if self.secure_cookies {
            SameSite::None
        } else {
            SameSite::Lax
        };
        Cookie::build((SESSION_COOKIE, token))
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(same_site)
            .path("/")
            .max_age(time::Duration::seconds(self.ttl.num_seconds()))
            .build()
    }

    /// Build an expired cookie that clears the session (logout).
    pub fn clear_cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, String::new()))
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}
