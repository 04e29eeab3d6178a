pub mod claims;
pub mod login;
pub mod permission;
pub mod session;
pub mod token;

pub use claims::{extract, is_instructor, is_learner};
pub use login::LoginCache;
pub use permission::PermissionResolver;
pub use session::{SessionClaims, SessionError, Sessions, SESSION_COOKIE};
pub use token::{AuthError, LtiTokenValidator, PlatformKeyStore, RawLtiClaims, ValidatedClaims};
