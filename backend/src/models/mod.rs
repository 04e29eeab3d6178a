pub mod grant;
pub mod user;
