//! Authentication module
//!
//! Supports a pre-issued access token or the OAuth2 refresh token flow.
//! REST calls carry `Authorization: Bearer`, Bulk API calls carry
//! `X-SFDC-Session`.

mod authenticator;
mod types;

pub use authenticator::Authenticator;
pub use types::{Credentials, Session, LOGIN_URL, SANDBOX_LOGIN_URL};

#[cfg(test)]
mod tests;
