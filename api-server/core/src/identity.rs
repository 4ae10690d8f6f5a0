use crate::AuthError;
use std::{fmt, sync::Arc};

/// The verified caller of a single request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub email: String,
    pub name: String,
}

/// A raw bearer credential, exactly as presented by the caller.
///
/// The token is handed to the cluster API unchanged so that the caller's own
/// RBAC grants apply. It is never written to logs.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(Arc<str>);

/// Verifies bearer credentials.
#[async_trait::async_trait]
pub trait Authenticate: Send + Sync + 'static {
    async fn authenticate(&self, token: &BearerToken) -> Result<Identity, AuthError>;
}

// === impl BearerToken ===

impl BearerToken {
    pub fn new(token: impl Into<Arc<str>>) -> Result<Self, AuthError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AuthError::Missing);
        }
        Ok(Self(token))
    }

    /// Parses an `authorization` header value of the form `Bearer <token>`.
    ///
    /// The scheme is matched case-insensitively.
    pub fn from_header(value: &str) -> Result<Self, AuthError> {
        let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::Malformed)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::Malformed);
        }
        let token = token.trim();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(AuthError::Malformed);
        }
        Ok(Self(token.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[async_trait::async_trait]
impl<A: Authenticate + ?Sized> Authenticate for Arc<A> {
    async fn authenticate(&self, token: &BearerToken) -> Result<Identity, AuthError> {
        (**self).authenticate(token).await
    }
}
