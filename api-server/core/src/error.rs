pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures while establishing who the caller is.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    Missing,

    #[error("malformed bearer credential")]
    Malformed,

    #[error("credential has expired")]
    Expired,

    #[error("credential was issued for another audience")]
    InvalidAudience,

    #[error("credential was issued by an unexpected issuer")]
    InvalidIssuer,

    #[error("credential was signed by an unknown key")]
    UnknownKey,

    #[error("credential could not be verified: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("failed to build a scoped cluster client: {0}")]
    ClientConstruction(#[source] BoxError),

    /// A cluster API call failed. `code` carries the HTTP status returned by
    /// the API server, if it returned one.
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        code: Option<u16>,
        #[source]
        source: BoxError,
    },

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("{0} is not implemented")]
    Unimplemented(&'static str),
}

// === impl Error ===

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, namespace: impl ToString, name: impl ToString) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn upstream(context: &'static str, code: Option<u16>, source: impl Into<BoxError>) -> Self {
        Self::Upstream {
            context,
            code,
            source: source.into(),
        }
    }

    pub fn stream(msg: impl ToString) -> Self {
        Self::Stream(msg.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Upstream {
                    code: Some(404),
                    ..
                }
        )
    }
}
