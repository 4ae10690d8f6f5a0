use chat_api_server_core::Error;
use tonic::{Code, Status};
use tracing::{debug, warn};

/// The gRPC code reported for a failed call.
pub fn code(error: &Error) -> Code {
    match error {
        Error::Auth(_) => Code::Unauthenticated,
        Error::Validation(_) => Code::InvalidArgument,
        Error::NotFound { .. } => Code::NotFound,
        Error::ClientConstruction(_) => Code::Internal,
        Error::Upstream { code, .. } => match code {
            Some(401) => Code::Unauthenticated,
            Some(403) => Code::PermissionDenied,
            Some(404) => Code::NotFound,
            Some(409) => Code::AlreadyExists,
            _ => Code::Internal,
        },
        Error::Stream(_) => Code::Aborted,
        Error::Unimplemented(_) => Code::Unimplemented,
    }
}

pub(crate) fn to_status(error: Error) -> Status {
    let code = code(&error);
    match code {
        Code::Internal | Code::Aborted => warn!(%error, "Request failed"),
        _ => debug!(%error, "Request failed"),
    }
    Status::new(code, error.to_string())
}
