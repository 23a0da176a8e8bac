//! Registry request failures and whether they are worth retrying.

use std::fmt;

use crate::error::ServiceError;

/// Failure of a single registry request.
#[derive(Debug)]
pub enum FetchError {
    Curl(curl::Error),
    /// Non-2xx response.
    Http(u32),
    /// Saving the package to the staging directory failed.
    Io(std::io::Error),
}

/// Retry-relevant class of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    /// 429 or 503: the index wants us to back off harder.
    Throttled,
    Network,
    ServerError,
    /// Missing package, bad request, local disk trouble.
    Permanent,
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Http(429 | 503) => FailureClass::Throttled,
            FetchError::Http(500..=599) => FailureClass::ServerError,
            FetchError::Http(_) | FetchError::Io(_) => FailureClass::Permanent,
            FetchError::Curl(e) if e.is_operation_timedout() => FailureClass::Timeout,
            FetchError::Curl(e)
                if e.is_couldnt_connect()
                    || e.is_couldnt_resolve_host()
                    || e.is_couldnt_resolve_proxy()
                    || e.is_recv_error()
                    || e.is_send_error()
                    || e.is_got_nothing()
                    || e.is_partial_file() =>
            {
                FailureClass::Network
            }
            FetchError::Curl(_) => FailureClass::Permanent,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Curl(e) => write!(f, "{e}"),
            FetchError::Http(code) => write!(f, "HTTP {code}"),
            FetchError::Io(e) => write!(f, "write package: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Curl(e) => Some(e),
            FetchError::Io(e) => Some(e),
            FetchError::Http(_) => None,
        }
    }
}

impl From<curl::Error> for FetchError {
    fn from(e: curl::Error) -> Self {
        FetchError::Curl(e)
    }
}

impl From<FetchError> for ServiceError {
    fn from(e: FetchError) -> Self {
        ServiceError::UpstreamFailure(format!("package index: {e}"))
    }
}
