//! Retry and backoff for package-index requests.
//!
//! Registry metadata and package downloads go through `run_with_retry`, which
//! backs off exponentially on timeouts, throttling and 5xx responses.

mod error;
mod policy;
mod run;

pub use error::{FailureClass, FetchError};
pub use policy::RetryPolicy;
pub use run::run_with_retry;
