//! CLI command handlers, one per file.

mod serve;
mod status;

pub use serve::{run_serve, ServeOverrides};
pub use status::run_status;
