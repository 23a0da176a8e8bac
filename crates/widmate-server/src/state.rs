use std::path::PathBuf;
use std::sync::Arc;

use widmate_core::extractor::Extractor;
use widmate_core::jobs::JobStore;
use widmate_core::runner::JobRunner;
use widmate_core::updater::UpdateScheduler;

use crate::rate_limit::RateLimiter;
use crate::stats::HostStats;

/// Shared by every handler as `State<Arc<AppState>>`.
pub struct AppState {
    pub store: Arc<JobStore>,
    pub runner: JobRunner,
    pub extractor: Arc<dyn Extractor>,
    pub updater: Arc<UpdateScheduler>,
    pub limiter: RateLimiter,
    pub download_dir: PathBuf,
    pub stats: HostStats,
}
