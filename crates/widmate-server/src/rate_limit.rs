//! Per-client sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use widmate_core::config::RateLimitConfig;
use widmate_core::{ServiceError, ServiceResult};

const WINDOW: Duration = Duration::from_secs(60);

/// Above this many tracked keys, idle ones are dropped on the next check.
const PRUNE_THRESHOLD: usize = 4096;

/// Endpoint groups sharing one limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Info,
    Download,
    Status,
    Configure,
    Check,
    Update,
    Search,
}

pub struct RateLimiter {
    limits: RateLimitConfig,
    hits: Mutex<HashMap<(IpAddr, EndpointClass), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn limit(&self, class: EndpointClass) -> usize {
        let n = match class {
            EndpointClass::Info => self.limits.info,
            EndpointClass::Download => self.limits.download,
            EndpointClass::Status => self.limits.status,
            EndpointClass::Configure => self.limits.configure,
            EndpointClass::Check => self.limits.check,
            EndpointClass::Update => self.limits.update,
            EndpointClass::Search => self.limits.search,
        };
        n as usize
    }

    /// Record a request, or reject it with `RateLimited` when the client has
    /// used up its allowance for the last minute.
    pub fn check(&self, ip: IpAddr, class: EndpointClass) -> ServiceResult<()> {
        self.check_at(ip, class, Instant::now())
    }

    pub(crate) fn check_at(&self, ip: IpAddr, class: EndpointClass, now: Instant) -> ServiceResult<()> {
        let limit = self.limit(class);
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        if hits.len() > PRUNE_THRESHOLD {
            hits.retain(|_, q| q.back().is_some_and(|t| now.duration_since(*t) < WINDOW));
        }
        let queue = hits.entry((ip, class)).or_default();
        while queue
            .front()
            .is_some_and(|t| now.duration_since(*t) >= WINDOW)
        {
            queue.pop_front();
        }
        if queue.len() >= limit {
            tracing::debug!(%ip, ?class, "rate limit exceeded");
            return Err(ServiceError::RateLimited);
        }
        queue.push_back(now);
        Ok(())
    }
}
