//! Bounded, time-limited fan-out of remote satellite estimate requests.

use crate::config::RemoteParams;
use crate::types::{AqError, AqResult, BoundingBox, Grid, Pollutant};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One remote estimate to compute
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateRequest {
    pub pollutant: Pollutant,
    pub date: NaiveDate,
    pub bounds: BoundingBox,
}

/// Remote service producing a concentration grid for a request
///
/// Implementations are read-only and may be called concurrently.
pub trait SatelliteEstimateSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, request: &EstimateRequest) -> AqResult<Grid>;
}

/// Runs estimate requests on a dedicated pool with an overall deadline
pub struct RemoteFetcher {
    pool: rayon::ThreadPool,
    timeout: Duration,
}

impl RemoteFetcher {
    pub fn new(params: &RemoteParams) -> AqResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.workers.max(1))
            .thread_name(|i| format!("smogmap-remote-{}", i))
            .build()
            .map_err(|e| AqError::Config(format!("Failed to build remote worker pool: {}", e)))?;
        Ok(Self {
            pool,
            timeout: Duration::from_secs(params.timeout_secs),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch every request; one entry per requested pollutant
    ///
    /// Results are collected before returning. A request that errors, panics
    /// or misses the deadline yields an error entry for its pollutant and
    /// does not affect the others. A late result is discarded.
    pub fn fetch_all(
        &self,
        source: Arc<dyn SatelliteEstimateSource>,
        requests: Vec<EstimateRequest>,
    ) -> BTreeMap<Pollutant, AqResult<Grid>> {
        let (tx, rx) = mpsc::channel();
        let pending: Vec<Pollutant> = requests.iter().map(|r| r.pollutant).collect();

        for request in requests {
            let tx = tx.clone();
            let source = Arc::clone(&source);
            self.pool.spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| source.fetch(&request))).unwrap_or_else(|_| {
                    Err(AqError::Remote(format!(
                        "{} request for {} panicked",
                        source.name(),
                        request.pollutant
                    )))
                });
                // The receiver is gone once the deadline passed
                let _ = tx.send((request.pollutant, result));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let mut results = BTreeMap::new();
        while results.len() < pending.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((pollutant, result)) => {
                    if let Err(e) = &result {
                        log::warn!("{} estimate for {} failed: {}", source.name(), pollutant, e);
                    }
                    results.insert(pollutant, result);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for pollutant in pending {
            results.entry(pollutant).or_insert_with(|| {
                log::warn!("{} estimate for {} timed out", source.name(), pollutant);
                Err(AqError::Timeout(format!(
                    "{} estimate for {} exceeded {:?}",
                    source.name(),
                    pollutant,
                    self.timeout
                )))
            });
        }
        results
    }
}
