// 🧩 Enrichment Controller - resolve missing candidate sizes on a budget
//
// Priority chain per candidate:
//   1. size already on the ledger row
//   2. process-wide SizeCache
//   3. ONE batched external call for everything still missing (opt-in)
//   4. UNRESOLVED (scoring skips the size criterion)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::SizeCache;
use crate::config::EnrichmentConfig;
use crate::db::GeoPoint;
use crate::error::ValuationError;
use crate::selection::{Candidate, EnrichmentState};

/// One parcel the batch collaborator is asked about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub parcel_id: String,
    pub location: Option<GeoPoint>,
}

/// Batch-capable size lookup, injected by the caller.
///
/// Returns living area keyed by canonical parcel id. Parcels it cannot
/// resolve are simply absent from the map. Implementations must bound
/// their own I/O: a call that outlives the request timeout keeps holding
/// one of the controller's in-flight slots until it returns.
pub trait SizeEnricher: Send + Sync {
    fn lookup_sizes(&self, requests: &[EnrichmentRequest]) -> anyhow::Result<HashMap<String, u32>>;
}

/// What enrichment did for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    /// 0 or 1, never more
    pub external_calls: usize,
    pub resolved_locally: usize,
    pub resolved_externally: usize,
    pub unresolved: usize,
    pub timed_out: bool,
    pub warnings: Vec<String>,
}

impl EnrichmentReport {
    pub fn is_degraded(&self) -> bool {
        self.timed_out || !self.warnings.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} local, {} external ({} call), {} unresolved{}",
            self.resolved_locally,
            self.resolved_externally,
            self.external_calls,
            self.unresolved,
            if self.timed_out { ", timed out" } else { "" }
        )
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct EnrichmentController {
    /// Caller-controlled: false means zero external cost
    pub allow_external: bool,
    pub timeout: Duration,
    pub max_in_flight: usize,
    /// Lookups still running, shared across requests
    in_flight: Arc<AtomicUsize>,
}

/// Releases an in-flight slot when the worker finishes, panics included
struct InFlightSlot(Arc<AtomicUsize>);

impl InFlightSlot {
    fn acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<InFlightSlot> {
        counter
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| InFlightSlot(Arc::clone(counter)))
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

impl EnrichmentController {
    pub fn new() -> Self {
        Self::from_config(&EnrichmentConfig::default())
    }

    pub fn from_config(config: &EnrichmentConfig) -> Self {
        EnrichmentController {
            allow_external: config.allow_external,
            timeout: Duration::from_millis(config.timeout_ms),
            max_in_flight: config.max_in_flight,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Builder pattern: share the in-flight counter with other controllers
    pub fn with_in_flight(mut self, in_flight: Arc<AtomicUsize>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(AtomicOrdering::SeqCst)
    }

    /// Fill in candidate sizes and refresh their size deltas.
    ///
    /// Never fails: a failed or late batch leaves the affected candidates
    /// UNRESOLVED and is reported in the returned warnings.
    pub fn enrich(
        &self,
        candidates: &mut [Candidate],
        subject_sqft: Option<u32>,
        size_cache: &Arc<SizeCache>,
        enricher: Option<&Arc<dyn SizeEnricher>>,
    ) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();

        // Steps 1 + 2: ledger row, then process cache
        for candidate in candidates.iter_mut() {
            if candidate.record.size_sqft.is_some() {
                report.resolved_locally += 1;
                continue;
            }
            if let Some(size) = size_cache.get(candidate.parcel_id()) {
                candidate.resolve_size(size, EnrichmentState::Local);
                report.resolved_locally += 1;
            }
        }

        // Step 3: one batch for the distinct parcels still missing
        let pending: BTreeMap<String, Option<GeoPoint>> = candidates
            .iter()
            .filter(|c| c.size_sqft.is_none())
            .map(|c| (c.parcel_id().to_string(), c.record.location))
            .collect();

        if !pending.is_empty() && self.allow_external {
            if let Some(enricher) = enricher {
                let requests: Vec<EnrichmentRequest> = pending
                    .into_iter()
                    .map(|(parcel_id, location)| EnrichmentRequest { parcel_id, location })
                    .collect();

                match self.run_batch(enricher, size_cache, requests, &mut report) {
                    Ok(sizes) => {
                        for candidate in candidates.iter_mut().filter(|c| c.size_sqft.is_none()) {
                            if let Some(size) = sizes.get(candidate.parcel_id()) {
                                candidate.resolve_size(*size, EnrichmentState::Enriched);
                                report.resolved_externally += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "size enrichment degraded, continuing without it");
                        report.timed_out = matches!(e, ValuationError::EnrichmentTimeout { .. });
                        report.warnings.push(e.to_string());
                    }
                }
            }
        }

        // Step 4: whatever is left stays unresolved
        for candidate in candidates.iter_mut() {
            if candidate.size_sqft.is_none() {
                candidate.enrichment_state = EnrichmentState::Unresolved;
                report.unresolved += 1;
            }
            candidate.refresh_size_delta(subject_sqft);
        }

        debug!(summary = %report.summary(), "enrichment finished");
        report
    }

    /// Run the batch on a worker thread bounded by `self.timeout`.
    ///
    /// The worker writes into the SizeCache itself, so a late answer still
    /// benefits the next request. No worker is started while
    /// `max_in_flight` earlier lookups are still running.
    fn run_batch(
        &self,
        enricher: &Arc<dyn SizeEnricher>,
        size_cache: &Arc<SizeCache>,
        requests: Vec<EnrichmentRequest>,
        report: &mut EnrichmentReport,
    ) -> Result<HashMap<String, u32>, ValuationError> {
        let Some(slot) = InFlightSlot::acquire(&self.in_flight, self.max_in_flight) else {
            return Err(ValuationError::EnrichmentFailed(format!(
                "{} earlier lookups still running, batch skipped",
                self.in_flight()
            )));
        };
        report.external_calls = 1;

        let (tx, rx) = mpsc::channel();
        let enricher = Arc::clone(enricher);
        let cache = Arc::clone(size_cache);

        thread::spawn(move || {
            let _slot = slot;
            let result = enricher.lookup_sizes(&requests).map(|sizes| {
                let sizes: HashMap<String, u32> = sizes.into_iter().filter(|(_, size)| *size > 0).collect();
                cache.extend(sizes.iter().map(|(parcel, size)| (parcel.clone(), *size)));
                sizes
            });
            // Receiver is gone after a timeout; nothing to report to
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(sizes)) => Ok(sizes),
            Ok(Err(e)) => Err(ValuationError::EnrichmentFailed(format!("{:#}", e))),
            Err(RecvTimeoutError::Timeout) => Err(ValuationError::EnrichmentTimeout {
                after_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ValuationError::EnrichmentFailed(
                "enrichment worker exited without a result".to_string(),
            )),
        }
    }
}

impl Default for EnrichmentController {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
