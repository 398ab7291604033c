// =============================================================================
// Snapshot Collector - timeout-bounded, single-shot candle collection
// =============================================================================
//
// `collect` launches one isolated worker per call, lets it pump the feed into
// the session buffer, and waits for it at most `timeout`.  Whatever happens
// inside the feed, control returns to the caller within
// `timeout + termination_grace`, and the worker is stopped (or, if it refuses
// to die, reported as a fatal `WorkerTerminationFailure`).
//
// Early completion follows the collector's `CompletionPolicy`.  The default,
// `FirstEvent`, ends the run on the first stored candle from any symbol, so a
// multi-symbol request usually comes back partial.
// =============================================================================

pub mod session;
mod worker;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, info_span, warn, Instrument};

use crate::error::CollectError;
use crate::market_data::CandleFeed;
use crate::types::{CandleRecord, CompletionPolicy, EndReason, SnapshotKey};

pub use session::{CollectionRequest, CollectionSession, Phase};
use worker::{Worker, WorkerExit};

/// How long a killed worker may take to stop before it is abandoned.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// SnapshotResult
// ---------------------------------------------------------------------------

/// Candles collected by one run.  Immutable once returned.
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    records: BTreeMap<SnapshotKey, CandleRecord>,
    requested: Vec<String>,
    ended_by: EndReason,
    elapsed: Duration,
}

impl SnapshotResult {
    pub(crate) fn new(
        records: BTreeMap<SnapshotKey, CandleRecord>,
        requested: Vec<String>,
        ended_by: EndReason,
        elapsed: Duration,
    ) -> Self {
        Self {
            records,
            requested,
            ended_by,
            elapsed,
        }
    }

    pub fn records(&self) -> &BTreeMap<SnapshotKey, CandleRecord> {
        &self.records
    }

    pub fn into_records(self) -> BTreeMap<SnapshotKey, CandleRecord> {
        self.records
    }

    pub fn get(&self, key: &SnapshotKey) -> Option<&CandleRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Chronological records for one symbol.
    pub fn for_symbol(&self, symbol: &str) -> Vec<&CandleRecord> {
        self.records
            .values()
            .filter(|r| r.symbol == symbol)
            .collect()
    }

    /// Symbols with at least one record.
    pub fn symbols(&self) -> BTreeSet<&str> {
        self.records.keys().map(|k| k.symbol.as_str()).collect()
    }

    pub fn requested_symbols(&self) -> &[String] {
        &self.requested
    }

    /// Requested symbols that have no record.
    pub fn missing_symbols(&self) -> Vec<&str> {
        let present = self.symbols();
        self.requested
            .iter()
            .map(String::as_str)
            .filter(|s| !present.contains(s))
            .collect()
    }

    /// True when fewer symbols are represented than were requested.  This is
    /// the normal outcome under `CompletionPolicy::FirstEvent`.
    pub fn is_partial(&self) -> bool {
        !self.missing_symbols().is_empty()
    }

    pub fn ended_by(&self) -> EndReason {
        self.ended_by
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

// ---------------------------------------------------------------------------
// SnapshotCollector
// ---------------------------------------------------------------------------

pub struct SnapshotCollector {
    feed: Arc<dyn CandleFeed>,
    policy: CompletionPolicy,
    termination_grace: Duration,
    live_workers: Arc<AtomicUsize>,
}

impl SnapshotCollector {
    pub fn new(feed: impl CandleFeed) -> Self {
        Self {
            feed: Arc::new(feed),
            policy: CompletionPolicy::default(),
            termination_grace: DEFAULT_TERMINATION_GRACE,
            live_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// Number of this collector's workers whose thread has not finished.
    /// Zero after every `collect` except one that failed with
    /// `WorkerTerminationFailure`.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Collect one snapshot.
    ///
    /// Returns within `request.timeout` plus the termination grace.  An `Ok`
    /// result always holds at least one record; check
    /// [`SnapshotResult::is_partial`] to see whether every symbol reported.
    pub async fn collect(&self, request: CollectionRequest) -> Result<SnapshotResult, CollectError> {
        request.validate(self.feed.as_ref())?;

        let session = Arc::new(CollectionSession::new(request, self.policy));
        let span = info_span!("collect", session = %session.id());
        self.run(session).instrument(span).await
    }

    async fn run(&self, session: Arc<CollectionSession>) -> Result<SnapshotResult, CollectError> {
        let started = Instant::now();
        let request = session.request().clone();

        info!(
            symbols = ?request.symbols,
            interval = %request.interval,
            timeout_ms = request.timeout.as_millis() as u64,
            policy = %self.policy,
            "starting snapshot collection"
        );

        session.advance(Phase::Starting);
        let mut worker = Worker::spawn(self.feed.clone(), session.clone(), self.live_workers.clone())?;

        let waited = tokio::time::timeout(request.timeout, worker.wait()).await;
        let exit = match waited {
            Ok(exit) => exit,
            Err(_) => {
                session.advance(Phase::Finalizing);
                warn!(
                    stored = session.buffer().len(),
                    "collection timeout elapsed -- killing worker"
                );
                worker.kill();

                let reaped = tokio::time::timeout(self.termination_grace, worker.wait()).await;
                match reaped {
                    Ok(exit) => exit,
                    Err(_) => {
                        session.buffer().seal();
                        error!(
                            grace_ms = self.termination_grace.as_millis() as u64,
                            "worker ignored termination request"
                        );
                        worker.detach();
                        return Err(CollectError::WorkerTerminationFailure {
                            grace: self.termination_grace,
                        });
                    }
                }
            }
        };

        session.advance(Phase::Finalizing);
        worker.join().await;
        session.buffer().seal();
        let records = session.buffer().snapshot();
        session.advance(Phase::Done);

        let ended_by = match exit {
            WorkerExit::ConnectFailed(reason) => {
                return Err(CollectError::FeedUnavailable { reason });
            }
            WorkerExit::Satisfied => EndReason::Satisfied,
            WorkerExit::Killed => EndReason::TimedOut,
            WorkerExit::StreamEnded if records.is_empty() => {
                return Err(CollectError::FeedClosed {
                    reason: "stream ended".into(),
                });
            }
            WorkerExit::StreamFailed(reason) if records.is_empty() => {
                return Err(CollectError::FeedClosed { reason });
            }
            WorkerExit::StreamEnded | WorkerExit::StreamFailed(_) => EndReason::StreamEnded,
        };

        if records.is_empty() {
            return Err(CollectError::CollectionTimeout {
                timeout: request.timeout,
            });
        }

        let result = SnapshotResult::new(records, request.symbols, ended_by, started.elapsed());

        info!(
            records = result.len(),
            symbols = result.symbols().len(),
            partial = result.is_partial(),
            ended_by = %result.ended_by(),
            elapsed_ms = result.elapsed().as_millis() as u64,
            "snapshot collected"
        );

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
