// =============================================================================
// Collection Session - per-call state of one snapshot run
// =============================================================================
//
// Everything a run needs lives here and is handed to the worker behind an
// Arc.  There is no process-wide state, so concurrent `collect` calls never
// see each other's timeout, buffer or feed connection.
//
// Buffer discipline:
//   Streaming   -> worker inserts, controller does not read.
//   Finalizing  -> controller seals the buffer after the worker stopped, then
//                  copies it out.
// =============================================================================

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CollectError;
use crate::market_data::{CandleFeed, SnapshotBuffer, Subscription};
use crate::types::{CandleEvent, CandleRecord, CompletionPolicy};

/// Caller-supplied parameters of one collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    pub symbols: Vec<String>,
    pub interval: String,
    pub timeout: Duration,
}

impl CollectionRequest {
    pub fn new(symbols: Vec<String>, interval: impl Into<String>, timeout: Duration) -> Self {
        Self {
            symbols,
            interval: interval.into(),
            timeout,
        }
    }

    /// Reject requests no feed could satisfy.  An empty symbol list is
    /// allowed; it simply times out.  Two different spellings of the same
    /// instrument are rejected, since the feed reports under only one of them.
    pub fn validate(&self, feed: &dyn CandleFeed) -> Result<(), CollectError> {
        if self.timeout.is_zero() {
            return Err(CollectError::InvalidRequest(
                "timeout must be greater than zero".into(),
            ));
        }
        if !feed.supports_interval(&self.interval) {
            return Err(CollectError::InvalidRequest(format!(
                "unsupported candle interval {:?}",
                self.interval
            )));
        }

        let mut seen: HashMap<String, &str> = HashMap::new();
        for symbol in &self.symbols {
            let canonical = feed.canonical_symbol(symbol);
            match seen.get(&canonical) {
                Some(first) if *first != symbol.as_str() => {
                    return Err(CollectError::InvalidRequest(format!(
                        "symbols {first:?} and {symbol:?} name the same instrument"
                    )));
                }
                Some(_) => {}
                None => {
                    seen.insert(canonical, symbol);
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Streaming,
    Finalizing,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Finalizing => write!(f, "Finalizing"),
            Self::Done => write!(f, "Done"),
        }
    }
}

pub struct CollectionSession {
    id: Uuid,
    request: CollectionRequest,
    subscription: Subscription,
    policy: CompletionPolicy,
    buffer: SnapshotBuffer,
    /// Set by the event callback once the policy is met; the worker loop
    /// checks it after every event.
    satisfied: AtomicBool,
    phase: RwLock<Phase>,
}

impl CollectionSession {
    pub fn new(request: CollectionRequest, policy: CompletionPolicy) -> Self {
        let subscription = Subscription::candles(request.symbols.clone(), request.interval.clone());
        Self {
            id: Uuid::new_v4(),
            request,
            subscription,
            policy,
            buffer: SnapshotBuffer::new(),
            satisfied: AtomicBool::new(false),
            phase: RwLock::new(Phase::Idle),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &CollectionRequest {
        &self.request
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// Move forward to `next`.  Phases never go backwards; a stale
    /// transition (e.g. the worker reporting Streaming after the controller
    /// already moved to Finalizing) is ignored.
    pub fn advance(&self, next: Phase) {
        let mut phase = self.phase.write();
        let current = *phase;
        if rank(next) <= rank(current) {
            return;
        }
        debug!(session = %self.id, from = %current, to = %next, "phase transition");
        *phase = next;
    }

    /// The single per-event callback: decode, store, evaluate the policy.
    pub fn on_event(&self, event: CandleEvent) {
        let record = match CandleRecord::try_from(event) {
            Ok(record) => record,
            Err(e) => {
                warn!(session = %self.id, error = %e, "dropping undecodable candle");
                return;
            }
        };

        if !self.buffer.insert(record) {
            return;
        }

        let done = match self.policy {
            CompletionPolicy::FirstEvent => true,
            CompletionPolicy::EverySymbol => {
                let seen = self.buffer.symbols();
                let wanted: BTreeSet<&String> = self.request.symbols.iter().collect();
                !wanted.is_empty() && wanted.iter().all(|s| seen.contains(*s))
            }
            CompletionPolicy::FullTimeout => false,
        };
        if done {
            self.satisfied.store(true, Ordering::Release);
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.satisfied.load(Ordering::Acquire)
    }
}

fn rank(phase: Phase) -> u8 {
    match phase {
        Phase::Idle => 0,
        Phase::Starting => 1,
        Phase::Streaming => 2,
        Phase::Finalizing => 3,
        Phase::Done => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::scripted::{candle, ScriptedFeed};

    fn session(symbols: &[&str], policy: CompletionPolicy) -> CollectionSession {
        let request = CollectionRequest::new(
            symbols.iter().map(|s| s.to_string()).collect(),
            "1m",
            Duration::from_secs(5),
        );
        CollectionSession::new(request, policy)
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let req = CollectionRequest::new(vec!["BTC-USD".into()], "1m", Duration::ZERO);
        let err = req.validate(&ScriptedFeed::silent()).unwrap_err();
        assert!(matches!(err, CollectError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_interval_is_invalid() {
        let req = CollectionRequest::new(vec!["BTC-USD".into()], "7m", Duration::from_secs(1));
        assert!(req.validate(&ScriptedFeed::silent()).is_err());
    }

    #[test]
    fn empty_symbols_are_valid() {
        let req = CollectionRequest::new(Vec::new(), "1m", Duration::from_secs(1));
        assert!(req.validate(&ScriptedFeed::silent()).is_ok());
    }

    #[test]
    fn two_spellings_of_one_symbol_are_invalid() {
        let feed = crate::market_data::BinanceKlineFeed::default();
        let req = CollectionRequest::new(
            vec!["BTC-USDT".into(), "ETH-USDT".into(), "BTCUSDT".into()],
            "1m",
            Duration::from_secs(1),
        );
        match req.validate(&feed) {
            Err(CollectError::InvalidRequest(msg)) => {
                assert!(msg.contains("BTC-USDT") && msg.contains("BTCUSDT"));
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn repeated_identical_symbol_is_valid() {
        let feed = crate::market_data::BinanceKlineFeed::default();
        let req = CollectionRequest::new(
            vec!["BTC-USDT".into(), "BTC-USDT".into()],
            "1m",
            Duration::from_secs(1),
        );
        assert!(req.validate(&feed).is_ok());
    }

    #[test]
    fn first_event_policy_is_met_by_one_candle() {
        let s = session(&["A", "B"], CompletionPolicy::FirstEvent);
        assert!(!s.is_satisfied());
        s.on_event(candle("A", 0, 100.0, 101.0));
        assert!(s.is_satisfied());
    }

    #[test]
    fn every_symbol_policy_waits_for_all() {
        let s = session(&["A", "B"], CompletionPolicy::EverySymbol);
        s.on_event(candle("A", 0, 100.0, 101.0));
        s.on_event(candle("A", 1, 101.0, 102.0));
        assert!(!s.is_satisfied());
        s.on_event(candle("B", 0, 10.0, 11.0));
        assert!(s.is_satisfied());
    }

    #[test]
    fn full_timeout_policy_never_completes() {
        let s = session(&["A"], CompletionPolicy::FullTimeout);
        s.on_event(candle("A", 0, 100.0, 101.0));
        assert!(!s.is_satisfied());
        assert_eq!(s.buffer().len(), 1);
    }

    #[test]
    fn invalid_candle_does_not_count() {
        let s = session(&["A"], CompletionPolicy::FirstEvent);
        let mut bad = candle("A", 0, 100.0, 101.0);
        bad.high = 50.0;
        s.on_event(bad);
        assert!(!s.is_satisfied());
        assert!(s.buffer().is_empty());
    }

    #[test]
    fn phases_only_move_forward() {
        let s = session(&["A"], CompletionPolicy::FirstEvent);
        assert_eq!(s.phase(), Phase::Idle);
        s.advance(Phase::Starting);
        s.advance(Phase::Finalizing);
        s.advance(Phase::Streaming);
        assert_eq!(s.phase(), Phase::Finalizing);
        s.advance(Phase::Done);
        assert_eq!(s.phase(), Phase::Done);
    }
}
