// In-process feed double that replays a fixed script on the worker's loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};

use super::feed::{CandleFeed, CandleStream, Subscription};
use crate::types::CandleEvent;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Wait, then push the event.
    Emit(Duration, CandleEvent),
    /// Wait, then push a stream error.
    Fail(Duration, String),
    /// Block the worker thread outright, ignoring cancellation.
    Stall(Duration),
}

/// What happens once the script runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tail {
    Hang,
    End,
}

#[derive(Clone)]
pub(crate) struct ScriptedFeed {
    steps: Vec<Step>,
    tail: Tail,
    connect_error: Option<String>,
    subscriptions: Arc<AtomicUsize>,
}

impl ScriptedFeed {
    pub(crate) fn new(steps: Vec<Step>, tail: Tail) -> Self {
        Self {
            steps,
            tail,
            connect_error: None,
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A feed that connects and then never emits.
    pub(crate) fn silent() -> Self {
        Self::new(Vec::new(), Tail::Hang)
    }

    pub(crate) fn unreachable(reason: &str) -> Self {
        let mut feed = Self::silent();
        feed.connect_error = Some(reason.to_string());
        feed
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl CandleFeed for ScriptedFeed {
    fn supports_interval(&self, interval: &str) -> bool {
        matches!(interval, "1m" | "5m" | "1h" | "1d")
    }

    fn subscribe<'a>(&'a self, _subscription: &'a Subscription) -> BoxFuture<'a, Result<CandleStream>> {
        async move {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            if let Some(reason) = &self.connect_error {
                return Err(anyhow!("{reason}"));
            }

            let tail = self.tail;
            let script = stream::iter(self.steps.clone()).filter_map(|step| async move {
                match step {
                    Step::Emit(delay, event) => {
                        tokio::time::sleep(delay).await;
                        Some(Ok(event))
                    }
                    Step::Fail(delay, msg) => {
                        tokio::time::sleep(delay).await;
                        Some(Err(anyhow!(msg)))
                    }
                    Step::Stall(duration) => {
                        std::thread::sleep(duration);
                        None
                    }
                }
            });

            let stream: CandleStream = match tail {
                Tail::Hang => script.chain(stream::pending()).boxed(),
                Tail::End => script.boxed(),
            };
            Ok(stream)
        }
        .boxed()
    }
}

pub(crate) fn candle(symbol: &str, minute: i64, open: f64, close: f64) -> CandleEvent {
    CandleEvent {
        symbol: symbol.to_string(),
        interval: "1m".to_string(),
        open_time: 1_700_000_000_000 + minute * 60_000,
        close_time: 1_700_000_000_000 + minute * 60_000 + 59_999,
        open,
        high: open.max(close) + 1.0,
        low: open.min(close) - 1.0,
        close,
        volume: 10.0,
    }
}
