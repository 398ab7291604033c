// =============================================================================
// Collection Worker - isolated thread that drives the feed
// =============================================================================
//
// Each run gets its own OS thread with its own single-threaded tokio runtime.
// The feed's connection, stream and any tasks it spawns live on that runtime
// and never touch the caller's executor.  Termination is forced: a kill
// signal wins the `select!` against the feed loop, the loop future is dropped
// mid-await, and the runtime is torn down without waiting for stragglers.
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::session::{CollectionSession, Phase};
use crate::market_data::CandleFeed;

/// How the worker's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// The completion policy was met.
    Satisfied,
    /// The feed stream returned `None`.
    StreamEnded,
    /// The feed stream yielded an error, or the worker died without reporting.
    StreamFailed(String),
    /// `subscribe` failed.
    ConnectFailed(String),
    /// The controller's kill signal fired first.
    Killed,
}

/// Decrements the live-worker count when the worker thread finishes,
/// including by panic.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Controller-side handle of a running worker.
pub(crate) struct Worker {
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: oneshot::Receiver<WorkerExit>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        feed: Arc<dyn CandleFeed>,
        session: Arc<CollectionSession>,
        live: Arc<AtomicUsize>,
    ) -> std::io::Result<Self> {
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel::<WorkerExit>();
        let guard = LiveGuard::enter(live);
        let name = format!("snapshot-worker-{}", &session.id().simple().to_string()[..8]);

        let thread = thread::Builder::new().name(name).spawn(move || {
            let exit = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => {
                    let exit = rt.block_on(async {
                        tokio::select! {
                            biased;
                            _ = kill_rx => WorkerExit::Killed,
                            exit = drive(feed.as_ref(), &session) => exit,
                        }
                    });
                    rt.shutdown_background();
                    exit
                }
                Err(e) => WorkerExit::ConnectFailed(format!("failed to build worker runtime: {e}")),
            };

            debug!(session = %session.id(), exit = ?exit, "worker stopped");
            // Report only once the worker no longer counts as live.
            drop(guard);
            let _ = exit_tx.send(exit);
        })?;

        Ok(Self {
            kill_tx: Some(kill_tx),
            exit_rx,
            thread: Some(thread),
        })
    }

    /// Wait for the worker to report its exit.  Cancel-safe; must not be
    /// awaited again after it has returned.
    pub(crate) async fn wait(&mut self) -> WorkerExit {
        match (&mut self.exit_rx).await {
            Ok(exit) => exit,
            Err(_) => WorkerExit::StreamFailed("worker exited without reporting".into()),
        }
    }

    pub(crate) fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Reap a worker that has already reported its exit.  The thread join
    /// runs on the blocking pool so the caller's executor keeps polling.
    pub(crate) async fn join(mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!("collection worker panicked"),
            Err(e) => error!(error = %e, "failed to reap collection worker"),
        }
    }

    /// Give up on a worker that ignores the kill signal.
    pub(crate) fn detach(mut self) {
        if let Some(handle) = self.thread.take() {
            warn!(thread = ?handle.thread().name(), "detaching unresponsive collection worker");
        }
    }
}

/// The worker's event loop: subscribe, then pump events into the session's
/// callback until the policy is met or the stream stops.
async fn drive(feed: &dyn CandleFeed, session: &CollectionSession) -> WorkerExit {
    let mut stream = match feed.subscribe(session.subscription()).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(session = %session.id(), error = %format!("{e:#}"), "feed subscription failed");
            return WorkerExit::ConnectFailed(format!("{e:#}"));
        }
    };

    session.advance(Phase::Streaming);
    info!(
        session = %session.id(),
        symbols = session.request().symbols.len(),
        interval = %session.request().interval,
        "streaming candles"
    );

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => session.on_event(event),
            Err(e) => {
                error!(session = %session.id(), error = %format!("{e:#}"), "candle stream failed");
                return WorkerExit::StreamFailed(format!("{e:#}"));
            }
        }
        if session.is_satisfied() {
            return WorkerExit::Satisfied;
        }
    }

    warn!(session = %session.id(), "candle stream ended");
    WorkerExit::StreamEnded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectionRequest;
    use crate::market_data::scripted::{candle, ScriptedFeed, Step, Tail};
    use crate::types::CompletionPolicy;
    use std::time::Duration;

    fn session() -> Arc<CollectionSession> {
        let request = CollectionRequest::new(vec!["A".into()], "1m", Duration::from_secs(5));
        Arc::new(CollectionSession::new(request, CompletionPolicy::FirstEvent))
    }

    #[tokio::test]
    async fn finished_worker_is_reaped_without_blocking_the_executor() {
        let feed = ScriptedFeed::new(
            vec![Step::Emit(Duration::from_millis(10), candle("A", 0, 100.0, 101.0))],
            Tail::End,
        );
        let live = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::spawn(Arc::new(feed), session(), live.clone()).unwrap();

        assert_eq!(worker.wait().await, WorkerExit::Satisfied);

        // A sibling task on this single-threaded runtime still gets polled
        // while the join is in flight.
        let ticker = tokio::spawn(async { tokio::task::yield_now().await });
        tokio::time::timeout(Duration::from_secs(1), worker.join())
            .await
            .expect("join should finish promptly");
        ticker.await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn killed_worker_reports_killed() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::spawn(Arc::new(ScriptedFeed::silent()), session(), live.clone()).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);

        worker.kill();
        assert_eq!(worker.wait().await, WorkerExit::Killed);
        worker.join().await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
