use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use serde::Serialize;
use shared::domain::VotingSession;
use tokio::{
    sync::{Notify, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    aggregate::{aggregate, VoteResult},
    config::DEFAULT_POLL_INTERVAL,
    error::ClientResult,
    session_resolver::SessionResolver,
    transport::VotingApi,
};

pub const LIVE_RESULTS_HEADING: &str = "Live results";
pub const LAST_RESULTS_HEADING: &str = "Last session results";
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsMode {
    /// Counts for the running session, laid out against its options.
    Live,
    /// The most recent closed session's counts.
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsSnapshot {
    pub mode: ResultsMode,
    pub heading: String,
    pub session: Option<VotingSession>,
    pub results: Vec<VoteResult>,
    pub total_votes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ResultsBoard {
    pub snapshot: Option<ResultsSnapshot>,
    pub is_loading: bool,
    pub error_message: Option<String>,
}

struct PollHandle {
    generation: u64,
    // Never aborted: a stopped loop finishes its in-flight refresh and exits on its own.
    _task: JoinHandle<()>,
}

struct PollerShared {
    api: Arc<dyn VotingApi>,
    resolver: SessionResolver,
    board: RwLock<ResultsBoard>,
    generation: AtomicU64,
    /// Refreshes currently awaiting the server, keyed by the generation that issued them.
    in_flight: Mutex<HashMap<u64, usize>>,
    stopped: Notify,
}

struct InFlight<'a> {
    counts: &'a Mutex<HashMap<u64, usize>>,
    generation: u64,
}

impl<'a> InFlight<'a> {
    fn enter(counts: &'a Mutex<HashMap<u64, usize>>, generation: u64) -> Self {
        *counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(generation)
            .or_insert(0) += 1;
        Self { counts, generation }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(&self.generation) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.generation);
            }
        }
    }
}

impl PollerShared {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a refresh issued under `generation` is still awaiting the server. Refreshes
    /// left over from a stopped generation do not count.
    fn is_refreshing(&self, generation: u64) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&generation)
    }

    async fn run(self: Arc<Self>, generation: u64, interval: Duration) {
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stopped.notified() => break,
            }
            if self.current_generation() != generation {
                break;
            }
            if self.is_refreshing(generation) {
                debug!(generation, "poller: refresh still in flight, skipping tick");
                continue;
            }
            let _ = self.refresh_tagged(generation, false).await;
            if self.current_generation() != generation {
                break;
            }
        }
        debug!(generation, "poller: loop exited");
    }

    /// Runs one refresh and applies it only if no stop/start happened meanwhile.
    async fn refresh_tagged(&self, generation: u64, force_session: bool) -> ClientResult<bool> {
        let outcome = {
            let _in_flight = InFlight::enter(&self.in_flight, generation);
            if self.current_generation() == generation {
                self.board.write().await.is_loading = true;
            }
            self.build_snapshot(force_session).await
        };

        let mut board = self.board.write().await;
        let current = self.current_generation();
        board.is_loading = self.is_refreshing(current);
        if current != generation {
            debug!(generation, current, "poller: discarding stale refresh");
            return Ok(false);
        }
        match outcome {
            Ok(snapshot) => {
                board.snapshot = Some(snapshot);
                board.error_message = None;
                Ok(true)
            }
            Err(err) => {
                warn!("poller: refresh failed: {err}");
                board.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn build_snapshot(&self, force_session: bool) -> ClientResult<ResultsSnapshot> {
        let session = self.resolver.resolve_active_session(force_session).await?;
        match session {
            Some(session) if session.is_active() => {
                let raw = self.api.live_results().await?;
                let heading = if session.title.is_empty() {
                    LIVE_RESULTS_HEADING.to_string()
                } else {
                    session.title.clone()
                };
                Ok(ResultsSnapshot {
                    mode: ResultsMode::Live,
                    heading,
                    results: aggregate(Some(&session.options), raw.as_ref()),
                    total_votes: raw.as_ref().map(|raw| raw.total()).unwrap_or(0),
                    session: Some(session),
                })
            }
            other => {
                let raw = self.api.latest_final_results().await?;
                let heading = match other.as_ref().filter(|s| !s.title.is_empty()) {
                    Some(closed) => format!("{} (final results)", closed.title),
                    None => LAST_RESULTS_HEADING.to_string(),
                };
                Ok(ResultsSnapshot {
                    mode: ResultsMode::Final,
                    heading,
                    results: aggregate(None, raw.as_ref()),
                    total_votes: raw.as_ref().map(|raw| raw.total()).unwrap_or(0),
                    session: other,
                })
            }
        }
    }
}

/// Keeps the results board fresh on a fixed interval.
///
/// `start` and `stop` are idempotent. Every start/stop bumps a generation counter; a refresh
/// that completes under an older generation is dropped, so a response arriving after `stop`
/// never overwrites what a later start produced.
pub struct ResultsPoller {
    shared: Arc<PollerShared>,
    handle: Mutex<Option<PollHandle>>,
    interval: Mutex<Duration>,
}

impl ResultsPoller {
    pub fn new(api: Arc<dyn VotingApi>) -> Self {
        Self::with_interval(api, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(api: Arc<dyn VotingApi>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                resolver: SessionResolver::new(Arc::clone(&api)),
                api,
                board: RwLock::new(ResultsBoard::default()),
                generation: AtomicU64::new(0),
                in_flight: Mutex::new(HashMap::new()),
                stopped: Notify::new(),
            }),
            handle: Mutex::new(None),
            interval: Mutex::new(interval),
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| handle.generation == self.shared.current_generation())
    }

    /// Refreshes immediately, then every `interval`. No-op if already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return false;
        }
        *self.interval.lock().unwrap_or_else(PoisonError::into_inner) = interval;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let task = tokio::spawn(Arc::clone(&self.shared).run(generation, interval));
        *handle = Some(PollHandle {
            generation,
            _task: task,
        });
        info!(generation, interval_ms = interval.as_millis() as u64, "poller: started");
        true
    }

    /// Starts with the last interval used, or the default.
    pub fn restart(&self) -> bool {
        self.start(self.interval())
    }

    /// Cancels future ticks. An in-flight refresh is not aborted; its result is discarded.
    pub fn stop(&self) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = handle.take() else {
            return false;
        };
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.stopped.notify_waiters();
        info!(stopped = previous.generation, generation, "poller: stopped");
        true
    }

    /// Refreshes now, using the cached session if there is one. Never skipped for overlap.
    pub async fn refresh(&self) -> ClientResult<bool> {
        let generation = self.shared.current_generation();
        self.shared.refresh_tagged(generation, false).await
    }

    /// Refreshes now after re-resolving the active session from the server.
    pub async fn refresh_forced(&self) -> ClientResult<bool> {
        let generation = self.shared.current_generation();
        self.shared.refresh_tagged(generation, true).await
    }

    /// Forgets the cached session so the next refresh resolves it again.
    pub async fn invalidate_session(&self) {
        self.shared.resolver.invalidate().await;
    }

    pub async fn board(&self) -> ResultsBoard {
        self.shared.board.read().await.clone()
    }

    pub async fn snapshot(&self) -> Option<ResultsSnapshot> {
        self.shared.board.read().await.snapshot.clone()
    }
}

impl Drop for ResultsPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
