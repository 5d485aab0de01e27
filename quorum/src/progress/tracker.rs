//! Session → snapshot store with single-subscriber fan-out
//!
//! All mutation goes through one mutex, and events are pushed to the
//! subscriber while it is held, so a subscriber sees updates in exactly the
//! order `update` was called. `begin` checks and claims a session under the
//! same lock, so two runs never share a session id. Sends are unbounded and never block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::stream::ProgressSubscription;
use super::{ProgressEvent, ProgressSnapshot, SessionStatus};
use crate::config::ProgressConfig;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl Subscriber {
    /// False once the receiving side is gone.
    fn send(&self, event: ProgressEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

struct SessionEntry {
    snapshot: Option<ProgressSnapshot>,
    touched: Instant,
    /// Bumped on every update; a scheduled removal only fires if unchanged.
    seq: u64,
    subscriber: Option<Subscriber>,
}

impl SessionEntry {
    fn empty(now: Instant) -> Self {
        Self {
            snapshot: None,
            touched: now,
            seq: 0,
            subscriber: None,
        }
    }
}

struct TrackerInner {
    config: ProgressConfig,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_subscriber_id: AtomicU64,
}

/// Cheap to clone; all clones share one session map.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                sessions: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.inner.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop sessions idle for longer than `evict_after`.
    fn sweep(&self, sessions: &mut HashMap<String, SessionEntry>, now: Instant) {
        let evict_after = self.inner.config.evict_after();
        let before = sessions.len();
        sessions.retain(|_, entry| now.saturating_duration_since(entry.touched) < evict_after);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle progress sessions");
        }
    }

    /// Claim `session_id` for a new run and publish its initial `verifying`
    /// snapshot at zero. Returns false, changing nothing, while a stored
    /// snapshot is still non-terminal, however stale it is.
    pub fn begin(&self, session_id: &str, total_units: usize) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions();
        self.sweep(&mut sessions, now);

        let running = sessions
            .get(session_id)
            .and_then(|e| e.snapshot.as_ref())
            .is_some_and(|s| !s.step.is_terminal());
        if running {
            debug!(session_id, "Session already running");
            return false;
        }

        let snapshot = ProgressSnapshot::verifying(session_id, 0, total_units);
        self.store(&mut sessions, session_id, snapshot, now);
        true
    }

    /// Store `snapshot` as the session's latest state and push it to the
    /// subscriber, if any. Terminal steps also schedule session removal.
    pub fn update(&self, session_id: &str, snapshot: ProgressSnapshot) {
        let now = Instant::now();
        let mut sessions = self.sessions();
        self.sweep(&mut sessions, now);

        let step = snapshot.step;
        let removal = self.store(&mut sessions, session_id, snapshot, now);
        drop(sessions);

        if let Some(seq) = removal {
            info!(session_id, %step, "Session reached terminal step");
            self.schedule_removal(session_id, seq);
        }
    }

    /// Write and publish under the caller's lock. Returns the entry's `seq`
    /// when the snapshot is terminal.
    fn store(
        &self,
        sessions: &mut HashMap<String, SessionEntry>,
        session_id: &str,
        snapshot: ProgressSnapshot,
        now: Instant,
    ) -> Option<u64> {
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::empty(now));
        entry.seq += 1;
        entry.touched = now;

        let terminal = ProgressEvent::terminal(&snapshot);
        let delivered = match &entry.subscriber {
            Some(sub) => {
                sub.send(ProgressEvent::Progress(snapshot.clone()))
                    && terminal.clone().map_or(true, |event| sub.send(event))
            }
            None => true,
        };
        if !delivered {
            debug!(session_id, "Subscriber gone, dropping");
            entry.subscriber = None;
        }

        entry.snapshot = Some(snapshot);
        terminal.map(|_| entry.seq)
    }

    fn schedule_removal(&self, session_id: &str, seq: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime: the idle sweep will collect it instead.
            return;
        };
        let tracker = self.clone();
        let session_id = session_id.to_string();
        let grace = self.inner.config.completion_grace();
        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            let mut sessions = tracker.sessions();
            if sessions.get(&session_id).is_some_and(|e| e.seq == seq) {
                sessions.remove(&session_id);
                debug!(session_id = %session_id, "Removed completed session");
            }
        });
    }

    /// Open a live subscription. The stream starts with `connected`, then the
    /// stored snapshot (if any), then every later update. Replaces any
    /// previous subscriber for the session, ending its stream.
    pub fn subscribe(&self, session_id: &str) -> ProgressSubscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();

        let mut sessions = self.sessions();
        self.sweep(&mut sessions, now);
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::empty(now));

        // Receiver is alive, so these cannot fail.
        let _ = tx.send(ProgressEvent::connected(session_id));
        if let Some(snapshot) = &entry.snapshot {
            let _ = tx.send(ProgressEvent::Progress(snapshot.clone()));
            if let Some(event) = ProgressEvent::terminal(snapshot) {
                let _ = tx.send(event);
            }
        }

        if entry.subscriber.replace(Subscriber { id, tx }).is_some() {
            debug!(session_id, "Replaced existing subscriber");
        }
        drop(sessions);

        ProgressSubscription::new(session_id, id, rx, self.clone(), self.inner.config.keepalive())
    }

    /// Detach subscriber `id` if it is still the current one.
    pub(crate) fn unsubscribe(&self, session_id: &str, id: u64) {
        let mut sessions = self.sessions();
        let Some(entry) = sessions.get_mut(session_id) else {
            return;
        };
        if entry.subscriber.as_ref().is_some_and(|s| s.id == id) {
            entry.subscriber = None;
            debug!(session_id, "Subscriber disconnected");
            // Subscribed but never updated: nothing left to keep.
            if entry.snapshot.is_none() {
                sessions.remove(session_id);
            }
        }
    }

    /// Non-streaming read. `None` if the session has no snapshot.
    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        let now = Instant::now();
        let mut sessions = self.sessions();
        self.sweep(&mut sessions, now);

        let entry = sessions.get(session_id)?;
        let snapshot = entry.snapshot.as_ref()?;
        let is_expired =
            now.saturating_duration_since(entry.touched) >= self.inner.config.stale_after();

        Some(SessionStatus {
            is_processing: !is_expired && !snapshot.step.is_terminal(),
            progress: snapshot.progress,
            current_step: snapshot.step,
            completed_units: snapshot.completed_units,
            total_units: snapshot.total_units,
            last_update: snapshot.timestamp,
            is_expired,
        })
    }

    /// Latest stored snapshot, if any.
    pub fn snapshot(&self, session_id: &str) -> Option<ProgressSnapshot> {
        self.sessions()
            .get(session_id)
            .and_then(|e| e.snapshot.clone())
    }

    pub fn has_subscriber(&self, session_id: &str) -> bool {
        self.sessions()
            .get(session_id)
            .is_some_and(|e| e.subscriber.is_some())
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Forget a session immediately, ending any live subscription.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions().remove(session_id).is_some()
    }

    /// How long a terminal session lingers before removal.
    pub fn completion_grace(&self) -> Duration {
        self.inner.config.completion_grace()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}
