//! Session-owned polling state: the snapshot source, the single-flight
//! guard and the most recent completed snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::collector::SnapshotSource;
use super::snapshot::SystemSnapshot;

/// Result of asking for a fresh poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Fresh(Arc<SystemSnapshot>),
    /// Another poll was still running; carries the last completed one.
    Skipped(Arc<SystemSnapshot>),
}

impl PollOutcome {
    pub fn snapshot(&self) -> &Arc<SystemSnapshot> {
        match self {
            PollOutcome::Fresh(s) | PollOutcome::Skipped(s) => s,
        }
    }

    pub fn into_snapshot(self) -> Arc<SystemSnapshot> {
        match self {
            PollOutcome::Fresh(s) | PollOutcome::Skipped(s) => s,
        }
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self, PollOutcome::Skipped(_))
    }
}

/// Clears the in-flight flag when the poll finishes, panics included.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct Telemetry {
    source: Arc<Mutex<Box<dyn SnapshotSource>>>,
    in_flight: Arc<AtomicBool>,
    last: Arc<RwLock<Arc<SystemSnapshot>>>,
}

impl Telemetry {
    /// Takes an initial blocking sample so a snapshot is always available.
    pub fn new(mut source: Box<dyn SnapshotSource>) -> Self {
        let first = Arc::new(source.sample());
        Telemetry {
            source: Arc::new(Mutex::new(source)),
            in_flight: Arc::new(AtomicBool::new(false)),
            last: Arc::new(RwLock::new(first)),
        }
    }

    pub fn latest(&self) -> Arc<SystemSnapshot> {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Sample on a blocking worker unless a poll is already running.
    pub async fn poll(&self) -> PollOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("poll already in flight, skipping");
            return PollOutcome::Skipped(self.latest());
        }
        let guard = InFlight(self.in_flight.clone());

        let source = self.source.clone();
        let sampled = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);
            source.sample()
        })
        .await;

        match sampled {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.last.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
                PollOutcome::Fresh(snapshot)
            }
            Err(err) => {
                tracing::error!(%err, "snapshot worker failed");
                PollOutcome::Skipped(self.latest())
            }
        }
    }
}
