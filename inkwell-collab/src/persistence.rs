//! Writes live session text back to the store.
//!
//! Two triggers:
//! - the last connection leaving a session forces a flush before the
//!   session is closed ([`SessionRegistry::leave`]);
//! - a periodic task flushes every dirty session, drops buffered
//!   operations that waited too long, and closes idle sessions whose
//!   final flush failed earlier.
//!
//! A session is dirty while its replica version is ahead of the last
//! version written successfully. Failed writes leave it dirty, so the next
//! cycle retries them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::session::{blocking, Session, SessionRegistry};
use crate::storage::{StoreError, TextStore};

#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Time between periodic flush cycles.
    pub interval: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl FlushConfig {
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to write.
    Clean,
    Flushed { version: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct FlushStats {
    pub flushes: u64,
    pub failures: u64,
    pub skipped_clean: u64,
}

/// Totals of one periodic cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub flushed: usize,
    pub failed: usize,
    pub pruned: usize,
    pub evicted: usize,
}

pub struct PersistenceCoordinator {
    store: Arc<dyn TextStore>,
    flushes: AtomicU64,
    failures: AtomicU64,
    skipped_clean: AtomicU64,
}

impl PersistenceCoordinator {
    pub fn new(store: Arc<dyn TextStore>) -> Self {
        Self {
            store,
            flushes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            skipped_clean: AtomicU64::new(0),
        }
    }

    /// Write the session's current text if it is dirty.
    pub async fn flush(&self, session: &Session) -> Result<FlushOutcome, StoreError> {
        let Some((text, version)) = session.flush_snapshot() else {
            self.skipped_clean.fetch_add(1, Ordering::Relaxed);
            return Ok(FlushOutcome::Clean);
        };

        let store = self.store.clone();
        let document_id = session.document_id();
        let size = text.len();
        match blocking(move || store.commit_document_text(document_id, &text, version)).await {
            Ok(()) => {
                session.mark_persisted(version);
                self.flushes.fetch_add(1, Ordering::Relaxed);
                log::debug!("Flushed document {document_id} at version {version} ({size} bytes)");
                Ok(FlushOutcome::Flushed { version })
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> FlushStats {
        FlushStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped_clean: self.skipped_clean.load(Ordering::Relaxed),
        }
    }
}

/// One pass of the periodic flusher.
pub async fn run_cycle(registry: &SessionRegistry) -> CycleReport {
    let mut report = CycleReport::default();
    let now = Instant::now();

    for session in registry.sessions().await {
        let document_id = session.document_id();
        report.pruned += session.lock_engine().prune_pending(now);

        if session.connection_count() == 0 {
            if registry.evict_if_idle(document_id).await {
                report.evicted += 1;
            } else {
                report.failed += 1;
            }
            continue;
        }

        match registry.persistence().flush(&session).await {
            Ok(FlushOutcome::Flushed { .. }) => report.flushed += 1,
            Ok(FlushOutcome::Clean) => {}
            Err(e) => {
                log::warn!("Periodic flush of document {document_id} failed: {e}");
                report.failed += 1;
            }
        }
    }

    if report != CycleReport::default() {
        log::debug!("Flush cycle: {report:?}");
    }
    report
}

/// Run [`run_cycle`] every `config.interval` until `shutdown` flips to `true`.
pub fn spawn_periodic(
    registry: Arc<SessionRegistry>,
    config: &FlushConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = config.interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_cycle(&registry).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::debug!("Periodic flusher stopped");
    })
}
