//! # Telemetry Reporter Module
//!
//! Periodic snapshot reporting to a request/reply collector.
//!
//! This module handles:
//! - The `Idle`/`Running` state machine behind `start` and `stop`
//! - One background worker per running cycle, owning the cycle's session
//! - Snapshot → JSON → exchange on every tick, strictly one at a time
//! - Replacing a session that timed out or failed, on the next tick
//! - Independent one-shot sends on their own short-lived session
//! - Reporting every attempt to an [`OutcomeObserver`]
//!
//! ## Tick Flow
//!
//! ```text
//! timer ─► snapshot? ──none──► Outcome(SnapshotUnavailable)
//!              │
//!              └─some─► session usable? ──no──► close + reopen ──fail──► Outcome(Connect)
//!                             │                       │
//!                             └─yes───────────────────┴─► exchange ─► Outcome(reply | Timeout | Transport)
//! ```
//!
//! The timer is re-armed only after a tick body finishes, so a slow collector
//! delays later ticks instead of overlapping with them. Missed ticks are
//! skipped, never queued. A panic in the snapshot source or the session is
//! caught and reported as that tick's failure.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, Result, TelemetryError};
use crate::snapshot::source::SnapshotSource;
use crate::snapshot::DeviceSnapshot;
use crate::transport::{Connector, Session};

pub mod outcome;

pub use outcome::{
    ChannelObserver, FanoutObserver, LogObserver, Origin, Outcome, OutcomeObserver,
    OutcomeReport,
};

/// Per-exchange timeout used unless configured otherwise
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reporter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    Idle,
    Running,
}

/// Result of a `start` call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of a `stop` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyIdle,
}

/// Most recent attempt, for "last send failed: <kind>" style displays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastOutcome {
    pub origin: Origin,
    pub at: DateTime<Utc>,
    pub failure: Option<FailureKind>,
}

/// Point-in-time view of the reporter
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterStatus {
    pub state: ReporterState,
    pub endpoint: Option<String>,
    pub interval: Option<Duration>,

    /// Periodic ticks processed, across all cycles
    pub ticks: u64,
    pub successes: u64,
    pub failures: u64,

    /// Attempts skipped because no snapshot was available
    pub unavailable: u64,
    pub last: Option<LastOutcome>,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: u64,
    successes: u64,
    failures: u64,
    unavailable: u64,
    last: Option<LastOutcome>,
}

/// Observer plus counters; shared by the reporter and its worker
#[derive(Clone)]
struct Reporting {
    observer: Arc<dyn OutcomeObserver>,
    counters: Arc<Mutex<Counters>>,
}

impl Reporting {
    fn report(&self, outcome: &Outcome) {
        {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(outcome.origin, Origin::Periodic { .. }) {
                counters.ticks += 1;
            }
            match outcome.failure_kind() {
                None => counters.successes += 1,
                Some(FailureKind::SnapshotUnavailable) => counters.unavailable += 1,
                Some(_) => counters.failures += 1,
            }
            counters.last = Some(LastOutcome {
                origin: outcome.origin,
                at: outcome.at,
                failure: outcome.failure_kind(),
            });
        }

        let delivered =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.observer.on_outcome(outcome)));
        if let Err(panic) = delivered {
            error!(
                "Outcome observer panicked on {}: {}",
                outcome.origin,
                panic_message(&*panic)
            );
        }
    }
}

/// Text of a caught panic payload
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ask `source` for a snapshot, turning a panic into `Source`
async fn fetch_snapshot(source: &dyn SnapshotSource) -> Result<DeviceSnapshot> {
    match AssertUnwindSafe(async { source.snapshot().await })
        .catch_unwind()
        .await
    {
        Ok(Some(snapshot)) => Ok(snapshot),
        Ok(None) => Err(TelemetryError::SnapshotUnavailable),
        Err(panic) => Err(TelemetryError::Source(panic_message(&*panic))),
    }
}

/// State held while `Running`; dropping it stops the worker
struct RunningJob {
    endpoint: String,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Periodic telemetry reporter
///
/// Owns at most one worker and one periodic session at a time. `start` and
/// `stop` are serialized through an async mutex, so concurrent callers never
/// observe interleaved transitions. `state` and `status` only read the job
/// slot and never wait on a transition in progress.
pub struct TelemetryReporter {
    source: Arc<dyn SnapshotSource>,
    connector: Arc<dyn Connector>,
    reporting: Reporting,
    exchange_timeout: Duration,
    transition: tokio::sync::Mutex<()>,
    job: Mutex<Option<RunningJob>>,
}

impl TelemetryReporter {
    /// Create an idle reporter
    ///
    /// # Arguments
    ///
    /// * `source` - Produces a snapshot for each attempt
    /// * `connector` - Opens sessions to the collector
    /// * `observer` - Receives one outcome per tick or one-shot send
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        connector: Arc<dyn Connector>,
        observer: Arc<dyn OutcomeObserver>,
    ) -> Self {
        Self {
            source,
            connector,
            reporting: Reporting {
                observer,
                counters: Arc::new(Mutex::new(Counters::default())),
            },
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            transition: tokio::sync::Mutex::new(()),
            job: Mutex::new(None),
        }
    }

    /// Set the per-exchange reply timeout
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout
    }

    /// Job slot, with a worker that ended on its own cleared out
    fn job_slot(&self) -> MutexGuard<'_, Option<RunningJob>> {
        let mut job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        if job.as_ref().is_some_and(|j| j.worker.is_finished()) {
            if let Some(dead) = job.take() {
                error!("Reporter worker for {} ended unexpectedly", dead.endpoint);
            }
        }
        job
    }

    /// Start periodic reporting
    ///
    /// Opens one session to `endpoint` and spawns the worker. The first tick
    /// fires immediately, then every `interval`.
    ///
    /// # Returns
    ///
    /// * `Started` - Now running
    /// * `AlreadyRunning` - Nothing changed; no second timer or session
    ///
    /// # Errors
    ///
    /// - `InvalidSetting` if `interval` or the exchange timeout is zero
    /// - `Connect` if the session cannot be opened; state stays `Idle`
    pub async fn start(&self, interval: Duration, endpoint: &str) -> Result<StartOutcome> {
        if interval.is_zero() {
            return Err(TelemetryError::InvalidSetting(
                "interval must be greater than 0".to_string(),
            ));
        }
        if self.exchange_timeout.is_zero() {
            return Err(TelemetryError::InvalidSetting(
                "exchange timeout must be greater than 0".to_string(),
            ));
        }

        let _transition = self.transition.lock().await;
        let running = self.job_slot().as_ref().map(|j| j.endpoint.clone());
        if let Some(running) = running {
            info!("Reporter already running against {}", running);
            return Ok(StartOutcome::AlreadyRunning);
        }

        let session = match self.connector.open(endpoint).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to start reporter: {}", e);
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            source: self.source.clone(),
            connector: self.connector.clone(),
            endpoint: endpoint.to_string(),
            session: Some(session),
            reporting: self.reporting.clone(),
            interval,
            exchange_timeout: self.exchange_timeout,
            shutdown: shutdown_rx,
        };

        *self.job_slot() = Some(RunningJob {
            endpoint: endpoint.to_string(),
            interval,
            shutdown: shutdown_tx,
            worker: tokio::spawn(worker.run()),
        });

        info!("Reporter started: every {:?} to {}", interval, endpoint);
        Ok(StartOutcome::Started)
    }

    /// Stop periodic reporting
    ///
    /// Future ticks are cancelled immediately. A tick already exchanging is
    /// allowed to finish or time out, then the session is closed. The reporter
    /// reads as `Idle` from the moment the stop begins.
    pub async fn stop(&self) -> StopOutcome {
        let _transition = self.transition.lock().await;
        let Some(running) = self.job_slot().take() else {
            debug!("Stop requested while idle");
            return StopOutcome::AlreadyIdle;
        };

        // Worker exits on either a `true` or a dropped sender
        let _ = running.shutdown.send(true);
        if let Err(e) = running.worker.await {
            error!("Reporter worker ended abnormally: {}", e);
        }

        info!("Reporter stopped");
        StopOutcome::Stopped
    }

    /// Send one snapshot on a dedicated short-lived session
    ///
    /// Independent of the periodic state machine; never touches the running
    /// cycle's session. The outcome goes to the observer and is returned.
    pub async fn send_once(&self, endpoint: &str) -> Result<Bytes> {
        let result = self.one_shot(endpoint).await;
        let outcome = Outcome::new(Origin::OneShot, result);
        self.reporting.report(&outcome);
        outcome.result
    }

    async fn one_shot(&self, endpoint: &str) -> Result<Bytes> {
        let snapshot = fetch_snapshot(self.source.as_ref()).await?;

        let mut session = self.connector.open(endpoint).await?;
        let result = deliver(session.as_mut(), &snapshot, self.exchange_timeout).await;
        session.close().await;
        result
    }

    pub async fn state(&self) -> ReporterState {
        if self.job_slot().is_some() {
            ReporterState::Running
        } else {
            ReporterState::Idle
        }
    }

    pub async fn status(&self) -> ReporterStatus {
        let (state, endpoint, interval) = match self.job_slot().as_ref() {
            Some(job) => (ReporterState::Running, Some(job.endpoint.clone()), Some(job.interval)),
            None => (ReporterState::Idle, None, None),
        };
        let counters = self.reporting.counters.lock().unwrap_or_else(PoisonError::into_inner);

        ReporterStatus {
            state,
            endpoint,
            interval,
            ticks: counters.ticks,
            successes: counters.successes,
            failures: counters.failures,
            unavailable: counters.unavailable,
            last: counters.last,
        }
    }
}

/// Encode a snapshot and exchange it on `session`
async fn deliver(
    session: &mut dyn Session,
    snapshot: &DeviceSnapshot,
    timeout: Duration,
) -> Result<Bytes> {
    let payload = snapshot.to_payload()?;
    debug!(
        "Sending snapshot taken at {} ({} bytes, {} cells) to {}",
        snapshot.timestamp_millis(),
        payload.len(),
        snapshot.cell_measurements().len(),
        session.endpoint()
    );
    session.exchange(&payload, timeout).await
}

/// Background task of one running cycle
struct Worker {
    source: Arc<dyn SnapshotSource>,
    connector: Arc<dyn Connector>,
    endpoint: String,

    /// `None` after a failed reopen; the next tick tries again
    session: Option<Box<dyn Session>>,
    reporting: Reporting,
    interval: Duration,
    exchange_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            tick += 1;

            let fetch = fetch_snapshot(self.source.as_ref());
            let snapshot = tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    debug!("Tick {} cancelled before exchange", tick);
                    break;
                }
                snapshot = fetch => snapshot,
            };

            let result = match snapshot {
                Ok(snapshot) => self.send(&snapshot).await,
                Err(e) => Err(e),
            };

            match &result {
                Ok(_) => {}
                Err(TelemetryError::SnapshotUnavailable) => debug!("Tick {}: no data", tick),
                Err(e) => warn!("Tick {} failed: {}", tick, e),
            }

            self.reporting
                .report(&Outcome::new(Origin::Periodic { tick }, result));
        }

        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        debug!("Reporter worker exited after {} ticks", tick);
    }

    /// Deliver on the cycle's session, replacing it first if unusable
    async fn send(&mut self, snapshot: &DeviceSnapshot) -> Result<Bytes> {
        let timeout = self.exchange_timeout;
        let session = self.usable_session().await?;

        let delivered = AssertUnwindSafe(deliver(session.as_mut(), snapshot, timeout))
            .catch_unwind()
            .await;
        match delivered {
            Ok(result) => result,
            Err(panic) => {
                // Session state is unknown after a panic; drop it
                self.session = None;
                Err(TelemetryError::Transport(format!(
                    "session panicked: {}",
                    panic_message(&*panic)
                )))
            }
        }
    }

    /// Current session, or a fresh one if the current one is unusable
    ///
    /// The stale session is closed before the new one is opened, so at most
    /// one session per cycle is ever open.
    async fn usable_session(&mut self) -> Result<&mut Box<dyn Session>> {
        if matches!(&self.session, Some(session) if !session.is_usable()) {
            if let Some(mut stale) = self.session.take() {
                stale.close().await;
            }
        }

        let session = match self.session.take() {
            Some(session) => session,
            None => {
                info!("Reopening session to {}", self.endpoint);
                self.connector.open(&self.endpoint).await?
            }
        };
        Ok(self.session.insert(session))
    }
}
