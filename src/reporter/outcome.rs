//! Per-attempt outcomes and the observers that receive them

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{FailureKind, Result};

/// What triggered an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Periodic tick, numbered from 1 within one start/stop cycle
    Periodic { tick: u64 },

    /// Explicit send-once request
    OneShot,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Periodic { tick } => write!(f, "tick {}", tick),
            Origin::OneShot => f.write_str("one-shot"),
        }
    }
}

/// Result of one tick or one-shot attempt
///
/// A failed attempt always carries its typed error, so callers can tell
/// "no data" apart from a timeout or a dropped connection.
#[derive(Debug)]
pub struct Outcome {
    pub origin: Origin,
    pub at: DateTime<Utc>,
    pub result: Result<Bytes>,
}

impl Outcome {
    pub fn new(origin: Origin, result: Result<Bytes>) -> Self {
        Self {
            origin,
            at: Utc::now(),
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Collector reply, if the exchange succeeded
    pub fn reply(&self) -> Option<&Bytes> {
        self.result.as_ref().ok()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.result.as_ref().err().map(|e| e.kind())
    }
}

/// Receives one call per attempt
pub trait OutcomeObserver: Send + Sync {
    fn on_outcome(&self, outcome: &Outcome);
}

/// Writes outcomes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl OutcomeObserver for LogObserver {
    fn on_outcome(&self, outcome: &Outcome) {
        match &outcome.result {
            Ok(reply) => info!(
                "{}: collector replied: {}",
                outcome.origin,
                String::from_utf8_lossy(reply)
            ),
            Err(e) => warn!("{}: send failed ({}): {}", outcome.origin, e.kind(), e),
        }
    }
}

/// Forwards a summary of each outcome over a channel
///
/// The error value itself is not `Clone`, so the channel carries
/// [`OutcomeReport`] rather than [`Outcome`].
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<OutcomeReport>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutcomeReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutcomeObserver for ChannelObserver {
    fn on_outcome(&self, outcome: &Outcome) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(OutcomeReport::from(outcome));
    }
}

/// Hands every outcome to several observers, in order
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn OutcomeObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn OutcomeObserver>>) -> Self {
        Self { observers }
    }

    /// Add one more observer
    pub fn with(mut self, observer: Arc<dyn OutcomeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl OutcomeObserver for FanoutObserver {
    fn on_outcome(&self, outcome: &Outcome) {
        for observer in &self.observers {
            observer.on_outcome(outcome);
        }
    }
}

/// Cloneable summary of an [`Outcome`]
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeReport {
    pub origin: Origin,
    pub at: DateTime<Utc>,
    pub reply: Option<Bytes>,
    pub failure: Option<FailureKind>,
    pub detail: String,
}

impl OutcomeReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

impl From<&Outcome> for OutcomeReport {
    fn from(outcome: &Outcome) -> Self {
        let (reply, failure, detail) = match &outcome.result {
            Ok(reply) => (
                Some(reply.clone()),
                None,
                String::from_utf8_lossy(reply).into_owned(),
            ),
            Err(e) => (None, Some(e.kind()), e.to_string()),
        };

        Self {
            origin: outcome.origin,
            at: outcome.at,
            reply,
            failure,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use std::time::Duration;

    #[test]
    fn test_success_outcome() {
        let outcome = Outcome::new(Origin::OneShot, Ok(Bytes::from_static(b"OK")));
        assert!(outcome.is_success());
        assert_eq!(outcome.reply().unwrap(), &Bytes::from_static(b"OK"));
        assert_eq!(outcome.failure_kind(), None);
    }

    #[test]
    fn test_failure_outcome_keeps_kind() {
        let outcome = Outcome::new(
            Origin::Periodic { tick: 2 },
            Err(TelemetryError::Timeout(Duration::from_secs(5))),
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(Origin::Periodic { tick: 7 }.to_string(), "tick 7");
        assert_eq!(Origin::OneShot.to_string(), "one-shot");
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_reports() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_outcome(&Outcome::new(Origin::OneShot, Ok(Bytes::from_static(b"OK"))));
        observer.on_outcome(&Outcome::new(
            Origin::Periodic { tick: 1 },
            Err(TelemetryError::SnapshotUnavailable),
        ));

        let first = rx.recv().await.unwrap();
        assert!(first.is_success());
        assert_eq!(first.detail, "OK");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.failure, Some(FailureKind::SnapshotUnavailable));
        assert_eq!(second.origin, Origin::Periodic { tick: 1 });
    }

    #[test]
    fn test_fanout_reaches_every_observer() {
        let (first, mut first_rx) = ChannelObserver::new();
        let (second, mut second_rx) = ChannelObserver::new();
        let observers: Vec<Arc<dyn OutcomeObserver>> = vec![Arc::new(LogObserver), Arc::new(first)];
        let fanout = FanoutObserver::new(observers).with(Arc::new(second));
        assert_eq!(fanout.len(), 3);

        fanout.on_outcome(&Outcome::new(
            Origin::Periodic { tick: 4 },
            Err(TelemetryError::Transport("reset".into())),
        ));

        for rx in [&mut first_rx, &mut second_rx] {
            let report = rx.try_recv().unwrap();
            assert_eq!(report.origin, Origin::Periodic { tick: 4 });
            assert_eq!(report.failure, Some(FailureKind::Transport));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_empty_fanout_is_a_no_op() {
        let fanout = FanoutObserver::default();
        assert!(fanout.is_empty());
        fanout.on_outcome(&Outcome::new(Origin::OneShot, Ok(Bytes::new())));
    }

    #[test]
    fn test_channel_observer_tolerates_closed_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_outcome(&Outcome::new(Origin::OneShot, Ok(Bytes::new())));
    }
}
