//! # Reporter Control Surface
//!
//! The command set a UI or CLI uses to drive the reporter: start, stop,
//! send-once and status. Each command forwards straight to
//! [`TelemetryReporter`]; callers never touch the timer or the session.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{FailureKind, Result, TelemetryError};
use crate::reporter::{
    ReporterState, ReporterStatus, StartOutcome, StopOutcome, TelemetryReporter,
};

/// A command typed by a user or sent by a UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    SendOnce,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "send" | "once" | "send-once" => Ok(Command::SendOnce),
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(TelemetryError::UnknownCommand(other.to_string())),
        }
    }
}

/// Result of one command, ready for display
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyIdle,
    Sent(Bytes),
    Failed { kind: FailureKind, message: String },
    Status(ReporterStatus),
    Quit,
}

impl Reply {
    fn failed(error: &TelemetryError) -> Self {
        Reply::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Started => f.write_str("started"),
            Reply::AlreadyRunning => f.write_str("already running"),
            Reply::Stopped => f.write_str("stopped"),
            Reply::AlreadyIdle => f.write_str("already idle"),
            Reply::Sent(reply) => write!(f, "sent, collector replied: {}", String::from_utf8_lossy(reply)),
            Reply::Failed { kind, message } => write!(f, "failed ({}): {}", kind, message),
            Reply::Status(status) => {
                let state = match status.state {
                    ReporterState::Idle => "idle",
                    ReporterState::Running => "running",
                };
                write!(f, "state={}", state)?;
                if let Some(endpoint) = &status.endpoint {
                    write!(f, " endpoint={}", endpoint)?;
                }
                if let Some(interval) = status.interval {
                    write!(f, " interval={:?}", interval)?;
                }
                write!(
                    f,
                    " ticks={} ok={} failed={} no-data={}",
                    status.ticks, status.successes, status.failures, status.unavailable
                )?;
                match status.last.as_ref().map(|l| l.failure) {
                    Some(None) => f.write_str(" last=ok"),
                    Some(Some(kind)) => write!(f, " last=failed: {}", kind),
                    None => Ok(()),
                }
            }
            Reply::Quit => f.write_str("bye"),
        }
    }
}

/// Reporter bound to its configured interval and endpoint
#[derive(Clone)]
pub struct ReporterControl {
    reporter: Arc<TelemetryReporter>,
    interval: Duration,
    endpoint: String,
}

impl ReporterControl {
    pub fn new(reporter: Arc<TelemetryReporter>, interval: Duration, endpoint: impl Into<String>) -> Self {
        Self {
            reporter,
            interval,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn start(&self) -> Result<StartOutcome> {
        self.reporter.start(self.interval, &self.endpoint).await
    }

    pub async fn stop(&self) -> StopOutcome {
        self.reporter.stop().await
    }

    pub async fn send_once(&self) -> Result<Bytes> {
        self.reporter.send_once(&self.endpoint).await
    }

    pub async fn status(&self) -> ReporterStatus {
        self.reporter.status().await
    }

    /// Run one command and describe the result
    pub async fn execute(&self, command: Command) -> Reply {
        match command {
            Command::Start => match self.start().await {
                Ok(StartOutcome::Started) => Reply::Started,
                Ok(StartOutcome::AlreadyRunning) => Reply::AlreadyRunning,
                Err(e) => Reply::failed(&e),
            },
            Command::Stop => match self.stop().await {
                StopOutcome::Stopped => Reply::Stopped,
                StopOutcome::AlreadyIdle => Reply::AlreadyIdle,
            },
            Command::SendOnce => match self.send_once().await {
                Ok(reply) => Reply::Sent(reply),
                Err(e) => Reply::failed(&e),
            },
            Command::Status => Reply::Status(self.status().await),
            Command::Quit => Reply::Quit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::LogObserver;
    use crate::snapshot::source::{LiveFeed, LiveSource};
    use crate::snapshot::PositionSample;
    use crate::transport::mocks::MockConnector;

    fn control(connector: &MockConnector) -> (ReporterControl, LiveFeed) {
        let (feed, source): (LiveFeed, LiveSource) = LiveFeed::new();
        let reporter = TelemetryReporter::new(
            Arc::new(source),
            Arc::new(connector.clone()),
            Arc::new(LogObserver),
        );
        let control = ReporterControl::new(Arc::new(reporter), Duration::from_secs(1), "10.0.2.2:2222");
        (control, feed)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!(" STOP \n".parse::<Command>().unwrap(), Command::Stop);
        assert_eq!("send".parse::<Command>().unwrap(), Command::SendOnce);
        assert_eq!("send-once".parse::<Command>().unwrap(), Command::SendOnce);
        assert_eq!("status".parse::<Command>().unwrap(), Command::Status);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_unknown_command() {
        let result = "launch".parse::<Command>();
        assert!(matches!(&result, Err(TelemetryError::UnknownCommand(c)) if c == "launch"));
        assert_eq!(
            result.unwrap_err().to_string(),
            "Unknown command 'launch' (expected start, stop, send, status, quit)"
        );
        assert!(matches!(
            "".parse::<Command>(),
            Err(TelemetryError::UnknownCommand(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_sequence() {
        let connector = MockConnector::new();
        let (control, _feed) = control(&connector);

        assert_eq!(control.execute(Command::Start).await, Reply::Started);
        assert_eq!(control.execute(Command::Start).await, Reply::AlreadyRunning);
        assert_eq!(control.execute(Command::Stop).await, Reply::Stopped);
        assert_eq!(control.execute(Command::Stop).await, Reply::AlreadyIdle);
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_is_reported() {
        let connector = MockConnector::new();
        connector.set_fail_open(true);
        let (control, _feed) = control(&connector);

        match control.execute(Command::Start).await {
            Reply::Failed { kind, .. } => assert_eq!(kind, FailureKind::Connect),
            other => panic!("Expected Failed, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_once_without_fix_then_with_fix() {
        let connector = MockConnector::new();
        let (control, feed) = control(&connector);

        let reply = control.execute(Command::SendOnce).await;
        assert_eq!(
            reply.to_string(),
            "failed (no data): Snapshot unavailable"
        );

        feed.publish_fix(PositionSample::new(1.0, 2.0, 3.0, 4, 0.0, 1.0).unwrap());
        assert_eq!(control.execute(Command::SendOnce).await, Reply::Sent(Bytes::from_static(b"OK")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_display() {
        let connector = MockConnector::new();
        let (control, _feed) = control(&connector);

        let idle = control.execute(Command::Status).await.to_string();
        assert_eq!(idle, "state=idle ticks=0 ok=0 failed=0 no-data=0");

        control.execute(Command::Start).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let running = control.execute(Command::Status).await.to_string();
        assert!(running.starts_with("state=running endpoint=10.0.2.2:2222 interval=1s"));
        assert!(running.ends_with("last=failed: no data"));

        control.execute(Command::Stop).await;
    }

    #[tokio::test]
    async fn test_quit() {
        let connector = MockConnector::new();
        let (control, _feed) = control(&connector);
        assert_eq!(control.execute(Command::Quit).await, Reply::Quit);
        assert_eq!(Reply::Quit.to_string(), "bye");
    }
}
