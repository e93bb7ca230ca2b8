use ocm_core::clock::Clock;
use ocm_core::model::{SessionRecord, SubagentNode};
use ocm_core::tree::Snapshot;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::client::SessionSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected { message: String },
    AuthFailed { message: String },
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected { .. } => "disconnected",
            ConnectionState::AuthFailed { .. } => "auth failed",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ConnectionState::Disconnected { message } | ConnectionState::AuthFailed { message } => {
                Some(message)
            }
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {message}", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// What one poll cycle tells the presentation layer.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// Fresh data; the connection is healthy. Replaces any earlier snapshot.
    Snapshot(Arc<Snapshot>),
    /// The connection state moved without new data; keep showing the last snapshot.
    StateChanged(ConnectionState),
}

/// Asks a running poller for one immediate cycle. Requests made while one
/// is already pending collapse into it.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Returns false once the poller has stopped.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

pub struct Poller<S, C> {
    source: S,
    clock: C,
    interval: Duration,
    state: ConnectionState,
    snapshot: Arc<Snapshot>,
}

impl<S, C> Poller<S, C>
where
    S: SessionSource,
    C: Clock,
{
    pub fn new(source: S, clock: C, interval: Duration) -> Self {
        Self {
            source,
            clock,
            interval,
            state: ConnectionState::Connecting,
            snapshot: Arc::new(Snapshot::default()),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Latest published snapshot; survives connectivity and auth failures.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    pub async fn poll_once(&mut self) -> PollEvent {
        match self.source.fetch_sessions().await {
            Ok(records) => {
                let subagents = self.source.fetch_tree().await;
                self.publish(&records, &subagents)
            }
            Err(err) if err.is_auth() => {
                warn!("gateway_auth_failed: {err}");
                self.transition(ConnectionState::AuthFailed {
                    message: err.to_string(),
                })
            }
            Err(err) if err.is_connectivity() => {
                warn!("gateway_unreachable: {err}");
                self.transition(ConnectionState::Disconnected {
                    message: err.to_string(),
                })
            }
            Err(err) => {
                warn!("gateway_unexpected_response: {err} (showing empty session list)");
                self.publish(&[], &[])
            }
        }
    }

    fn publish(&mut self, records: &[SessionRecord], subagents: &[SubagentNode]) -> PollEvent {
        let snapshot = Arc::new(
            Snapshot::from_records(records, self.clock.now_ms()).with_subagents(subagents),
        );
        if !self.state.is_connected() {
            info!("gateway_connected: {} sessions", snapshot.session_count);
        }
        self.state = ConnectionState::Connected;
        self.snapshot = Arc::clone(&snapshot);
        PollEvent::Snapshot(snapshot)
    }

    fn transition(&mut self, state: ConnectionState) -> PollEvent {
        self.state = state.clone();
        PollEvent::StateChanged(state)
    }

    /// Poll on the configured interval until `shutdown` flips or `events`
    /// is dropped.
    ///
    /// Cycles run inline so they never overlap, and ticks missed while a
    /// cycle was in flight are skipped rather than replayed. A refresh
    /// request runs one extra cycle without resetting the timer. Shutdown
    /// abandons an in-flight cycle, publishes nothing further and closes
    /// the source.
    pub async fn run(
        mut self,
        events: mpsc::Sender<PollEvent>,
        mut refresh: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if *shutdown.borrow() {
            self.source.close().await;
            return;
        }
        if events
            .send(PollEvent::StateChanged(self.state.clone()))
            .await
            .is_err()
        {
            self.source.close().await;
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut refresh_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                request = refresh.recv(), if refresh_open => {
                    if request.is_none() {
                        refresh_open = false;
                        continue;
                    }
                    while refresh.try_recv().is_ok() {}
                }
                _ = ticker.tick() => {}
            }

            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = self.poll_once() => event,
            };
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                sent = events.send(event) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        info!("poller_stopped");
        self.source.close().await;
    }
}
