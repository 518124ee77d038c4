//! Realtime fan-out hub.
//!
//! The hub is an actor: a single task owns the live session set and applies
//! connect, disconnect, broadcast and command requests in the order they
//! arrive. A broadcast therefore reaches exactly the sessions connected at
//! that point in the queue, once each.
//!
//! Each session gets a bounded outbox. Delivery never waits on a session: a
//! full outbox drops that one frame for that one session, and a closed
//! outbox removes the session.

use crate::broker::{Broker, QoS};
use crate::command::{CommandKind, CommandRequest, CommandValidator};
use crate::session::SessionId;
use crate::telemetry;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_protocol::{Notification, ServerFrame, CONTROL_TOPIC};

/// Default per-session outbox capacity.
const DEFAULT_SESSION_BUFFER: usize = 256;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per session before deliveries are dropped.
    pub session_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            session_buffer: DEFAULT_SESSION_BUFFER,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of connected sessions.
    pub sessions: usize,
    /// Broadcasts performed.
    pub broadcasts: u64,
    /// Frames handed to session outboxes.
    pub deliveries: u64,
    /// Frames dropped because a session outbox was full.
    pub dropped: u64,
    /// Commands forwarded to the broker.
    pub commands_accepted: u64,
    /// Commands rejected by validation.
    pub commands_rejected: u64,
}

/// Receiving end of a session's outbox.
pub type SessionOutbox = mpsc::Receiver<Arc<ServerFrame>>;

enum HubCommand {
    Connect {
        session: SessionId,
        outbox: mpsc::Sender<Arc<ServerFrame>>,
    },
    Disconnect {
        session: SessionId,
    },
    Broadcast {
        frame: Arc<ServerFrame>,
    },
    Command {
        session: SessionId,
        request: CommandRequest,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    session_buffer: usize,
}

impl HubHandle {
    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).map_err(|_| HubError::Closed)
    }

    /// Register a session and return its outbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn connect(&self, session: SessionId) -> Result<SessionOutbox, HubError> {
        let (outbox, rx) = mpsc::channel(self.session_buffer);
        self.send(HubCommand::Connect { session, outbox })?;
        Ok(rx)
    }

    /// Remove a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn disconnect(&self, session: &SessionId) -> Result<(), HubError> {
        self.send(HubCommand::Disconnect {
            session: session.clone(),
        })
    }

    /// Deliver a frame to every connected session.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn broadcast(&self, frame: impl Into<ServerFrame>) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            frame: Arc::new(frame.into()),
        })
    }

    /// Submit a command request on behalf of a session.
    ///
    /// The outcome is observable as a broadcast `alarmNotification`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn command_request(
        &self,
        session: &SessionId,
        request: CommandRequest,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Command {
            session: session.clone(),
            request,
        })
    }

    /// Get a snapshot of hub statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply })?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

/// The hub actor state.
pub struct Hub {
    sessions: HashMap<SessionId, mpsc::Sender<Arc<ServerFrame>>>,
    validator: CommandValidator,
    broker: Arc<dyn Broker>,
    rx: mpsc::UnboundedReceiver<HubCommand>,
    /// Used by publish tasks to report back; weak so the hub stops once every
    /// handle is dropped.
    reports: mpsc::WeakUnboundedSender<HubCommand>,
    stats: HubStats,
}

impl Hub {
    /// Spawn the hub task.
    ///
    /// The task runs until every [`HubHandle`] is dropped.
    #[must_use]
    pub fn spawn(
        config: HubConfig,
        validator: CommandValidator,
        broker: Arc<dyn Broker>,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            sessions: HashMap::new(),
            validator,
            broker,
            rx,
            reports: tx.downgrade(),
            stats: HubStats::default(),
        };

        info!("Starting hub with config: {:?}", config);

        let join = tokio::spawn(hub.run());
        let handle = HubHandle {
            tx,
            session_buffer: config.session_buffer.max(1),
        };
        (handle, join)
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.dispatch(command);
        }
        debug!(sessions = self.sessions.len(), "Hub stopped");
    }

    fn dispatch(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { session, outbox } => {
                if self.sessions.insert(session.clone(), outbox).is_some() {
                    warn!(session = %session, "Session reconnected, replacing outbox");
                }
                debug!(session = %session, sessions = self.sessions.len(), "Session connected");
            }
            HubCommand::Disconnect { session } => {
                if self.sessions.remove(&session).is_some() {
                    debug!(session = %session, sessions = self.sessions.len(), "Session disconnected");
                }
            }
            HubCommand::Broadcast { frame } => {
                self.broadcast(&frame);
            }
            HubCommand::Command { session, request } => {
                self.on_command(&session, request);
            }
            HubCommand::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.sessions = self.sessions.len();
                let _ = reply.send(stats);
            }
        }
    }

    /// Deliver to every session. Returns the number of successful deliveries.
    fn broadcast(&mut self, frame: &Arc<ServerFrame>) -> usize {
        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        for (session, outbox) in &self.sessions {
            match outbox.try_send(Arc::clone(frame)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session = %session, "Session outbox full, dropping frame");
                    dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(session.clone()),
            }
        }

        for session in closed {
            self.sessions.remove(&session);
            debug!(session = %session, "Removed closed session");
        }

        self.stats.broadcasts += 1;
        self.stats.deliveries += delivered as u64;
        self.stats.dropped += dropped as u64;
        telemetry::record_broadcast(dropped);

        delivered
    }

    fn on_command(&mut self, session: &SessionId, request: CommandRequest) {
        let command = match self.validator.validate(&request) {
            Ok(command) => command,
            Err(rejection) => {
                warn!(session = %session, reason = rejection.code(), "Command rejected");
                self.stats.commands_rejected += 1;
                telemetry::record_command(rejection.code());
                self.broadcast(&Arc::new(Notification::error(rejection.code()).into()));
                return;
            }
        };

        let kind = command.kind();
        let payload = match command.payload().to_bytes() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(session = %session, error = %e, "Failed to encode control payload");
                self.broadcast(&Arc::new(Notification::error("encode_failed").into()));
                return;
            }
        };

        info!(session = %session, command = %kind, "Command accepted");
        self.stats.commands_accepted += 1;
        telemetry::record_command("accepted");

        let broker = Arc::clone(&self.broker);
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let notification = match broker.publish(CONTROL_TOPIC, payload, QoS::AtLeastOnce).await {
                Ok(()) => {
                    debug!(command = %kind, "Command queued for publish");
                    confirmation(kind)
                }
                Err(e) => {
                    warn!(command = %kind, error = %e, "Command publish failed");
                    telemetry::record_publish_failure();
                    Notification::error("publish_failed")
                }
            };

            if let Some(tx) = reports.upgrade() {
                let _ = tx.send(HubCommand::Broadcast {
                    frame: Arc::new(notification.into()),
                });
            }
        });
    }
}

fn confirmation(kind: CommandKind) -> Notification {
    let message = serde_json::json!({ "command": kind.as_str(), "status": "queued" });
    Notification::new(message.to_string(), Utc::now())
}
