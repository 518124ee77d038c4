//! Bridge orchestration.
//!
//! Every inbound status message becomes exactly one record append and exactly
//! one broadcast. The two are independent: appends are queued to a single
//! persist worker, so a slow or failing store never holds back the broadcast.

use crate::broker::{Broker, BrokerEvent};
use crate::command::CommandValidator;
use crate::hub::{Hub, HubConfig, HubHandle};
use crate::normalize::Normalizer;
use crate::record::NewRecord;
use crate::store::RecordStore;
use crate::telemetry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vigil_protocol::{Notification, STATUS_TOPIC};

/// Default number of records waiting for the store.
const DEFAULT_PERSIST_BACKLOG: usize = 1024;

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Hub settings.
    pub hub: HubConfig,
    /// Records queued for the store before new ones are dropped.
    pub persist_backlog: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            persist_backlog: DEFAULT_PERSIST_BACKLOG,
        }
    }
}

/// The bridge between broker traffic, the record store and the hub.
#[derive(Clone)]
pub struct Bridge {
    normalizer: Arc<Normalizer>,
    store: Arc<dyn RecordStore>,
    persist: mpsc::Sender<NewRecord>,
    hub: HubHandle,
}

impl Bridge {
    /// Create a bridge around an already running hub.
    ///
    /// Spawns the persist worker, which stops once every clone of the bridge
    /// is dropped.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, hub: HubHandle, persist_backlog: usize) -> Self {
        let (persist, rx) = mpsc::channel(persist_backlog.max(1));
        tokio::spawn(persist_worker(Arc::clone(&store), rx));

        Self {
            normalizer: Arc::new(Normalizer::new()),
            store,
            persist,
            hub,
        }
    }

    /// Spawn a hub wired to `broker` and build a bridge around it.
    #[must_use]
    pub fn start(
        store: Arc<dyn RecordStore>,
        broker: Arc<dyn Broker>,
        validator: CommandValidator,
        config: BridgeConfig,
    ) -> Self {
        let (hub, _join) = Hub::spawn(config.hub, validator, broker);
        Self::new(store, hub, config.persist_backlog)
    }

    /// Get the hub handle.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Get the record store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Records queued for the store and not yet taken by the worker.
    #[must_use]
    pub fn persist_backlog(&self) -> usize {
        self.persist.max_capacity() - self.persist.capacity()
    }

    /// Relay one inbound broker message.
    ///
    /// Returns the normalized record that was handed to the store and hub.
    pub fn relay(&self, topic: &str, payload: &[u8]) -> NewRecord {
        let record = self.normalizer.normalize(payload);
        telemetry::record_broker_message(topic);
        trace!(topic = %topic, bytes = payload.len(), "Relaying broker message");

        match self.persist.try_send(record.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                telemetry::record_persist(false);
                warn!(topic = %topic, "Persist backlog full, record not stored");
            }
            Err(TrySendError::Closed(_)) => {
                telemetry::record_persist(false);
                warn!(topic = %topic, "Persist worker stopped, record not stored");
            }
        }

        let notification = Notification::new(record.payload.clone(), record.received_at);
        if let Err(e) = self.hub.broadcast(notification) {
            warn!(topic = %topic, error = %e, "Failed to broadcast record");
        }

        record
    }

    /// Handle one broker event.
    ///
    /// Only status messages are relayed. Control messages are the broker
    /// echoing our own commands and may carry credentials.
    pub fn handle_event(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::Message { topic, payload } if topic == STATUS_TOPIC => {
                self.relay(&topic, &payload);
            }
            BrokerEvent::Message { topic, payload } => {
                debug!(topic = %topic, bytes = payload.len(), "Ignoring non-status message");
            }
            BrokerEvent::Connected => {
                info!("Broker connected");
            }
            BrokerEvent::Disconnected { reason } => {
                telemetry::record_broker_disconnect();
                warn!(reason = %reason, "Broker disconnected");
            }
            BrokerEvent::SubscribeFailed { topic } => {
                warn!(topic = %topic, "Broker refused subscription");
            }
        }
    }

    /// Process broker events until the channel closes or `shutdown` fires.
    ///
    /// Events are handled one at a time, so messages on a topic are broadcast
    /// in arrival order.
    pub async fn run(self, mut events: mpsc::Receiver<BrokerEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Bridge shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Broker event channel closed");
                        break;
                    }
                }
            }
        }
    }
}

/// Append queued records one at a time, in arrival order.
async fn persist_worker(store: Arc<dyn RecordStore>, mut records: mpsc::Receiver<NewRecord>) {
    while let Some(record) = records.recv().await {
        match store.append(record).await {
            Ok(stored) => {
                telemetry::record_persist(true);
                debug!(id = %stored.id, "Record persisted");
            }
            Err(e) => {
                telemetry::record_persist(false);
                warn!(error = %e, "Failed to persist record");
            }
        }
    }
    debug!("Persist worker stopped");
}
