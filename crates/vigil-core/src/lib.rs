//! # vigil-core
//!
//! Event relay between an alarm broker and live realtime clients.
//!
//! This crate provides the building blocks of the bridge:
//!
//! - **Normalizer** - Turns raw broker payloads into canonical records
//! - **Store** - Durable record storage contract and two implementations
//! - **Command** - Validation of client-issued control commands
//! - **Broker** - Contract for the publish/subscribe transport
//! - **Hub** - Session registry and fan-out actor
//! - **Bridge** - Wires everything together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Broker    │────▶│   Bridge    │────▶│    Hub      │────▶ sessions
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   │ commands
//!        │            ┌─────────────┐            │
//!        │            │    Store    │            │
//!        │            └─────────────┘            │
//!        └───────────── validated publish ◀──────┘
//! ```

pub mod bridge;
pub mod broker;
pub mod command;
pub mod hub;
pub mod normalize;
pub mod record;
pub mod session;
pub mod store;
pub mod telemetry;

pub use bridge::{Bridge, BridgeConfig};
pub use broker::{Broker, BrokerError, BrokerEvent, QoS};
pub use command::{
    CommandKind, CommandRequest, CommandValidator, CredentialVerifier, LengthVerifier, Rejection,
    ValidatedCommand,
};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats};
pub use normalize::{Normalized, Normalizer};
pub use record::{EventRecord, NewRecord, RecordId};
pub use session::SessionId;
pub use store::{FileStore, MemoryStore, RecordStore, StoreError, MAX_RECENT};
