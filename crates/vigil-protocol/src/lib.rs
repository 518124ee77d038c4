//! # vigil-protocol
//!
//! Wire definitions shared by every part of the Vigil alarm bridge.
//!
//! This crate is the single source of truth for:
//!
//! - **Topics** - broker topic names (`status`, `control`)
//! - **Control payloads** - the JSON documents published on `control`
//! - **Frames** - events exchanged with realtime clients
//!   (`disarmAlarm`, `activateAlarm`, `alarmNotification`, `connected`)
//! - **Codec** - JSON text frames and length-prefixed MessagePack binary frames
//!
//! ## Example
//!
//! ```rust
//! use vigil_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::disarm("1234");
//! let text = codec::encode_json(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode_json(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod control;
pub mod frames;
pub mod topics;

pub use codec::{Encoding, ProtocolError};
pub use control::ControlPayload;
pub use frames::{events, ClientFrame, Notification, ServerFrame};
pub use topics::{CONTROL_TOPIC, STATUS_TOPIC, SUBSCRIBED_TOPICS};
