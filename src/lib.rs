//! Rust library for controlling Biamp Tesira DSPs over the Tesira Text Protocol
//!
//! This library provides an async connection manager for the line-oriented
//! text protocol ("TTP") that Tesira DSP servers speak over TCP. It supports:
//!
//! - Reading and writing channel levels and mute states (`get`/`set`)
//! - Subscriptions to attribute changes, routed back through correlation labels
//! - Periodic resubscription to survive device-side subscription expiry
//! - Typed state updates and connection-lifecycle events over a broadcast channel
//!
//! Command traffic and the unsolicited notification feed run on separate TCP
//! connections, so a slow command never stalls notification delivery. All
//! command round trips are serialized by a single gate held from send through
//! the matching response.
//!
//! # Quick Start
//!
//! ```no_run
//! use tesira_ttp::{AttributeKind, DeviceConfig, DeviceConnection, DeviceEvent, Subscription};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = DeviceConnection::new(DeviceConfig::new("192.168.1.50", 23));
//!     connection.open().await?;
//!
//!     // Observe a level and a mute attribute
//!     let level = Subscription::new("OfficeSpeakersPCLevel", AttributeKind::Level, 1);
//!     let mute = Subscription::new("OfficeSpeakersPCLevel", AttributeKind::Mute, 1);
//!     connection.subscribe_all([&level, &mute]).await?;
//!
//!     let mut events = connection.events();
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::State { id, value } => println!("{} = {}", id, value),
//!             DeviceEvent::Connection(state) => println!("connection {}", state),
//!         }
//!     }
//!
//!     connection.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Connection**: transports, handshake, command gate, background loops
//! - **Protocol**: command formatting, notification parsing, response classification
//! - **Registry**: active subscriptions keyed by correlation label
//! - **Transport**: newline-delimited text over a TCP stream
//! - **Value**: attribute kinds and typed value coercion

mod connection;
mod error;
mod protocol;
mod registry;
mod subscription;
mod transport;
mod value;

// Public exports
pub use connection::{ConnectionState, DeviceConfig, DeviceConnection};
pub use error::{DeviceError, Result};
pub use protocol::{
    parse_notification, Notification, ResponseClassifier, ResponseKind, TtpClassifier,
};
pub use subscription::{DeviceEvent, EventReceiver, Subscription, SubscriptionId};
pub use transport::{LineRead, LineTransport};
pub use value::{coerce, AttributeKind, TypedValue};
