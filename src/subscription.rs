use crate::connection::ConnectionState;
use crate::error::{DeviceError, Result};
use crate::value::{AttributeKind, TypedValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use tokio::sync::broadcast;

/// Identity of a subscription: instance tag, attribute kind, channel index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId {
    /// Case-sensitive instance tag of the control block
    pub instance_tag: String,
    /// Attribute kind being observed
    pub attribute: AttributeKind,
    /// Channel index within the block
    pub index: u32,
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.instance_tag, self.attribute, self.index)
    }
}

/// A subscription to one attribute of one channel of a control block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Case-sensitive instance tag of the control block
    pub instance_tag: String,
    /// Attribute kind to observe
    pub attribute: AttributeKind,
    /// Channel index within the block
    pub index: u32,
    /// Display name for downstream consumers
    #[serde(default)]
    pub name: String,
    /// Display name of the owning device for downstream consumers
    #[serde(default)]
    pub device_name: String,
}

impl Subscription {
    /// Create a subscription without display names
    pub fn new(instance_tag: impl Into<String>, attribute: AttributeKind, index: u32) -> Self {
        Self {
            instance_tag: instance_tag.into(),
            attribute,
            index,
            name: String::new(),
            device_name: String::new(),
        }
    }

    /// The identity of this subscription
    pub fn id(&self) -> SubscriptionId {
        SubscriptionId {
            instance_tag: self.instance_tag.clone(),
            attribute: self.attribute,
            index: self.index,
        }
    }
}

// Equality and hashing cover identity only; display names carry no weight.
impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.instance_tag == other.instance_tag
            && self.attribute == other.attribute
            && self.index == other.index
    }
}

impl Eq for Subscription {}

impl Hash for Subscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.instance_tag.hash(state);
        self.attribute.hash(state);
        self.index.hash(state);
    }
}

/// Event emitted by a device connection
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A subscribed attribute changed value
    State {
        /// Identity of the subscription the value belongs to
        id: SubscriptionId,
        /// The coerced value
        value: TypedValue,
    },

    /// The connection changed lifecycle state
    Connection(ConnectionState),
}

/// Receiver for device events
pub struct EventReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl EventReceiver {
    /// Create a new event receiver
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next device event
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => DeviceError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                DeviceError::ChannelError(format!("Lagged by {} events", n))
            }
        })
    }

    /// Try to receive a device event without blocking
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(DeviceError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(DeviceError::ChannelError(
                format!("Lagged by {} events", n),
            )),
        }
    }
}
