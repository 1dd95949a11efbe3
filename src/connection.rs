use crate::error::{DeviceError, Result};
use crate::protocol::{self, ResponseClassifier, ResponseKind, TtpClassifier};
use crate::registry::SubscriptionRegistry;
use crate::subscription::{DeviceEvent, EventReceiver, Subscription};
use crate::transport::{LineRead, LineTransport};
use crate::value::{coerce, AttributeKind, TypedValue};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Lines without a classifiable response after which a round trip gives up
const RESPONSE_SKIP_LIMIT: u32 = 8;

/// Lifecycle state of a device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transports; terminal until `open()` is called
    Closed,
    /// Handshake in progress
    Opening,
    /// Both loops running, commands accepted
    Open,
    /// Notification reads are timing out; decision point for the owner
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Configuration for a device connection
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device hostname or address
    pub host: String,
    /// TTP server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline for establishing each transport and each banner read
    #[serde(default = "default_timeout")]
    pub connect_timeout: Duration,
    /// Deadline for one command round trip
    #[serde(default = "default_timeout")]
    pub command_timeout: Duration,
    /// Deadline for one notification read
    #[serde(default = "default_timeout")]
    pub notification_timeout: Duration,
    /// Interval between resubscription passes
    #[serde(default = "default_resubscribe_interval")]
    pub resubscribe_interval: Duration,
    /// Attempt ceiling for banner and identity reads during the handshake
    #[serde(default = "default_handshake_attempts")]
    pub max_handshake_attempts: u32,
    /// Consecutive notification-read timeouts before the connection is
    /// declared degraded
    #[serde(default = "default_notification_timeouts")]
    pub max_notification_timeouts: u32,
}

fn default_port() -> u16 {
    23
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_resubscribe_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_handshake_attempts() -> u32 {
    5
}

fn default_notification_timeouts() -> u32 {
    6
}

impl Default for DeviceConfig {
    /// Defaults for a device on the local network: telnet port, 10 s
    /// deadlines, one resubscription pass per minute
    fn default() -> Self {
        Self::new("localhost", default_port())
    }
}

impl DeviceConfig {
    /// Configuration with default timeouts for a device at `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: default_timeout(),
            command_timeout: default_timeout(),
            notification_timeout: default_timeout(),
            resubscribe_interval: default_resubscribe_interval(),
            max_handshake_attempts: default_handshake_attempts(),
            max_notification_timeouts: default_notification_timeouts(),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection manager for a Tesira DSP
///
/// Owns two transports to the device: a command transport carrying the
/// synchronous request/response traffic, and a notification transport
/// streaming unsolicited subscription updates. Command traffic is serialized
/// by a single gate held for the whole send-plus-receive round trip, so one
/// caller's response can never be consumed by another caller's request. A
/// background dispatch loop routes notifications back to their subscriptions
/// and a resubscription loop keeps them alive against device-side expiry.
pub struct DeviceConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: DeviceConfig,
    classifier: Arc<dyn ResponseClassifier>,
    registry: SubscriptionRegistry,
    /// The command gate: exclusive access to the command transport for the
    /// duration of one full round trip. Registry mutation happens only while
    /// this gate is held.
    command: Mutex<Option<LineTransport>>,
    events: broadcast::Sender<DeviceEvent>,
    state: StdMutex<ConnectionState>,
    serial: StdMutex<Option<String>>,
    closed: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl DeviceConnection {
    /// Create a connection manager with the stock TTP response classifier
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_classifier(config, TtpClassifier)
    }

    /// Create a connection manager with a custom response classifier
    pub fn with_classifier(
        config: DeviceConfig,
        classifier: impl ResponseClassifier + 'static,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        let (closed, _) = watch::channel(true);

        Self {
            inner: Arc::new(Inner {
                config,
                classifier: Arc::new(classifier),
                registry: SubscriptionRegistry::new(),
                command: Mutex::new(None),
                events,
                state: StdMutex::new(ConnectionState::Closed),
                serial: StdMutex::new(None),
                closed,
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Open both transports, perform the handshake, and start the loops
    ///
    /// The handshake waits for the server banner on each transport and then
    /// queries the device identity, each read bounded by
    /// `max_handshake_attempts` with a per-attempt deadline. Exhausting the
    /// bound fails the call and leaves the connection `Closed`. Calling
    /// `open()` on an already open connection is a no-op.
    pub async fn open(&self) -> Result<()> {
        let inner = &self.inner;
        let mut gate = inner.command.lock().await;
        if let Some(transport) = gate.as_mut() {
            if *inner.state.lock().unwrap() != ConnectionState::Closed {
                return Ok(());
            }
            // The device hung up; discard the stale command transport.
            transport.close().await;
            *gate = None;
        }

        inner.set_state(ConnectionState::Opening);
        // Mark the connection live before the handshake so a concurrent
        // close() is observable once the handshake finishes.
        let _ = inner.closed.send_replace(false);
        tracing::info!("Connecting to Tesira at {}", inner.config.addr());

        match inner.open_transports().await {
            Ok((mut notification, mut command, serial)) => {
                if *inner.closed.borrow() {
                    // close() intervened mid-handshake; abandon the session.
                    notification.close().await;
                    command.close().await;
                    inner.set_state(ConnectionState::Closed);
                    return Err(DeviceError::Closed);
                }
                tracing::info!(
                    "Connected to Tesira at {} (serial {})",
                    inner.config.addr(),
                    serial
                );
                *inner.serial.lock().unwrap() = Some(serial);
                *gate = Some(command);

                let mut tasks = inner.tasks.lock().unwrap();
                tasks.retain(|handle| !handle.is_finished());
                tasks.push(tokio::spawn(Inner::dispatch_loop(
                    inner.clone(),
                    notification,
                )));
                tasks.push(tokio::spawn(Inner::resubscribe_loop(inner.clone())));
                drop(tasks);

                inner.set_state(ConnectionState::Open);
                Ok(())
            }
            Err(e) => {
                let _ = inner.closed.send_replace(true);
                inner.set_state(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Stop both loops, close both transports, and clear the registry
    ///
    /// Safe to call concurrently with in-flight operations: waiters on the
    /// command gate and the in-progress notification read observe the closed
    /// state and fail with [`DeviceError::Closed`]. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        let _ = inner.closed.send_replace(true);

        // Take the gate before reaping so a concurrent open() cannot spawn
        // loops after the drain; re-assert closed in case that open() was
        // mid-handshake and flipped the watch.
        let mut gate = inner.command.lock().await;
        let _ = inner.closed.send_replace(true);

        let handles: Vec<JoinHandle<()>> = inner.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(mut transport) = gate.take() {
            transport.close().await;
        }
        inner.registry.clear();
        inner.set_state(ConnectionState::Closed);
    }

    /// Subscribe to value changes of one attribute of one channel
    ///
    /// Registers the subscription under a fresh correlation label and sends
    /// the `subscribe` command through the command gate, awaiting its
    /// acknowledgement (not the subsequent notification). Subscribing an
    /// already-registered identity replaces its registry entry rather than
    /// duplicating it, and releases the old label. A device-reported
    /// `ALREADY_SUBSCRIBED` diagnostic counts as success.
    pub async fn subscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut gate = self.inner.acquire_command().await?;
        let transport = gate.as_mut().ok_or(DeviceError::Closed)?;

        tracing::debug!("Creating subscription for {}", subscription.id());
        let label = self.inner.registry.register(subscription.clone());
        let command = protocol::subscribe_command(&subscription.id(), &label);
        match self.inner.round_trip(transport, &command).await {
            Ok(_) => Ok(()),
            Err(DeviceError::Device(d)) if d.contains("ALREADY_SUBSCRIBED") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Subscribe to every entry in `subscriptions`, stopping at the first error
    pub async fn subscribe_all<'a>(
        &self,
        subscriptions: impl IntoIterator<Item = &'a Subscription>,
    ) -> Result<()> {
        tracing::info!("Subscribing to Tesira");
        for subscription in subscriptions {
            self.subscribe(subscription).await?;
        }
        Ok(())
    }

    /// Drop a subscription and tell the device to stop notifying it
    ///
    /// Unsubscribing an identity with no registry entry is a no-op.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut gate = self.inner.acquire_command().await?;
        let transport = gate.as_mut().ok_or(DeviceError::Closed)?;

        let Some(label) = self.inner.registry.remove(&subscription.id()) else {
            return Ok(());
        };
        let command = protocol::unsubscribe_command(&subscription.id(), &label);
        self.inner.round_trip(transport, &command).await.map(|_| ())
    }

    /// Set one attribute of one channel to `value`
    pub async fn set(
        &self,
        instance_tag: &str,
        attribute: AttributeKind,
        index: u32,
        value: TypedValue,
    ) -> Result<()> {
        let mut gate = self.inner.acquire_command().await?;
        let transport = gate.as_mut().ok_or(DeviceError::Closed)?;

        let command = protocol::set_command(instance_tag, attribute, index, value);
        self.inner.round_trip(transport, &command).await.map(|_| ())
    }

    /// Read one attribute of one channel as a typed value
    pub async fn get(
        &self,
        instance_tag: &str,
        attribute: AttributeKind,
        index: u32,
    ) -> Result<TypedValue> {
        let mut gate = self.inner.acquire_command().await?;
        let transport = gate.as_mut().ok_or(DeviceError::Closed)?;

        let command = protocol::get_command(instance_tag, attribute, index);
        let raw = self
            .inner
            .round_trip(transport, &command)
            .await?
            .ok_or_else(|| DeviceError::Protocol("response carried no value".to_string()))?;
        coerce(attribute, &raw)
    }

    /// Subscribe to state-change and lifecycle events
    ///
    /// Multiple receivers can be active simultaneously.
    pub fn events(&self) -> EventReceiver {
        EventReceiver::new(self.inner.events.subscribe())
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    /// Serial number reported by the device, once the handshake completed
    pub fn serial_number(&self) -> Option<String> {
        self.inner.serial.lock().unwrap().clone()
    }

    /// Number of currently active subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Inner {
    async fn open_transports(&self) -> Result<(LineTransport, LineTransport, String)> {
        let addr = self.config.addr();

        let mut notification =
            LineTransport::open(&addr, self.config.connect_timeout, "notification").await?;
        self.wait_for_banner(&mut notification).await?;

        let mut command = LineTransport::open(&addr, self.config.connect_timeout, "command").await?;
        self.wait_for_banner(&mut command).await?;

        let serial = self.read_identity(&mut command).await?;
        Ok((notification, command, serial))
    }

    /// Wait for the server banner, bounded by the handshake attempt ceiling
    async fn wait_for_banner(&self, transport: &mut LineTransport) -> Result<()> {
        for _ in 0..self.config.max_handshake_attempts {
            match transport.receive(self.config.connect_timeout).await {
                Ok(LineRead::Line(line)) => {
                    if self.classifier.is_banner(&line) {
                        return Ok(());
                    }
                }
                Ok(LineRead::Eof) => {
                    return Err(DeviceError::Connection(
                        "connection closed during handshake".to_string(),
                    ))
                }
                Err(DeviceError::Timeout(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Err(DeviceError::Connection(format!(
            "no banner within {} attempts",
            self.config.max_handshake_attempts
        )))
    }

    /// Query the device serial number, bounded like the banner wait
    async fn read_identity(&self, transport: &mut LineTransport) -> Result<String> {
        transport.send(protocol::IDENTITY_QUERY).await?;
        for _ in 0..self.config.max_handshake_attempts {
            match transport.receive(self.config.command_timeout).await {
                Ok(LineRead::Line(line)) => match self.classifier.classify(&line) {
                    ResponseKind::Ack { value: Some(serial) } => return Ok(serial),
                    ResponseKind::Ack { value: None } | ResponseKind::Other => {}
                    ResponseKind::Error(d) => return Err(DeviceError::Device(d)),
                },
                Ok(LineRead::Eof) => {
                    return Err(DeviceError::Connection(
                        "connection closed during identity query".to_string(),
                    ))
                }
                Err(DeviceError::Timeout(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Err(DeviceError::Connection(format!(
            "no identity response within {} attempts",
            self.config.max_handshake_attempts
        )))
    }

    /// Acquire the command gate, failing fast once the connection is closed
    async fn acquire_command(&self) -> Result<MutexGuard<'_, Option<LineTransport>>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(DeviceError::Closed);
        }
        tokio::select! {
            gate = self.command.lock() => {
                if gate.is_none() {
                    return Err(DeviceError::Closed);
                }
                Ok(gate)
            }
            _ = closed.wait_for(|c| *c) => Err(DeviceError::Closed),
        }
    }

    /// One full command round trip under the held gate
    ///
    /// Sends the line, then reads until the classifier yields an
    /// acknowledgement or an error, skipping unclassifiable padding up to
    /// `RESPONSE_SKIP_LIMIT` lines.
    async fn round_trip(&self, transport: &mut LineTransport, line: &str) -> Result<Option<String>> {
        transport.send(line).await?;
        let mut closed = self.closed.subscribe();
        for _ in 0..RESPONSE_SKIP_LIMIT {
            let read = tokio::select! {
                r = transport.receive(self.config.command_timeout) => r,
                _ = closed.wait_for(|c| *c) => return Err(DeviceError::Closed),
            };
            match read? {
                LineRead::Eof => {
                    // The device hung up the command stream; the owner gets
                    // the lifecycle event, not just this call's error.
                    tracing::info!("Command stream closed by device");
                    let _ = self.closed.send_replace(true);
                    self.set_state(ConnectionState::Closed);
                    return Err(DeviceError::Closed);
                }
                LineRead::Line(response) => match self.classifier.classify(&response) {
                    ResponseKind::Ack { value } => return Ok(value),
                    ResponseKind::Error(d) => return Err(DeviceError::Device(d)),
                    ResponseKind::Other => {}
                },
            }
        }
        Err(DeviceError::Protocol(format!(
            "no classifiable response to {}",
            line
        )))
    }

    /// Read notification lines and route them to their subscriptions
    async fn dispatch_loop(inner: Arc<Inner>, mut transport: LineTransport) {
        tracing::info!("Starting notification dispatch loop");
        let mut closed = inner.closed.subscribe();
        let mut consecutive_timeouts: u32 = 0;

        loop {
            let read = tokio::select! {
                r = transport.receive(inner.config.notification_timeout) => r,
                _ = closed.wait_for(|c| *c) => break,
            };
            match read {
                Ok(LineRead::Line(line)) => {
                    consecutive_timeouts = 0;
                    inner.dispatch_line(&line);
                }
                Ok(LineRead::Eof) => {
                    tracing::info!("Notification stream closed by device");
                    let _ = inner.closed.send_replace(true);
                    inner.set_state(ConnectionState::Closed);
                    break;
                }
                Err(DeviceError::Timeout(_)) => {
                    consecutive_timeouts += 1;
                    if consecutive_timeouts == inner.config.max_notification_timeouts {
                        tracing::warn!(
                            "{} consecutive notification read timeouts, connection degraded",
                            consecutive_timeouts
                        );
                        inner.set_state(ConnectionState::Degraded);
                    }
                }
                Err(e) => {
                    tracing::error!("Notification read failed: {}", e);
                    let _ = inner.closed.send_replace(true);
                    inner.set_state(ConnectionState::Closed);
                    break;
                }
            }
        }

        transport.close().await;
    }

    /// Classify and route one line from the notification transport
    ///
    /// Malformed lines, unknown labels, and coercion failures are reported
    /// and skipped; nothing here terminates the loop.
    fn dispatch_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        // Stray acknowledgements between notifications are padding, not data.
        if matches!(self.classifier.classify(line), ResponseKind::Ack { .. }) {
            return;
        }
        let Some(notification) = protocol::parse_notification(line) else {
            tracing::warn!("Skipping malformed notification line: {}", line);
            return;
        };
        let Some(subscription) = self.registry.get(&notification.label) else {
            tracing::warn!("Notification for unknown label {}", notification.label);
            return;
        };
        match coerce(subscription.attribute, &notification.raw_value) {
            Ok(value) => {
                let _ = self.events.send(DeviceEvent::State {
                    id: subscription.id(),
                    value,
                });
            }
            Err(e) => tracing::warn!("Dropping notification for {}: {}", subscription.id(), e),
        }
    }

    /// Re-issue `subscribe` for every registry entry on a fixed interval
    async fn resubscribe_loop(inner: Arc<Inner>) {
        tracing::info!("Starting resubscription loop");
        let mut closed = inner.closed.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(inner.config.resubscribe_interval) => {}
                _ = closed.wait_for(|c| *c) => break,
            }
            inner.resubscribe_all().await;
        }
    }

    /// One resubscription pass over a snapshot of the registry
    ///
    /// The gate is taken per entry so public commands interleave fairly, and
    /// each round trip carries its own timeout so one unresponsive
    /// resubscribe cannot stall the rest of the pass.
    async fn resubscribe_all(&self) {
        let entries = self.registry.snapshot();
        tracing::debug!("Resubscribing {} subscriptions", entries.len());
        for (label, subscription) in entries {
            let mut gate = match self.acquire_command().await {
                Ok(gate) => gate,
                Err(_) => return,
            };
            let Some(transport) = gate.as_mut() else {
                return;
            };
            let command = protocol::subscribe_command(&subscription.id(), &label);
            match self.round_trip(transport, &command).await {
                Ok(_) => {}
                Err(DeviceError::Device(d)) if d.contains("ALREADY_SUBSCRIBED") => {}
                Err(e) => {
                    tracing::warn!("Resubscribe for {} failed: {}", subscription.id(), e);
                }
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap();
        if *state == next {
            return;
        }
        tracing::info!("Connection state {} -> {}", *state, next);
        *state = next;
        drop(state);
        // Opening is internal; owners only see Open, Degraded, and Closed.
        if next != ConnectionState::Opening {
            let _ = self.events.send(DeviceEvent::Connection(next));
        }
    }
}
