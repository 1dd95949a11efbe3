use thiserror::Error;

/// Result type for Tesira operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur when talking to a Tesira DSP
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Transport unreachable, refused, or handshake exhausted
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O error on an established stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection is closed (peer hangup or local `close()`)
    #[error("connection closed")]
    Closed,

    /// A deadline elapsed before the operation completed
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A response arrived but could not be classified
    #[error("unclassifiable response: {0}")]
    Protocol(String),

    /// The device answered a command with an error diagnostic
    #[error("device error: {0}")]
    Device(String),

    /// A value was present but not parseable as its declared kind
    #[error("cannot coerce {raw:?} as {kind}")]
    Coercion {
        /// Declared attribute kind the value failed to parse as
        kind: crate::value::AttributeKind,
        /// Raw text received from the device
        raw: String,
    },

    /// Event channel error
    #[error("event channel error: {0}")]
    ChannelError(String),
}
