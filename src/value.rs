use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute kinds understood by this library
///
/// The Tesira Text Protocol exposes many more block attributes; only the
/// level and mute attributes of audio control blocks are modelled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// Channel level, an integer percentage 0-100
    Level,
    /// Channel mute, a boolean
    Mute,
}

impl AttributeKind {
    /// Protocol token for this attribute (`level` / `mute`)
    pub fn token(&self) -> &'static str {
        match self {
            AttributeKind::Level => "level",
            AttributeKind::Mute => "mute",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A device value coerced to its declared attribute kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    /// Level value, 0-100
    Level(i64),
    /// Mute state
    Mute(bool),
}

impl TypedValue {
    /// The attribute kind this value belongs to
    pub fn kind(&self) -> AttributeKind {
        match self {
            TypedValue::Level(_) => AttributeKind::Level,
            TypedValue::Mute(_) => AttributeKind::Mute,
        }
    }
}

impl fmt::Display for TypedValue {
    /// Formats the value as the protocol sends it on the wire
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Level(level) => write!(f, "{}", level),
            TypedValue::Mute(muted) => write!(f, "{}", muted),
        }
    }
}

impl From<bool> for TypedValue {
    fn from(muted: bool) -> Self {
        TypedValue::Mute(muted)
    }
}

impl From<i64> for TypedValue {
    fn from(level: i64) -> Self {
        TypedValue::Level(level)
    }
}

/// Coerce a raw textual value into a typed one according to its declared kind
///
/// Levels must parse as integers in 0-100; values outside that range are
/// rejected, never clamped. Mute accepts the protocol's boolean tokens
/// (`true`/`false`/`1`/`0`). A failed coercion rejects only the single value.
pub fn coerce(kind: AttributeKind, raw: &str) -> Result<TypedValue, DeviceError> {
    let text = raw.trim();
    match kind {
        AttributeKind::Level => match text.parse::<i64>() {
            Ok(level) if (0..=100).contains(&level) => Ok(TypedValue::Level(level)),
            _ => Err(DeviceError::Coercion {
                kind,
                raw: raw.to_string(),
            }),
        },
        AttributeKind::Mute => match text {
            "true" | "1" => Ok(TypedValue::Mute(true)),
            "false" | "0" => Ok(TypedValue::Mute(false)),
            _ => Err(DeviceError::Coercion {
                kind,
                raw: raw.to_string(),
            }),
        },
    }
}
