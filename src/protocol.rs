use crate::subscription::SubscriptionId;
use crate::value::{AttributeKind, TypedValue};

/// Query answered by the device with its serial number during the handshake
pub const IDENTITY_QUERY: &str = "DEVICE get serialNumber";

const NOTIFICATION_PREFIX: &str = "! \"publishToken\":\"";

/// Format a `subscribe` command for a subscription under a correlation label
pub fn subscribe_command(id: &SubscriptionId, label: &str) -> String {
    format!(
        "\"{}\" subscribe {} {} {}",
        id.instance_tag, id.attribute, id.index, label
    )
}

/// Format an `unsubscribe` command for a subscription's correlation label
pub fn unsubscribe_command(id: &SubscriptionId, label: &str) -> String {
    format!(
        "\"{}\" unsubscribe {} {} {}",
        id.instance_tag, id.attribute, id.index, label
    )
}

/// Format a `set` command
pub fn set_command(
    instance_tag: &str,
    attribute: AttributeKind,
    index: u32,
    value: TypedValue,
) -> String {
    format!("\"{}\" set {} {} {}", instance_tag, attribute, index, value)
}

/// Format a `get` command
pub fn get_command(instance_tag: &str, attribute: AttributeKind, index: u32) -> String {
    format!("\"{}\" get {} {}", instance_tag, attribute, index)
}

/// An unsolicited notification line, split into label and raw value payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Correlation label the device tagged the line with
    pub label: String,
    /// Raw textual value, still to be coerced by the subscription's kind
    pub raw_value: String,
}

/// Parse a notification line
///
/// Returns `None` for any line not shaped like
/// `! "publishToken":"<label>" <payload>`; such lines are skipped by the
/// dispatch loop, never fatal. The payload may be bare (`42`) or carry the
/// device's `"value":42` form.
pub fn parse_notification(line: &str) -> Option<Notification> {
    let rest = line.trim().strip_prefix(NOTIFICATION_PREFIX)?;
    let (label, payload) = rest.split_once('"')?;
    if label.is_empty() {
        return None;
    }
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    let raw_value = payload
        .strip_prefix("\"value\":")
        .unwrap_or(payload)
        .trim()
        .trim_matches('"')
        .to_string();
    if raw_value.is_empty() {
        return None;
    }
    Some(Notification {
        label: label.to_string(),
        raw_value,
    })
}

/// Classification of one line read from the command transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// Success acknowledgement, optionally carrying a value payload
    Ack {
        /// Raw value text, when the response carried one
        value: Option<String>,
    },
    /// Device-reported error with its diagnostic text
    Error(String),
    /// A line that is neither an acknowledgement nor an error (blank padding,
    /// stray notifications); callers skip these within their attempt bound
    Other,
}

/// Pluggable classifier for command responses and the connection banner
///
/// The acknowledgement vocabulary differs between firmware generations, so
/// classification ships as a strategy rather than a hard-coded token set.
pub trait ResponseClassifier: Send + Sync {
    /// Classify one response line
    fn classify(&self, line: &str) -> ResponseKind;

    /// Whether this line is the server's welcome banner
    fn is_banner(&self, line: &str) -> bool;
}

/// Classifier for the stock Tesira Text Protocol server
///
/// Understands `+OK` with an optional `"value":<v>` payload, `-ERR` with a
/// diagnostic, and the TTP welcome banner.
pub struct TtpClassifier;

impl ResponseClassifier for TtpClassifier {
    fn classify(&self, line: &str) -> ResponseKind {
        let line = line.trim();
        if line == "+OK" {
            return ResponseKind::Ack { value: None };
        }
        if let Some(rest) = line.strip_prefix("+OK") {
            let rest = rest.trim();
            let value = rest
                .strip_prefix("\"value\":")
                .unwrap_or(rest)
                .trim()
                .trim_matches('"');
            return ResponseKind::Ack {
                value: Some(value.to_string()),
            };
        }
        if let Some(rest) = line.strip_prefix("-ERR") {
            return ResponseKind::Error(rest.trim().to_string());
        }
        ResponseKind::Other
    }

    fn is_banner(&self, line: &str) -> bool {
        line.contains("Welcome to the Tesira Text Protocol Server")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_id(tag: &str, index: u32) -> SubscriptionId {
        SubscriptionId {
            instance_tag: tag.to_string(),
            attribute: AttributeKind::Level,
            index,
        }
    }

    #[test]
    fn commands_quote_the_instance_tag() {
        assert_eq!(
            subscribe_command(&level_id("OfficeSpeakersPCLevel", 1), "L1"),
            "\"OfficeSpeakersPCLevel\" subscribe level 1 L1"
        );
        assert_eq!(
            unsubscribe_command(&level_id("OfficeSpeakersPCLevel", 1), "L1"),
            "\"OfficeSpeakersPCLevel\" unsubscribe level 1 L1"
        );
        assert_eq!(
            set_command("Amp", AttributeKind::Mute, 2, TypedValue::Mute(true)),
            "\"Amp\" set mute 2 true"
        );
        assert_eq!(
            get_command("Amp", AttributeKind::Level, 2),
            "\"Amp\" get level 2"
        );
    }

    #[test]
    fn parses_bare_payload_notification() {
        let n = parse_notification("! \"publishToken\":\"L1\" 42").unwrap();
        assert_eq!(n.label, "L1");
        assert_eq!(n.raw_value, "42");
    }

    #[test]
    fn parses_value_payload_notification() {
        let n = parse_notification("! \"publishToken\":\"L3\" \"value\":true").unwrap();
        assert_eq!(n.label, "L3");
        assert_eq!(n.raw_value, "true");

        let quoted = parse_notification("! \"publishToken\":\"L3\" \"value\":\"false\"").unwrap();
        assert_eq!(quoted.raw_value, "false");
    }

    #[test]
    fn rejects_malformed_notifications() {
        assert!(parse_notification("").is_none());
        assert!(parse_notification("+OK").is_none());
        assert!(parse_notification("! \"publishToken\":\"L1\"").is_none());
        assert!(parse_notification("! \"publishToken\":\"\" 42").is_none());
        assert!(parse_notification("! garbage").is_none());
    }

    #[test]
    fn classifies_acknowledgements() {
        let c = TtpClassifier;
        assert_eq!(c.classify("+OK"), ResponseKind::Ack { value: None });
        assert_eq!(
            c.classify("+OK \"value\":42"),
            ResponseKind::Ack {
                value: Some("42".to_string())
            }
        );
        assert_eq!(
            c.classify("+OK \"value\":\"12345678\""),
            ResponseKind::Ack {
                value: Some("12345678".to_string())
            }
        );
    }

    #[test]
    fn classifies_errors_and_noise() {
        let c = TtpClassifier;
        assert_eq!(
            c.classify("-ERR ALREADY_SUBSCRIBED"),
            ResponseKind::Error("ALREADY_SUBSCRIBED".to_string())
        );
        assert_eq!(c.classify(""), ResponseKind::Other);
        assert_eq!(
            c.classify("! \"publishToken\":\"L1\" 42"),
            ResponseKind::Other
        );
    }

    #[test]
    fn recognizes_the_banner() {
        let c = TtpClassifier;
        assert!(c.is_banner("Welcome to the Tesira Text Protocol Server..."));
        assert!(!c.is_banner("+OK"));
    }
}
