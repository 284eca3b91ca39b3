//! Stream protocol frames
//!
//! The stream carries JSON text frames with a `type` discriminant. Frames are
//! decoded once here into [`StreamFrame`]; everything downstream matches on
//! the enum.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::crypto;
use crate::models::{Dismissal, MirrorNotification};

/// Outbound no-op sent by the keepalive pulse
pub const KEEPALIVE_TOKEN: &str = "keepalive";

/// What a tickle says changed server-side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickleKind {
    Push,
    Device,
    Other(String),
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Server heartbeat (`nop`)
    Liveness,
    /// Something changed server-side; fetch it
    Tickle(TickleKind),
    /// Mirrored phone notification
    MirrorPush(MirrorNotification),
    /// Phone-side dismissal of a mirrored notification
    Dismissal(Dismissal),
    /// Ephemeral whose payload is still ciphertext (the raw `push` object)
    EncryptedMirrorPush(Map<String, Value>),
    /// Valid frame this client has no use for
    Unrecognized(String),
}

/// Raw shape on the wire
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame {
    Nop,
    Tickle {
        #[serde(default)]
        subtype: String,
    },
    Push {
        push: Map<String, Value>,
    },
    #[serde(other)]
    Other,
}

impl StreamFrame {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let wire: WireFrame = serde_json::from_str(text)?;
        Ok(match wire {
            WireFrame::Nop => StreamFrame::Liveness,
            WireFrame::Tickle { subtype } => StreamFrame::Tickle(match subtype.as_str() {
                "push" => TickleKind::Push,
                "device" => TickleKind::Device,
                _ => TickleKind::Other(subtype),
            }),
            WireFrame::Push { push } => Self::from_ephemeral(push)?,
            WireFrame::Other => StreamFrame::Unrecognized(frame_type(text)),
        })
    }

    /// Classify the `push` object of an ephemeral (also used after decryption)
    pub fn from_ephemeral(push: Map<String, Value>) -> Result<Self, serde_json::Error> {
        if crypto::is_encrypted(&push) {
            return Ok(StreamFrame::EncryptedMirrorPush(push));
        }

        let kind = push
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match kind.as_str() {
            "mirror" => Ok(StreamFrame::MirrorPush(serde_json::from_value(
                Value::Object(push),
            )?)),
            "dismissal" => Ok(StreamFrame::Dismissal(serde_json::from_value(
                Value::Object(push),
            )?)),
            _ => Ok(StreamFrame::Unrecognized(format!("push/{}", kind))),
        }
    }
}

fn frame_type(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nop() {
        assert_eq!(
            StreamFrame::decode(r#"{"type":"nop"}"#).unwrap(),
            StreamFrame::Liveness
        );
    }

    #[test]
    fn test_decode_tickles() {
        assert_eq!(
            StreamFrame::decode(r#"{"type":"tickle","subtype":"push"}"#).unwrap(),
            StreamFrame::Tickle(TickleKind::Push)
        );
        assert_eq!(
            StreamFrame::decode(r#"{"type":"tickle","subtype":"device"}"#).unwrap(),
            StreamFrame::Tickle(TickleKind::Device)
        );
        assert_eq!(
            StreamFrame::decode(r#"{"type":"tickle","subtype":"account"}"#).unwrap(),
            StreamFrame::Tickle(TickleKind::Other("account".to_string()))
        );
    }

    #[test]
    fn test_decode_mirror() {
        let frame = StreamFrame::decode(
            r#"{"type":"push","push":{"type":"mirror","package_name":"com.whatsapp",
                "notification_id":"12","title":"Bob","body":"hey","dismissible":true}}"#,
        )
        .unwrap();

        let StreamFrame::MirrorPush(mirror) = frame else {
            panic!("Expected mirror, got {:?}", frame);
        };
        assert_eq!(mirror.package_name, "com.whatsapp");
        assert_eq!(mirror.notification_id, "12");
        assert!(mirror.dismissible);
    }

    #[test]
    fn test_decode_dismissal() {
        let frame = StreamFrame::decode(
            r#"{"type":"push","push":{"type":"dismissal","package_name":"com.whatsapp",
                "notification_id":12}}"#,
        )
        .unwrap();

        match frame {
            StreamFrame::Dismissal(d) => assert_eq!(d.notification_id, "12"),
            other => panic!("Expected dismissal, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_encrypted_ephemeral() {
        let frame = StreamFrame::decode(
            r#"{"type":"push","push":{"encrypted":true,"ciphertext":"MQ=="}}"#,
        )
        .unwrap();
        assert!(matches!(frame, StreamFrame::EncryptedMirrorPush(_)));
    }

    #[test]
    fn test_unknown_types_are_not_errors() {
        assert_eq!(
            StreamFrame::decode(r#"{"type":"broadcast"}"#).unwrap(),
            StreamFrame::Unrecognized("broadcast".to_string())
        );
        assert_eq!(
            StreamFrame::decode(r#"{"type":"push","push":{"type":"clip","body":"x"}}"#).unwrap(),
            StreamFrame::Unrecognized("push/clip".to_string())
        );
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(StreamFrame::decode("not json").is_err());
        assert!(StreamFrame::decode(r#"{"no_type":true}"#).is_err());
        // mirror without its natural key
        assert!(StreamFrame::decode(r#"{"type":"push","push":{"type":"mirror"}}"#).is_err());
    }
}
