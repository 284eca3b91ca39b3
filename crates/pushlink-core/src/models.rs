//! Data models for pushlink
//!
//! Wire shapes of the push service: persisted push records, ephemeral mirror
//! and dismissal events, outbound pushes, users and devices. Unknown fields
//! are kept so cached records round-trip without loss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of a persisted push
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    Note,
    Link,
    File,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PushKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushKind::Note => "note",
            PushKind::Link => "link",
            PushKind::File => "file",
            PushKind::Unknown => "push",
        }
    }
}

/// A push record as returned by `GET /pushes`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushRecord {
    /// Server-assigned unique identifier
    pub iden: String,
    #[serde(rename = "type", default)]
    pub kind: PushKind,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub dismissed: bool,
    /// Server-assigned creation time (seconds since epoch)
    #[serde(default)]
    pub created: f64,
    /// Server-assigned modification time (seconds since epoch)
    #[serde(default)]
    pub modified: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_device_iden: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_device_iden: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    /// Fields this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PushRecord {
    /// Create a bare record (mostly useful for tests and fixtures)
    pub fn new(iden: impl Into<String>, kind: PushKind, modified: f64) -> Self {
        Self {
            iden: iden.into(),
            kind,
            active: true,
            created: modified,
            modified,
            ..Self::default()
        }
    }

    /// Text used as the notification body
    pub fn notification_body(&self) -> String {
        let body = self.body.as_deref().filter(|b| !b.is_empty());
        match self.kind {
            PushKind::Note => body.unwrap_or("New note").to_string(),
            PushKind::Link => body
                .or(self.url.as_deref())
                .unwrap_or("New link")
                .to_string(),
            PushKind::File => match (body, self.file_name.as_deref()) {
                (Some(body), _) => body.to_string(),
                (None, Some(name)) => format!("File: {}", name),
                (None, None) => "New file".to_string(),
            },
            PushKind::Unknown => body.unwrap_or("New push").to_string(),
        }
    }
}

/// Response body of `GET /pushes`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushPage {
    #[serde(default)]
    pub pushes: Vec<PushRecord>,
    /// Present when more pages exist (not followed: deltas are small)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Natural key of a mirrored notification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MirrorKey {
    pub package_name: String,
    pub notification_id: String,
}

impl std::fmt::Display for MirrorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.package_name, self.notification_id)
    }
}

/// A phone notification relayed through the stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MirrorNotification {
    pub package_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub notification_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Base64 JPEG icon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub dismissible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_device_iden: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_user_iden: Option<String>,
}

impl MirrorNotification {
    pub fn key(&self) -> MirrorKey {
        MirrorKey {
            package_name: self.package_name.clone(),
            notification_id: self.notification_id.clone(),
        }
    }
}

/// A phone-side dismissal of a mirrored notification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dismissal {
    pub package_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub notification_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_user_iden: Option<String>,
}

impl Dismissal {
    pub fn key(&self) -> MirrorKey {
        MirrorKey {
            package_name: self.package_name.clone(),
            notification_id: self.notification_id.clone(),
        }
    }
}

/// Android sends notification ids as numbers, other sources as strings
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Body of `POST /pushes`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingPush {
    #[serde(rename = "type")]
    pub kind: PushKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Target device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_iden: Option<String>,
    /// Target person
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Client-generated id; the server ignores a second push with the same guid
    pub guid: String,
}

impl OutgoingPush {
    fn new(kind: PushKind) -> Self {
        Self {
            kind,
            title: None,
            body: None,
            url: None,
            file_name: None,
            file_type: None,
            file_url: None,
            device_iden: None,
            email: None,
            guid: Uuid::new_v4().to_string(),
        }
    }

    /// A text note
    pub fn note(title: Option<String>, body: impl Into<String>) -> Self {
        Self {
            title,
            body: Some(body.into()),
            ..Self::new(PushKind::Note)
        }
    }

    /// A link, optionally with a message
    pub fn link(url: impl Into<String>, title: Option<String>, body: Option<String>) -> Self {
        Self {
            url: Some(url.into()),
            title,
            body,
            ..Self::new(PushKind::Link)
        }
    }

    /// A file that has already been uploaded
    pub fn file(
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_url: impl Into<String>,
        body: Option<String>,
    ) -> Self {
        Self {
            file_name: Some(file_name.into()),
            file_type: Some(file_type.into()),
            file_url: Some(file_url.into()),
            body,
            ..Self::new(PushKind::File)
        }
    }

    /// Send to one device instead of all
    pub fn to_device(mut self, device_iden: impl Into<String>) -> Self {
        self.device_iden = Some(device_iden.into());
        self
    }

    /// Send to another user by email
    pub fn to_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A push this client sent, as kept in the local sent list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentPush {
    #[serde(flatten)]
    pub push: PushRecord,
    #[serde(default)]
    pub is_sent: bool,
    /// Milliseconds since epoch
    #[serde(default)]
    pub sent_at: i64,
}

impl SentPush {
    /// Mark a record returned by `POST /pushes` as sent just now
    pub fn now(push: PushRecord) -> Self {
        Self {
            push,
            is_sent: true,
            sent_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Response body of `GET /users/me`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub iden: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A registered device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub iden: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Response body of `GET /devices`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// Body of `POST /devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    pub nickname: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
}
