//! Desktop notifications
//!
//! [`NotificationDispatch`] decides what to surface; a [`Desktop`]
//! implementation does the surfacing. The CLI renders to the terminal, tests
//! record calls.

mod dispatch;

pub use dispatch::NotificationDispatch;

use serde::Serialize;

/// A notification ready to show
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Stable id; showing the same id again replaces the previous one
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64 icon for mirrored notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Stays until the user acts on it
    pub sticky: bool,
    /// Offer a dismiss action
    pub dismissible: bool,
}

/// Host notification surface
pub trait Desktop: Send + Sync + 'static {
    fn show(&self, notification: &Notification);

    /// Remove a notification by id; unknown ids are ignored
    fn clear(&self, id: &str);

    /// Open a link in the background
    fn open_url(&self, url: &str);
}

/// Id of the notification for a persisted push
pub fn push_notification_id(iden: &str) -> String {
    format!("pushbullet-{}", iden)
}

/// Id of the notification for a mirrored phone notification
pub fn mirror_notification_id(key: &crate::models::MirrorKey) -> String {
    format!("mirror-{}", key)
}
