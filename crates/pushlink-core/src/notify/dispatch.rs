//! Filtering and de-duplication rules for desktop notifications

use std::sync::Arc;

use tracing::{debug, warn};

use super::{mirror_notification_id, push_notification_id, Desktop, Notification};
use crate::config::{Config, NotificationSettings};
use crate::models::{Dismissal, MirrorNotification, PushKind, PushRecord};
use crate::store::{LocalStore, MIRROR_LIMIT};
use crate::sync::SyncOutcome;

pub struct NotificationDispatch {
    settings: NotificationSettings,
    local_device_iden: Option<String>,
    auto_open_links: bool,
    store: LocalStore,
    desktop: Arc<dyn Desktop>,
    /// Mirrors currently on screen, newest first
    mirrors: Vec<MirrorNotification>,
}

impl NotificationDispatch {
    pub fn new(config: &Config, store: LocalStore, desktop: Arc<dyn Desktop>) -> Self {
        let mirrors = store.mirror_notifications().unwrap_or_else(|e| {
            warn!("Discarding unreadable mirror notifications: {}", e);
            Vec::new()
        });

        Self {
            settings: config.notifications.clone(),
            local_device_iden: config.local_device_iden.clone(),
            auto_open_links: config.auto_open_links,
            store,
            desktop,
            mirrors,
        }
    }

    pub fn mirrors(&self) -> &[MirrorNotification] {
        &self.mirrors
    }

    /// Device scoping and browser-push rules for a persisted push
    pub fn should_notify_push(&self, push: &PushRecord) -> bool {
        if !push.active || push.dismissed {
            return false;
        }

        let local = self.local_device_iden.as_deref();
        if self.settings.hide_browser_pushes
            && local.is_some()
            && push.source_device_iden.as_deref() == local
        {
            return false;
        }

        let targeted_here = match (local, push.target_device_iden.as_deref()) {
            (Some(local), Some(target)) => local == target,
            _ => false,
        };
        if local.is_some() || self.settings.only_browser_pushes {
            return targeted_here;
        }
        true
    }

    /// Mirroring and mute rules for a phone notification
    pub fn should_notify_mirror(&self, mirror: &MirrorNotification) -> bool {
        self.settings.notification_mirroring
            && !self
                .settings
                .muted_packages
                .iter()
                .any(|p| p == &mirror.package_name)
    }

    /// Surface what a sync pass found; returns the number of notifications shown
    pub fn on_sync(&mut self, outcome: &SyncOutcome) -> usize {
        for iden in &outcome.dismissed {
            self.desktop.clear(&push_notification_id(iden));
        }

        if !outcome.notify {
            return 0;
        }

        let mut shown = 0;
        for push in &outcome.new {
            if !self.should_notify_push(push) {
                debug!("Suppressed notification for push {}", push.iden);
                continue;
            }

            self.desktop.show(&Notification {
                id: push_notification_id(&push.iden),
                title: push.title.clone().unwrap_or_default(),
                body: push.notification_body(),
                url: push.url.clone().or_else(|| push.file_url.clone()),
                icon: None,
                sticky: self.settings.require_interaction,
                dismissible: true,
            });
            shown += 1;

            if self.auto_open_links && push.kind == PushKind::Link {
                if let Some(url) = &push.url {
                    debug!("Auto-opening link from push {}", push.iden);
                    self.desktop.open_url(url);
                }
            }
        }
        shown
    }

    /// Show a mirrored notification, replacing any with the same key
    pub fn on_mirror(&mut self, mirror: MirrorNotification) -> bool {
        if !self.should_notify_mirror(&mirror) {
            debug!("Suppressed mirror from {}", mirror.package_name);
            return false;
        }

        let key = mirror.key();
        self.desktop.show(&Notification {
            id: mirror_notification_id(&key),
            title: mirror
                .title
                .clone()
                .or_else(|| mirror.application_name.clone())
                .unwrap_or_else(|| mirror.package_name.clone()),
            body: mirror.body.clone().unwrap_or_default(),
            url: None,
            icon: mirror.icon.clone(),
            sticky: self.settings.require_interaction_mirrored,
            dismissible: mirror.dismissible,
        });

        self.mirrors.retain(|m| m.key() != key);
        self.mirrors.insert(0, mirror);
        self.mirrors.truncate(MIRROR_LIMIT);
        self.persist_mirrors();
        true
    }

    /// The phone dismissed a mirrored notification
    pub fn on_dismissal(&mut self, dismissal: &Dismissal) {
        let key = dismissal.key();
        self.desktop.clear(&mirror_notification_id(&key));

        let before = self.mirrors.len();
        self.mirrors.retain(|m| m.key() != key);
        if self.mirrors.len() != before {
            self.persist_mirrors();
        }
    }

    fn persist_mirrors(&self) {
        if let Err(e) = self.store.set_mirror_notifications(&self.mirrors) {
            warn!("Failed to persist mirror notifications: {}", e);
        }
    }
}
