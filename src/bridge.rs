// src/bridge.rs

use crate::config::NotificationConfig;
use crate::models::{ProgressEvent, ProgressStatus};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Started,
    Converting,
    Finished,
    Error,
    ConnectionStatus,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Started => "started",
            NotificationKind::Converting => "converting",
            NotificationKind::Finished => "finished",
            NotificationKind::Error => "error",
            NotificationKind::ConnectionStatus => "connection-status",
        }
    }
}

/// How long the presentation layer should keep a message on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    AutoDismiss(Duration),
    /// Stays until a later notification replaces it.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub display: Display,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPolicy {
    pub status: Duration,
    pub error: Duration,
}

impl DisplayPolicy {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            status: Duration::from_millis(config.status_ms),
            error: Duration::from_millis(config.error_ms),
        }
    }

    pub fn display_for(&self, kind: NotificationKind, message: &str) -> Display {
        match kind {
            NotificationKind::Error => Display::AutoDismiss(self.error),
            NotificationKind::ConnectionStatus if message == ProgressStatus::Disconnected.as_str() => {
                Display::Persistent
            }
            _ => Display::AutoDismiss(self.status),
        }
    }
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

/// Sending half of the relay. Cheap to clone; every clone feeds the same
/// ordered queue.
#[derive(Debug, Clone)]
pub struct NotificationBridge {
    tx: UnboundedSender<Notification>,
    policy: DisplayPolicy,
}

impl NotificationBridge {
    pub fn new(policy: DisplayPolicy) -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx, policy }, rx)
    }

    pub fn notify(&self, kind: NotificationKind, message: impl Into<String>) {
        let message = message.into();
        let display = self.policy.display_for(kind, &message);
        let notification = Notification {
            kind,
            message,
            display,
        };
        if let Err(e) = self.tx.send(notification) {
            tracing::debug!(kind = ?e.0.kind, "notification dropped, presentation layer is gone");
        }
    }

    /// Relay a progress-channel event as a user-facing notification.
    pub fn relay_progress(&self, event: &ProgressEvent) {
        let (kind, message) = describe_progress(event);
        self.notify(kind, message);
    }
}

/// Banner text for a progress event.
pub fn describe_progress(event: &ProgressEvent) -> (NotificationKind, String) {
    match event.status {
        ProgressStatus::Started => (NotificationKind::Started, "Download started...".to_string()),
        ProgressStatus::Converting => (
            NotificationKind::Converting,
            "Converting to audio...".to_string(),
        ),
        ProgressStatus::Finished => (NotificationKind::Finished, "Conversion finished".to_string()),
        ProgressStatus::Error if event.is_decode_error() => (
            NotificationKind::Error,
            format!(
                "Unreadable progress message: {}",
                event.message().unwrap_or("unknown")
            ),
        ),
        ProgressStatus::Error => (
            NotificationKind::Error,
            event.message().unwrap_or("worker reported an error").to_string(),
        ),
        ProgressStatus::Connected | ProgressStatus::Disconnected => (
            NotificationKind::ConnectionStatus,
            event.status.as_str().to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_policy_per_kind() {
        let policy = DisplayPolicy {
            status: Duration::from_secs(2),
            error: Duration::from_secs(5),
        };
        assert_eq!(
            policy.display_for(NotificationKind::Finished, "Download complete!"),
            Display::AutoDismiss(Duration::from_secs(2))
        );
        assert_eq!(
            policy.display_for(NotificationKind::Error, "boom"),
            Display::AutoDismiss(Duration::from_secs(5))
        );
        assert_eq!(
            policy.display_for(NotificationKind::ConnectionStatus, "disconnected"),
            Display::Persistent
        );
        assert_eq!(
            policy.display_for(NotificationKind::ConnectionStatus, "connected"),
            Display::AutoDismiss(Duration::from_secs(2))
        );
    }

    #[tokio::test]
    async fn notifications_arrive_in_order() {
        let (bridge, mut rx) = NotificationBridge::new(DisplayPolicy::default());
        let other = bridge.clone();
        bridge.notify(NotificationKind::Started, "one");
        other.notify(NotificationKind::Converting, "two");
        bridge.notify(NotificationKind::Finished, "three");

        let got: Vec<_> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|n| n.unwrap().message)
            .collect();
        assert_eq!(got, ["one", "two", "three"]);
    }

    #[test]
    fn notify_after_receiver_dropped_is_harmless() {
        let (bridge, rx) = NotificationBridge::new(DisplayPolicy::default());
        drop(rx);
        bridge.notify(NotificationKind::Error, "nobody listening");
    }

    #[test]
    fn progress_events_map_to_kinds() {
        let (kind, msg) = describe_progress(&ProgressEvent::new(ProgressStatus::Disconnected));
        assert_eq!(kind, NotificationKind::ConnectionStatus);
        assert_eq!(msg, "disconnected");

        let (kind, msg) = describe_progress(&ProgressEvent::decode_error("bad json"));
        assert_eq!(kind, NotificationKind::Error);
        assert!(msg.contains("bad json"));

        let (kind, _) = describe_progress(&ProgressEvent::new(ProgressStatus::Converting));
        assert_eq!(kind, NotificationKind::Converting);
    }
}
