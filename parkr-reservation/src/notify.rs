use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parkr_core::{Notifier, NotifyError};
use parkr_shared::SlotNotification;

/// Fire-and-forget side channel for reserve/free notifications.
///
/// Delivery runs on its own task. A failed send is logged and dropped; it never
/// reaches the caller and never rolls back the slot transition that triggered it.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Queue a notification. The returned handle may be ignored.
    pub fn dispatch(&self, notification: SlotNotification) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match notifier.send(&notification).await {
                Ok(()) => debug!(
                    "Notification sent: {} {} for {:?}",
                    notification.action, notification.slot_id, notification.user_email
                ),
                Err(e) => warn!(
                    "Notification for {} {} dropped: {}",
                    notification.action, notification.slot_id, e
                ),
            }
        })
    }
}

/// Notifier used when no delivery channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &SlotNotification) -> Result<(), NotifyError> {
        info!(
            "[notify] {} slot {} at {} for {}",
            notification.action, notification.slot_id, notification.timestamp, notification.user_name
        );
        Ok(())
    }
}
