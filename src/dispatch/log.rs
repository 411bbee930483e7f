use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::models::Notification;
use crate::state::AppState;

use super::{Delivery, NotificationChannel};

/// Default channel: records the event in the structured log and considers it
/// delivered. Real delivery (e-mail, in-app) lives outside this service and
/// plugs in through the same trait.
pub struct LogChannel;

impl LogChannel {
    pub fn new() -> Self {
        LogChannel
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, _state: Arc<AppState>, notification: Notification) -> Delivery {
        info!(
            rfi_id = %notification.rfi_id,
            event_type = %notification.event_type,
            metadata = %notification.metadata,
            "notification event"
        );
        Delivery::Delivered
    }
}
