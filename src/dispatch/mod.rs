use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    models::Notification,
    notifications::{
        mark_notification_failed, mark_notification_sent, reserve_notification,
        retry_notification_after, NotificationQueueError,
    },
    state::AppState,
};

pub mod log;

const MAX_DELIVERY_ATTEMPTS: i32 = 5;

#[derive(Debug)]
pub enum Delivery {
    Delivered,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

/// Hand-off point to whatever actually carries the notification (e-mail,
/// in-app, webhook). The core's contract ends at "accept the event"; a
/// channel decides delivery on its own and reports back per event.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, state: Arc<AppState>, notification: Notification) -> Delivery;
}

pub struct Dispatcher {
    state: Arc<AppState>,
    channel: Arc<dyn NotificationChannel>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        state: Arc<AppState>,
        channel: Arc<dyn NotificationChannel>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            channel,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(channel = self.channel.name(), "notification dispatcher started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "dispatcher tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn tick(&self) -> Result<bool, NotificationQueueError> {
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to obtain database connection in dispatcher");
                return Ok(false);
            }
        };

        let notification_opt = reserve_notification(&mut conn)?;
        drop(conn);

        let Some(notification) = notification_opt else {
            return Ok(false);
        };

        let result = self
            .channel
            .deliver(self.state.clone(), notification.clone())
            .await;
        match result {
            Delivery::Delivered => {
                if let Ok(mut conn) = self.state.db() {
                    mark_notification_sent(&mut conn, notification.id)?;
                    info!(
                        notification_id = %notification.id,
                        rfi_id = %notification.rfi_id,
                        event_type = %notification.event_type,
                        "notification delivered"
                    );
                } else {
                    error!("failed to mark notification sent due to pool error");
                }
            }
            Delivery::Retry { delay, error } => {
                if let Ok(mut conn) = self.state.db() {
                    if notification.attempts >= MAX_DELIVERY_ATTEMPTS {
                        error!(
                            notification_id = %notification.id,
                            event_type = %notification.event_type,
                            %error,
                            "delivery attempts exhausted"
                        );
                        mark_notification_failed(&mut conn, notification.id, &error)?;
                    } else {
                        warn!(
                            notification_id = %notification.id,
                            event_type = %notification.event_type,
                            %error,
                            "notification will retry"
                        );
                        retry_notification_after(&mut conn, notification.id, delay, &error)?;
                    }
                } else {
                    error!("failed to requeue notification due to pool error");
                }
            }
            Delivery::Failed { error } => {
                error!(
                    notification_id = %notification.id,
                    event_type = %notification.event_type,
                    %error,
                    "notification delivery failed"
                );
                if let Ok(mut conn) = self.state.db() {
                    mark_notification_failed(&mut conn, notification.id, &error)?;
                } else {
                    error!("failed to mark notification failed due to pool error");
                }
            }
        }
        Ok(true)
    }
}

pub fn default_channel() -> Arc<dyn NotificationChannel> {
    Arc::new(log::LogChannel::new())
}
