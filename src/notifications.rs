use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewNotification, Notification};
use crate::schema::notifications;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_SENDING: &str = "sending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

pub const EVENT_STATUS_CHANGED: &str = "status_changed";
pub const EVENT_LINK_GENERATED: &str = "link_generated";
pub const EVENT_RESPONSE_RECEIVED: &str = "response_received";

pub const PERFORMED_BY_USER: &str = "user";
pub const PERFORMED_BY_CLIENT: &str = "client";

#[derive(Debug, Error)]
pub enum NotificationQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type NotificationQueueResult<T> = Result<T, NotificationQueueError>;

/// Event payload consumed by the dispatcher and kept as audit history.
/// `performed_by` is a user id for tenant actions and a token id for
/// client-link actions; `performed_by_type` tells the two apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub performed_by: Uuid,
    pub performed_by_type: String,
    pub from_status: String,
    pub from_stage: String,
    pub to_status: String,
    pub to_stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn enqueue_notification(
    conn: &mut PgConnection,
    rfi_id: Uuid,
    event_type: &str,
    metadata: &EventMetadata,
) -> NotificationQueueResult<Notification> {
    let new_notification = NewNotification {
        id: Uuid::new_v4(),
        rfi_id,
        event_type: event_type.to_string(),
        metadata: serde_json::to_value(metadata)?,
        status: STATUS_QUEUED.to_string(),
        run_after: Utc::now().naive_utc(),
    };

    diesel::insert_into(notifications::table)
        .values(&new_notification)
        .execute(conn)?;

    let notification = notifications::table.find(new_notification.id).first(conn)?;
    Ok(notification)
}

/// Fire-and-forget hand-off: a failure to enqueue is logged and swallowed so
/// it can never fail or roll back the workflow call that triggered it.
pub fn emit(conn: &mut PgConnection, rfi_id: Uuid, event_type: &str, metadata: &EventMetadata) {
    if let Err(err) = enqueue_notification(conn, rfi_id, event_type, metadata) {
        tracing::warn!(
            rfi_id = %rfi_id,
            event_type = %event_type,
            error = %err,
            "failed to enqueue notification event"
        );
    }
}

pub fn reserve_notification(
    conn: &mut PgConnection,
) -> NotificationQueueResult<Option<Notification>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let notification_opt = notifications::table
            .filter(notifications::status.eq(STATUS_QUEUED))
            .filter(notifications::run_after.le(now))
            .order(notifications::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Notification>(conn)
            .optional()?;

        if let Some(notification) = notification_opt {
            diesel::update(notifications::table.find(notification.id))
                .set((
                    notifications::status.eq(STATUS_SENDING),
                    notifications::attempts.eq(notification.attempts + 1),
                    notifications::updated_at.eq(now),
                ))
                .execute(conn)?;

            let refreshed = notifications::table.find(notification.id).first(conn)?;
            Ok::<Option<Notification>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<Notification>, diesel::result::Error>(None)
        }
    })
    .map_err(NotificationQueueError::from)
}

pub fn mark_notification_sent(
    conn: &mut PgConnection,
    notification_id: Uuid,
) -> NotificationQueueResult<()> {
    diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::status.eq(STATUS_SENT),
            notifications::last_error.eq::<Option<String>>(None),
            notifications::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_notification_after(
    conn: &mut PgConnection,
    notification_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> NotificationQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::status.eq(STATUS_QUEUED),
            notifications::run_after.eq(next_run.naive_utc()),
            notifications::last_error.eq(Some(error_message.to_string())),
            notifications::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_notification_failed(
    conn: &mut PgConnection,
    notification_id: Uuid,
    error_message: &str,
) -> NotificationQueueResult<()> {
    diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::status.eq(STATUS_FAILED),
            notifications::last_error.eq(Some(error_message.to_string())),
            notifications::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Event history for one RFI, oldest first. Serves the audit view; the
/// dispatch status of each event rides along.
pub fn history_for_rfi(
    conn: &mut PgConnection,
    rfi_id: Uuid,
) -> NotificationQueueResult<Vec<Notification>> {
    let rows = notifications::table
        .filter(notifications::rfi_id.eq(rfi_id))
        .order(notifications::created_at.asc())
        .load(conn)?;
    Ok(rows)
}
