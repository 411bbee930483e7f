use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};

use crate::workflow::Stage;

/// Business days a contractor has to move an RFI out of the open stages
/// before it counts as overdue.
pub const RESPONSE_WINDOW_BUSINESS_DAYS: u32 = 5;

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Advance `date` one calendar day at a time, counting only days that are
/// not Saturday or Sunday. Public holidays are not considered.
pub fn add_business_days(date: NaiveDate, days: u32) -> NaiveDate {
    let mut date = date;
    let mut remaining = days;
    while remaining > 0 {
        date += Duration::days(1);
        if !is_weekend(date) {
            remaining -= 1;
        }
    }
    date
}

/// Derived, never stored: recomputed on every read because "now" moves
/// independently of any write to the RFI.
pub fn is_overdue(stage: Stage, created_at: NaiveDateTime, now: NaiveDateTime) -> bool {
    stage.is_open()
        && now.date() > add_business_days(created_at.date(), RESPONSE_WINDOW_BUSINESS_DAYS)
}
