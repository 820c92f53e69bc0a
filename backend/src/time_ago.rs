//! Vietnamese relative-time labels ("5 phút trước") for the price table.

use chrono::{DateTime, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;

/// Label for how long ago `then` was, measured at `now`.
///
/// Buckets are checked in order and the first match wins; every division
/// floors. A `then` in the future reads as "0 giây trước".
pub fn format_elapsed(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - then).num_seconds().max(0);

    if diff < MINUTE {
        return format!("{} giây trước", diff);
    }
    if diff < HOUR {
        return format!("{} phút trước", diff / MINUTE);
    }
    if diff < DAY {
        return format!("{} giờ trước", diff / HOUR);
    }

    let days = diff / DAY;
    if days < 7 {
        format!("{} ngày trước", days)
    } else if days < 30 {
        format!("{} tuần trước", days / 7)
    } else if days < 365 {
        format!("{} tháng trước", days / 30)
    } else {
        format!("{} năm trước", days / 365)
    }
}

/// [`format_elapsed`] against the current clock
pub fn time_ago(then: DateTime<Utc>) -> String {
    format_elapsed(then, Utc::now())
}
