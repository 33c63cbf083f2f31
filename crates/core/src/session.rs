//! Trading-session clock helpers. All session logic runs on the
//! America/New_York zone database, including across DST transitions.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

/// Regular session open, Eastern wall clock.
pub const SESSION_OPEN: NaiveTime = match NaiveTime::from_hms_opt(9, 30, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Regular session close, Eastern wall clock.
pub const SESSION_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(16, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Converts a UTC instant to Eastern time.
#[must_use]
pub fn to_eastern(ts: DateTime<Utc>) -> DateTime<Tz> {
    ts.with_timezone(&New_York)
}

/// Eastern calendar date of a UTC instant.
#[must_use]
pub fn eastern_date(ts: DateTime<Utc>) -> NaiveDate {
    to_eastern(ts).date_naive()
}

/// True on Monday through Friday (holidays are handled by the restricted
/// calendar, not here).
#[must_use]
pub fn is_weekday(ts: DateTime<Utc>) -> bool {
    to_eastern(ts).weekday().number_from_monday() <= 5
}

/// True when the Eastern wall clock is inside `[start, end]`.
#[must_use]
pub fn within_et_window(ts: DateTime<Utc>, start: NaiveTime, end: NaiveTime) -> bool {
    let t = to_eastern(ts).time();
    t >= start && t <= end
}

/// The session key for an instant: the Eastern date once the 09:30 open has
/// passed, otherwise `None`. Ticks before the open do not belong to the new
/// session.
#[must_use]
pub fn session_key(ts: DateTime<Utc>) -> Option<NaiveDate> {
    let et = to_eastern(ts);
    if et.time() >= SESSION_OPEN {
        Some(et.date_naive())
    } else {
        None
    }
}

/// Floors an instant to the start of its minute.
#[must_use]
pub fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp() - i64::from(ts.time().second());
    Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn eastern_conversion_applies_dst_offset() {
        // June: EDT is UTC-4.
        let summer = utc("2026-06-15 14:30:00");
        assert_eq!(to_eastern(summer).time(), NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        // January: EST is UTC-5.
        let winter = utc("2026-01-15 14:30:00");
        assert_eq!(to_eastern(winter).time(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn session_key_is_none_before_open() {
        // 13:00 UTC in January is 08:00 ET.
        assert_eq!(session_key(utc("2026-01-15 13:00:00")), None);
        // 15:00 UTC in January is 10:00 ET.
        assert_eq!(
            session_key(utc("2026-01-15 15:00:00")),
            Some(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap())
        );
    }

    #[test]
    fn weekday_check_uses_eastern_calendar() {
        // Saturday.
        assert!(!is_weekday(utc("2026-01-17 15:00:00")));
        // Friday.
        assert!(is_weekday(utc("2026-01-16 15:00:00")));
    }

    #[test]
    fn minute_floor_drops_seconds() {
        let ts = utc("2026-01-15 15:04:37");
        assert_eq!(minute_floor(ts), utc("2026-01-15 15:04:00"));
    }

    #[test]
    fn et_window_bounds_are_inclusive() {
        let start = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(11, 30, 0).unwrap();
        // 15:00 UTC winter = 10:00 ET.
        assert!(within_et_window(utc("2026-01-15 15:00:00"), start, end));
        assert!(within_et_window(utc("2026-01-15 16:30:00"), start, end));
        assert!(!within_et_window(utc("2026-01-15 16:30:01"), start, end));
    }
}
