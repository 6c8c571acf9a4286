//! Display dates for provenance entries: recent timestamps render
//! relative, older ones absolute ("June 13, 2025").

use chrono::{DateTime, Datelike, Utc};

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn format_absolute(date: DateTime<Utc>) -> String {
    let month = MONTHS
        .get(date.month0() as usize)
        .copied()
        .unwrap_or("January");
    format!("{month} {}, {}", date.day(), date.year())
}

/// Relative within seven days, absolute beyond.
pub fn format_note_date(date: DateTime<Utc>, reference: DateTime<Utc>) -> String {
    let delta = reference.signed_duration_since(date);

    if delta.num_seconds() < 0 {
        // Future-dated entries (scheduling artifacts) render absolute.
        return format_absolute(date);
    }
    if delta.num_seconds() < 60 {
        return "just now".to_string();
    }
    if delta.num_minutes() < 60 {
        return format!("{} minutes ago", delta.num_minutes());
    }
    if delta.num_days() >= 7 {
        return format_absolute(date);
    }
    if date.date_naive() == reference.date_naive() {
        return format!("{} hours ago", delta.num_hours());
    }
    if date.date_naive() == (reference - chrono::Duration::days(1)).date_naive() {
        return "yesterday".to_string();
    }
    format!("{} days ago", delta.num_days().max(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn fresh_timestamps_are_just_now() {
        assert_eq!(
            format_note_date(reference() - Duration::seconds(30), reference()),
            "just now"
        );
    }

    #[test]
    fn minutes_and_hours_render_relative() {
        assert_eq!(
            format_note_date(reference() - Duration::minutes(5), reference()),
            "5 minutes ago"
        );
        assert_eq!(
            format_note_date(reference() - Duration::hours(3), reference()),
            "3 hours ago"
        );
    }

    #[test]
    fn yesterday_and_days_ago() {
        assert_eq!(
            format_note_date(reference() - Duration::days(1), reference()),
            "yesterday"
        );
        assert_eq!(
            format_note_date(reference() - Duration::days(2), reference()),
            "2 days ago"
        );
        assert_eq!(
            format_note_date(reference() - Duration::days(6), reference()),
            "6 days ago"
        );
    }

    #[test]
    fn a_week_or_older_renders_absolute() {
        assert_eq!(
            format_note_date(reference() - Duration::days(7), reference()),
            "June 8, 2025"
        );
        assert_eq!(
            format_note_date(reference() - Duration::days(400), reference()),
            "May 11, 2024"
        );
    }

    #[test]
    fn future_dates_render_absolute() {
        assert_eq!(
            format_note_date(reference() + Duration::days(3), reference()),
            "June 18, 2025"
        );
    }
}
