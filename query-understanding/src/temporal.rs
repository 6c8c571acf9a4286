//! Temporal phrase parsing. Produces inclusive `[date_from, date_to]`
//! bounds in UTC, anchored at the caller-provided reference time.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalFilter {
    /// The phrase that triggered the filter, verbatim from the query.
    pub time_reference: String,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:from|between)\s+(\d{4}-\d{2}-\d{2})\s+(?:to|and|until)\s+(\d{4}-\d{2}-\d{2})")
        .expect("valid range regex")
});
static SINCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"since\s+(\d{4}-\d{2}-\d{2})").expect("valid since regex"));
static BEFORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:before|until)\s+(\d{4}-\d{2}-\d{2})").expect("valid before regex")
});
static LAST_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:last|past)\s+(\d{1,3})\s+(day|week|month|year)s?").expect("valid last-n regex")
});
static LAST_ONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:last|past)\s+(day|week|month|year)\b").expect("valid last-one regex")
});
static BARE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("valid date regex"));

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(23, 59, 59).unwrap_or_default())
}

fn parse_iso(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn subtract_units(reference: DateTime<Utc>, amount: u32, unit: &str) -> DateTime<Utc> {
    match unit {
        "day" => reference - Duration::days(i64::from(amount)),
        "week" => reference - Duration::weeks(i64::from(amount)),
        "month" => reference
            .checked_sub_months(Months::new(amount))
            .unwrap_or(reference),
        "year" => reference
            .checked_sub_months(Months::new(amount.saturating_mul(12)))
            .unwrap_or(reference),
        _ => reference,
    }
}

/// Parse the first recognized temporal phrase in `query`; `None` when the
/// query carries no time constraint.
pub fn parse(query: &str, reference_time: DateTime<Utc>) -> Option<TemporalFilter> {
    let lowered = query.to_lowercase();

    if let Some(caps) = RANGE.captures(&lowered) {
        let from = parse_iso(caps.get(1)?.as_str())?;
        let to = parse_iso(caps.get(2)?.as_str())?;
        return Some(TemporalFilter {
            time_reference: caps.get(0)?.as_str().to_string(),
            date_from: Some(start_of_day(from)),
            date_to: Some(end_of_day(to)),
        });
    }

    if let Some(caps) = SINCE.captures(&lowered) {
        let from = parse_iso(caps.get(1)?.as_str())?;
        return Some(TemporalFilter {
            time_reference: caps.get(0)?.as_str().to_string(),
            date_from: Some(start_of_day(from)),
            date_to: Some(reference_time),
        });
    }

    if let Some(caps) = BEFORE.captures(&lowered) {
        let to = parse_iso(caps.get(1)?.as_str())?;
        return Some(TemporalFilter {
            time_reference: caps.get(0)?.as_str().to_string(),
            date_from: None,
            date_to: Some(end_of_day(to)),
        });
    }

    if let Some(caps) = LAST_N.captures(&lowered) {
        let amount: u32 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str();
        return Some(TemporalFilter {
            time_reference: caps.get(0)?.as_str().to_string(),
            date_from: Some(subtract_units(reference_time, amount, unit)),
            date_to: Some(reference_time),
        });
    }

    if let Some(caps) = LAST_ONE.captures(&lowered) {
        let unit = caps.get(1)?.as_str();
        return Some(TemporalFilter {
            time_reference: caps.get(0)?.as_str().to_string(),
            date_from: Some(subtract_units(reference_time, 1, unit)),
            date_to: Some(reference_time),
        });
    }

    if lowered.contains("yesterday") {
        let yesterday = (reference_time - Duration::days(1)).date_naive();
        return Some(TemporalFilter {
            time_reference: "yesterday".to_string(),
            date_from: Some(start_of_day(yesterday)),
            date_to: Some(end_of_day(yesterday)),
        });
    }

    if lowered.contains("today") {
        return Some(TemporalFilter {
            time_reference: "today".to_string(),
            date_from: Some(start_of_day(reference_time.date_naive())),
            date_to: Some(reference_time),
        });
    }

    if lowered.contains("recent") {
        return Some(TemporalFilter {
            time_reference: "recent".to_string(),
            date_from: Some(reference_time - Duration::days(30)),
            date_to: Some(reference_time),
        });
    }

    if let Some(caps) = BARE_DATE.captures(&lowered) {
        let day = parse_iso(caps.get(1)?.as_str())?;
        return Some(TemporalFilter {
            time_reference: caps.get(0)?.as_str().to_string(),
            date_from: Some(start_of_day(day)),
            date_to: Some(end_of_day(day)),
        });
    }

    None
}
