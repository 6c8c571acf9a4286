//! Normalization of raw EMR payloads into [`Artifact`]s. The content
//! flattening is deterministic: narrative fields first, then the remaining
//! scalar fields as sorted `key: value` lines, all whitespace-collapsed.
//! Running the flattener over its own output changes nothing.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::storage::types::artifact::{Artifact, ArtifactType};
use serde_json::Value;
use tracing::warn;

use crate::record_source::PatientRecordBundle;

/// Fields rendered as a leading narrative paragraph instead of key/value
/// lines, in precedence order.
const NARRATIVE_FIELDS: &[&str] = &["text", "content", "body", "description", "summary"];

/// Bookkeeping fields that never belong in searchable content.
const SKIPPED_FIELDS: &[&str] = &[
    "id",
    "_id",
    "patient_id",
    "created_at",
    "updated_at",
    "url",
    "source_url",
];

/// Timestamp fields probed for `occurred_at`, in precedence order.
const DATE_FIELDS: &[&str] = &[
    "occurred_at",
    "date",
    "effective_date",
    "start_date",
    "scheduled_at",
    "created_at",
];

/// Collapse runs of whitespace to single spaces, preserving blank-line
/// paragraph breaks. Idempotent.
pub fn normalize_text(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(|paragraph| paragraph.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|paragraph| !paragraph.is_empty())
        .collect();
    paragraphs.join("\n\n")
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0)?));
    }
    None
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flatten_into(lines: &mut Vec<String>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            // serde_json keeps object keys sorted, which makes this walk
            // deterministic.
            for (key, child) in map {
                if prefix.is_empty() && SKIPPED_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(lines, &path, child);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(lines, &format!("{prefix}[{index}]"), item);
            }
        }
        other => {
            if let Some(rendered) = scalar_to_string(other) {
                let rendered = normalize_text(&rendered);
                if !rendered.is_empty() {
                    lines.push(format!("{prefix}: {rendered}"));
                }
            }
        }
    }
}

/// Deterministic sectioned text for one record: narrative first, then
/// sorted `key: value` lines.
pub fn flatten_content(record: &Value) -> String {
    let mut sections: Vec<String> = Vec::new();

    for field in NARRATIVE_FIELDS {
        if let Some(narrative) = record.get(*field).and_then(Value::as_str) {
            let narrative = normalize_text(narrative);
            if !narrative.is_empty() {
                sections.push(narrative);
            }
            break;
        }
    }

    let mut lines = Vec::new();
    if let Value::Object(map) = record {
        for (key, child) in map {
            if SKIPPED_FIELDS.contains(&key.as_str()) || NARRATIVE_FIELDS.contains(&key.as_str()) {
                continue;
            }
            flatten_into(&mut lines, key, child);
        }
    }
    if !lines.is_empty() {
        sections.push(lines.join("\n"));
    }

    sections.join("\n\n")
}

fn extract_author(record: &Value) -> Option<String> {
    if let Some(name) = record.get("author").and_then(Value::as_str) {
        return Some(name.to_string());
    }
    if let Some(name) = record
        .get("author")
        .and_then(|author| author.get("name"))
        .and_then(Value::as_str)
    {
        return Some(name.to_string());
    }
    record
        .get("provider_name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn occurred_at(record: &Value, fallback: DateTime<Utc>) -> DateTime<Utc> {
    for field in DATE_FIELDS {
        if let Some(parsed) = record.get(*field).and_then(parse_timestamp) {
            return parsed;
        }
    }
    fallback
}

/// Normalize one raw record; `None` when it cannot be indexed (no id or no
/// content).
pub fn normalize_record(
    patient_id: &str,
    artifact_type: ArtifactType,
    record: &Value,
    fallback_time: DateTime<Utc>,
) -> Option<Artifact> {
    let id = record
        .get("id")
        .or_else(|| record.get("_id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let Some(id) = id else {
        warn!(artifact_type = artifact_type.as_str(), "record without id skipped");
        return None;
    };

    let content = flatten_content(record);
    if content.is_empty() {
        warn!(artifact_id = %id, "record with empty content skipped");
        return None;
    }

    let source_url = record
        .get("source_url")
        .or_else(|| record.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(Artifact::new(
        id,
        patient_id,
        artifact_type,
        occurred_at(record, fallback_time),
        extract_author(record),
        content,
        source_url,
        record.clone(),
    ))
}

/// Normalize a full bundle. Records that cannot be indexed are dropped
/// with a log line; everything that remains satisfies the artifact
/// invariants (unique id, `occurred_at` present).
pub fn normalize_bundle(bundle: &PatientRecordBundle, fallback_time: DateTime<Utc>) -> Vec<Artifact> {
    let mut artifacts: Vec<Artifact> = Vec::new();
    for (artifact_type, record) in &bundle.records {
        if let Some(artifact) =
            normalize_record(&bundle.patient_id, *artifact_type, record, fallback_time)
        {
            if artifacts.iter().any(|existing| existing.id == artifact.id) {
                warn!(artifact_id = %artifact.id, "duplicate artifact id skipped");
                continue;
            }
            artifacts.push(artifact);
        }
    }
    artifacts
}
