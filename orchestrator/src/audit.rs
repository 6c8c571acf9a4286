//! Audit logging: every query produces exactly one entry, appended
//! synchronously to a JSON-lines file and to a bounded in-memory ring.
//! The ring serves filter queries and exports; the file is the durable
//! record.

use std::{
    collections::VecDeque,
    io::Write,
    path::PathBuf,
    sync::Mutex,
};

use chrono::{DateTime, Duration, Utc};
use common::{error::AppError, utils::config::PrivacyMode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::error;

pub const PIPELINE_VERSION: &str = "1.0.0";
/// Ring capacity; the file is unbounded.
const RING_CAPACITY: usize = 10_000;
/// Age after which REDACTED mode anonymizes an entry on read.
const ANONYMIZATION_THRESHOLD_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RetrievalAudit {
    pub artifact_ids: Vec<String>,
    pub chunk_ids: Vec<String>,
    pub scores: Vec<f32>,
    pub method: String,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmAudit {
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub model_version: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub query_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub patient_id: String,
    pub query_text: String,
    pub retrieval: RetrievalAudit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmAudit>,
    pub response_summary: String,
    pub confidence: f32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub pipeline_version: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub patient_id: Option<String>,
    pub user_id: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub success: Option<bool>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(patient_id) = &self.patient_id {
            if &entry.patient_id != patient_id {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if entry.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }
}

fn hash_identifier(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .fold(String::with_capacity(16), |mut out, b| {
            use std::fmt::Write as _;
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// Apply the configured privacy mode to an entry on its way out.
fn apply_privacy(mut entry: AuditEntry, mode: PrivacyMode, now: DateTime<Utc>) -> AuditEntry {
    let redact = match mode {
        PrivacyMode::Full => false,
        PrivacyMode::Minimal => true,
        PrivacyMode::Redacted => {
            now.signed_duration_since(entry.timestamp)
                > Duration::hours(ANONYMIZATION_THRESHOLD_HOURS)
        }
    };
    if !redact {
        return entry;
    }

    entry.patient_id = hash_identifier(&entry.patient_id);
    entry.user_id = entry.user_id.map(|id| hash_identifier(&id));
    entry.session_id = entry.session_id.map(|id| hash_identifier(&id));
    entry.query_text = "[REDACTED]".to_string();
    entry.response_summary = "[REDACTED]".to_string();
    if let Some(llm) = entry.llm.as_mut() {
        llm.prompt = "[REDACTED]".to_string();
        llm.response = "[REDACTED]".to_string();
    }
    entry
}

pub struct AuditLogger {
    log_path: PathBuf,
    privacy_mode: PrivacyMode,
    /// Guards the append-only file.
    file: tokio::sync::Mutex<()>,
    ring: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLogger {
    pub fn new(log_dir: impl Into<PathBuf>, privacy_mode: PrivacyMode) -> Result<Self, AppError> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_path: log_dir.join("audit.jsonl"),
            privacy_mode,
            file: tokio::sync::Mutex::new(()),
            ring: Mutex::new(VecDeque::new()),
        })
    }

    pub fn log_path(&self) -> &std::path::Path {
        &self.log_path
    }

    /// Append one entry to the file and the ring. File write failures are
    /// logged but never propagate into the response path.
    pub async fn log(&self, entry: AuditEntry) {
        {
            let _guard = self.file.lock().await;
            let result = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .and_then(|mut file| {
                    let line = serde_json::to_string(&entry).unwrap_or_default();
                    writeln!(file, "{line}")
                });
            if let Err(err) = result {
                error!(error = %err, "failed to append audit entry to log file");
            }
        }

        let mut ring = self
            .ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if ring.len() >= RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Entries matching the filter in write order, privacy mode applied.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let now = Utc::now();
        let ring = self
            .ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        ring.iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .map(|entry| apply_privacy(entry, self.privacy_mode, now))
            .collect()
    }

    pub fn export_json(&self, filter: &AuditFilter) -> Result<String, AppError> {
        Ok(serde_json::to_string(&self.query(filter))?)
    }

    pub fn export_csv(&self, filter: &AuditFilter) -> String {
        fn escape(field: &str) -> String {
            if field.contains([',', '"', '\n']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.to_string()
            }
        }

        let mut csv = String::from(
            "query_id,timestamp,patient_id,user_id,query_text,response_summary,confidence,success,error,total_time_ms,pipeline_version\n",
        );
        for entry in self.query(filter) {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{}\n",
                escape(&entry.query_id),
                entry.timestamp.to_rfc3339(),
                escape(&entry.patient_id),
                escape(entry.user_id.as_deref().unwrap_or("")),
                escape(&entry.query_text),
                escape(&entry.response_summary),
                entry.confidence,
                entry.success,
                escape(entry.error.as_deref().unwrap_or("")),
                entry.total_time_ms,
                escape(&entry.pipeline_version),
            ));
        }
        csv
    }

    pub fn ring_len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query_id: &str, patient_id: &str, success: bool) -> AuditEntry {
        AuditEntry {
            query_id: query_id.into(),
            timestamp: Utc::now(),
            user_id: Some("clinician_1".into()),
            patient_id: patient_id.into(),
            query_text: "What medications?".into(),
            retrieval: RetrievalAudit {
                artifact_ids: vec!["note_123".into()],
                chunk_ids: vec!["c1".into()],
                scores: vec![0.8],
                method: "hybrid".into(),
                time_ms: 12,
            },
            llm: Some(LlmAudit {
                prompt: "prompt".into(),
                response: "response".into(),
                model: "medgemma-4b-it".into(),
                model_version: "medgemma-4b-it".into(),
                temperature: 0.0,
                max_tokens: 2000,
                total_tokens: Some(512),
                latency_ms: 900,
            }),
            response_summary: "Metformin 500mg twice daily".into(),
            confidence: 0.82,
            success,
            error: None,
            total_time_ms: 1500,
            session_id: Some("session_abc".into()),
            ip: None,
            user_agent: None,
            pipeline_version: PIPELINE_VERSION.into(),
        }
    }

    fn test_logger(privacy_mode: PrivacyMode) -> (AuditLogger, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = AuditLogger::new(dir.path(), privacy_mode).expect("logger");
        (logger, dir)
    }

    #[tokio::test]
    async fn log_appends_to_file_and_ring() {
        let (logger, _dir) = test_logger(PrivacyMode::Full);
        logger.log(entry("q1", "p1", true)).await;
        logger.log(entry("q2", "p1", false)).await;

        assert_eq!(logger.ring_len(), 2);
        let raw = std::fs::read_to_string(logger.log_path()).expect("read log");
        assert_eq!(raw.lines().count(), 2);
        let first: AuditEntry = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first.query_id, "q1");
    }

    #[tokio::test]
    async fn json_export_round_trips_in_order() {
        let (logger, _dir) = test_logger(PrivacyMode::Full);
        for i in 0..5 {
            logger.log(entry(&format!("q{i}"), "p1", true)).await;
        }

        let exported = logger.export_json(&AuditFilter::default()).expect("export");
        let parsed: Vec<AuditEntry> = serde_json::from_str(&exported).expect("parse");
        assert_eq!(parsed.len(), 5);
        let ids: Vec<&str> = parsed.iter().map(|e| e.query_id.as_str()).collect();
        assert_eq!(ids, vec!["q0", "q1", "q2", "q3", "q4"]);
        assert_eq!(parsed, logger.query(&AuditFilter::default()));
    }

    #[tokio::test]
    async fn filters_select_by_patient_success_and_date() {
        let (logger, _dir) = test_logger(PrivacyMode::Full);
        logger.log(entry("q1", "p1", true)).await;
        logger.log(entry("q2", "p2", false)).await;

        let by_patient = logger.query(&AuditFilter {
            patient_id: Some("p1".into()),
            ..AuditFilter::default()
        });
        assert_eq!(by_patient.len(), 1);
        assert_eq!(by_patient[0].query_id, "q1");

        let failures = logger.query(&AuditFilter {
            success: Some(false),
            ..AuditFilter::default()
        });
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].query_id, "q2");

        let future_only = logger.query(&AuditFilter {
            date_from: Some(Utc::now() + Duration::hours(1)),
            ..AuditFilter::default()
        });
        assert!(future_only.is_empty());
    }

    #[tokio::test]
    async fn minimal_mode_redacts_on_read() {
        let (logger, _dir) = test_logger(PrivacyMode::Minimal);
        logger.log(entry("q1", "p1", true)).await;

        let entries = logger.query(&AuditFilter::default());
        assert_eq!(entries[0].query_text, "[REDACTED]");
        assert_eq!(entries[0].response_summary, "[REDACTED]");
        assert_ne!(entries[0].patient_id, "p1");
        assert_eq!(entries[0].llm.as_ref().unwrap().prompt, "[REDACTED]");
        // The durable file keeps the full entry.
        let raw = std::fs::read_to_string(logger.log_path()).expect("read log");
        assert!(raw.contains("What medications?"));
    }

    #[tokio::test]
    async fn redacted_mode_only_touches_old_entries() {
        let (logger, _dir) = test_logger(PrivacyMode::Redacted);
        let mut old = entry("q_old", "p1", true);
        old.timestamp = Utc::now() - Duration::hours(48);
        logger.log(old).await;
        logger.log(entry("q_new", "p1", true)).await;

        let entries = logger.query(&AuditFilter::default());
        assert_eq!(entries[0].query_text, "[REDACTED]");
        assert_eq!(entries[1].query_text, "What medications?");
    }

    #[tokio::test]
    async fn csv_export_escapes_fields() {
        let (logger, _dir) = test_logger(PrivacyMode::Full);
        let mut tricky = entry("q1", "p1", true);
        tricky.query_text = "what, \"meds\"?".into();
        logger.log(tricky).await;

        let csv = logger.export_csv(&AuditFilter::default());
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("query_id,"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"what, \"\"meds\"\"?\""));
    }
}
