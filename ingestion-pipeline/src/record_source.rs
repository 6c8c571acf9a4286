//! EMR record source client. The upstream API hands out bearer tokens for
//! a two-key client credential pair and returns each record kind in bulk,
//! *unfiltered*; every collection must be narrowed to the requested
//! patient client-side before anything else sees it.

use std::{collections::HashMap, sync::Arc, time::Instant};

use async_trait::async_trait;
use common::{error::AppError, storage::types::artifact::ArtifactType};
use futures::{stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// Record kinds fetched per patient, with their API path segment.
pub const RECORD_KINDS: &[(&str, ArtifactType)] = &[
    ("notes", ArtifactType::Note),
    ("medications", ArtifactType::MedicationOrder),
    ("care_plans", ArtifactType::CarePlan),
    ("allergies", ArtifactType::Allergy),
    ("conditions", ArtifactType::Condition),
    ("vitals", ArtifactType::Vital),
    ("lab_observations", ArtifactType::LabObservation),
    ("appointments", ArtifactType::Appointment),
    ("documents", ArtifactType::Document),
    ("form_responses", ArtifactType::FormResponse),
    ("messages", ArtifactType::Message),
    ("tasks", ArtifactType::Task),
    ("family_histories", ArtifactType::FamilyHistory),
    ("insurance_policies", ArtifactType::InsurancePolicy),
    ("superbills", ArtifactType::Superbill),
    ("intake_flows", ArtifactType::IntakeFlow),
    ("forms", ArtifactType::Form),
];

/// Concurrent per-kind requests in flight while fetching one patient.
const FETCH_CONCURRENCY: usize = 4;

/// Everything the source returned for one patient, already filtered to
/// that patient and ordered by `RECORD_KINDS`.
#[derive(Debug, Clone, Default)]
pub struct PatientRecordBundle {
    pub patient_id: String,
    pub records: Vec<(ArtifactType, Value)>,
}

#[async_trait]
pub trait PatientRecordSource: Send + Sync {
    async fn fetch_all(&self, patient_id: &str) -> Result<PatientRecordBundle, AppError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry_secs")]
    expires_in: u64,
}

fn default_expiry_secs() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    fetched_at: Instant,
    expires_in: u64,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        // Refresh a minute before expiry.
        self.fetched_at.elapsed().as_secs().saturating_add(60) < self.expires_in
    }
}

pub struct HttpRecordSource {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl HttpRecordSource {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh() {
                return Ok(token.token.clone());
            }
        }

        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "grant_type": "client_credentials",
            }))
            .send()
            .await
            .map_err(|e| AppError::RecordSource(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::RecordSource(e.to_string()))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::RecordSource(e.to_string()))?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            token: token.access_token,
            fetched_at: Instant::now(),
            expires_in: token.expires_in,
        });
        Ok(value)
    }

    async fn fetch_kind(
        &self,
        token: &str,
        kind_path: &str,
        patient_id: &str,
    ) -> Result<Vec<Value>, AppError> {
        let response = self
            .http
            .get(format!("{}/api/{kind_path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::RecordSource(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::RecordSource(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::RecordSource(e.to_string()))?;
        let records = body
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| body.as_array())
            .cloned()
            .unwrap_or_default();

        // The upstream endpoint returns every patient's records in bulk;
        // filtering here is mandatory, not an optimization.
        let total = records.len();
        let filtered: Vec<Value> = records
            .into_iter()
            .filter(|record| {
                record
                    .get("patient_id")
                    .and_then(Value::as_str)
                    .is_some_and(|record_patient| record_patient == patient_id)
            })
            .collect();
        debug!(
            kind = kind_path,
            total,
            kept = filtered.len(),
            "fetched record kind"
        );
        Ok(filtered)
    }
}

#[async_trait]
impl PatientRecordSource for HttpRecordSource {
    async fn fetch_all(&self, patient_id: &str) -> Result<PatientRecordBundle, AppError> {
        let token = self.bearer_token().await?;
        let semaphore = Arc::new(Semaphore::new(FETCH_CONCURRENCY));

        let kind_futures: Vec<_> = RECORD_KINDS
            .iter()
            .map(|&(path, artifact_type)| {
                let token = token.clone();
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| AppError::Internal(e.to_string()))?;
                    let records = self.fetch_kind(&token, path, patient_id).await?;
                    Ok::<_, AppError>((artifact_type, records))
                }
            })
            .collect();
        let mut fetches = stream::iter(kind_futures).buffer_unordered(RECORD_KINDS.len());

        let mut by_kind: HashMap<ArtifactType, Vec<Value>> = HashMap::new();
        while let Some(result) = fetches.next().await {
            let (artifact_type, records) = result?;
            by_kind.insert(artifact_type, records);
        }
        drop(fetches);

        // Deterministic bundle order regardless of completion order.
        let mut bundle = PatientRecordBundle {
            patient_id: patient_id.to_string(),
            records: Vec::new(),
        };
        for &(_, artifact_type) in RECORD_KINDS {
            for record in by_kind.remove(&artifact_type).unwrap_or_default() {
                bundle.records.push((artifact_type, record));
            }
        }

        if bundle.records.is_empty() {
            warn!(patient_id, "record source returned no records for patient");
        }
        Ok(bundle)
    }
}

/// In-memory record source for tests and offline development.
#[derive(Default)]
pub struct StaticRecordSource {
    bundles: HashMap<String, Vec<(ArtifactType, Value)>>,
}

impl StaticRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(
        mut self,
        patient_id: &str,
        records: Vec<(ArtifactType, Value)>,
    ) -> Self {
        self.bundles.insert(patient_id.to_string(), records);
        self
    }
}

#[async_trait]
impl PatientRecordSource for StaticRecordSource {
    async fn fetch_all(&self, patient_id: &str) -> Result<PatientRecordBundle, AppError> {
        Ok(PatientRecordBundle {
            patient_id: patient_id.to_string(),
            records: self.bundles.get(patient_id).cloned().unwrap_or_default(),
        })
    }
}
