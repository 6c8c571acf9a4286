//! Parsing of the generator's JSON payload into typed extractions. The
//! model is instructed to return `{"extractions": [...]}`; this module
//! tolerates markdown fences and unknown extraction types (which fall back
//! to `general_note`) but nothing looser — a payload without parseable
//! JSON is an error.

use std::collections::BTreeMap;

use common::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where a fact came from: ids plus the exact supporting quote. Offsets are
/// kept signed so out-of-range values from the model survive parsing and
/// are rejected by the citation validator instead of a serde error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub artifact_id: String,
    pub chunk_id: String,
    pub char_offsets: [i64; 2],
    pub supporting_text: String,
}

/// Typed extraction payloads; open-ended content lands in `GeneralNote`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ExtractionContent {
    MedicationRecommendation {
        medication: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dosage: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frequency: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CarePlanNote {
        plan: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        goal: Option<String>,
    },
    GeneralNote(BTreeMap<String, String>),
}

impl ExtractionContent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::MedicationRecommendation { .. } => "medication_recommendation",
            Self::CarePlanNote { .. } => "care_plan_note",
            Self::GeneralNote(_) => "general_note",
        }
    }

    /// One-line rendering used for answer text.
    pub fn display_line(&self) -> String {
        match self {
            Self::MedicationRecommendation {
                medication,
                dosage,
                frequency,
                reason,
            } => {
                let mut line = medication.clone();
                if let Some(dosage) = dosage {
                    line.push(' ');
                    line.push_str(dosage);
                }
                if let Some(frequency) = frequency {
                    line.push_str(", ");
                    line.push_str(frequency);
                }
                if let Some(reason) = reason {
                    line.push_str(&format!(" ({reason})"));
                }
                line
            }
            Self::CarePlanNote { plan, goal } => match goal {
                Some(goal) => format!("{plan} (goal: {goal})"),
                None => plan.clone(),
            },
            Self::GeneralNote(fields) => fields
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extraction {
    #[serde(flatten)]
    pub content: ExtractionContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    extractions: Vec<RawExtraction>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(rename = "type", default)]
    extraction_type: String,
    #[serde(default)]
    content: serde_json::Value,
    #[serde(default)]
    provenance: Option<Provenance>,
}

/// Strip markdown fences and surrounding prose; return the first balanced
/// JSON object in the text.
fn isolate_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        text.get(start..=end)
    } else {
        None
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn to_general_note(content: &serde_json::Value) -> ExtractionContent {
    let mut fields = BTreeMap::new();
    if let Some(object) = content.as_object() {
        for (key, value) in object {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            fields.insert(key.clone(), rendered);
        }
    } else if let Some(text) = content.as_str() {
        fields.insert("text".to_string(), text.to_string());
    }
    ExtractionContent::GeneralNote(fields)
}

fn typed_content(raw: &RawExtraction) -> ExtractionContent {
    match raw.extraction_type.as_str() {
        "medication_recommendation" => {
            if let Some(medication) = string_field(&raw.content, "medication") {
                ExtractionContent::MedicationRecommendation {
                    medication,
                    dosage: string_field(&raw.content, "dosage"),
                    frequency: string_field(&raw.content, "frequency"),
                    reason: string_field(&raw.content, "reason"),
                }
            } else {
                to_general_note(&raw.content)
            }
        }
        "care_plan_note" => {
            if let Some(plan) = string_field(&raw.content, "plan") {
                ExtractionContent::CarePlanNote {
                    plan,
                    goal: string_field(&raw.content, "goal"),
                }
            } else {
                to_general_note(&raw.content)
            }
        }
        "general_note" => to_general_note(&raw.content),
        other => {
            warn!(extraction_type = other, "unknown extraction type, downgrading to general_note");
            to_general_note(&raw.content)
        }
    }
}

/// Parse the generator output into extractions. An empty extraction list
/// is a valid outcome; unparseable JSON is not.
pub fn parse_extractions(model_output: &str) -> Result<Vec<Extraction>, AppError> {
    let json = isolate_json(model_output).ok_or_else(|| {
        AppError::Generator("model response contains no JSON object".to_string())
    })?;

    let payload: RawPayload = serde_json::from_str(json)
        .map_err(|e| AppError::Generator(format!("model returned malformed JSON: {e}")))?;

    Ok(payload
        .extractions
        .iter()
        .map(|raw| Extraction {
            content: typed_content(raw),
            provenance: raw.provenance.clone(),
        })
        .collect())
}
