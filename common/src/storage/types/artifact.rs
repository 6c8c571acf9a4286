use uuid::Uuid;

use crate::stored_object;

/// Closed set of EMR record kinds after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Note,
    MedicationOrder,
    CarePlan,
    Allergy,
    Condition,
    Vital,
    LabObservation,
    Appointment,
    Document,
    FormResponse,
    Message,
    Task,
    FamilyHistory,
    InsurancePolicy,
    Superbill,
    IntakeFlow,
    Form,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::MedicationOrder => "medication_order",
            Self::CarePlan => "care_plan",
            Self::Allergy => "allergy",
            Self::Condition => "condition",
            Self::Vital => "vital",
            Self::LabObservation => "lab_observation",
            Self::Appointment => "appointment",
            Self::Document => "document",
            Self::FormResponse => "form_response",
            Self::Message => "message",
            Self::Task => "task",
            Self::FamilyHistory => "family_history",
            Self::InsurancePolicy => "insurance_policy",
            Self::Superbill => "superbill",
            Self::IntakeFlow => "intake_flow",
            Self::Form => "form",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

stored_object!(Artifact, "artifact", {
    patient_id: String,
    artifact_type: ArtifactType,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    occurred_at: DateTime<Utc>,
    author: Option<String>,
    content: String,
    source_url: Option<String>,
    payload: serde_json::Value
});

impl Artifact {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        patient_id: impl Into<String>,
        artifact_type: ArtifactType,
        occurred_at: DateTime<Utc>,
        author: Option<String>,
        content: String,
        source_url: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let id = id.into();
        let id = if id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            id
        };
        Self {
            id,
            created_at: now,
            updated_at: now,
            patient_id: patient_id.into(),
            artifact_type,
            occurred_at,
            author,
            content,
            source_url,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_type_round_trips_through_serde() {
        let json = serde_json::to_string(&ArtifactType::MedicationOrder).unwrap();
        assert_eq!(json, "\"medication_order\"");
        let back: ArtifactType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ArtifactType::MedicationOrder);
    }

    #[test]
    fn empty_id_is_replaced_with_a_fresh_one() {
        let artifact = Artifact::new(
            "",
            "p1",
            ArtifactType::Note,
            Utc::now(),
            None,
            "content".into(),
            None,
            serde_json::Value::Null,
        );
        assert!(!artifact.id.is_empty());
    }
}
