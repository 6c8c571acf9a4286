use uuid::Uuid;

use super::artifact::{Artifact, ArtifactType};
use crate::stored_object;

stored_object!(Chunk, "chunk", {
    artifact_id: String,
    patient_id: String,
    artifact_type: ArtifactType,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    occurred_at: DateTime<Utc>,
    author: Option<String>,
    content: String,
    char_start: u64,
    char_end: u64,
    source_url: Option<String>
});

/// Projection used to build the per-patient retrieval indexes without
/// hydrating chunk bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkListing {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_datetime")]
    pub occurred_at: DateTime<Utc>,
    pub artifact_type: ArtifactType,
    pub author: Option<String>,
}

impl Chunk {
    /// Cut a chunk out of an artifact. `char_start..char_end` are byte
    /// offsets into the artifact's `content` and must satisfy
    /// `0 <= start < end <= len`.
    pub fn from_artifact(artifact: &Artifact, char_start: usize, char_end: usize) -> Self {
        let now = Utc::now();
        let content = artifact
            .content
            .get(char_start..char_end)
            .unwrap_or_default()
            .to_string();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            artifact_id: artifact.id.clone(),
            patient_id: artifact.patient_id.clone(),
            artifact_type: artifact.artifact_type,
            occurred_at: artifact.occurred_at,
            author: artifact.author.clone(),
            content,
            char_start: char_start as u64,
            char_end: char_end as u64,
            source_url: artifact.source_url.clone(),
        }
    }

    pub fn offsets_valid(&self) -> bool {
        self.char_start < self.char_end
            && (self.char_end.saturating_sub(self.char_start)) as usize == self.content.len()
    }
}
