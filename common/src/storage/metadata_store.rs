//! SurrealDB-backed chunk and artifact metadata store. Bodies live here;
//! vectors live in the in-process index and are joined by chunk id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use surrealdb::sql::Thing;
use tracing::debug;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact::{Artifact, ArtifactType},
            chunk::{deserialize_flexible_id, Chunk, ChunkListing},
            StoredObject,
        },
    },
};

/// Pre-filter criteria for chunk candidates. `patient_id` is mandatory,
/// everything else narrows the set.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub patient_id: String,
    pub artifact_types: Option<Vec<ArtifactType>>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

/// Paging window for the EMR passthrough endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    total: usize,
}

#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<SurrealDbClient>,
}

impl MetadataStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Insert a batch of chunks in a single statement, which SurrealDB runs
    /// as one transaction.
    pub async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let count = chunks.len();
        let _created: Vec<Chunk> = self.db.client.insert(Chunk::table_name()).content(chunks).await?;
        debug!(count, "inserted chunk batch");
        Ok(())
    }

    pub async fn insert_artifacts(&self, artifacts: Vec<Artifact>) -> Result<(), AppError> {
        if artifacts.is_empty() {
            return Ok(());
        }
        let _created: Vec<Artifact> = self
            .db
            .client
            .insert(Artifact::table_name())
            .content(artifacts)
            .await?;
        Ok(())
    }

    /// Chunk ids matching the criteria. Bodies are fetched separately with
    /// [`Self::get_chunks_by_ids`] once the pipeline knows which survive.
    pub async fn filter_chunks(&self, filter: &ChunkFilter) -> Result<Vec<String>, AppError> {
        let mut sql = String::from("SELECT id FROM chunk WHERE patient_id = $patient_id");
        if filter.artifact_types.is_some() {
            sql.push_str(" AND artifact_type IN $artifact_types");
        }
        if filter.date_from.is_some() {
            sql.push_str(" AND occurred_at >= $date_from");
        }
        if filter.date_to.is_some() {
            sql.push_str(" AND occurred_at <= $date_to");
        }
        if filter.author.is_some() {
            sql.push_str(" AND author = $author");
        }

        let mut query = self
            .db
            .query(sql)
            .bind(("patient_id", filter.patient_id.clone()));
        if let Some(types) = filter.artifact_types.clone() {
            query = query.bind(("artifact_types", types));
        }
        if let Some(from) = filter.date_from {
            query = query.bind(("date_from", surrealdb::sql::Datetime::from(from)));
        }
        if let Some(to) = filter.date_to {
            query = query.bind(("date_to", surrealdb::sql::Datetime::from(to)));
        }
        if let Some(author) = filter.author.clone() {
            query = query.bind(("author", author));
        }

        let mut response = query.await?;
        let rows: Vec<IdRow> = response.take(0)?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    pub async fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Chunk::table_name(), id.as_str())))
            .collect();

        let mut response = self
            .db
            .query("SELECT * FROM chunk WHERE id IN $things")
            .bind(("things", things))
            .await?;
        let chunks: Vec<Chunk> = response.take(0)?;
        Ok(chunks)
    }

    /// Id/date/type/author stripes for one patient, ordered by
    /// `occurred_at` ascending; input for the in-memory filter indexes.
    pub async fn patient_chunk_listing(
        &self,
        patient_id: &str,
    ) -> Result<Vec<ChunkListing>, AppError> {
        let mut response = self
            .db
            .query(
                "SELECT id, occurred_at, artifact_type, author FROM chunk \
                 WHERE patient_id = $patient_id ORDER BY occurred_at ASC",
            )
            .bind(("patient_id", patient_id.to_owned()))
            .await?;
        let listing: Vec<ChunkListing> = response.take(0)?;
        Ok(listing)
    }

    pub async fn get_patient_artifacts(
        &self,
        patient_id: &str,
        artifact_types: Option<Vec<ArtifactType>>,
        date_from: Option<DateTime<Utc>>,
        date_to: Option<DateTime<Utc>>,
        page: Page,
    ) -> Result<Vec<Artifact>, AppError> {
        let mut sql = String::from("SELECT * FROM artifact WHERE patient_id = $patient_id");
        if artifact_types.is_some() {
            sql.push_str(" AND artifact_type IN $artifact_types");
        }
        if date_from.is_some() {
            sql.push_str(" AND occurred_at >= $date_from");
        }
        if date_to.is_some() {
            sql.push_str(" AND occurred_at <= $date_to");
        }
        sql.push_str(" ORDER BY occurred_at DESC LIMIT $limit START $offset");

        let mut query = self
            .db
            .query(sql)
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("limit", i64::try_from(page.limit).unwrap_or(i64::MAX)))
            .bind(("offset", i64::try_from(page.offset).unwrap_or(0)));
        if let Some(types) = artifact_types {
            query = query.bind(("artifact_types", types));
        }
        if let Some(from) = date_from {
            query = query.bind(("date_from", surrealdb::sql::Datetime::from(from)));
        }
        if let Some(to) = date_to {
            query = query.bind(("date_to", surrealdb::sql::Datetime::from(to)));
        }

        let mut response = query.await?;
        let artifacts: Vec<Artifact> = response.take(0)?;
        Ok(artifacts)
    }

    pub async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>, AppError> {
        Ok(self.db.get_item::<Artifact>(artifact_id).await?)
    }

    /// Remove every chunk and artifact of one patient.
    pub async fn delete_patient(&self, patient_id: &str) -> Result<(), AppError> {
        self.db
            .query("DELETE chunk WHERE patient_id = $patient_id")
            .bind(("patient_id", patient_id.to_owned()))
            .await?;
        self.db
            .query("DELETE artifact WHERE patient_id = $patient_id")
            .bind(("patient_id", patient_id.to_owned()))
            .await?;
        Ok(())
    }

    pub async fn count_patient_chunks(&self, patient_id: &str) -> Result<usize, AppError> {
        let mut response = self
            .db
            .query("SELECT count() AS total FROM chunk WHERE patient_id = $patient_id GROUP ALL")
            .bind(("patient_id", patient_id.to_owned()))
            .await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map_or(0, |row| row.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    async fn test_store() -> MetadataStore {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("ensure initialized");
        MetadataStore::new(Arc::new(db))
    }

    fn artifact_at(
        id: &str,
        artifact_type: ArtifactType,
        occurred_at: DateTime<Utc>,
        author: Option<&str>,
    ) -> Artifact {
        Artifact::new(
            id,
            "p1",
            artifact_type,
            occurred_at,
            author.map(str::to_string),
            format!("content of {id}"),
            None,
            serde_json::Value::Null,
        )
    }

    fn chunk_of(artifact: &Artifact) -> Chunk {
        Chunk::from_artifact(artifact, 0, artifact.content.len())
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, d, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_filter_and_fetch_round_trip() {
        let store = test_store().await;

        let note = artifact_at("note_1", ArtifactType::Note, day(1), Some("Dr. Chen"));
        let medication = artifact_at("med_1", ArtifactType::MedicationOrder, day(10), None);
        let chunks = vec![chunk_of(&note), chunk_of(&medication)];
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        store
            .insert_artifacts(vec![note, medication])
            .await
            .expect("insert artifacts");
        store.insert_chunks(chunks).await.expect("insert chunks");

        let all = store
            .filter_chunks(&ChunkFilter {
                patient_id: "p1".into(),
                ..ChunkFilter::default()
            })
            .await
            .expect("filter all");
        assert_eq!(all.len(), 2);

        let meds_only = store
            .filter_chunks(&ChunkFilter {
                patient_id: "p1".into(),
                artifact_types: Some(vec![ArtifactType::MedicationOrder]),
                ..ChunkFilter::default()
            })
            .await
            .expect("filter meds");
        assert_eq!(meds_only.len(), 1);

        let hydrated = store.get_chunks_by_ids(&ids).await.expect("hydrate");
        assert_eq!(hydrated.len(), 2);
        assert!(hydrated.iter().all(|c| c.patient_id == "p1"));
    }

    #[tokio::test]
    async fn date_range_filter_is_inclusive_on_both_sides() {
        let store = test_store().await;

        let early = artifact_at("a_early", ArtifactType::Note, day(1), None);
        let mid = artifact_at("a_mid", ArtifactType::Note, day(5), None);
        let late = artifact_at("a_late", ArtifactType::Note, day(9), None);
        store
            .insert_chunks(vec![chunk_of(&early), chunk_of(&mid), chunk_of(&late)])
            .await
            .expect("insert");

        let in_range = store
            .filter_chunks(&ChunkFilter {
                patient_id: "p1".into(),
                date_from: Some(day(1)),
                date_to: Some(day(5)),
                ..ChunkFilter::default()
            })
            .await
            .expect("filter range");
        assert_eq!(in_range.len(), 2, "both boundary days must be included");
    }

    #[tokio::test]
    async fn author_filter_narrows_results() {
        let store = test_store().await;

        let by_chen = artifact_at("a_chen", ArtifactType::Note, day(2), Some("Dr. Chen"));
        let by_patel = artifact_at("a_patel", ArtifactType::Note, day(3), Some("Dr. Patel"));
        store
            .insert_chunks(vec![chunk_of(&by_chen), chunk_of(&by_patel)])
            .await
            .expect("insert");

        let chen = store
            .filter_chunks(&ChunkFilter {
                patient_id: "p1".into(),
                author: Some("Dr. Chen".into()),
                ..ChunkFilter::default()
            })
            .await
            .expect("filter author");
        assert_eq!(chen.len(), 1);
    }

    #[tokio::test]
    async fn listing_is_ordered_by_occurred_at() {
        let store = test_store().await;

        let late = artifact_at("a2", ArtifactType::Note, day(20), None);
        let early = artifact_at("a1", ArtifactType::MedicationOrder, day(2), None);
        store
            .insert_chunks(vec![chunk_of(&late), chunk_of(&early)])
            .await
            .expect("insert");

        let listing = store.patient_chunk_listing("p1").await.expect("listing");
        assert_eq!(listing.len(), 2);
        assert!(listing[0].occurred_at <= listing[1].occurred_at);
        assert_eq!(listing[0].artifact_type, ArtifactType::MedicationOrder);
    }

    #[tokio::test]
    async fn delete_patient_restores_baseline_counts() {
        let store = test_store().await;
        assert_eq!(store.count_patient_chunks("p1").await.unwrap(), 0);

        let note = artifact_at("n1", ArtifactType::Note, day(4), None);
        store
            .insert_artifacts(vec![note.clone()])
            .await
            .expect("insert artifact");
        store
            .insert_chunks(vec![chunk_of(&note)])
            .await
            .expect("insert chunk");
        assert_eq!(store.count_patient_chunks("p1").await.unwrap(), 1);

        store.delete_patient("p1").await.expect("delete");
        assert_eq!(store.count_patient_chunks("p1").await.unwrap(), 0);
        let artifacts = store
            .get_patient_artifacts("p1", None, None, None, Page::default())
            .await
            .expect("artifacts");
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn artifact_paging_applies_limit_and_offset() {
        let store = test_store().await;
        let artifacts: Vec<Artifact> = (1..=4)
            .map(|i| artifact_at(&format!("a{i}"), ArtifactType::Note, day(i), None))
            .collect();
        store
            .insert_artifacts(artifacts)
            .await
            .expect("insert artifacts");

        let page = store
            .get_patient_artifacts(
                "p1",
                None,
                None,
                None,
                Page {
                    limit: 2,
                    offset: 1,
                },
            )
            .await
            .expect("page");
        assert_eq!(page.len(), 2);
        // Descending by occurred_at, offset skips the newest.
        assert_eq!(page[0].id, "a3");
        assert_eq!(page[1].id, "a2");
    }
}
