//! Geo-filtered vector search index.
//!
//! Every query is a brute-force scan: each stored record is checked
//! against the radius with the haversine formula and, if inside, scored
//! by cosine similarity. There is no approximate structure; the scan is
//! O(N·D) and meant for small corpora.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use atlas_embeddings::{embed_cancellable, Embedding, EmbeddingModel};
use atlas_types::EmbeddingSettings;

use crate::error::VectorError;
use crate::geo::GeoPoint;
use crate::similarity::cosine_similarity;
use crate::store::{NewRecord, RecordStore, SearchRecord};

/// One hit of a search, derived at query time.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Id of the matching record
    pub id: u64,
    pub text: String,
    /// Great-circle distance from the query point
    pub distance_km: f64,
    /// Cosine similarity to the query, in [-1, 1]
    pub score: f32,
}

/// Index limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexConfig {
    /// Required embedding length
    pub dimension: usize,
    /// Maximum text length in characters
    pub max_text_len: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_text_len: 500,
        }
    }
}

impl From<&EmbeddingSettings> for IndexConfig {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            dimension: settings.dimension,
            max_text_len: settings.max_text_len,
        }
    }
}

/// Stores (text, coordinates, embedding) records and answers radius queries.
pub struct GeoVectorIndex {
    store: Arc<dyn RecordStore>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    config: IndexConfig,
}

impl GeoVectorIndex {
    /// Index without an embedding backend; every embed fails with
    /// [`VectorError::EmbeddingUnavailable`] until one is attached.
    pub fn new(store: Arc<dyn RecordStore>, config: IndexConfig) -> Self {
        Self {
            store,
            embedder: None,
            config,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingModel>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn config(&self) -> IndexConfig {
        self.config
    }

    /// Number of stored records.
    pub async fn len(&self) -> Result<usize, VectorError> {
        let store = self.store.clone();
        run_blocking(move || store.len()).await
    }

    /// Embed `text` and store it at (`latitude`, `longitude`).
    pub async fn add_item(
        &self,
        text: &str,
        latitude: f64,
        longitude: f64,
        ct: &CancellationToken,
    ) -> Result<SearchRecord, VectorError> {
        let point = GeoPoint::new(latitude, longitude)?;
        self.check_text(text)?;

        let embedding = self.embed(text, ct).await?;
        if ct.is_cancelled() {
            return Err(VectorError::Cancelled);
        }

        let store = self.store.clone();
        let record = NewRecord {
            text: text.to_string(),
            latitude: point.latitude,
            longitude: point.longitude,
            embedding: embedding.into_vec(),
        };
        let stored = run_blocking(move || store.append(record)).await?;

        info!(id = stored.id, lat = latitude, lng = longitude, "Indexed item");
        Ok(stored)
    }

    /// Records within `radius_km` of the query point, best match first.
    ///
    /// The boundary is inclusive. Equal scores keep insertion order.
    pub async fn search(
        &self,
        query: &str,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        ct: &CancellationToken,
    ) -> Result<Vec<SearchResult>, VectorError> {
        let center = GeoPoint::new(latitude, longitude)?;
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(VectorError::InvalidInput(format!(
                "radius must be a non-negative number of km, got {}",
                radius_km
            )));
        }
        self.check_text(query)?;

        let query_vec = self.embed(query, ct).await?.into_vec();

        let store = self.store.clone();
        let scan = run_blocking(move || {
            let records = store.scan()?;
            Ok(rank(&records, &query_vec, center, radius_km))
        });
        let results = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(VectorError::Cancelled),
            results = scan => results?,
        };

        debug!(
            hits = results.len(),
            radius_km,
            lat = latitude,
            lng = longitude,
            "Search complete"
        );
        Ok(results)
    }

    fn check_text(&self, text: &str) -> Result<(), VectorError> {
        if text.trim().is_empty() {
            return Err(VectorError::InvalidInput("text is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.config.max_text_len {
            return Err(VectorError::InvalidInput(format!(
                "text is {} characters, limit is {}",
                chars, self.config.max_text_len
            )));
        }
        Ok(())
    }

    async fn embed(&self, text: &str, ct: &CancellationToken) -> Result<Embedding, VectorError> {
        let embedder = self.embedder.clone().ok_or_else(|| {
            VectorError::EmbeddingUnavailable("no embedding backend configured".to_string())
        })?;

        let embedding = embed_cancellable(embedder, text.to_string(), ct).await?;
        if embedding.dimension() != self.config.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.dimension(),
            });
        }
        Ok(embedding)
    }
}

/// Filter `records` to the radius around `center` and order by descending score.
///
/// The sort is stable, so records with equal scores stay in the order given.
pub fn rank(
    records: &[SearchRecord],
    query: &[f32],
    center: GeoPoint,
    radius_km: f64,
) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = records
        .iter()
        .filter_map(|record| {
            let distance_km = center.distance_km(&GeoPoint {
                latitude: record.latitude,
                longitude: record.longitude,
            });
            (distance_km <= radius_km).then(|| SearchResult {
                id: record.id,
                text: record.text.clone(),
                distance_km,
                score: cosine_similarity(query, &record.embedding),
            })
        })
        .collect();

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

async fn run_blocking<T, F>(f: F) -> Result<T, VectorError>
where
    F: FnOnce() -> Result<T, VectorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VectorError::Storage(format!("storage task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::haversine_km;
    use crate::store::{MemoryRecordStore, RocksRecordStore};
    use atlas_embeddings::{EmbeddingError, ModelInfo};
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Returns a fixed vector per known text.
    struct TableEmbedder {
        info: ModelInfo,
        table: HashMap<String, Vec<f32>>,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
            let dimension = entries.first().map(|(_, v)| v.len()).unwrap_or(2);
            Arc::new(Self {
                info: ModelInfo {
                    name: "table".to_string(),
                    dimension,
                    max_sequence_length: 64,
                },
                table: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            })
        }
    }

    impl EmbeddingModel for TableEmbedder {
        fn info(&self) -> &ModelInfo {
            &self.info
        }

        fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            self.table
                .get(text)
                .cloned()
                .map(Embedding::raw)
                .ok_or_else(|| EmbeddingError::Unavailable(format!("unknown text {:?}", text)))
        }
    }

    fn config(dimension: usize) -> IndexConfig {
        IndexConfig {
            dimension,
            max_text_len: 500,
        }
    }

    fn memory_index(embedder: Arc<TableEmbedder>) -> GeoVectorIndex {
        let dimension = embedder.info().dimension;
        GeoVectorIndex::new(Arc::new(MemoryRecordStore::new()), config(dimension))
            .with_embedder(embedder)
    }

    /// Unit vector whose cosine with [1, 0] is `score`.
    fn at_score(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt()]
    }

    #[tokio::test]
    async fn test_ranking_is_descending_and_stable() {
        let embedder = TableEmbedder::new(&[
            ("query", vec![1.0, 0.0]),
            ("one", at_score(0.9)),
            ("two", at_score(0.5)),
            ("three", at_score(0.9)),
        ]);
        let index = memory_index(embedder);
        let ct = CancellationToken::new();

        for text in ["one", "two", "three"] {
            index.add_item(text, 10.0, 10.0, &ct).await.unwrap();
        }

        let results = index.search("query", 10.0, 10.0, 1.0, &ct).await.unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(order, vec!["one", "three", "two"]);
        assert!((results[0].score - 0.9).abs() < 1e-6);
        assert!((results[2].score - 0.5).abs() < 1e-6);
        assert!(results.iter().all(|r| r.distance_km == 0.0));
    }

    #[tokio::test]
    async fn test_radius_boundary_is_inclusive() {
        let embedder = TableEmbedder::new(&[("query", vec![1.0, 0.0]), ("far", vec![1.0, 0.0])]);
        let index = memory_index(embedder);
        let ct = CancellationToken::new();

        // Roughly 10 km east of (0, 0)
        let lng = (10.0 / 6371.0f64).to_degrees();
        index.add_item("far", 0.0, lng, &ct).await.unwrap();
        let exact = haversine_km(0.0, 0.0, 0.0, lng);
        assert!((exact - 10.0).abs() < 1e-9);

        let hits = index.search("query", 0.0, 0.0, exact, &ct).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].distance_km, exact);

        let hits = index.search("query", 0.0, 0.0, 9.999, &ct).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_records_outside_radius_are_excluded() {
        let embedder = TableEmbedder::new(&[
            ("query", vec![1.0, 0.0]),
            ("johannesburg", vec![0.0, 1.0]),
            ("cape town", vec![1.0, 0.0]),
        ]);
        let index = memory_index(embedder);
        let ct = CancellationToken::new();
        index.add_item("johannesburg", -26.2041, 28.0473, &ct).await.unwrap();
        index.add_item("cape town", -33.9249, 18.4241, &ct).await.unwrap();

        let hits = index
            .search("query", -26.1, 28.0, 50.0, &ct)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "johannesburg");
        assert_eq!(hits[0].score, 0.0);
    }

    #[tokio::test]
    async fn test_missing_embedder_is_unavailable() {
        let index = GeoVectorIndex::new(Arc::new(MemoryRecordStore::new()), config(2));
        let ct = CancellationToken::new();

        assert!(!index.has_embedder());
        assert!(matches!(
            index.add_item("text", 0.0, 0.0, &ct).await,
            Err(VectorError::EmbeddingUnavailable(_))
        ));
        assert!(matches!(
            index.search("text", 0.0, 0.0, 1.0, &ct).await,
            Err(VectorError::EmbeddingUnavailable(_))
        ));
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_unavailable() {
        let index = memory_index(TableEmbedder::new(&[("known", vec![1.0, 0.0])]));
        let err = index
            .add_item("unknown", 0.0, 0.0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let embedder = TableEmbedder::new(&[("a", vec![1.0, 0.0, 0.0])]);
        let index = GeoVectorIndex::new(Arc::new(MemoryRecordStore::new()), config(384))
            .with_embedder(embedder);
        let err = index
            .add_item("a", 0.0, 0.0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 384,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_input_validation() {
        let index = memory_index(TableEmbedder::new(&[("a", vec![1.0, 0.0])]));
        let ct = CancellationToken::new();

        let long = "x".repeat(501);
        assert!(matches!(
            index.add_item(&long, 0.0, 0.0, &ct).await,
            Err(VectorError::InvalidInput(_))
        ));
        assert!(matches!(
            index.add_item("   ", 0.0, 0.0, &ct).await,
            Err(VectorError::InvalidInput(_))
        ));
        assert!(matches!(
            index.add_item("a", 91.0, 0.0, &ct).await,
            Err(VectorError::InvalidInput(_))
        ));
        assert!(matches!(
            index.search("a", 0.0, 0.0, -1.0, &ct).await,
            Err(VectorError::InvalidInput(_))
        ));

        // Limit counts characters, not bytes.
        let accented = "é".repeat(500);
        assert!(index.check_text(&accented).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_add_stores_nothing() {
        let index = memory_index(TableEmbedder::new(&[("a", vec![1.0, 0.0])]));
        let ct = CancellationToken::new();
        ct.cancel();

        let err = index.add_item("a", 0.0, 0.0, &ct).await.unwrap_err();
        assert!(matches!(err, VectorError::Cancelled));
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rocks_backed_index_persists() {
        let temp = TempDir::new().unwrap();
        let embedder = TableEmbedder::new(&[("query", vec![0.0, 1.0]), ("kept", vec![0.0, 2.0])]);
        let ct = CancellationToken::new();

        {
            let store = Arc::new(RocksRecordStore::open(temp.path()).unwrap());
            let index = GeoVectorIndex::new(store, config(2)).with_embedder(embedder.clone());
            index.add_item("kept", 1.0, 1.0, &ct).await.unwrap();
        }

        let store = Arc::new(RocksRecordStore::open(temp.path()).unwrap());
        let index = GeoVectorIndex::new(store, config(2)).with_embedder(embedder);
        let hits = index.search("query", 1.0, 1.0, 0.0, &ct).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "kept");
        assert_eq!(hits[0].score, 1.0);
    }

    #[test]
    fn test_rank_handles_zero_vectors() {
        let records = vec![SearchRecord {
            id: 1,
            text: "blank".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            embedding: vec![0.0, 0.0],
        }];
        let center = GeoPoint::new(0.0, 0.0).unwrap();
        let results = rank(&records, &[1.0, 0.0], center, 1.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 0.0);
    }
}
