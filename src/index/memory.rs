/// Exact-scan vector store held in process memory
use super::{
    CollectionInfo, CollectionStatus, Distance, Point, PointPayload, ScoredPoint, SearchFilter,
    VectorStore, VectorStoreError,
};
use ahash::AHashMap;
use async_trait::async_trait;
use std::cmp::Ordering;
use tokio::sync::RwLock;

struct StoredPoint {
    vector: Vec<f32>,
    payload: PointPayload,
}

struct Collection {
    dimension: usize,
    distance: Distance,
    points: AHashMap<String, StoredPoint>,
}

/// Reference [`VectorStore`]: every search scores every point
///
/// Suitable for tests, the CLI and small corpora.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<AHashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), VectorStoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(VectorStoreError::DimensionMismatch { expected, actual })
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(VectorStoreError::CollectionExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimension,
                distance,
                points: AHashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, VectorStoreError> {
        Ok(self.collections.write().await.remove(name).is_some())
    }

    async fn describe(&self, name: &str) -> Result<Option<CollectionInfo>, VectorStoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            status: CollectionStatus::Ready,
            count: c.points.len(),
            dimension: c.dimension,
            distance: c.distance,
        }))
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;

        // Validate the whole batch before touching anything
        for point in &points {
            check_dimension(target.dimension, point.vector.len())?;
        }

        for point in points {
            target.points.insert(
                point.id,
                StoredPoint {
                    vector: point.vector,
                    payload: point.payload,
                },
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;
        check_dimension(target.dimension, vector.len())?;

        let mut scored: Vec<ScoredPoint> = target
            .points
            .iter()
            .filter(|(_, p)| filter.map_or(true, |f| f.matches(&p.payload)))
            .map(|(id, p)| ScoredPoint {
                id: id.clone(),
                score: target.distance.score(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, VectorStoreError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;
        Ok(ids.iter().filter(|id| target.points.remove(*id).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkMetadata;

    fn point(id: &str, doc: &str, vector: Vec<f32>) -> Point {
        Point {
            id: id.to_string(),
            vector,
            payload: PointPayload {
                document_id: doc.to_string(),
                content: format!("content of {}", id),
                chunk_index: 0,
                metadata: ChunkMetadata::default(),
            },
        }
    }

    async fn seeded() -> InMemoryVectorStore {
        let store = InMemoryVectorStore::new();
        store.create_collection("docs", 2, Distance::Cosine).await.unwrap();
        store
            .upsert(
                "docs",
                vec![
                    point("a", "d1", vec![1.0, 0.0]),
                    point("b", "d1", vec![0.7, 0.7]),
                    point("c", "d2", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let store = seeded().await;
        let hits = store.search("docs", &[1.0, 0.1], 2, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_filter_and_delete() {
        let store = seeded().await;
        let filter = SearchFilter::documents(["d2"]);
        let hits = store.search("docs", &[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c");

        let removed = store
            .delete("docs", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.describe("docs").await.unwrap().unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_dimension_and_missing_collection_errors() {
        let store = seeded().await;
        let err = store
            .upsert("docs", vec![point("x", "d1", vec![1.0, 2.0, 3.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(store.describe("docs").await.unwrap().unwrap().count, 3);

        let err = store.search("nope", &[1.0, 0.0], 1, None).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_query_vector_scores_zero() {
        let store = seeded().await;
        let hits = store.search("docs", &[0.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.score == 0.0));
    }
}
