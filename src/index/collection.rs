/// Collection lifecycle on top of a [`VectorStore`]
use super::{CollectionInfo, Distance, VectorStore, VectorStoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error(
        "Collection '{name}' exists with dimension {found_dimension} ({found_distance}), \
         requested {dimension} ({distance})"
    )]
    Incompatible {
        name: String,
        dimension: usize,
        distance: Distance,
        found_dimension: usize,
        found_distance: Distance,
    },

    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Collection dimension must be greater than zero")]
    ZeroDimension,

    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

/// Creates, recreates and describes collections
///
/// Dimension and distance are fixed when a collection is created; `ensure`
/// refuses to reuse a collection built with different parameters.
pub struct CollectionManager {
    store: Arc<dyn VectorStore>,
}

impl CollectionManager {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Create `name` unless it already exists with the same parameters
    pub async fn ensure(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<CollectionInfo, CollectionError> {
        if dimension == 0 {
            return Err(CollectionError::ZeroDimension);
        }

        if let Some(existing) = self.store.describe(name).await? {
            if existing.dimension != dimension || existing.distance != distance {
                return Err(CollectionError::Incompatible {
                    name: name.to_string(),
                    dimension,
                    distance,
                    found_dimension: existing.dimension,
                    found_distance: existing.distance,
                });
            }
            return Ok(existing);
        }

        match self.store.create_collection(name, dimension, distance).await {
            Ok(()) => info!("Created collection '{}' ({}D, {})", name, dimension, distance),
            // Lost a creation race; the compatibility check below still applies
            Err(VectorStoreError::CollectionExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let info = self.describe(name).await?;
        if info.dimension != dimension || info.distance != distance {
            return Err(CollectionError::Incompatible {
                name: name.to_string(),
                dimension,
                distance,
                found_dimension: info.dimension,
                found_distance: info.distance,
            });
        }
        Ok(info)
    }

    /// Drop and rebuild `name`. Every point in it is lost.
    pub async fn recreate(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<CollectionInfo, CollectionError> {
        if dimension == 0 {
            return Err(CollectionError::ZeroDimension);
        }

        if let Some(existing) = self.store.describe(name).await? {
            warn!(
                "Recreating collection '{}': discarding {} points",
                name, existing.count
            );
        }

        self.store.delete_collection(name).await?;
        self.store.create_collection(name, dimension, distance).await?;
        info!("Recreated collection '{}' ({}D, {})", name, dimension, distance);

        self.describe(name).await
    }

    pub async fn describe(&self, name: &str) -> Result<CollectionInfo, CollectionError> {
        self.store
            .describe(name)
            .await?
            .ok_or_else(|| CollectionError::NotFound(name.to_string()))
    }

    /// Returns whether the collection existed
    pub async fn delete(&self, name: &str) -> Result<bool, CollectionError> {
        let existed = self.store.delete_collection(name).await?;
        if existed {
            warn!("Deleted collection '{}'", name);
        }
        Ok(existed)
    }
}
