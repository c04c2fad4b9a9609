//! Exact cosine-similarity search over in-memory embedding partitions.
//!
//! Vectors are split into a title and a content partition by chunk id and
//! replaced only after the store commit that wrote them succeeds.

use super::types::{validate_dimension, EmbeddingData, Field, ScoredId, SearchError};
use crate::storage::DocumentStore;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{info, instrument};

/// Cosine similarity `dot(a, b) / (|a| |b|)`; 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[derive(Default)]
struct Partitions {
    title: BTreeMap<String, Vec<f32>>,
    content: BTreeMap<String, Vec<f32>>,
}

impl Partitions {
    fn of(&self, field: Field) -> &BTreeMap<String, Vec<f32>> {
        match field {
            Field::Title => &self.title,
            Field::Content => &self.content,
        }
    }

    fn of_mut(&mut self, field: Field) -> &mut BTreeMap<String, Vec<f32>> {
        match field {
            Field::Title => &mut self.title,
            Field::Content => &mut self.content,
        }
    }

    fn insert(&mut self, id: String, embedding: Vec<f32>) {
        self.of_mut(Field::of_id(&id)).insert(id, embedding);
    }

    fn remove(&mut self, id: &str) {
        self.of_mut(Field::of_id(id)).remove(id);
    }
}

/// Flat vector index split into title and content partitions.
///
/// A mirror of the store's embedding table: loaded once at open and updated
/// by the engine only after a store commit succeeds, so searches never see
/// vectors that are not persisted.
///
/// Every query scans its whole partition. There is no approximate structure
/// to maintain, so deletes are immediate.
pub struct VectorIndex {
    /// Dimensionality of embeddings, fixed by the provider
    dimension: usize,
    partitions: RwLock<Partitions>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            partitions: RwLock::new(Partitions::default()),
        }
    }

    /// Builds the index from every embedding in `store`.
    ///
    /// Fails with [`SearchError::DimensionMismatch`] if stored vectors were
    /// produced by a provider of a different dimension.
    pub async fn load(store: &dyn DocumentStore, dimension: usize) -> Result<Self, SearchError> {
        let index = Self::new(dimension);
        let embeddings = store.iter_embeddings().await?;
        let count = embeddings.len();
        index.apply_changes(&[], embeddings)?;
        info!("Loaded {} embeddings into vector index", count);
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Partitions>, SearchError> {
        self.partitions
            .read()
            .map_err(|e| SearchError::StorageError(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Partitions>, SearchError> {
        self.partitions
            .write()
            .map_err(|e| SearchError::StorageError(format!("Lock poisoned: {}", e)))
    }

    /// Removes `removed` then inserts `added`, all under one write lock.
    ///
    /// Dimensions are checked before anything changes.
    pub fn apply_changes(
        &self,
        removed: &[String],
        added: Vec<EmbeddingData>,
    ) -> Result<(), SearchError> {
        for data in &added {
            validate_dimension(self.dimension, data.embedding.len())?;
        }
        let mut partitions = self.write()?;
        for id in removed {
            partitions.remove(id);
        }
        for data in added {
            partitions.insert(data.id, data.embedding);
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SearchError> {
        *self.write()? = Partitions::default();
        Ok(())
    }

    /// Number of vectors in `field`.
    pub fn len(&self, field: Field) -> usize {
        self.read().map(|p| p.of(field).len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len(Field::Title) == 0 && self.len(Field::Content) == 0
    }

    /// Scores every vector of `field` against `query`.
    ///
    /// Returns all ids sorted by similarity descending; equal scores keep id
    /// order.
    #[instrument(skip_all, fields(field = ?field))]
    pub fn search(&self, query: &[f32], field: Field) -> Result<Vec<ScoredId>, SearchError> {
        validate_dimension(self.dimension, query.len())?;
        let partitions = self.read()?;

        let mut results: Vec<ScoredId> = partitions
            .of(field)
            .iter()
            .map(|(id, embedding)| ScoredId::new(id.clone(), cosine_similarity(query, embedding)))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}
