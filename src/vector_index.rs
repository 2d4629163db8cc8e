/// Persistent approximate-nearest-neighbor index over chunk embeddings
///
/// USearch provides an HNSW graph with cosine distance. Entries are keyed
/// by chunk id strings; the string-to-id mapping, dimension, and id counter
/// are persisted in a JSON sidecar next to the graph artifact. A missing
/// artifact means an empty index.
///
/// Concurrency: guarded by an RW lock. `add`, `add_batch`, `delete`, and
/// `save` take the write lock; `search`, `len`, and `dimensions` take the
/// read lock.
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

const INITIAL_CAPACITY: usize = 1024;

/// A vector search hit
#[derive(Debug, Clone)]
pub struct VectorResult {
    /// Chunk key (format: `"<document_id>:<chunk_index>"`)
    pub key: String,
    /// Cosine similarity in [0, 1]
    pub similarity: f64,
}

#[derive(Default, Serialize, Deserialize)]
struct Sidecar {
    dimensions: usize,
    next_id: u64,
    keys: HashMap<String, u64>,
}

struct State {
    index: Option<Index>,
    keys: HashMap<String, u64>,
    ids: HashMap<u64, String>,
    next_id: u64,
    dimensions: usize,
}

/// HNSW vector index keyed by chunk id
pub struct VectorIndex {
    state: RwLock<State>,
    path: PathBuf,
}

impl VectorIndex {
    /// Open the index at `path`, loading the saved graph if one exists.
    pub fn open(path: &Path) -> Result<Self> {
        let mut state = State {
            index: None,
            keys: HashMap::new(),
            ids: HashMap::new(),
            next_id: 0,
            dimensions: 0,
        };

        let sidecar_path = sidecar_path(path);
        if path.exists() && sidecar_path.exists() {
            let sidecar: Sidecar = serde_json::from_str(&std::fs::read_to_string(&sidecar_path)?)
                .map_err(|e| Error::VectorIndex(format!("reading key sidecar: {e}")))?;

            let index = new_usearch_index(sidecar.dimensions)?;
            index
                .load(&path.to_string_lossy())
                .map_err(|e| Error::VectorIndex(format!("loading vector index: {e}")))?;

            state.ids = sidecar.keys.iter().map(|(k, v)| (*v, k.clone())).collect();
            state.keys = sidecar.keys;
            state.next_id = sidecar.next_id;
            state.dimensions = sidecar.dimensions;
            state.index = Some(index);
        } else if path.exists() {
            tracing::warn!(
                "vector index at {} has no key sidecar, starting empty",
                path.display()
            );
        }

        Ok(Self {
            state: RwLock::new(state),
            path: path.to_path_buf(),
        })
    }

    /// Insert or replace a vector for the given key.
    pub fn add(&self, key: &str, vector: &[f32]) -> Result<()> {
        let mut state = self.write()?;
        add_locked(&mut state, key, vector)
    }

    /// Insert or replace multiple vectors. `keys` and `vectors` must have
    /// the same length.
    pub fn add_batch(&self, keys: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        if keys.len() != vectors.len() {
            return Err(Error::Validation(format!(
                "add_batch length mismatch: {} keys, {} vectors",
                keys.len(),
                vectors.len()
            )));
        }

        let mut state = self.write()?;
        for (key, vector) in keys.iter().zip(vectors.iter()) {
            add_locked(&mut state, key, vector)?;
        }
        Ok(())
    }

    /// Remove a vector by key. Unknown keys are a no-op.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.write()?;
        if let Some(id) = state.keys.remove(key) {
            state.ids.remove(&id);
            if let Some(index) = &state.index {
                index
                    .remove(id)
                    .map_err(|e| Error::VectorIndex(format!("removing vector: {e}")))?;
            }
        }
        Ok(())
    }

    /// Find the `k` nearest neighbors, sorted by descending similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorResult>> {
        let state = self.read()?;
        let Some(index) = &state.index else {
            return Ok(Vec::new());
        };
        if k == 0 || state.keys.is_empty() {
            return Ok(Vec::new());
        }

        let matches = index
            .search(query, k)
            .map_err(|e| Error::VectorIndex(format!("searching vector index: {e}")))?;

        let mut results = Vec::with_capacity(matches.keys.len());
        for (id, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(key) = state.ids.get(id) else {
                continue;
            };
            // Cosine distance is in [0, 2]; 1 - d/2 maps it to [0, 1].
            let similarity = (1.0 - f64::from(*distance) / 2.0).clamp(0.0, 1.0);
            results.push(VectorResult {
                key: key.clone(),
                similarity,
            });
        }
        Ok(results)
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.read().map(|s| s.keys.len()).unwrap_or(0)
    }

    /// True when no vectors are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of stored vectors; 0 until the first insertion.
    pub fn dimensions(&self) -> usize {
        self.read().map(|s| s.dimensions).unwrap_or(0)
    }

    /// Persist the graph and the key sidecar to disk.
    pub fn save(&self) -> Result<()> {
        let state = self.write()?;
        let Some(index) = &state.index else {
            return Ok(());
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        index
            .save(&self.path.to_string_lossy())
            .map_err(|e| Error::VectorIndex(format!("saving vector index: {e}")))?;

        let sidecar = Sidecar {
            dimensions: state.dimensions,
            next_id: state.next_id,
            keys: state.keys.clone(),
        };
        let json = serde_json::to_string(&sidecar)
            .map_err(|e| Error::VectorIndex(format!("serializing key sidecar: {e}")))?;
        std::fs::write(sidecar_path(&self.path), json)?;
        Ok(())
    }

    /// Save and close. The index must not be used afterwards.
    pub fn close(&self) -> Result<()> {
        self.save()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| Error::VectorIndex(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| Error::VectorIndex(format!("lock poisoned: {e}")))
    }
}

fn add_locked(state: &mut State, key: &str, vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::Validation("cannot index an empty vector".to_string()));
    }

    if state.index.is_none() {
        state.index = Some(new_usearch_index(vector.len())?);
        state.dimensions = vector.len();
    }
    if vector.len() != state.dimensions {
        return Err(Error::VectorIndex(format!(
            "dimension mismatch: index holds {}-dimensional vectors, got {}",
            state.dimensions,
            vector.len()
        )));
    }

    // Replace semantics: drop any existing entry for this key first.
    if let Some(old_id) = state.keys.remove(key) {
        state.ids.remove(&old_id);
        if let Some(index) = &state.index {
            index
                .remove(old_id)
                .map_err(|e| Error::VectorIndex(format!("removing vector: {e}")))?;
        }
    }

    let id = state.next_id;
    state.next_id += 1;

    let Some(index) = state.index.as_ref() else {
        return Err(Error::VectorIndex("index not initialized".to_string()));
    };
    if index.size() + 1 > index.capacity() {
        let target = (index.capacity() * 2).max(INITIAL_CAPACITY);
        index
            .reserve(target)
            .map_err(|e| Error::VectorIndex(format!("growing vector index: {e}")))?;
    }
    index
        .add(id, vector)
        .map_err(|e| Error::VectorIndex(format!("adding vector: {e}")))?;

    state.keys.insert(key.to_string(), id);
    state.ids.insert(id, key.to_string());
    Ok(())
}

fn new_usearch_index(dimensions: usize) -> Result<Index> {
    let mut options = IndexOptions::default();
    options.dimensions = dimensions;
    options.metric = MetricKind::Cos;
    options.quantization = ScalarKind::F32;

    let index =
        Index::new(&options).map_err(|e| Error::VectorIndex(format!("creating index: {e}")))?;
    index
        .reserve(INITIAL_CAPACITY)
        .map_err(|e| Error::VectorIndex(format!("reserving capacity: {e}")))?;
    Ok(index)
}

fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("keys")
}
