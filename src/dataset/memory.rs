//! In-memory reference reader: datasets built from arrays in code.

use super::{Array, Dataset, DatasetLoader, Properties};
use crate::task_error::TaskError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug, Default)]
pub struct MemoryDataset {
    len: usize,
    fields: BTreeMap<String, Array>,
    objects: BTreeMap<usize, Vec<usize>>,
    families: BTreeMap<String, Vec<usize>>,
    properties: Properties,
}

impl MemoryDataset {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            ..Self::default()
        }
    }

    /// Add a stored field; it must have one row per element.
    pub fn with_field(mut self, name: &str, array: Array) -> Result<Self, TaskError> {
        if array.rows() != self.len {
            return Err(TaskError::ArrayLayout(format!(
                "field `{name}` has {} rows, dataset has {}",
                array.rows(),
                self.len
            )));
        }
        self.fields.insert(name.to_string(), array);
        Ok(self)
    }

    /// Register catalogued object `number` as the given rows.
    pub fn with_object(mut self, number: usize, rows: Vec<usize>) -> Result<Self, TaskError> {
        if let Some(&bad) = rows.iter().find(|&&i| i >= self.len) {
            return Err(TaskError::InvalidSelector(format!(
                "object {number} names row {bad} beyond {} rows",
                self.len
            )));
        }
        self.objects.insert(number, rows);
        Ok(self)
    }

    /// Declare particle family `name` as the given rows.
    pub fn with_family(mut self, name: &str, mut rows: Vec<usize>) -> Result<Self, TaskError> {
        if let Some(&bad) = rows.iter().find(|&&i| i >= self.len) {
            return Err(TaskError::InvalidSelector(format!(
                "family `{name}` names row {bad} beyond {} rows",
                self.len
            )));
        }
        rows.sort_unstable();
        rows.dedup();
        self.families.insert(name.to_string(), rows);
        Ok(self)
    }

    pub fn with_property(mut self, name: &str, value: f64) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }
}

impl Dataset for MemoryDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn properties(&self) -> Properties {
        self.properties.clone()
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn load_field(&self, name: &str, index: &[usize]) -> Result<Array, TaskError> {
        self.fields
            .get(name)
            .ok_or_else(|| TaskError::FieldNotFound(name.to_string()))?
            .take_rows(index)
    }

    fn object_indices(&self, number: usize) -> Result<Vec<usize>, TaskError> {
        self.objects
            .get(&number)
            .cloned()
            .ok_or_else(|| TaskError::InvalidSelector(format!("no object numbered {number}")))
    }

    fn family_indices(&self, family: &str) -> Result<Vec<usize>, TaskError> {
        self.families
            .get(family)
            .cloned()
            .ok_or_else(|| TaskError::InvalidSelector(format!("no particle family `{family}`")))
    }
}

/// Loader serving a fixed set of in-memory datasets by path.
///
/// Each `load` builds a fresh `Arc`, like a file reader would, and is counted
/// so callers can check how often a path was actually loaded.
#[derive(Default)]
pub struct MemoryLoader {
    datasets: Mutex<HashMap<String, MemoryDataset>>,
    loads: AtomicUsize,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, dataset: MemoryDataset) {
        self.datasets.lock().insert(path.to_string(), dataset);
    }

    pub fn with(self, path: &str, dataset: MemoryDataset) -> Self {
        self.insert(path, dataset);
        self
    }

    /// Number of successful loads so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DatasetLoader for MemoryLoader {
    fn load(&self, path: &str) -> Result<Arc<dyn Dataset>, TaskError> {
        let ds = self
            .datasets
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| TaskError::DatasetLoad {
                path: path.to_string(),
                reason: "no such dataset".into(),
            })?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ds))
    }
}
