//! Datasets: the reader-collaborator interface and the remote dataset protocol.
//!
//! A [`DatasetLoader`] turns a path into a loaded [`Dataset`]; the coordination
//! layer treats the result opaquely apart from named stored fields, object
//! (halo) and particle family membership, and scalar properties. Everything else a view can ask
//! for is either a derived field (see [`derive`]) or the reserved
//! [`INDEX_LIST_FIELD`].

pub mod array;
pub mod client;
pub mod derive;
pub mod memory;
pub mod selector;
pub mod server;

pub use array::{Array, ArrayData, Dtype};
pub use client::{RemoteDataset, RemoteView};
pub use derive::{Derivation, Derivations};
pub use memory::{MemoryDataset, MemoryLoader};
pub use selector::{Filter, Selector};
pub use server::DatasetServer;

use crate::task_error::TaskError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Scalar metadata of a dataset (box size, redshift, ...).
pub type Properties = BTreeMap<String, f64>;

/// Reserved field: row indices of a view within its parent dataset.
pub const INDEX_LIST_FIELD: &str = "remote-index-list";

/// A loaded, read-only dataset.
pub trait Dataset: Send + Sync {
    /// Number of rows (particles).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn properties(&self) -> Properties {
        Properties::new()
    }

    /// Whether `name` is stored (not derived) in this dataset.
    fn has_field(&self, name: &str) -> bool;

    /// Stored field `name`, restricted to the rows in `index`.
    fn load_field(&self, name: &str, index: &[usize]) -> Result<Array, TaskError>;

    /// Rows belonging to catalogued object `number`.
    fn object_indices(&self, number: usize) -> Result<Vec<usize>, TaskError> {
        Err(TaskError::InvalidSelector(format!(
            "dataset has no object catalogue (asked for object {number})"
        )))
    }

    /// Rows belonging to particle family `family`, ascending.
    fn family_indices(&self, family: &str) -> Result<Vec<usize>, TaskError> {
        Err(TaskError::InvalidSelector(format!(
            "dataset has no particle families (asked for `{family}`)"
        )))
    }
}

/// Reader collaborator: loads the dataset stored at a path.
pub trait DatasetLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<Arc<dyn Dataset>, TaskError>;
}

/// Row indices selected by `selector`.
pub fn resolve(ds: &dyn Dataset, selector: &Selector) -> Result<Vec<usize>, TaskError> {
    match selector {
        Selector::All => Ok((0..ds.len()).collect()),
        Selector::Indices(idx) => {
            if let Some(&bad) = idx.iter().find(|&&i| i >= ds.len()) {
                return Err(TaskError::InvalidSelector(format!(
                    "index {bad} out of range for {} rows",
                    ds.len()
                )));
            }
            Ok(idx.clone())
        }
        Selector::Filter(filter) => {
            if !ds.has_field("pos") {
                return Err(TaskError::InvalidSelector(
                    "spatial filter needs a `pos` field".into(),
                ));
            }
            let all: Vec<usize> = (0..ds.len()).collect();
            let pos = ds.load_field("pos", &all)?;
            Ok(filter.apply(pos.require_vectors("pos")?))
        }
        Selector::Object(n) => ds.object_indices(*n),
        Selector::Family { within, family } => {
            let rows = resolve(ds, within)?;
            let mut member = vec![false; ds.len()];
            for i in ds.family_indices(family)? {
                if let Some(m) = member.get_mut(i) {
                    *m = true;
                }
            }
            Ok(rows.into_iter().filter(|&i| member[i]).collect())
        }
    }
}

/// Evaluates fields over one fixed row subset, computing each derived field
/// at most once and only over that subset.
pub struct Evaluator<'a> {
    ds: &'a dyn Dataset,
    derivations: &'a Derivations,
    index: &'a [usize],
    derived: &'a mut HashMap<String, Array>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        ds: &'a dyn Dataset,
        derivations: &'a Derivations,
        index: &'a [usize],
        derived: &'a mut HashMap<String, Array>,
    ) -> Self {
        Self {
            ds,
            derivations,
            index,
            derived,
        }
    }

    pub fn field(&mut self, name: &str) -> Result<Array, TaskError> {
        if name == INDEX_LIST_FIELD {
            return Ok(Array::integers(self.index.iter().map(|&i| i as i64).collect()));
        }
        if self.ds.has_field(name) {
            return self.ds.load_field(name, self.index);
        }
        if let Some(hit) = self.derived.get(name) {
            return Ok(hit.clone());
        }
        let derivations = self.derivations;
        let derivation = derivations
            .get(name)
            .ok_or_else(|| TaskError::FieldNotFound(name.to_string()))?;
        let inputs = derivation
            .inputs
            .iter()
            .map(|f| self.field(f))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&Array> = inputs.iter().collect();
        let value = (derivation.compute)(&refs)?;
        log::debug!("derived `{name}` over {} rows", self.index.len());
        self.derived.insert(name.to_string(), value.clone());
        Ok(value)
    }
}

/// Compute `field` over the rows chosen by `selector`, without any caching
/// across calls. This is what a rank holding the dataset itself would see.
pub fn evaluate_local(
    ds: &dyn Dataset,
    derivations: &Derivations,
    selector: &Selector,
    field: &str,
) -> Result<Array, TaskError> {
    let index = resolve(ds, selector)?;
    let mut scratch = HashMap::new();
    let mut eval = Evaluator::new(ds, derivations, &index, &mut scratch);
    eval.field(field)
}
