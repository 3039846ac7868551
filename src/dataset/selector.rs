//! Which rows of a dataset a view covers.

use crate::task_error::TaskError;
use serde::{Deserialize, Serialize};

/// Spatial predicate over positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Points strictly closer than `radius` to `centre`.
    Sphere { centre: [f64; 3], radius: f64 },
    /// Half-open box `min <= p < max` per axis.
    Cuboid { min: [f64; 3], max: [f64; 3] },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Sphere about the origin.
    pub fn sphere(radius: f64) -> Self {
        Filter::Sphere {
            centre: [0.0; 3],
            radius,
        }
    }

    pub fn and(self, other: Filter) -> Self {
        Filter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn contains(&self, p: [f64; 3]) -> bool {
        match self {
            Filter::Sphere { centre, radius } => {
                let d2: f64 = p.iter().zip(centre).map(|(a, c)| (a - c) * (a - c)).sum();
                d2 < radius * radius
            }
            Filter::Cuboid { min, max } => (0..3).all(|k| p[k] >= min[k] && p[k] < max[k]),
            Filter::And(a, b) => a.contains(p) && b.contains(p),
            Filter::Or(a, b) => a.contains(p) || b.contains(p),
            Filter::Not(a) => !a.contains(p),
        }
    }

    /// Indices of the rows of `pos` (width 3) that pass, ascending.
    pub fn apply(&self, pos: &[f64]) -> Vec<usize> {
        pos.chunks_exact(3)
            .enumerate()
            .filter(|(_, row)| self.contains([row[0], row[1], row[2]]))
            .map(|(i, _)| i)
            .collect()
    }
}

/// The subset of a dataset a view covers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Selector {
    All,
    /// Explicit row indices, kept in the given order.
    Indices(Vec<usize>),
    Filter(Filter),
    /// A catalogued object (halo) of the dataset, by number.
    Object(usize),
    /// Rows of `within` that belong to particle family `family` (dark matter,
    /// gas, stars, ...), kept in `within`'s order.
    Family { within: Box<Selector>, family: String },
}

impl Selector {
    /// The `family` members of this selection.
    pub fn family(self, family: &str) -> Selector {
        Selector::Family {
            within: Box::new(self),
            family: family.to_string(),
        }
    }

    /// Stable byte key used to cache per-selector state.
    pub fn key(&self) -> Result<Vec<u8>, TaskError> {
        Ok(bincode::serialize(self)?)
    }
}

impl From<Filter> for Selector {
    fn from(f: Filter) -> Self {
        Selector::Filter(f)
    }
}
