//! Derived fields: arrays computed on demand from other fields.
//!
//! The same table is used by the dataset server (deriving from its own
//! untouched arrays) and by remote views (deriving locally once an input has
//! been modified on the client), so both sides compute identical values.

use super::array::Array;
use crate::task_error::TaskError;
use num_traits::Float;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

pub type DeriveFn = fn(&[&Array]) -> Result<Array, TaskError>;

#[derive(Clone, Debug)]
pub struct Derivation {
    pub inputs: Vec<String>,
    pub compute: DeriveFn,
}

#[derive(Clone, Debug, Default)]
pub struct Derivations {
    table: BTreeMap<String, Derivation>,
}

static BUILTIN: Lazy<Derivations> = Lazy::new(|| {
    let mut d = Derivations::default();
    d.insert("x", &["pos"], |a| a[0].column(0));
    d.insert("y", &["pos"], |a| a[0].column(1));
    d.insert("z", &["pos"], |a| a[0].column(2));
    d.insert("vx", &["vel"], |a| a[0].column(0));
    d.insert("vy", &["vel"], |a| a[0].column(1));
    d.insert("vz", &["vel"], |a| a[0].column(2));
    d.insert("r", &["pos"], |a| Ok(Array::scalars(row_norms(a[0].require_vectors("pos")?))));
    d.insert("v2", &["vel"], |a| {
        let n = row_norms(a[0].require_vectors("vel")?);
        Ok(Array::scalars(n.into_iter().map(|v| v * v).collect()))
    });
    d
});

fn norm3<T: Float>(row: &[T]) -> T {
    (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt()
}

#[cfg(feature = "rayon")]
fn row_norms(v: &[f64]) -> Vec<f64> {
    use rayon::prelude::*;
    v.par_chunks_exact(3).map(norm3).collect()
}

#[cfg(not(feature = "rayon"))]
fn row_norms(v: &[f64]) -> Vec<f64> {
    v.chunks_exact(3).map(norm3).collect()
}

impl Derivations {
    /// Shared table of the built-in derived fields.
    pub fn builtin() -> &'static Derivations {
        &BUILTIN
    }

    pub fn insert(&mut self, name: &str, inputs: &[&str], compute: DeriveFn) {
        self.table.insert(
            name.to_string(),
            Derivation {
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                compute,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Derivation> {
        self.table.get(name)
    }

    pub fn is_derived(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Whether `name` depends, directly or transitively, on `base`.
    pub fn depends_on(&self, name: &str, base: &str) -> bool {
        self.depends_on_any(name, &mut |f| f == base)
    }

    /// Whether `name` depends, directly or transitively, on any field for which
    /// `hit` returns true.
    pub fn depends_on_any(&self, name: &str, hit: &mut dyn FnMut(&str) -> bool) -> bool {
        let mut stack = vec![name];
        let mut seen = std::collections::HashSet::new();
        while let Some(f) = stack.pop() {
            if !seen.insert(f) {
                continue;
            }
            if let Some(d) = self.table.get(f) {
                for input in &d.inputs {
                    if hit(input.as_str()) {
                        return true;
                    }
                    stack.push(input.as_str());
                }
            }
        }
        false
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_r_is_euclidean_norm() {
        let pos = Array::vectors(&[[3.0, 4.0, 0.0], [0.0, 0.0, -2.0]]);
        let d = Derivations::builtin().get("r").unwrap();
        let r = (d.compute)(&[&pos]).unwrap();
        assert_eq!(r.as_f64().unwrap(), &[5.0, 2.0]);
    }

    #[test]
    fn transitive_dependencies() {
        let mut d = Derivations::builtin().clone();
        d.insert("r_over_x", &["r", "x"], |a| {
            let r = a[0].require_f64("r")?;
            let x = a[1].require_f64("x")?;
            Ok(Array::scalars(r.iter().zip(x).map(|(r, x)| r / x).collect()))
        });
        assert!(d.depends_on("r_over_x", "pos"));
        assert!(d.depends_on("x", "pos"));
        assert!(!d.depends_on("r", "vel"));
        assert!(!d.depends_on("pos", "pos"));
    }
}
