//! Row-major numeric arrays: `rows × width` values of one dtype.
//!
//! A width of 1 is a plain per-element field (`mass`, `iord`), a width of 3
//! a vector field (`pos`, `vel`).

use crate::task_error::TaskError;
use serde::{Deserialize, Serialize};

/// Element type of an [`Array`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Dtype {
    F64 = 1,
    I64 = 2,
}

impl Dtype {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Dtype::F64),
            2 => Some(Dtype::I64),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    F64(Vec<f64>),
    I64(Vec<i64>),
}

impl ArrayData {
    fn len(&self) -> usize {
        match self {
            ArrayData::F64(v) => v.len(),
            ArrayData::I64(v) => v.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    data: ArrayData,
    width: usize,
}

impl Array {
    /// Build an array, checking that `data` holds whole rows.
    pub fn new(data: ArrayData, width: usize) -> Result<Self, TaskError> {
        if width == 0 || data.len() % width != 0 {
            return Err(TaskError::ArrayLayout(format!(
                "{} values do not form rows of width {width}",
                data.len()
            )));
        }
        Ok(Self { data, width })
    }

    pub fn from_f64(values: Vec<f64>, width: usize) -> Result<Self, TaskError> {
        Self::new(ArrayData::F64(values), width)
    }

    pub fn from_i64(values: Vec<i64>, width: usize) -> Result<Self, TaskError> {
        Self::new(ArrayData::I64(values), width)
    }

    /// A width-1 float array.
    pub fn scalars(values: Vec<f64>) -> Self {
        Self {
            data: ArrayData::F64(values),
            width: 1,
        }
    }

    /// A width-1 integer array.
    pub fn integers(values: Vec<i64>) -> Self {
        Self {
            data: ArrayData::I64(values),
            width: 1,
        }
    }

    /// Rows of three floats, e.g. positions.
    pub fn vectors(rows: &[[f64; 3]]) -> Self {
        Self {
            data: ArrayData::F64(rows.iter().flatten().copied().collect()),
            width: 3,
        }
    }

    pub fn dtype(&self) -> Dtype {
        match self.data {
            ArrayData::F64(_) => Dtype::F64,
            ArrayData::I64(_) => Dtype::I64,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            ArrayData::F64(v) => Some(v),
            ArrayData::I64(_) => None,
        }
    }

    pub fn as_f64_mut(&mut self) -> Option<&mut [f64]> {
        match &mut self.data {
            ArrayData::F64(v) => Some(v),
            ArrayData::I64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            ArrayData::I64(v) => Some(v),
            ArrayData::F64(_) => None,
        }
    }

    /// Float view or a layout error naming `what`.
    pub fn require_f64(&self, what: &str) -> Result<&[f64], TaskError> {
        self.as_f64()
            .ok_or_else(|| TaskError::ArrayLayout(format!("`{what}` must be a float array")))
    }

    /// Float rows of width 3, e.g. positions.
    pub fn require_vectors(&self, what: &str) -> Result<&[f64], TaskError> {
        if self.width != 3 {
            return Err(TaskError::ArrayLayout(format!(
                "`{what}` must have width 3, found {}",
                self.width
            )));
        }
        self.require_f64(what)
    }

    /// The rows named by `index`, in that order.
    pub fn take_rows(&self, index: &[usize]) -> Result<Self, TaskError> {
        let rows = self.rows();
        if let Some(&bad) = index.iter().find(|&&i| i >= rows) {
            return Err(TaskError::InvalidSelector(format!(
                "index {bad} out of range for {rows} rows"
            )));
        }
        let w = self.width;
        let data = match &self.data {
            ArrayData::F64(v) => {
                ArrayData::F64(index.iter().flat_map(|&i| v[i * w..(i + 1) * w].iter().copied()).collect())
            }
            ArrayData::I64(v) => {
                ArrayData::I64(index.iter().flat_map(|&i| v[i * w..(i + 1) * w].iter().copied()).collect())
            }
        };
        Ok(Self { data, width: w })
    }

    /// Column `c` as a width-1 array.
    pub fn column(&self, c: usize) -> Result<Self, TaskError> {
        if c >= self.width {
            return Err(TaskError::ArrayLayout(format!(
                "column {c} out of range for width {}",
                self.width
            )));
        }
        let w = self.width;
        let data = match &self.data {
            ArrayData::F64(v) => ArrayData::F64(v.iter().skip(c).step_by(w).copied().collect()),
            ArrayData::I64(v) => ArrayData::I64(v.iter().skip(c).step_by(w).copied().collect()),
        };
        Ok(Self { data, width: 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_columns() {
        let a = Array::vectors(&[[1., 2., 3.], [4., 5., 6.]]);
        assert_eq!(a.rows(), 2);
        assert_eq!(a.column(1).unwrap().as_f64().unwrap(), &[2., 5.]);
        assert!(a.column(3).is_err());
    }

    #[test]
    fn take_rows_keeps_order_and_checks_bounds() {
        let a = Array::integers(vec![10, 11, 12, 13]);
        let t = a.take_rows(&[3, 0]).unwrap();
        assert_eq!(t.as_i64().unwrap(), &[13, 10]);
        assert!(matches!(a.take_rows(&[4]), Err(TaskError::InvalidSelector(_))));
    }

    #[test]
    fn ragged_data_is_rejected() {
        assert!(Array::from_f64(vec![1.0; 5], 3).is_err());
        assert!(Array::from_f64(vec![], 0).is_err());
    }
}
