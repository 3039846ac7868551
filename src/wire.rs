//! Fixed, versioned, little-endian wire layout for numeric arrays.
//!
//! An array travels as a 16-byte [`WireArrayHdr`] followed by the raw values.
//! Values are written with their exact bit patterns so a remotely fetched
//! array is byte-identical to the same array computed locally.

use crate::dataset::array::{Array, ArrayData, Dtype};
use crate::task_error::TaskError;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), TaskError> {
    if actual == expected {
        Ok(())
    } else {
        Err(TaskError::ArrayLayout(format!(
            "expected {expected} bytes, got {actual}"
        )))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// All multi-byte integers are stored pre-LE with `.to_le()` and decoded
/// with `::from_le`.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireArrayHdr {
    pub version_le: u16, // = WIRE_VERSION.to_le()
    pub dtype_le: u16,   // Dtype as u16
    pub width_le: u32,
    pub rows_le: u64,
}

const_assert_eq!(size_of::<WireArrayHdr>(), 16);

impl WireArrayHdr {
    pub fn new(dtype: Dtype, width: usize, rows: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            dtype_le: (dtype as u16).to_le(),
            width_le: (width as u32).to_le(),
            rows_le: (rows as u64).to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn dtype(&self) -> Option<Dtype> {
        Dtype::from_code(u16::from_le(self.dtype_le))
    }
    pub fn width(&self) -> usize {
        u32::from_le(self.width_le) as usize
    }
    pub fn rows(&self) -> usize {
        u64::from_le(self.rows_le) as usize
    }
}

/// Encoded array: header bytes followed by value bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireArray(Vec<u8>);

impl WireArray {
    pub fn encode(array: &Array) -> Self {
        let hdr = WireArrayHdr::new(array.dtype(), array.width(), array.rows());
        let mut out = Vec::with_capacity(size_of::<WireArrayHdr>() + array.rows() * array.width() * 8);
        out.extend_from_slice(cast_slice(std::slice::from_ref(&hdr)));
        match array.data() {
            ArrayData::F64(v) => {
                let words: Vec<u64> = v.iter().map(|x| x.to_bits().to_le()).collect();
                out.extend_from_slice(cast_slice(&words));
            }
            ArrayData::I64(v) => {
                let words: Vec<i64> = v.iter().map(|x| x.to_le()).collect();
                out.extend_from_slice(cast_slice(&words));
            }
        }
        WireArray(out)
    }

    pub fn decode(&self) -> Result<Array, TaskError> {
        let hdr_len = size_of::<WireArrayHdr>();
        if self.0.len() < hdr_len {
            return Err(TaskError::ArrayLayout(format!(
                "array message of {} bytes is shorter than its header",
                self.0.len()
            )));
        }
        let (head, body) = self.0.split_at(hdr_len);
        let mut hdr = WireArrayHdr::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut hdr)).copy_from_slice(head);
        if hdr.version() != WIRE_VERSION {
            return Err(TaskError::ArrayLayout(format!(
                "wire version {} not supported (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        let dtype = hdr
            .dtype()
            .ok_or_else(|| TaskError::ArrayLayout(format!("unknown dtype code {}", u16::from_le(hdr.dtype_le))))?;
        let n = hdr.rows() * hdr.width();
        expect_exact_len(body.len(), n * 8)?;
        let data = match dtype {
            Dtype::F64 => {
                let mut words = vec![0u64; n];
                cast_slice_mut(&mut words).copy_from_slice(body);
                ArrayData::F64(words.into_iter().map(|w| f64::from_bits(u64::from_le(w))).collect())
            }
            Dtype::I64 => {
                let mut words = vec![0i64; n];
                cast_slice_mut(&mut words).copy_from_slice(body);
                ArrayData::I64(words.into_iter().map(i64::from_le).collect())
            }
        };
        Array::new(data, hdr.width())
    }

    pub fn byte_len(&self) -> usize {
        self.0.len()
    }
}
