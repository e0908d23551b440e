#![forbid(unsafe_code)]

use std::sync::Arc;

use cf_types::{DType, NullKind, Scalar, TypeError, cast_scalar_owned, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let mut mask = Self::all_invalid(values.len());
        for (idx, value) in values.iter().enumerate() {
            if !value.is_missing() {
                mask.words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        mask
    }

    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        let remainder = len % 64;
        if remainder > 0 && !words.is_empty() {
            let last = words.len() - 1;
            words[last] = (1_u64 << remainder) - 1;
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        Self {
            words: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn set(&mut self, idx: usize, valid: bool) {
        if idx >= self.len {
            return;
        }
        if valid {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    /// Unused high bits of the last word are always zero.
    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

/// Contiguous typed storage backing a [`Column`].
///
/// Invalid positions hold a sentinel (0 / 0.0 / false / ""); the paired
/// [`ValidityMask`] says which positions carry real values.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    Bool(Vec<bool>),
    Utf8(Vec<String>),
}

impl ColumnData {
    /// `values` must already be coerced to `dtype`.
    fn from_scalars(values: &[Scalar], dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Float64(
                values
                    .iter()
                    .map(|v| match v {
                        Scalar::Float64(f) if !f.is_nan() => *f,
                        _ => 0.0,
                    })
                    .collect(),
            ),
            DType::Int64 => Self::Int64(
                values
                    .iter()
                    .map(|v| match v {
                        Scalar::Int64(i) => *i,
                        _ => 0,
                    })
                    .collect(),
            ),
            DType::Bool => Self::Bool(
                values
                    .iter()
                    .map(|v| matches!(v, Scalar::Bool(true)))
                    .collect(),
            ),
            DType::Utf8 => Self::Utf8(
                values
                    .iter()
                    .map(|v| match v {
                        Scalar::Utf8(s) => s.clone(),
                        _ => String::new(),
                    })
                    .collect(),
            ),
            DType::Null => Self::Float64(vec![0.0; values.len()]),
        }
    }

    /// Fill `len` slots with one value. A missing value fills with sentinels.
    fn repeat(value: &Scalar, dtype: DType, len: usize) -> Self {
        match (dtype, value) {
            (DType::Int64, Scalar::Int64(v)) => Self::Int64(vec![*v; len]),
            (DType::Float64, Scalar::Float64(v)) if !v.is_nan() => Self::Float64(vec![*v; len]),
            (DType::Bool, Scalar::Bool(v)) => Self::Bool(vec![*v; len]),
            (DType::Utf8, Scalar::Utf8(v)) => Self::Utf8(vec![v.clone(); len]),
            (DType::Int64, _) => Self::Int64(vec![0; len]),
            (DType::Bool, _) => Self::Bool(vec![false; len]),
            (DType::Utf8, _) => Self::Utf8(vec![String::new(); len]),
            (DType::Float64 | DType::Null, _) => Self::Float64(vec![0.0; len]),
        }
    }

    fn scalar_at(&self, idx: usize) -> Scalar {
        match self {
            Self::Float64(data) => Scalar::Float64(data[idx]),
            Self::Int64(data) => Scalar::Int64(data[idx]),
            Self::Bool(data) => Scalar::Bool(data[idx]),
            Self::Utf8(data) => Scalar::Utf8(data[idx].clone()),
        }
    }

    /// `value` must already be coerced to this buffer's dtype.
    fn write(&mut self, idx: usize, value: Scalar) {
        match (self, value) {
            (Self::Float64(data), Scalar::Float64(v)) if !v.is_nan() => data[idx] = v,
            (Self::Float64(data), _) => data[idx] = 0.0,
            (Self::Int64(data), Scalar::Int64(v)) => data[idx] = v,
            (Self::Int64(data), _) => data[idx] = 0,
            (Self::Bool(data), Scalar::Bool(v)) => data[idx] = v,
            (Self::Bool(data), _) => data[idx] = false,
            (Self::Utf8(data), Scalar::Utf8(v)) => data[idx] = v,
            (Self::Utf8(data), _) => data[idx] = String::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float64(d) => d.len(),
            Self::Int64(d) => d.len(),
            Self::Bool(d) => d.len(),
            Self::Utf8(d) => d.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn nbytes(&self) -> usize {
        match self {
            Self::Float64(d) => d.len() * size_of::<f64>(),
            Self::Int64(d) => d.len() * size_of::<i64>(),
            Self::Bool(d) => d.len(),
            Self::Utf8(d) => d.iter().map(String::len).sum(),
        }
    }
}

/// A typed column whose storage is reference counted.
///
/// `clone` is a shallow copy: both columns point at the same buffers until one
/// of them is written through [`Column::set`], which detaches the writer.
#[derive(Debug, Clone)]
pub struct Column {
    dtype: DType,
    data: Arc<ColumnData>,
    validity: Arc<ValidityMask>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("position {index} out of bounds for column of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let coerced = values
            .into_iter()
            .map(|value| cast_scalar_owned(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;

        let validity = ValidityMask::from_values(&coerced);
        let data = ColumnData::from_scalars(&coerced, dtype);

        Ok(Self {
            dtype,
            data: Arc::new(data),
            validity: Arc::new(validity),
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    /// Materialize `value` into a fresh buffer of `len` rows.
    ///
    /// A NaN marker broadcasts as a float column, other nulls as a null column.
    #[must_use]
    pub fn broadcast(value: &Scalar, len: usize) -> Self {
        let dtype = match value {
            Scalar::Null(NullKind::NaN) => DType::Float64,
            other => other.dtype(),
        };
        let validity = if value.is_missing() {
            ValidityMask::all_invalid(len)
        } else {
            ValidityMask::all_valid(len)
        };
        Self {
            dtype,
            data: Arc::new(ColumnData::repeat(value, dtype, len)),
            validity: Arc::new(validity),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<Scalar> {
        if idx >= self.len() {
            return None;
        }
        if !self.validity.get(idx) {
            return Some(Scalar::missing_for_dtype(self.dtype));
        }
        Some(self.data.scalar_at(idx))
    }

    #[must_use]
    pub fn values(&self) -> Vec<Scalar> {
        (0..self.len())
            .map(|idx| {
                if self.validity.get(idx) {
                    self.data.scalar_at(idx)
                } else {
                    Scalar::missing_for_dtype(self.dtype)
                }
            })
            .collect()
    }

    #[must_use]
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// True when both columns are backed by the same data buffer.
    #[must_use]
    pub fn shares_memory(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// True when another column currently references this column's buffer.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            dtype: self.dtype,
            data: Arc::new(ColumnData::clone(&self.data)),
            validity: Arc::new(ValidityMask::clone(&self.validity)),
        }
    }

    /// Write one element in place.
    ///
    /// A shared buffer is cloned before the write, so other holders keep the
    /// old value. Nothing is modified when an error is returned.
    pub fn set(&mut self, idx: usize, value: Scalar) -> Result<(), ColumnError> {
        let len = self.len();
        if idx >= len {
            return Err(ColumnError::IndexOutOfBounds { index: idx, len });
        }
        let value = cast_scalar_owned(value, self.dtype)?;
        let valid = !value.is_missing();

        Arc::make_mut(&mut self.data).write(idx, value);
        if self.validity.get(idx) != valid {
            Arc::make_mut(&mut self.validity).set(idx, valid);
        }
        Ok(())
    }

    #[must_use]
    pub fn nbytes(&self) -> usize {
        self.data.nbytes()
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.len() == other.len()
            && self
                .values()
                .iter()
                .zip(other.values().iter())
                .all(|(left, right)| left.semantic_eq(right))
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.validity == other.validity && self.data == other.data
    }
}

impl Serialize for Column {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Column", 2)?;
        state.serialize_field("dtype", &self.dtype)?;
        state.serialize_field("values", &self.values())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Column {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            dtype: DType,
            values: Vec<Scalar>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.dtype, raw.values).map_err(serde::de::Error::custom)
    }
}
