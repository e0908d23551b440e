#![forbid(unsafe_code)]

//! Element types shared by every column buffer: the dtype lattice, the
//! tagged scalar, and the lossless cast rules used when a value is written
//! into a typed slot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    /// Position on the numeric promotion ladder, `None` for non-numeric dtypes.
    const fn numeric_rank(self) -> Option<u8> {
        match self {
            Self::Bool => Some(0),
            Self::Int64 => Some(1),
            Self::Float64 => Some(2),
            Self::Null | Self::Utf8 => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
    NaT,
}

/// One cell value. Floats keep NaN as a payload; `Null(NaN)` is the marker a
/// float column hands back for an invalid slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    /// Nulls of any kind and float NaN.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Null(_)) || matches!(self, Self::Float64(v) if v.is_nan())
    }

    /// Marker stored for an invalid slot of a `dtype` column.
    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        if dtype == DType::Float64 {
            Self::Null(NullKind::NaN)
        } else {
            Self::Null(NullKind::Null)
        }
    }

    /// Equality where every NaN spelling matches every other NaN spelling.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        let is_nan = |s: &Self| match s {
            Self::Null(NullKind::NaN) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        };
        if is_nan(self) || is_nan(other) {
            return is_nan(self) && is_nan(other);
        }
        self == other
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("no column dtype holds both {left:?} and {right:?} values")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("a {from:?} value cannot be stored in a {to:?} column")]
    InvalidCast { from: DType, to: DType },
    #[error("storing {value} in a {to:?} column would change its value")]
    LossyCast { value: String, to: DType },
}

/// Dtype able to hold values of both `left` and `right`.
///
/// Null adopts the other side, numeric dtypes widen along bool, int64,
/// float64, and utf8 only pairs with itself.
pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    if left == right || right == DType::Null {
        return Ok(left);
    }
    if left == DType::Null {
        return Ok(right);
    }
    match (left.numeric_rank(), right.numeric_rank()) {
        (Some(l), Some(r)) => Ok(if l >= r { left } else { right }),
        _ => Err(TypeError::IncompatibleDtypes { left, right }),
    }
}

/// Narrowest dtype holding every value; `Null` for empty or all-null input.
pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    values
        .iter()
        .try_fold(DType::Null, |current, value| common_dtype(current, value.dtype()))
}

/// Convert `value` for storage in a `target` column.
///
/// Missing input always maps to the target's missing marker. A value that
/// is already of `target` dtype is returned untouched. Everything else must
/// convert without loss.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if from == target && !matches!(value, Scalar::Null(_)) {
        return Ok(value);
    }
    if value.is_missing() {
        return Ok(Scalar::missing_for_dtype(target));
    }

    let lossy = |value: &Scalar| TypeError::LossyCast {
        value: match value {
            Scalar::Float64(v) => v.to_string(),
            Scalar::Int64(v) => v.to_string(),
            other => format!("{other:?}"),
        },
        to: target,
    };

    match (target, &value) {
        (DType::Bool, Scalar::Int64(0)) => Ok(Scalar::Bool(false)),
        (DType::Bool, Scalar::Int64(1)) => Ok(Scalar::Bool(true)),
        (DType::Bool, Scalar::Float64(v)) if *v == 0.0 || *v == 1.0 => Ok(Scalar::Bool(*v == 1.0)),
        (DType::Bool, Scalar::Int64(_) | Scalar::Float64(_)) => Err(lossy(&value)),
        (DType::Int64, Scalar::Bool(v)) => Ok(Scalar::Int64(i64::from(*v))),
        (DType::Int64, Scalar::Float64(v)) => {
            // i64::MAX as f64 rounds up to 2^63, which is already out of range.
            let in_range = *v >= i64::MIN as f64 && *v < i64::MAX as f64;
            if v.fract() == 0.0 && in_range {
                Ok(Scalar::Int64(*v as i64))
            } else {
                Err(lossy(&value))
            }
        }
        (DType::Float64, Scalar::Bool(v)) => Ok(Scalar::Float64(f64::from(u8::from(*v)))),
        (DType::Float64, Scalar::Int64(v)) => Ok(Scalar::Float64(*v as f64)),
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}

/// Borrowing form of [`cast_scalar_owned`]. Always clones `value`.
pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    cast_scalar_owned(value.clone(), target)
}
