#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use cf_columnar::{Column, ColumnError};
use cf_index::{Index, IndexLabel};
use cf_types::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    #[error("duplicate column selector: '{0}'")]
    DuplicateColumn(String),
    #[error("all-scalar columns need an explicit index to set the row count")]
    ScalarOnlyInput,
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Right-hand side of a column assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// Broadcast to every row.
    Scalar(Scalar),
    Values(Vec<Scalar>),
    /// Copied into a fresh buffer; the frame never aliases the caller's column.
    Column(Column),
}

impl ColumnValue {
    fn into_column(self, len: usize) -> Result<Column, FrameError> {
        let column = match self {
            Self::Scalar(value) => return Ok(Column::broadcast(&value, len)),
            Self::Values(values) => Column::from_values(values)?,
            Self::Column(column) => column,
        };
        if column.len() != len {
            return Err(FrameError::LengthMismatch {
                index_len: len,
                column_len: column.len(),
            });
        }
        if column.is_shared() {
            return Ok(column.deep_copy());
        }
        Ok(column)
    }

    fn row_count(&self) -> Option<usize> {
        match self {
            Self::Scalar(_) => None,
            Self::Values(values) => Some(values.len()),
            Self::Column(column) => Some(column.len()),
        }
    }
}

impl From<Scalar> for ColumnValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<Scalar>> for ColumnValue {
    fn from(values: Vec<Scalar>) -> Self {
        Self::Values(values)
    }
}

impl From<Column> for ColumnValue {
    fn from(column: Column) -> Self {
        Self::Column(column)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int64(value))
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        Self::Scalar(Scalar::Float64(value))
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Scalar::from(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropErrors {
    #[default]
    Raise,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFrame {
    index: Index,
    columns: BTreeMap<String, Column>,
    column_order: Vec<String>,
}

impl<'de> Deserialize<'de> for DataFrame {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            index: Index,
            columns: BTreeMap<String, Column>,
            column_order: Vec<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new_with_column_order(raw.index, raw.columns, raw.column_order)
            .map_err(serde::de::Error::custom)
    }
}

impl DataFrame {
    fn validate_column_lengths(
        index: &Index,
        columns: &BTreeMap<String, Column>,
    ) -> Result<(), FrameError> {
        for column in columns.values() {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
        }
        Ok(())
    }

    fn normalize_column_order(
        columns: &BTreeMap<String, Column>,
        column_order: Vec<String>,
    ) -> Result<Vec<String>, FrameError> {
        if column_order.is_empty() {
            return Ok(columns.keys().cloned().collect());
        }

        let mut normalized = Vec::with_capacity(columns.len());
        let mut seen = BTreeSet::new();
        for name in column_order {
            if !columns.contains_key(&name) {
                return Err(FrameError::ColumnNotFound(name));
            }
            if !seen.insert(name.clone()) {
                return Err(FrameError::DuplicateColumn(name));
            }
            normalized.push(name);
        }

        for name in columns.keys() {
            if !seen.contains(name) {
                normalized.push(name.clone());
            }
        }

        Ok(normalized)
    }

    pub fn new(index: Index, columns: BTreeMap<String, Column>) -> Result<Self, FrameError> {
        Self::new_with_column_order(index, columns, Vec::new())
    }

    pub fn new_with_column_order(
        index: Index,
        columns: BTreeMap<String, Column>,
        column_order: Vec<String>,
    ) -> Result<Self, FrameError> {
        Self::validate_column_lengths(&index, &columns)?;
        let column_order = Self::normalize_column_order(&columns, column_order)?;
        Ok(Self {
            index,
            columns,
            column_order,
        })
    }

    /// Build a frame column by column. Explicit `column_order` entries come
    /// first; remaining columns follow in input order.
    fn from_inputs(
        index: Index,
        column_order: &[&str],
        data: Vec<(&str, ColumnValue)>,
    ) -> Result<Self, FrameError> {
        let mut frame = Self::new(index, BTreeMap::new())?;
        for (name, value) in data {
            if frame.columns.contains_key(name) {
                return Err(FrameError::DuplicateColumn(name.to_owned()));
            }
            frame.set_column(name, value)?;
        }

        if !column_order.is_empty() {
            let mut explicit: Vec<String> = column_order.iter().map(|&n| n.to_owned()).collect();
            for name in &frame.column_order {
                if !column_order.contains(&name.as_str()) {
                    explicit.push(name.clone());
                }
            }
            frame.column_order = Self::normalize_column_order(&frame.columns, explicit)?;
        }
        Ok(frame)
    }

    /// Construct a DataFrame from a dict of column vectors.
    ///
    /// Matches `pd.DataFrame({"a": [1, 2], "b": [3, 4]})`. All vectors must
    /// have the same length and the index is `0..n`.
    pub fn from_dict(
        column_order: &[&str],
        data: Vec<(&str, Vec<Scalar>)>,
    ) -> Result<Self, FrameError> {
        let row_count = data.first().map_or(0, |(_, values)| values.len());
        let data = data
            .into_iter()
            .map(|(name, values)| (name, ColumnValue::Values(values)))
            .collect();
        Self::from_inputs(Index::range(row_count), column_order, data)
    }

    /// Construct a DataFrame from mixed dict inputs.
    ///
    /// Matches `pd.DataFrame({"a": [1, 2, 3], "b": 1.5})`: scalars broadcast
    /// to the row count of the first non-scalar input. All-scalar input needs
    /// an explicit index (see [`DataFrame::from_dict_with_index`]).
    pub fn from_dict_mixed(
        column_order: &[&str],
        data: Vec<(&str, ColumnValue)>,
    ) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Self::new(Index::range(0), BTreeMap::new());
        }

        let row_count = data
            .iter()
            .find_map(|(_, value)| value.row_count())
            .ok_or(FrameError::ScalarOnlyInput)?;

        Self::from_inputs(Index::range(row_count), column_order, data)
    }

    pub fn from_dict_with_index(
        data: Vec<(&str, ColumnValue)>,
        index_labels: Vec<IndexLabel>,
    ) -> Result<Self, FrameError> {
        Self::from_inputs(Index::new(index_labels), &[], data)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<String, Column> {
        &self.columns
    }

    /// Column names in observable order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&String> {
        self.column_order.iter().collect()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Matches `df.copy(deep=...)`.
    ///
    /// A shallow copy shares every column buffer and the index with `self`.
    /// A deep copy owns fresh column buffers.
    #[must_use]
    pub fn copy(&self, deep: bool) -> Self {
        if !deep {
            return self.clone();
        }
        Self {
            index: self.index.clone(),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.deep_copy()))
                .collect(),
            column_order: self.column_order.clone(),
        }
    }

    /// Matches `df[name] = value`.
    ///
    /// The column is replaced wholesale; the previous buffer is never written.
    /// Existing names keep their position, new names are appended.
    pub fn set_column(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ColumnValue>,
    ) -> Result<(), FrameError> {
        let name = name.into();
        let column = value.into().into_column(self.len())?;
        if self.columns.insert(name.clone(), column).is_none() {
            self.column_order.push(name);
        }
        Ok(())
    }

    /// Write a single cell. Buffers shared with other frames are detached
    /// first.
    pub fn set_value(&mut self, column: &str, row: usize, value: Scalar) -> Result<(), FrameError> {
        let target = self
            .columns
            .get_mut(column)
            .ok_or_else(|| FrameError::ColumnNotFound(column.to_owned()))?;
        target.set(row, value)?;
        Ok(())
    }

    /// Matches `df.drop(columns=names, errors=..., inplace=True)`.
    ///
    /// With [`DropErrors::Raise`] an unknown name fails the whole call and
    /// leaves the frame untouched.
    pub fn drop_columns(&mut self, names: &[&str], errors: DropErrors) -> Result<(), FrameError> {
        if errors == DropErrors::Raise {
            if let Some(missing) = names.iter().find(|&&name| !self.has_column(name)) {
                return Err(FrameError::ColumnNotFound((*missing).to_owned()));
            }
        }
        for &name in names {
            self.columns.remove(name);
        }
        self.column_order
            .retain(|name| !names.contains(&name.as_str()));
        Ok(())
    }

    /// Return a new DataFrame with only the specified columns, in order.
    ///
    /// Matches `df[["a", "c"]]`. Selected columns share storage with `self`.
    pub fn select_columns(&self, names: &[&str]) -> Result<Self, FrameError> {
        let mut columns = BTreeMap::new();
        for &name in names {
            let column = self
                .columns
                .get(name)
                .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))?;
            if columns.insert(name.to_owned(), column.clone()).is_some() {
                return Err(FrameError::DuplicateColumn(name.to_owned()));
            }
        }
        let column_order = names.iter().map(|name| (*name).to_owned()).collect();
        Self::new_with_column_order(self.index.clone(), columns, column_order)
    }

    /// Assign new or overwrite existing columns.
    ///
    /// Matches `df.assign(**kwargs)`: a shallow copy of `self` followed by
    /// setitem for each pair, so `self` is never modified.
    pub fn assign(&self, assignments: Vec<(&str, ColumnValue)>) -> Result<Self, FrameError> {
        let mut out = self.copy(false);
        for (name, value) in assignments {
            out.set_column(name, value)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use cf_columnar::Column;
    use cf_types::{DType, Scalar};

    use super::{ColumnValue, DataFrame, DropErrors, FrameError, IndexLabel};

    fn a_and_b() -> DataFrame {
        DataFrame::from_dict_mixed(
            &[],
            vec![
                (
                    "a",
                    ColumnValue::Values(vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3)]),
                ),
                ("b", 1.5.into()),
            ],
        )
        .expect("frame should build")
    }

    #[test]
    fn from_dict_mixed_broadcasts_scalars() {
        let frame = a_and_b();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.column_names(), vec!["a", "b"]);
        let b = frame.column("b").expect("b");
        assert_eq!(b.dtype(), DType::Float64);
        assert_eq!(b.values(), vec![Scalar::Float64(1.5); 3]);
        assert_eq!(
            frame.index().labels(),
            &[0_i64.into(), 1_i64.into(), 2_i64.into()]
        );
    }

    #[test]
    fn from_dict_mixed_rejects_all_scalar_input() {
        let err = DataFrame::from_dict_mixed(&[], vec![("a", 1_i64.into())])
            .expect_err("all scalar should fail");
        assert!(matches!(err, FrameError::ScalarOnlyInput));
    }

    #[test]
    fn from_dict_with_index_allows_all_scalar_input() {
        let frame = DataFrame::from_dict_with_index(
            vec![("a", 1_i64.into())],
            vec![IndexLabel::from("x"), IndexLabel::from("y")],
        )
        .expect("frame");
        assert_eq!(frame.column("a").expect("a").values(), vec![Scalar::Int64(1); 2]);
    }

    #[test]
    fn from_dict_rejects_ragged_columns() {
        let err = DataFrame::from_dict(
            &[],
            vec![
                ("a", vec![Scalar::Int64(1), Scalar::Int64(2)]),
                ("b", vec![Scalar::Int64(1)]),
            ],
        )
        .expect_err("ragged should fail");
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                index_len: 2,
                column_len: 1
            }
        ));
    }

    #[test]
    fn from_dict_explicit_order_puts_named_columns_first() {
        let frame = DataFrame::from_dict(
            &["c"],
            vec![
                ("a", vec![Scalar::Int64(1)]),
                ("b", vec![Scalar::Int64(2)]),
                ("c", vec![Scalar::Int64(3)]),
            ],
        )
        .expect("frame");
        assert_eq!(frame.column_names(), vec!["c", "a", "b"]);

        let err = DataFrame::from_dict(&["zz"], vec![("a", vec![Scalar::Int64(1)])])
            .expect_err("unknown order entry");
        assert!(matches!(err, FrameError::ColumnNotFound(name) if name == "zz"));
    }

    #[test]
    fn duplicate_input_names_are_rejected() {
        let err = DataFrame::from_dict(
            &[],
            vec![("a", vec![Scalar::Int64(1)]), ("a", vec![Scalar::Int64(2)])],
        )
        .expect_err("duplicate");
        assert!(matches!(err, FrameError::DuplicateColumn(name) if name == "a"));
    }

    #[test]
    fn shallow_copy_shares_and_deep_copy_owns() {
        let frame = a_and_b();
        let shallow = frame.copy(false);
        let deep = frame.copy(true);

        for name in ["a", "b"] {
            let source = frame.column(name).expect("source");
            assert!(source.shares_memory(shallow.column(name).expect("shallow")));
            assert!(!source.shares_memory(deep.column(name).expect("deep")));
        }
        assert_eq!(deep, frame);
    }

    #[test]
    fn set_column_replaces_buffer_and_keeps_position() {
        let mut frame = a_and_b();
        let before = frame.column("a").expect("a").clone();

        frame.set_column("a", 5_i64).expect("set_column");

        let after = frame.column("a").expect("a");
        assert!(!after.shares_memory(&before));
        assert_eq!(after.values(), vec![Scalar::Int64(5); 3]);
        assert_eq!(before.values()[0], Scalar::Int64(1));
        assert_eq!(frame.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn set_column_appends_new_name() {
        let mut frame = a_and_b();
        frame
            .set_column("c", vec![Scalar::from("x"), Scalar::from("y"), Scalar::from("z")])
            .expect("set_column");
        assert_eq!(frame.column_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn set_column_rejects_wrong_length() {
        let mut frame = a_and_b();
        let err = frame
            .set_column("a", vec![Scalar::Int64(1)])
            .expect_err("length mismatch");
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                index_len: 3,
                column_len: 1
            }
        ));
        assert_eq!(frame.column("a").expect("a").values()[0], Scalar::Int64(1));
    }

    #[test]
    fn set_column_with_column_value_copies_it() {
        let mut frame = a_and_b();
        let column = Column::from_values(vec![Scalar::Int64(7); 3]).expect("column");
        frame.set_column("c", column.clone()).expect("set_column");

        let stored = frame.column("c").expect("c");
        assert!(!stored.shares_memory(&column));
        assert!(!stored.is_shared());
        assert_eq!(stored, &column);
    }

    #[test]
    fn set_column_from_own_column_does_not_alias_it() {
        let mut frame = a_and_b();
        let b = frame.column("b").expect("b").clone();
        frame.set_column("a", b).expect("set_column");

        let a = frame.column("a").expect("a");
        assert!(!a.shares_memory(frame.column("b").expect("b")));
        assert_eq!(a.values(), vec![Scalar::Float64(1.5); 3]);
    }

    #[test]
    fn set_value_never_leaks_into_shallow_copy_source() {
        let frame = a_and_b();
        let mut copy = frame.copy(false);

        copy.set_value("b", 1, Scalar::Float64(9.0)).expect("set_value");

        assert_eq!(frame.column("b").expect("b").values(), vec![Scalar::Float64(1.5); 3]);
        assert_eq!(
            copy.column("b").expect("b").value(1),
            Some(Scalar::Float64(9.0))
        );
        assert!(copy.column("a").expect("a").shares_memory(frame.column("a").expect("a")));
    }

    #[test]
    fn set_value_unknown_column_fails() {
        let mut frame = a_and_b();
        assert!(matches!(
            frame.set_value("zz", 0, Scalar::Int64(1)),
            Err(FrameError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn drop_columns_raise_is_atomic() {
        let mut frame = a_and_b();
        let err = frame
            .drop_columns(&["a", "zz"], DropErrors::Raise)
            .expect_err("unknown column");
        assert!(matches!(err, FrameError::ColumnNotFound(name) if name == "zz"));
        assert_eq!(frame.num_columns(), 2);

        frame
            .drop_columns(&["a", "zz"], DropErrors::Ignore)
            .expect("ignore");
        assert_eq!(frame.column_names(), vec!["b"]);
    }

    #[test]
    fn select_columns_projects_and_shares() {
        let frame = a_and_b();
        let projected = frame.select_columns(&["b"]).expect("select");
        assert_eq!(projected.column_names(), vec!["b"]);
        assert!(
            projected
                .column("b")
                .expect("b")
                .shares_memory(frame.column("b").expect("b"))
        );
        assert!(matches!(
            frame.select_columns(&["b", "b"]),
            Err(FrameError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn frame_assign_leaves_source_untouched() {
        let frame = a_and_b();
        let out = frame
            .assign(vec![("a", 5_i64.into()), ("c", true.into())])
            .expect("assign");
        assert_eq!(out.column_names(), vec!["a", "b", "c"]);
        assert_eq!(frame.column_names(), vec!["a", "b"]);
        assert_eq!(
            frame.column("a").expect("a").values(),
            vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3)]
        );
    }

    #[test]
    fn serde_round_trip_keeps_column_order() {
        let frame = DataFrame::from_dict(
            &["b"],
            vec![("a", vec![Scalar::Int64(1)]), ("b", vec![Scalar::Float64(2.0)])],
        )
        .expect("frame");
        let json = serde_json::to_string(&frame).expect("serialize");
        let back: DataFrame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, frame);
        assert_eq!(back.column_names(), vec!["b", "a"]);
    }

    #[test]
    fn deserialize_validates_lengths() {
        let json = serde_json::json!({
            "index": [{"kind": "int64", "value": 0}],
            "columns": {"a": {"dtype": "int64", "values": []}},
            "column_order": ["a"],
        });
        assert!(serde_json::from_value::<DataFrame>(json).is_err());
    }
}
