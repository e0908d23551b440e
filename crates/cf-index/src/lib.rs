#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// Immutable row labels of a partition.
///
/// Labels sit behind an `Arc`, so frames derived by shallow copy or setitem
/// keep pointing at the same label storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<IndexLabel>", into = "Vec<IndexLabel>")]
pub struct Index {
    labels: Arc<Vec<IndexLabel>>,
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self {
            labels: Arc::new(labels),
        }
    }

    /// Default `0..len` labels.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::new((0..len as i64).map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn shares_memory(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.labels, &other.labels)
    }
}

impl From<Vec<IndexLabel>> for Index {
    fn from(labels: Vec<IndexLabel>) -> Self {
        Self::new(labels)
    }
}

impl From<Index> for Vec<IndexLabel> {
    fn from(index: Index) -> Self {
        Arc::unwrap_or_clone(index.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::{Index, IndexLabel};

    #[test]
    fn range_index_counts_from_zero() {
        let index = Index::range(3);
        assert_eq!(
            index.labels(),
            &[0_i64.into(), 1_i64.into(), 2_i64.into()]
        );
        assert_eq!(index.len(), 3);
        assert!(Index::range(0).is_empty());
    }

    #[test]
    fn clone_shares_label_storage() {
        let index = Index::new(vec![IndexLabel::from("x")]);
        let copy = index.clone();
        assert!(index.shares_memory(&copy));
        assert!(!index.shares_memory(&Index::new(vec![IndexLabel::from("x")])));
        assert_eq!(index, Index::new(vec![IndexLabel::from("x")]));
    }

    #[test]
    fn label_display_is_bare_value() {
        assert_eq!(IndexLabel::from(7_i64).to_string(), "7");
        assert_eq!(IndexLabel::from("row").to_string(), "row");
    }
}
