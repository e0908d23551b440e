#![forbid(unsafe_code)]

//! Helpers applied to a single in-memory partition.
//!
//! Every helper returns a new frame and leaves its input untouched. Storage is
//! shared with the input wherever the active [`RuntimePolicy`] allows it.

use std::collections::BTreeSet;

use cf_frame::{ColumnValue, DataFrame, DropErrors, FrameError};
use cf_runtime::{CopyAction, CopyLedger, CopyRecord, RuntimePolicy};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MethodError {
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Collapse repeated keys the way a keyword dict does: the first occurrence
/// fixes the position, the last occurrence supplies the value.
fn collapse_pairs<K: Into<String>>(pairs: Vec<(K, ColumnValue)>) -> Vec<(String, ColumnValue)> {
    let mut collapsed: Vec<(String, ColumnValue)> = Vec::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = name.into();
        match collapsed.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => collapsed.push((name, value)),
        }
    }
    collapsed
}

/// Add or replace columns of `df`, returning a new partition.
///
/// The input is copied first. Under [`cf_runtime::CopySemantics::Legacy`] the
/// copy is deep whenever an existing column is overwritten, since setitem may
/// then write into the old array. Otherwise the copy is shallow and columns
/// that are not assigned keep pointing at the input's buffers. Assigned
/// columns always get a fresh buffer.
///
/// One [`CopyRecord`] per result column is written to `ledger`.
pub fn assign<K: Into<String>>(
    df: &DataFrame,
    pairs: Vec<(K, ColumnValue)>,
    policy: &RuntimePolicy,
    ledger: &mut CopyLedger,
) -> Result<DataFrame, MethodError> {
    let pairs = collapse_pairs(pairs);
    let overwrites_existing = pairs.iter().any(|(name, _)| df.has_column(name));
    let deep = policy.requires_deep_copy(overwrites_existing);

    let mut out = df.copy(deep);
    let mut assigned = BTreeSet::new();
    for (name, value) in pairs {
        out.set_column(name.clone(), value)?;
        assigned.insert(name);
    }

    for name in out.column_names() {
        let Some(column) = out.column(name) else {
            continue;
        };
        let action = if assigned.contains(name) {
            CopyAction::Assigned
        } else if df
            .column(name)
            .is_some_and(|source| source.shares_memory(column))
        {
            CopyAction::Shared
        } else {
            CopyAction::Copied
        };
        policy.record(
            ledger,
            CopyRecord::new("assign", name.as_str(), action, column.nbytes()),
        );
    }

    Ok(out)
}

/// Shallow copy of `df` without `columns`.
///
/// Remaining columns share storage with `df`.
pub fn drop_by_shallow_copy(
    df: &DataFrame,
    columns: &[&str],
    errors: DropErrors,
) -> Result<DataFrame, MethodError> {
    let mut out = df.copy(false);
    out.drop_columns(columns, errors)?;
    Ok(out)
}

#[must_use]
pub fn index_count(df: &DataFrame) -> usize {
    df.index().len()
}
