#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the dataframe semantics a caller wants to reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompatVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl CompatVersion {
    /// First release where setitem always replaces a column's array instead
    /// of writing into it.
    pub const SETITEM_NEVER_INPLACE: Self = Self::new(1, 4, 0);

    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `major[.minor[.patch]]`. Trailing pre-release tags such as
    /// `1.4.0rc1` are cut at the first non-digit of each component. A fourth
    /// component is rejected.
    pub fn parse(raw: &str) -> Result<Self, RuntimeError> {
        let invalid = || RuntimeError::InvalidVersion(raw.to_owned());
        let mut parts = raw.trim().split('.');
        let mut next = |required: bool| -> Result<u32, RuntimeError> {
            match parts.next() {
                Some(part) => {
                    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                    digits.parse().map_err(|_| invalid())
                }
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(false)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for CompatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopySemantics {
    /// setitem never writes into an existing array; a shallow copy is enough
    /// to protect the source.
    CopyOnWrite,
    /// setitem may write into an existing array; overwriting a column requires
    /// a deep copy first.
    Legacy,
}

impl CopySemantics {
    #[must_use]
    pub fn for_version(version: CompatVersion) -> Self {
        if version >= CompatVersion::SETITEM_NEVER_INPLACE {
            Self::CopyOnWrite
        } else {
            Self::Legacy
        }
    }
}

impl FromStr for CopySemantics {
    type Err = RuntimeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "copy_on_write" | "cow" => Ok(Self::CopyOnWrite),
            "legacy" => Ok(Self::Legacy),
            _ => Err(RuntimeError::UnknownCopySemantics(raw.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePolicy {
    pub copy_semantics: CopySemantics,
    pub record_copies: bool,
}

impl RuntimePolicy {
    #[must_use]
    pub fn copy_on_write() -> Self {
        Self {
            copy_semantics: CopySemantics::CopyOnWrite,
            record_copies: true,
        }
    }

    #[must_use]
    pub fn legacy() -> Self {
        Self {
            copy_semantics: CopySemantics::Legacy,
            record_copies: true,
        }
    }

    #[must_use]
    pub fn for_version(version: CompatVersion) -> Self {
        Self {
            copy_semantics: CopySemantics::for_version(version),
            record_copies: true,
        }
    }

    #[must_use]
    pub fn without_recording(mut self) -> Self {
        self.record_copies = false;
        self
    }

    /// Whether a partition must be deep copied before setitem runs on it.
    #[must_use]
    pub fn requires_deep_copy(&self, overwrites_existing: bool) -> bool {
        overwrites_existing && matches!(self.copy_semantics, CopySemantics::Legacy)
    }

    /// Append `record` to `ledger` unless recording is switched off.
    pub fn record(&self, ledger: &mut CopyLedger, record: CopyRecord) {
        if self.record_copies {
            ledger.push(record);
        }
    }
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self::copy_on_write()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyAction {
    /// Result column points at the source buffer.
    Shared,
    /// Result column holds a deep copy of the source buffer.
    Copied,
    /// Result column holds a buffer built from the assigned value.
    Assigned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRecord {
    pub ts_unix_ms: u64,
    pub operation: String,
    pub column: String,
    pub action: CopyAction,
    pub bytes: usize,
}

impl CopyRecord {
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        column: impl Into<String>,
        action: CopyAction,
        bytes: usize,
    ) -> Self {
        Self {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            operation: operation.into(),
            column: column.into(),
            action,
            bytes,
        }
    }
}

/// Structured trail of storage decisions made by partition operations.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyLedger {
    records: Vec<CopyRecord>,
}

impl CopyLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: CopyRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[CopyRecord] {
        &self.records
    }

    #[must_use]
    pub fn count(&self, action: CopyAction) -> usize {
        self.records.iter().filter(|r| r.action == action).count()
    }

    /// Bytes duplicated from source buffers. Assigned buffers are new data and
    /// are not counted.
    #[must_use]
    pub fn bytes_copied(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.action == CopyAction::Copied)
            .map(|r| r.bytes)
            .sum()
    }

    #[must_use]
    pub fn action_for(&self, column: &str) -> Option<CopyAction> {
        self.records
            .iter()
            .rev()
            .find(|r| r.column == column)
            .map(|r| r.action)
    }

    pub fn to_json(&self) -> Result<String, RuntimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error("invalid compatibility version: {0:?}")]
    InvalidVersion(String),
    #[error("unknown copy semantics: {0:?}")]
    UnknownCopySemantics(String),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}
