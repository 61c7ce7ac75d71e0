//! Student number identifiers: `<partition><sequence>`.
//!
//! The sequence segment is zero-padded to a fixed width. That makes the
//! lexicographic order of identifiers within a partition equal to their
//! numeric order, which is what lets a store answer "highest identifier with
//! this prefix" with a plain string ordering.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Allocation namespace: a four-digit calendar year.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Partition(u16);

impl Partition {
    pub const LEN: usize = 4;

    pub fn from_year(year: i32) -> DomainResult<Self> {
        if !(0..=9999).contains(&year) {
            return Err(DomainError::validation(format!(
                "partition year {year} is not representable in 4 digits"
            )));
        }
        Ok(Self(year as u16))
    }

    /// Parse a partition key; exactly four ASCII digits.
    pub fn parse(s: &str) -> DomainResult<Self> {
        if s.len() != Self::LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "partition must be exactly 4 digits, got '{s}'"
            )));
        }
        s.parse::<u16>()
            .map(Self)
            .map_err(|e| DomainError::validation(format!("partition '{s}': {e}")))
    }

    /// Partition for the calendar year of `now` (UTC).
    pub fn current(now: chrono::DateTime<chrono::Utc>) -> DomainResult<Self> {
        use chrono::Datelike;
        Self::from_year(now.year())
    }

    pub fn as_prefix(&self) -> String {
        self.to_string()
    }
}

impl core::fmt::Display for Partition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl TryFrom<String> for Partition {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Partition> for String {
    fn from(value: Partition) -> Self {
        value.to_string()
    }
}

/// Allocated student number (e.g. `202500001`).
///
/// Immutable once assigned to an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentNumber(String);

impl StudentNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Partition segment (first four digits).
    pub fn partition(&self) -> Partition {
        // Construction guarantees at least LEN + 1 ASCII digits.
        Partition(self.0[..Partition::LEN].parse().unwrap_or_default())
    }
}

impl core::fmt::Display for StudentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StudentNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() <= Partition::LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!("StudentNumber: '{s}'")));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for StudentNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StudentNumber> for String {
    fn from(value: StudentNumber) -> Self {
        value.0
    }
}

/// Fixed-width layout of the sequence segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdentifierLayout {
    width: u32,
}

impl Default for IdentifierLayout {
    fn default() -> Self {
        Self {
            width: Self::DEFAULT_WIDTH,
        }
    }
}

impl IdentifierLayout {
    pub const DEFAULT_WIDTH: u32 = 5;
    pub const MAX_WIDTH: u32 = 18;

    pub fn new(width: u32) -> DomainResult<Self> {
        if width == 0 || width > Self::MAX_WIDTH {
            return Err(DomainError::validation(format!(
                "sequence width must be in 1..={}, got {width}",
                Self::MAX_WIDTH
            )));
        }
        Ok(Self { width })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Total length of an identifier under this layout.
    pub fn identifier_len(&self) -> usize {
        Partition::LEN + self.width as usize
    }

    pub fn max_sequence(&self) -> u64 {
        10u64.pow(self.width) - 1
    }

    /// Build `<partition><sequence>`; sequences outside `1..=max` are rejected,
    /// never truncated.
    pub fn compose(&self, partition: &Partition, sequence: u64) -> DomainResult<StudentNumber> {
        if sequence == 0 || sequence > self.max_sequence() {
            return Err(DomainError::SequenceOverflow {
                sequence,
                width: self.width,
            });
        }
        Ok(StudentNumber(format!(
            "{partition}{sequence:0width$}",
            width = self.width as usize
        )))
    }

    /// Numeric suffix of `id` within `partition`.
    pub fn sequence_of(&self, partition: &Partition, id: &StudentNumber) -> DomainResult<u64> {
        let suffix = id
            .as_str()
            .strip_prefix(&partition.as_prefix())
            .ok_or_else(|| DomainError::invalid_id(format!("{id} is not in partition {partition}")))?;

        if suffix.len() != self.width as usize {
            return Err(DomainError::invalid_id(format!(
                "{id}: sequence segment is {} digits, expected {}",
                suffix.len(),
                self.width
            )));
        }

        suffix
            .parse()
            .map_err(|e| DomainError::invalid_id(format!("{id}: {e}")))
    }
}
