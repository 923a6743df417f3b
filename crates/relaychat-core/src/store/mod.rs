//! Generic filtered record-store contract.
//!
//! Every component in this crate persists through [`RecordStore`] rather than
//! a concrete database. Filters are exact-match equality, AND-combined. The
//! production Postgres adapter lives outside this crate; [`memory`] provides
//! the in-process implementation used by tests and the CLI demo mode.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreResult;

/// A persisted record. Components round-trip their typed structs through
/// JSON at this boundary.
pub type Record = Value;

/// Exact-match equality filters, AND-combined.
pub type Filters = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Sort key for `select`.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// Build a filter map from column/value pairs.
pub fn filters<const N: usize>(pairs: [(&str, Value); N]) -> Filters {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Key-filtered CRUD surface over a table-shaped store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Return records matching every filter, optionally sorted and limited.
    async fn select(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<usize>,
        order_by: Option<OrderBy>,
    ) -> CoreResult<Vec<Record>>;

    /// Insert one record, returning it as stored.
    async fn insert(&self, table: &str, data: Record) -> CoreResult<Record>;

    /// Merge `data` into every matching record, returning the updated rows.
    async fn update(
        &self,
        table: &str,
        data: Record,
        filters: &Filters,
    ) -> CoreResult<Vec<Record>>;

    /// Insert, or merge into the existing record whose `on_conflict` columns
    /// all match `data`. Returns the affected rows.
    async fn upsert(
        &self,
        table: &str,
        data: Record,
        on_conflict: &[&str],
    ) -> CoreResult<Vec<Record>>;

    /// Remove matching records, returning them.
    async fn delete(&self, table: &str, filters: &Filters) -> CoreResult<Vec<Record>>;
}
