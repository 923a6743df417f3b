//! In-memory [`RecordStore`] implementation.
//!
//! Tables are plain vectors of JSON objects behind one `RwLock`. Honors the
//! full contract — equality filters, order_by over string/number columns,
//! merge-on-update, and upsert-on-conflict — so tests exercise the same
//! semantics the production adapter provides.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Direction, Filters, OrderBy, Record, RecordStore};
use crate::error::{CoreError, CoreResult};

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(record: &Value, filters: &Filters) -> bool {
    filters
        .iter()
        .all(|(column, expected)| record.get(column) == Some(expected))
}

/// Shallow-merge `data`'s fields into `target`. Both must be objects.
fn merge_into(target: &mut Value, data: &Value) -> CoreResult<()> {
    let (Some(target), Some(data)) = (target.as_object_mut(), data.as_object()) else {
        return Err(CoreError::Store("records must be JSON objects".into()));
    };
    for (k, v) in data {
        target.insert(k.clone(), v.clone());
    }
    Ok(())
}

/// Total order over the JSON values that appear in sortable columns.
/// Numbers compare numerically; strings that both parse as RFC 3339
/// timestamps compare as instants (sub-second precision varies, so plain
/// lexicographic order is not safe), other strings lexicographically;
/// anything else falls back to its serialized form.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn select(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<usize>,
        order_by: Option<OrderBy>,
    ) -> CoreResult<Vec<Record>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches(r, filters)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = order_by {
            rows.sort_by(|a, b| {
                let cmp = compare_values(a.get(&order.column), b.get(&order.column));
                match order.direction {
                    Direction::Asc => cmp,
                    Direction::Desc => cmp.reverse(),
                }
            });
        }

        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, data: Record) -> CoreResult<Record> {
        if !data.is_object() {
            return Err(CoreError::Store("records must be JSON objects".into()));
        }
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(data.clone());
        Ok(data)
    }

    async fn update(
        &self,
        table: &str,
        data: Record,
        filters: &Filters,
    ) -> CoreResult<Vec<Record>> {
        let mut tables = self.tables.write().await;
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches(r, filters)) {
                merge_into(row, &data)?;
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn upsert(
        &self,
        table: &str,
        data: Record,
        on_conflict: &[&str],
    ) -> CoreResult<Vec<Record>> {
        if !data.is_object() {
            return Err(CoreError::Store("records must be JSON objects".into()));
        }
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();

        let conflict: Filters = on_conflict
            .iter()
            .filter_map(|col| data.get(*col).map(|v| (col.to_string(), v.clone())))
            .collect();

        if !conflict.is_empty() {
            if let Some(existing) = rows.iter_mut().find(|r| matches(r, &conflict)) {
                merge_into(existing, &data)?;
                return Ok(vec![existing.clone()]);
            }
        }

        rows.push(data.clone());
        Ok(vec![data])
    }

    async fn delete(&self, table: &str, filters: &Filters) -> CoreResult<Vec<Record>> {
        let mut tables = self.tables.write().await;
        let mut removed = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|r| {
                if matches(r, filters) {
                    removed.push(r.clone());
                    false
                } else {
                    true
                }
            });
        }
        Ok(removed)
    }
}
