use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use super::{Connection, PooledConnection, RowStream, StorageError, Store};
use crate::data::model::{Row, Value};
use crate::query::{Query, Selection, COUNT_FIELD};

// ---------------------------------------------------------------------------
// MemoryStore – an immutable dataset behind a bounded connection pool
// ---------------------------------------------------------------------------

/// Read-only rows shared by every connection, guarded by a fixed number of
/// connection permits.
pub struct MemoryStore {
    rows: Arc<Vec<Row>>,
    pool: Arc<Semaphore>,
    size: usize,
}

impl MemoryStore {
    pub fn new(rows: Vec<Row>, pool_size: usize) -> Self {
        let size = pool_size.max(1);
        Self {
            rows: Arc::new(rows),
            pool: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Connections currently free to check out.
    pub fn idle_connections(&self) -> usize {
        self.pool.available_permits()
    }

    /// Shut the pool. Checked-out connections stay valid until dropped;
    /// new acquisitions fail with [`StorageError::PoolClosed`].
    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn acquire(&self) -> Result<PooledConnection, StorageError> {
        let permit = match Arc::clone(&self.pool).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                warn!("connection pool exhausted ({} in use)", self.size);
                return Err(StorageError::PoolExhausted { size: self.size });
            }
            Err(TryAcquireError::Closed) => return Err(StorageError::PoolClosed),
        };
        Ok(Box::new(MemoryConnection {
            rows: Arc::clone(&self.rows),
            _permit: permit,
        }))
    }
}

struct MemoryConnection {
    rows: Arc<Vec<Row>>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn fetch_all(&mut self, query: &Query) -> Result<Vec<Row>, StorageError> {
        let rows = execute(&self.rows, query);
        debug!("fetch_all {:?} -> {} rows", query.selection, rows.len());
        Ok(rows)
    }

    async fn fetch_one(&mut self, query: &Query) -> Result<Option<Row>, StorageError> {
        let mut one = query.clone();
        one.limit = Some(1);
        Ok(execute(&self.rows, &one).into_iter().next())
    }

    fn into_rows(self: Box<Self>, query: Query) -> RowStream {
        let MemoryConnection { rows, _permit } = *self;
        if !matches!(query.selection, Selection::All | Selection::Columns(_)) {
            let inner = execute(&rows, &query).into_iter().map(Ok);
            return stream::iter(Cursor { inner, _permit }).boxed();
        }
        let indices = matching_indices(&rows, &query);
        debug!("cursor opened over {} rows", indices.len());
        let selection = query.selection;
        let inner = indices
            .into_iter()
            .map(move |i| Ok(project(&rows[i], &selection)));
        stream::iter(Cursor { inner, _permit }).boxed()
    }
}

/// Keeps the connection permit alive for as long as rows are being read.
struct Cursor<I> {
    inner: I,
    _permit: OwnedSemaphorePermit,
}

impl<I: Iterator> Iterator for Cursor<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.inner.next()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn execute(rows: &[Row], query: &Query) -> Vec<Row> {
    match &query.selection {
        Selection::All | Selection::Columns(_) => matching_indices(rows, query)
            .into_iter()
            .map(|i| project(&rows[i], &query.selection))
            .collect(),
        Selection::Distinct(columns) => {
            let mut seen = std::collections::HashSet::new();
            let distinct = ordered_matches(rows, query)
                .into_iter()
                .filter_map(|i| {
                    let key: Vec<Value> =
                        columns.iter().map(|c| rows[i].value(c.name()).clone()).collect();
                    seen.insert(key.clone()).then(|| {
                        columns
                            .iter()
                            .zip(key)
                            .fold(Row::new(), |row, (c, v)| row.with(c.name(), v))
                    })
                });
            page(distinct, query).collect()
        }
        Selection::GroupCount(column) => {
            let mut order: Vec<Value> = Vec::new();
            let mut counts: HashMap<Value, i64> = HashMap::new();
            for i in ordered_matches(rows, query) {
                let key = rows[i].value(column.name()).clone();
                let count = counts.entry(key.clone()).or_insert(0);
                if *count == 0 {
                    order.push(key);
                }
                *count += 1;
            }
            let groups = order.into_iter().map(|key| {
                let n = counts.get(&key).copied().unwrap_or(0);
                Row::new().with(column.name(), key).with(COUNT_FIELD, n)
            });
            page(groups, query).collect()
        }
    }
}

/// Matching row indices in query order, before paging.
fn ordered_matches(rows: &[Row], query: &Query) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..rows.len())
        .filter(|&i| query.filter.matches(&rows[i]))
        .collect();
    if let Some(order) = query.order {
        let name = order.column.name();
        // Stable, so ties keep storage order. Nulls sort last.
        indices.sort_by(|&a, &b| rows[a].value(name).sort_cmp(rows[b].value(name)));
    }
    indices
}

fn matching_indices(rows: &[Row], query: &Query) -> Vec<usize> {
    page(ordered_matches(rows, query).into_iter(), query).collect()
}

fn page<I: Iterator>(items: I, query: &Query) -> impl Iterator<Item = I::Item> {
    let offset = query.offset.map_or(0, saturating_usize);
    let limit = query.limit.map_or(usize::MAX, saturating_usize);
    items.skip(offset).take(limit)
}

fn saturating_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn project(row: &Row, selection: &Selection) -> Row {
    match selection {
        Selection::Columns(projections) => projections.iter().fold(Row::new(), |out, p| {
            out.with(p.output_name(), row.value(p.column.name()).clone())
        }),
        _ => row.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::FilterSpec;
    use crate::data::model::Column;
    use crate::query::Projection;
    use futures::TryStreamExt;

    fn cone(id: i64, x: Option<f64>, class: Option<&str>) -> Row {
        Row::new()
            .with("id", id)
            .with("cone_x_microns", x)
            .with("cone_y_microns", 1.0)
            .with("cone_spectral_type", class)
            .with("meridian", "temporal")
    }

    fn store(pool: usize) -> MemoryStore {
        MemoryStore::new(
            vec![
                cone(1, Some(3.0), Some("L")),
                cone(2, None, Some("M")),
                cone(3, Some(-1.0), Some("L")),
                cone(4, Some(3.0), None),
            ],
            pool,
        )
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .map(|r| match r.value("id") {
                Value::Integer(i) => *i,
                _ => -1,
            })
            .collect()
    }

    #[tokio::test]
    async fn orders_on_x_with_nulls_last_and_stable_ties() {
        let store = store(1);
        let mut conn = store.acquire().await.unwrap();
        let rows = conn
            .fetch_all(&Query::points(Selection::All, FilterSpec::new()))
            .await
            .unwrap();
        assert_eq!(ids(&rows), [3, 1, 4, 2]);
    }

    #[tokio::test]
    async fn paging_and_projection() {
        let store = store(1);
        let mut conn = store.acquire().await.unwrap();
        let query = Query::points(
            Selection::Columns(vec![Projection::aliased(Column::ConeX, "x")]),
            FilterSpec::new(),
        )
        .limit(2)
        .offset(1);
        let rows = conn.fetch_all(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), ["x"]);
        assert_eq!(rows[0].value("x"), &Value::Float(3.0));
    }

    #[tokio::test]
    async fn group_count_includes_the_null_group() {
        let store = store(1);
        let mut conn = store.acquire().await.unwrap();
        let rows = conn
            .fetch_all(&Query::new(
                Selection::GroupCount(Column::ConeSpectralType),
                FilterSpec::new(),
            ))
            .await
            .unwrap();
        let l = rows
            .iter()
            .find(|r| r.value("cone_spectral_type") == &Value::from("L"))
            .unwrap();
        assert_eq!(l.value(COUNT_FIELD), &Value::Integer(2));
        assert!(rows.iter().any(|r| r.value("cone_spectral_type").is_null()));
    }

    /// Sixty cones whose x column mixes floats, NaN, unparsed text and nulls.
    fn mixed_x_store() -> MemoryStore {
        let rows = (0..60)
            .map(|i| {
                let x = match i % 4 {
                    0 => Value::Float(f64::NAN),
                    1 => Value::from("n/a"),
                    2 => Value::Null,
                    _ => Value::Float(f64::from(60 - i)),
                };
                Row::new().with("id", i64::from(i)).with("cone_x_microns", x)
            })
            .collect();
        MemoryStore::new(rows, 1)
    }

    #[tokio::test]
    async fn mixed_sort_column_orders_numbers_then_nan_then_text_then_null() {
        let store = mixed_x_store();
        let mut conn = store.acquire().await.unwrap();
        let rows = conn
            .fetch_all(&Query::points(Selection::All, FilterSpec::new()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 60);

        let xs: Vec<&Value> = rows.iter().map(|r| r.value("cone_x_microns")).collect();
        let numbers: Vec<f64> = xs[..15].iter().filter_map(|v| v.as_f64()).collect();
        assert_eq!(numbers.len(), 15);
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        assert!(xs[15..30].iter().all(|v| matches!(v, Value::Float(f) if f.is_nan())));
        assert!(xs[30..45].iter().all(|v| v.as_str() == Some("n/a")));
        assert!(xs[45..].iter().all(|v| v.is_null()));
        // Ties keep storage order.
        assert_eq!(rows[15].value("id"), &Value::Integer(0));
        assert_eq!(rows[16].value("id"), &Value::Integer(4));
    }

    #[tokio::test]
    async fn group_count_folds_nan_and_signed_zero() {
        let rows = [f64::NAN, -f64::NAN, 0.0, -0.0, 1.5]
            .into_iter()
            .map(|v| Row::new().with("eccentricity_deg", v))
            .collect();
        let store = MemoryStore::new(rows, 1);
        let mut conn = store.acquire().await.unwrap();

        let groups = conn
            .fetch_all(&Query::new(
                Selection::GroupCount(Column::EccentricityDeg),
                FilterSpec::new(),
            ))
            .await
            .unwrap();
        let counts: Vec<&Value> = groups.iter().map(|g| g.value(COUNT_FIELD)).collect();
        assert_eq!(
            counts,
            [&Value::Integer(2), &Value::Integer(2), &Value::Integer(1)]
        );

        let distinct = conn
            .fetch_all(&Query::new(
                Selection::Distinct(vec![Column::EccentricityDeg]),
                FilterSpec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(distinct.len(), 3);
    }

    #[tokio::test]
    async fn saturated_pool_fails_fast_and_recovers_on_drop() {
        let store = store(1);
        let held = store.acquire().await.unwrap();
        assert!(matches!(
            store.acquire().await,
            Err(StorageError::PoolExhausted { size: 1 })
        ));
        drop(held);
        assert!(store.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn cursor_holds_its_connection_until_dropped() {
        let store = store(2);
        let conn = store.acquire().await.unwrap();
        let mut cursor = conn.into_rows(Query::points(Selection::All, FilterSpec::new()));
        assert_eq!(store.idle_connections(), 1);
        let first = cursor.try_next().await.unwrap().unwrap();
        assert_eq!(first.value("id"), &Value::Integer(3));
        drop(cursor);
        assert_eq!(store.idle_connections(), 2);
    }

    #[tokio::test]
    async fn closed_pool_rejects_new_connections() {
        let store = store(2);
        store.close();
        assert!(matches!(store.acquire().await, Err(StorageError::PoolClosed)));
    }
}
