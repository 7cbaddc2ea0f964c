use std::collections::BTreeMap;

use log::debug;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::data::filter::FilterSpec;
use crate::data::model::{eye_description, Column, Row, Value, CONE_CLASSES};
use crate::error::Result;
use crate::query::{Projection, Query, Selection, COUNT_FIELD};
use crate::store::Connection;

// ---------------------------------------------------------------------------
// Legend – representative acquisition record plus class counts
// ---------------------------------------------------------------------------

/// Descriptive columns shown in the plot legend, read from one row.
pub const LEGEND_FIELDS: [Column; 8] = [
    Column::Fov,
    Column::LmRatio,
    Column::Scones,
    Column::LconeDensity,
    Column::MconeDensity,
    Column::SconeDensity,
    Column::NumCones,
    Column::Eye,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Legend {
    /// [`LEGEND_FIELDS`] of the first matching row, plus `eye_description`.
    pub record: Row,
    /// Every matching row, classified or not.
    pub total: u64,
    /// Exactly the known classes, zero when absent.
    pub class_counts: BTreeMap<&'static str, u64>,
}

impl Legend {
    /// Sum over the named classes. Smaller than `total` when unclassified
    /// cones match.
    pub fn classified(&self) -> u64 {
        self.class_counts.values().sum()
    }
}

/// Build the legend for `filter`.
///
/// Two reads on one connection, both under the same filter: the
/// representative record, then the per-class counts. `None` when nothing
/// matches; the count read is skipped in that case.
pub async fn aggregate(conn: &mut dyn Connection, filter: &FilterSpec) -> Result<Option<Legend>> {
    let Some(mut record) = conn.fetch_one(&representative_query(filter)).await? else {
        return Ok(None);
    };
    let eye = eye_description(record.value(Column::Eye.name()));
    record.push("eye_description", eye);

    let groups = conn.fetch_all(&counts_query(filter)).await?;

    let mut class_counts: BTreeMap<&'static str, u64> =
        CONE_CLASSES.iter().map(|c| (*c, 0)).collect();
    let mut total = 0;
    for group in &groups {
        let n = count_of(group);
        total += n;
        let class = group.value(Column::ConeSpectralType.name()).as_str();
        if let Some(slot) = class.and_then(|c| class_counts.get_mut(c)) {
            *slot += n;
        }
    }
    debug!("legend: {total} matching cones across {} groups", groups.len());

    Ok(Some(Legend {
        record,
        total,
        class_counts,
    }))
}

/// First matching row, legend columns only.
pub fn representative_query(filter: &FilterSpec) -> Query {
    Query::points(
        Selection::Columns(LEGEND_FIELDS.iter().copied().map(Projection::new).collect()),
        filter.clone(),
    )
    .limit(1)
}

/// Matching rows grouped by class, the null class included.
pub fn counts_query(filter: &FilterSpec) -> Query {
    Query::new(Selection::GroupCount(Column::ConeSpectralType), filter.clone())
}

fn count_of(group: &Row) -> u64 {
    match group.value(COUNT_FIELD) {
        Value::Integer(n) => u64::try_from(*n).unwrap_or(0),
        other => other.as_f64().map_or(0, |v| v.max(0.0) as u64),
    }
}

// ---------------------------------------------------------------------------
// JSON shape
// ---------------------------------------------------------------------------

/// Legend endpoint body: the record's fields, `total_count` and
/// `class_counts`, or `{}` when nothing matched.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendResponse(pub Option<Legend>);

impl LegendResponse {
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl Serialize for LegendResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let Some(legend) = &self.0 else {
            return serializer.serialize_map(Some(0))?.end();
        };
        let mut map = serializer.serialize_map(Some(legend.record.len() + 2))?;
        for (name, value) in legend.record.iter() {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("total_count", &legend.total)?;
        map.serialize_entry("class_counts", &legend.class_counts)?;
        map.end()
    }
}
