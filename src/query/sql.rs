use std::fmt::Write as _;

use serde::Deserialize;

use super::{Query, Selection, COUNT_FIELD};
use crate::data::filter::Op;
use crate::data::model::Value;

/// How a driver spells the Nth positional parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderStyle {
    /// `$1, $2, …` (PostgreSQL).
    Numbered,
    /// `?` repeated (SQLite, MySQL).
    Anonymous,
}

/// Rendered statement text plus the arguments its placeholders bind, in
/// placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn placeholder_count(&self, style: PlaceholderStyle) -> usize {
        match style {
            PlaceholderStyle::Anonymous => self.text.matches('?').count(),
            PlaceholderStyle::Numbered => self
                .text
                .match_indices('$')
                .filter(|(i, _)| {
                    self.text[i + 1..]
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_digit())
                })
                .count(),
        }
    }
}

struct Binder {
    style: PlaceholderStyle,
    args: Vec<Value>,
}

impl Binder {
    fn bind(&mut self, value: Value) -> String {
        self.args.push(value);
        match self.style {
            PlaceholderStyle::Numbered => format!("${}", self.args.len()),
            PlaceholderStyle::Anonymous => "?".to_string(),
        }
    }
}

/// Render `query` against `table`. Every value is bound positionally; only
/// allow-listed column names reach the text.
pub fn render(query: &Query, table: &str, style: PlaceholderStyle) -> Statement {
    let mut binder = Binder { style, args: Vec::new() };
    let mut text = String::from("SELECT ");

    match &query.selection {
        Selection::All => text.push('*'),
        Selection::Columns(projections) => {
            let list: Vec<String> = projections
                .iter()
                .map(|p| match p.alias {
                    Some(alias) => format!("{} AS {alias}", p.column),
                    None => p.column.to_string(),
                })
                .collect();
            text.push_str(&list.join(", "));
        }
        Selection::Distinct(columns) => {
            let list: Vec<&str> = columns.iter().map(|c| c.name()).collect();
            let _ = write!(text, "DISTINCT {}", list.join(", "));
        }
        Selection::GroupCount(column) => {
            let _ = write!(text, "{column}, COUNT(*) AS {COUNT_FIELD}");
        }
    }
    let _ = write!(text, " FROM {table}");

    let filter = &query.filter;
    if !filter.is_empty() {
        let terms: Vec<String> = filter
            .clauses()
            .iter()
            .map(|clause| {
                let mut args = filter.clause_args(clause).iter().cloned();
                let column = clause.column;
                match clause.op {
                    Op::NotNull => format!("{column} IS NOT NULL"),
                    Op::In => {
                        let slots: Vec<String> = args.map(|a| binder.bind(a)).collect();
                        format!("{column} IN ({})", slots.join(", "))
                    }
                    op => {
                        let symbol = match op {
                            Op::Gte => ">=",
                            Op::Lte => "<=",
                            _ => "=",
                        };
                        let slot = binder.bind(args.next().unwrap_or(Value::Null));
                        format!("{column} {symbol} {slot}")
                    }
                }
            })
            .collect();
        let _ = write!(text, " WHERE {}", terms.join(" AND "));
    }

    if let Selection::GroupCount(column) = &query.selection {
        let _ = write!(text, " GROUP BY {column}");
    }
    if let Some(order) = query.order {
        let _ = write!(text, " ORDER BY {} ASC NULLS LAST", order.column);
    }
    if let Some(limit) = query.limit {
        let slot = binder.bind(to_arg(limit));
        let _ = write!(text, " LIMIT {slot}");
    }
    if let Some(offset) = query.offset {
        let slot = binder.bind(to_arg(offset));
        let _ = write!(text, " OFFSET {slot}");
    }

    Statement { text, args: binder.args }
}

fn to_arg(n: u64) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::{ConeFilter, FilterSpec};
    use crate::data::model::{Column, CONE_TABLE};
    use crate::query::Projection;

    fn export_like_filter() -> ConeFilter {
        ConeFilter {
            subject_id: Some("AO001".into()),
            meridian: Some("nasal".into()),
            cone_types: vec!["L".into(), "M".into(), "S".into()],
            eccentricity_min: Some(1.5),
            eccentricity_max: Some(3.0),
            ..Default::default()
        }
    }

    #[test]
    fn numbered_placeholders_bind_in_append_order() {
        let query = Query::points(Selection::All, export_like_filter().to_spec()).limit(10_000);
        let stmt = render(&query, CONE_TABLE, PlaceholderStyle::Numbered);
        assert_eq!(
            stmt.text,
            "SELECT * FROM cone_data WHERE subject_id = $1 AND meridian = $2 \
             AND cone_spectral_type IN ($3, $4, $5) AND eccentricity_deg >= $6 \
             AND eccentricity_deg <= $7 ORDER BY cone_x_microns ASC NULLS LAST LIMIT $8"
        );
        assert_eq!(stmt.args.len(), 8);
        assert_eq!(stmt.args[2], Value::from("L"));
        assert_eq!(stmt.args[7], Value::Integer(10_000));
    }

    #[test]
    fn placeholder_count_matches_args_for_every_filter_shape() {
        // All 2^7 presence combinations of the optional constraints.
        for mask in 0u8..128 {
            let bit = |n: u8| mask & (1 << n) != 0;
            let filter = ConeFilter {
                subject_id: bit(0).then(|| "AO001".to_string()),
                meridian: bit(1).then(|| "temporal".to_string()),
                cone_types: if bit(2) { vec!["L".into(), "S".into()] } else { Vec::new() },
                age_min: bit(3).then_some(20),
                age_max: bit(4).then_some(60),
                eccentricity_min: bit(5).then_some(0.5),
                eccentricity_max: bit(6).then_some(8.0),
                ..Default::default()
            };
            let spec = filter.to_spec();
            let query = Query::points(Selection::All, spec.clone()).limit(100).offset(5);
            for style in [PlaceholderStyle::Numbered, PlaceholderStyle::Anonymous] {
                let stmt = render(&query, CONE_TABLE, style);
                assert_eq!(stmt.placeholder_count(style), stmt.args.len(), "mask {mask:#09b}");
                assert_eq!(&stmt.args[..spec.args().len()], spec.args());
            }
        }
    }

    #[test]
    fn projections_group_counts_and_not_null() {
        let plot = Query::points(
            Selection::Columns(vec![
                Projection::aliased(Column::ConeX, "x"),
                Projection::aliased(Column::ConeY, "y"),
            ]),
            FilterSpec::new(),
        );
        assert_eq!(
            render(&plot, CONE_TABLE, PlaceholderStyle::Anonymous).text,
            "SELECT cone_x_microns AS x, cone_y_microns AS y FROM cone_data \
             ORDER BY cone_x_microns ASC NULLS LAST"
        );

        let counts = Query::new(
            Selection::GroupCount(Column::ConeSpectralType),
            FilterSpec::new().not_null(Column::SubjectId).eq(Column::Meridian, "superior"),
        );
        let stmt = render(&counts, CONE_TABLE, PlaceholderStyle::Anonymous);
        assert_eq!(
            stmt.text,
            "SELECT cone_spectral_type, COUNT(*) AS count FROM cone_data \
             WHERE subject_id IS NOT NULL AND meridian = ? GROUP BY cone_spectral_type"
        );
        assert_eq!(stmt.args, [Value::from("superior")]);
    }
}
