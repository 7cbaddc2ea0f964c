use log::warn;
use serde::Serialize;

use crate::data::model::Value;

// ---------------------------------------------------------------------------
// Eccentricity display ranges
// ---------------------------------------------------------------------------

/// Total width of one display range, in degrees.
pub const RANGE_WIDTH_DEG: f64 = 0.1;

/// A display range centred on one acquisition eccentricity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EccentricityRange {
    pub min: f64,
    pub max: f64,
    pub label: String,
}

/// Lenient numeric read of a loosely typed cell.
///
/// Numbers pass through, numeric text is parsed, and anything else (null,
/// garbage text, NaN/inf) yields `None`.
pub fn parse_eccentricity(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Float(v) => Some(*v),
        Value::Integer(i) => Some(*i as f64),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// One range per distinct eccentricity, ascending. Overlapping ranges are
/// kept apart: each stands for a separate acquisition.
pub fn bin_eccentricities(values: &[f64]) -> Vec<EccentricityRange> {
    let mut distinct: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();

    let half = RANGE_WIDTH_DEG / 2.0;
    distinct
        .into_iter()
        .map(|ecc| EccentricityRange {
            min: (ecc - half).max(0.0),
            max: ecc + half,
            label: format!("{ecc:.1}°"),
        })
        .collect()
}

/// Parse then bin, dropping (and logging) cells that are not numbers.
pub fn bin_values<'a, I>(values: I) -> Vec<EccentricityRange>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut skipped = 0usize;
    let parsed: Vec<f64> = values
        .into_iter()
        .filter(|v| !v.is_null())
        .filter_map(|v| {
            let parsed = parse_eccentricity(v);
            if parsed.is_none() {
                skipped += 1;
            }
            parsed
        })
        .collect();
    if skipped > 0 {
        warn!("skipped {skipped} malformed eccentricity values");
    }
    bin_eccentricities(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn duplicates_collapse_and_order_is_ascending() {
        let ranges = bin_eccentricities(&[12.0, 12.0, 8.5]);
        assert_eq!(ranges.len(), 2);
        assert!(close(ranges[0].min, 8.45) && close(ranges[0].max, 8.55));
        assert_eq!(ranges[0].label, "8.5°");
        assert!(close(ranges[1].min, 11.95) && close(ranges[1].max, 12.05));
        assert_eq!(ranges[1].label, "12.0°");
    }

    #[test]
    fn lower_bound_is_clamped_at_zero() {
        let ranges = bin_eccentricities(&[0.02]);
        assert_eq!(ranges[0].min, 0.0);
        assert!(close(ranges[0].max, 0.07));
        assert_eq!(ranges[0].label, "0.0°");
    }

    #[test]
    fn overlapping_ranges_are_not_merged() {
        let ranges = bin_eccentricities(&[1.0, 1.04]);
        assert_eq!(ranges.len(), 2);
        assert!(ranges[0].max > ranges[1].min);
    }

    #[test]
    fn binning_is_idempotent() {
        let input = [3.2, 1.1, 3.2, 0.0, 7.75];
        assert_eq!(bin_eccentricities(&input), bin_eccentricities(&input));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let cells = [
            Value::Float(2.0),
            Value::from("n/a"),
            Value::from(" 4.5 "),
            Value::Null,
            Value::Bool(true),
            Value::Float(f64::NAN),
        ];
        let ranges = bin_values(&cells);
        let labels: Vec<&str> = ranges.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["2.0°", "4.5°"]);
    }

    #[test]
    fn empty_input_yields_no_ranges() {
        assert!(bin_eccentricities(&[]).is_empty());
        assert!(bin_values(std::iter::empty()).is_empty());
    }
}
