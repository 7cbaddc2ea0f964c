use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDateTime, Timelike};
use serde::ser::{Serialize, SerializeMap, Serializer};

// ---------------------------------------------------------------------------
// Value – a single cell as returned by storage
// ---------------------------------------------------------------------------

/// A dynamically-typed cell. The upstream store is loosely typed, so the
/// same column may hold numbers in one dataset and text in another.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

// -- Manual Eq/Hash so rows can be deduplicated for DISTINCT selections --
//
// Floats are identified by `float_key`: every NaN is one value and
// -0.0 equals 0.0, so equal values always hash alike.

fn float_key(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => float_key(*a) == float_key(*b),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Text(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => float_key(*f).hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Null => {}
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Text is not coerced here; see
    /// [`crate::binning::parse_eccentricity`] for the lenient parse.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQL-style comparison: `None` when either side is null or the two
    /// values are not comparable (e.g. text against a number).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Total order used to sort result rows, matching `ORDER BY … NULLS LAST`
    /// for well-typed columns and staying total on mixed ones.
    ///
    /// Numbers come first (integers and floats on one scale, NaN after every
    /// other number), then booleans, timestamps and text, then null.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        if let (Some(a), Some(b)) = (self.number_key(), other.number_key()) {
            return a.cmp(&b);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) => a.sort_rank().cmp(&b.sort_rank()),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Integer(_) | Value::Float(_) => 0,
            Value::Bool(_) => 1,
            Value::Timestamp(_) => 2,
            Value::Text(_) => 3,
            Value::Null => 4,
        }
    }

    /// Integers and floats share one scale. Ties on the numeric value put
    /// integers first and then fall back to the exact integer.
    fn number_key(&self) -> Option<(bool, NumberOrd, u8, i64)> {
        match self {
            Value::Integer(i) => Some((false, NumberOrd(*i as f64), 0, *i)),
            Value::Float(v) if v.is_nan() => Some((true, NumberOrd(0.0), 1, 0)),
            Value::Float(v) => Some((false, NumberOrd(v + 0.0), 1, 0)),
            _ => None,
        }
    }

    /// Text form used in CSV fields. Null is the empty field, timestamps are
    /// ISO-8601, floats always keep a decimal point.
    pub fn to_field(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Text(s) => Cow::Borrowed(s),
            Value::Timestamp(t) => Cow::Owned(iso_timestamp(t)),
            Value::Float(v) => Cow::Owned(format!("{v:?}")),
            Value::Integer(i) => Cow::Owned(i.to_string()),
            Value::Bool(b) => Cow::Owned(b.to_string()),
        }
    }
}

/// `2024-03-01T09:30:00`, or `2024-03-01T09:30:00.250000` when the
/// timestamp has a sub-second part (always six digits, microsecond
/// precision).
pub fn iso_timestamp(t: &NaiveDateTime) -> String {
    if t.nanosecond() / 1_000 == 0 {
        t.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// Float ordered by `total_cmp`; callers fold `-0.0` into `0.0` first.
#[derive(Debug, Clone, Copy)]
struct NumberOrd(f64);

impl PartialEq for NumberOrd {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for NumberOrd {}

impl PartialOrd for NumberOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumberOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "<null>"),
            other => f.write_str(&other.to_field()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            // NaN / inf have no JSON form.
            Value::Float(v) if !v.is_finite() => serializer.serialize_none(),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(t) => serializer.serialize_str(&iso_timestamp(t)),
        }
    }
}

// ---------------------------------------------------------------------------
// Row – one record, fields in storage key order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, or overwrite it in place if the name already exists.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Lookup that treats a missing column as null.
    pub fn value(&self, name: &str) -> &Value {
        self.get(name).unwrap_or(&Value::Null)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Column – the allow-list of names that may appear in a query
// ---------------------------------------------------------------------------

/// Every column the engine may reference in a predicate, projection or
/// ordering. Names never come from request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    ConeX,
    ConeY,
    ConeSpectralType,
    SubjectId,
    Age,
    Eye,
    Meridian,
    EccentricityDeg,
    EccentricityMm,
    RetMagFactor,
    Fov,
    LmRatio,
    Scones,
    LconeDensity,
    MconeDensity,
    SconeDensity,
    NumCones,
    NonclassCones,
    ConeOrigin,
    ZernikePupilDiam,
    ZernikeMeasureWave,
    ZernikeOptimWave,
}

impl Column {
    pub const fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::ConeX => "cone_x_microns",
            Column::ConeY => "cone_y_microns",
            Column::ConeSpectralType => "cone_spectral_type",
            Column::SubjectId => "subject_id",
            Column::Age => "age",
            Column::Eye => "eye",
            Column::Meridian => "meridian",
            Column::EccentricityDeg => "eccentricity_deg",
            Column::EccentricityMm => "eccentricity_mm",
            Column::RetMagFactor => "ret_mag_factor",
            Column::Fov => "fov",
            Column::LmRatio => "lm_ratio",
            Column::Scones => "scones",
            Column::LconeDensity => "lcone_density",
            Column::MconeDensity => "mcone_density",
            Column::SconeDensity => "scone_density",
            Column::NumCones => "numcones",
            Column::NonclassCones => "nonclass_cones",
            Column::ConeOrigin => "cone_origin",
            Column::ZernikePupilDiam => "zernike_pupil_diam",
            Column::ZernikeMeasureWave => "zernike_measure_wave",
            Column::ZernikeOptimWave => "zernike_optim_wave",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage relation holding one row per detected cone.
pub const CONE_TABLE: &str = "cone_data";

/// Per-acquisition columns, constant across one subject/meridian/eye and
/// exported in this order after the point columns.
pub const METADATA_FIELDS: [Column; 19] = [
    Column::SubjectId,
    Column::Age,
    Column::Eye,
    Column::Meridian,
    Column::EccentricityDeg,
    Column::EccentricityMm,
    Column::RetMagFactor,
    Column::Fov,
    Column::LmRatio,
    Column::Scones,
    Column::LconeDensity,
    Column::MconeDensity,
    Column::SconeDensity,
    Column::NumCones,
    Column::NonclassCones,
    Column::ConeOrigin,
    Column::ZernikePupilDiam,
    Column::ZernikeMeasureWave,
    Column::ZernikeOptimWave,
];

/// The spectral classes a cone can be labelled with.
pub const CONE_CLASSES: [&str; 3] = ["L", "M", "S"];

pub fn is_metadata_field(name: &str) -> bool {
    METADATA_FIELDS.iter().any(|c| c.name() == name)
}

/// Human label for an ocular side code.
pub fn eye_description(eye: &Value) -> Value {
    match eye.as_str() {
        Some("OD") => Value::from("Right Eye"),
        Some("OS") => Value::from("Left Eye"),
        _ => eye.clone(),
    }
}
