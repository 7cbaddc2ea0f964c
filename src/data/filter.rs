use super::model::{Column, Row, Value};

// ---------------------------------------------------------------------------
// Clause / FilterSpec – a flat conjunctive predicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
    Lte,
    /// Membership in a set; one placeholder per member.
    In,
    /// Binds no placeholder.
    NotNull,
}

/// One predicate term. `arity` arguments starting at `first_arg` in the
/// owning [`FilterSpec`]'s argument vector belong to this clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: Column,
    pub op: Op,
    pub first_arg: usize,
    pub arity: usize,
}

/// Ordered clause list plus the positional argument vector the clauses
/// bind to. Clause N's placeholders always come after clause N-1's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    clauses: Vec<Clause>,
    args: Vec<Value>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, column: Column, op: Op, values: Vec<Value>) {
        self.clauses.push(Clause {
            column,
            op,
            first_arg: self.args.len(),
            arity: values.len(),
        });
        self.args.extend(values);
    }

    pub fn eq(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.push(column, Op::Eq, vec![value.into()]);
        self
    }

    pub fn gte(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.push(column, Op::Gte, vec![value.into()]);
        self
    }

    pub fn lte(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.push(column, Op::Lte, vec![value.into()]);
        self
    }

    /// An empty set emits nothing.
    pub fn any_of<I, V>(mut self, column: Column, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if !values.is_empty() {
            self.push(column, Op::In, values);
        }
        self
    }

    pub fn not_null(mut self, column: Column) -> Self {
        self.push(column, Op::NotNull, Vec::new());
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn clause_args(&self, clause: &Clause) -> &[Value] {
        &self.args[clause.first_arg..clause.first_arg + clause.arity]
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the predicate against a row with SQL null semantics: a
    /// comparison involving null is false.
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().all(|clause| {
            let cell = row.value(clause.column.name());
            let args = self.clause_args(clause);
            match clause.op {
                Op::NotNull => !cell.is_null(),
                Op::Eq => args.first().is_some_and(|a| cell.compare(a).is_some_and(|o| o.is_eq())),
                Op::Gte => args.first().is_some_and(|a| cell.compare(a).is_some_and(|o| o.is_ge())),
                Op::Lte => args.first().is_some_and(|a| cell.compare(a).is_some_and(|o| o.is_le())),
                Op::In => args.iter().any(|a| cell.compare(a).is_some_and(|o| o.is_eq())),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// ConeFilter – typed request constraints
// ---------------------------------------------------------------------------

/// The optional constraints a request may carry. [`ConeFilter::to_spec`]
/// emits clauses in a fixed order regardless of which fields are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConeFilter {
    pub subject_id: Option<String>,
    pub meridian: Option<String>,
    pub cone_types: Vec<String>,
    /// Single-class requests compare with `=` instead of a one-member set.
    pub single_type: bool,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
    pub eccentricity_min: Option<f64>,
    pub eccentricity_max: Option<f64>,
}

impl ConeFilter {
    pub fn to_spec(&self) -> FilterSpec {
        let mut spec = FilterSpec::new();
        if let Some(subject) = non_empty(&self.subject_id) {
            spec = spec.eq(Column::SubjectId, subject);
        }
        if let Some(meridian) = non_empty(&self.meridian) {
            spec = spec.eq(Column::Meridian, meridian);
        }
        let types: Vec<&str> = self
            .cone_types
            .iter()
            .map(String::as_str)
            .filter(|t| !t.is_empty())
            .collect();
        match types.as_slice() {
            [] => {}
            [only] if self.single_type => spec = spec.eq(Column::ConeSpectralType, *only),
            _ => spec = spec.any_of(Column::ConeSpectralType, types.iter().copied()),
        }
        if let Some(age) = self.age_min {
            spec = spec.gte(Column::Age, age);
        }
        if let Some(age) = self.age_max {
            spec = spec.lte(Column::Age, age);
        }
        if let Some(ecc) = self.eccentricity_min {
            spec = spec.gte(Column::EccentricityDeg, ecc);
        }
        if let Some(ecc) = self.eccentricity_max {
            spec = spec.lte(Column::EccentricityDeg, ecc);
        }
        spec
    }
}

pub(crate) fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_parameters_emit_nothing() {
        let spec = ConeFilter {
            subject_id: Some(String::new()),
            ..Default::default()
        }
        .to_spec();
        assert!(spec.is_empty());
        assert!(spec.args().is_empty());
    }

    #[test]
    fn clause_order_is_fixed_and_args_follow_it() {
        let spec = ConeFilter {
            eccentricity_max: Some(4.0),
            meridian: Some("temporal".into()),
            cone_types: vec!["L".into(), "S".into()],
            subject_id: Some("AO001".into()),
            ..Default::default()
        }
        .to_spec();

        let columns: Vec<Column> = spec.clauses().iter().map(|c| c.column).collect();
        assert_eq!(
            columns,
            [Column::SubjectId, Column::Meridian, Column::ConeSpectralType, Column::EccentricityDeg]
        );
        assert_eq!(
            spec.args(),
            [
                Value::from("AO001"),
                Value::from("temporal"),
                Value::from("L"),
                Value::from("S"),
                Value::Float(4.0),
            ]
        );
        let membership = &spec.clauses()[2];
        assert_eq!(membership.op, Op::In);
        assert_eq!(spec.clause_args(membership), [Value::from("L"), Value::from("S")]);
    }

    #[test]
    fn single_class_uses_equality() {
        let spec = ConeFilter {
            cone_types: vec!["M".into()],
            single_type: true,
            ..Default::default()
        }
        .to_spec();
        assert_eq!(spec.clauses()[0].op, Op::Eq);
    }

    #[test]
    fn matching_follows_sql_null_semantics() {
        let spec = FilterSpec::new()
            .gte(Column::EccentricityDeg, 1.0)
            .any_of(Column::ConeSpectralType, ["L", "M"]);
        let hit = Row::new().with("eccentricity_deg", 1.5).with("cone_spectral_type", "M");
        let null_ecc = Row::new().with("eccentricity_deg", Value::Null).with("cone_spectral_type", "M");
        let wrong_class = Row::new().with("eccentricity_deg", 2.0).with("cone_spectral_type", "S");
        assert!(spec.matches(&hit));
        assert!(!spec.matches(&null_ecc));
        assert!(!spec.matches(&wrong_class));
    }
}
