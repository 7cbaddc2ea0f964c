//! Structured read requests handed to a [`crate::store::Store`].
//!
//! A [`Query`] never carries SQL text. Backends that speak SQL render it with
//! [`sql::render`], picking the placeholder style their driver expects.

pub mod sql;

use crate::data::filter::FilterSpec;
use crate::data::model::Column;
use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Selection / ordering
// ---------------------------------------------------------------------------

/// A projected column, optionally renamed in the returned rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub column: Column,
    pub alias: Option<&'static str>,
}

impl Projection {
    pub const fn new(column: Column) -> Self {
        Self { column, alias: None }
    }

    pub const fn aliased(column: Column, alias: &'static str) -> Self {
        Self { column, alias: Some(alias) }
    }

    /// Field name the projected value appears under in a result row.
    pub fn output_name(&self) -> &'static str {
        self.alias.unwrap_or(self.column.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Every stored column, in storage key order.
    All,
    Columns(Vec<Projection>),
    /// Distinct combinations of the given columns.
    Distinct(Vec<Column>),
    /// One row per distinct value of the column: `{column, count}`.
    GroupCount(Column),
}

/// Name of the count field produced by [`Selection::GroupCount`].
pub const COUNT_FIELD: &str = "count";

/// Ascending order on one column, nulls sorted last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: Column,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selection: Selection,
    pub filter: FilterSpec,
    pub order: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn new(selection: Selection, filter: FilterSpec) -> Self {
        Self {
            selection,
            filter,
            order: None,
            limit: None,
            offset: None,
        }
    }

    /// Point queries order on the x coordinate so pagination is stable.
    pub fn points(selection: Selection, filter: FilterSpec) -> Self {
        Self::new(selection, filter).order_by(Column::ConeX)
    }

    pub fn order_by(mut self, column: Column) -> Self {
        self.order = Some(OrderBy { column });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

// ---------------------------------------------------------------------------
// Limit validation
// ---------------------------------------------------------------------------

/// Per-endpoint paging bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct LimitPolicy {
    pub default: u64,
    pub max: u64,
}

impl LimitPolicy {
    pub const fn new(default: u64, max: u64) -> Self {
        Self { default, max }
    }

    /// Resolve a requested limit: absent means the default, anything outside
    /// `1..=max` is rejected.
    pub fn resolve(&self, requested: Option<i64>) -> Result<u64, ValidationError> {
        let Some(value) = requested else {
            return Ok(self.default);
        };
        match u64::try_from(value) {
            Ok(v) if (1..=self.max).contains(&v) => Ok(v),
            _ => Err(ValidationError::LimitOutOfRange { value, max: self.max }),
        }
    }
}

pub fn resolve_offset(requested: Option<i64>) -> Result<u64, ValidationError> {
    match requested {
        None => Ok(0),
        Some(v) => u64::try_from(v).map_err(|_| ValidationError::NegativeOffset(v)),
    }
}
