/// Data layer: cone records, dataset loading, and request filters.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Vec<Row>
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  Row, Value, Column allow-list, metadata field set
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  request constraints → FilterSpec (clauses + args)
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
