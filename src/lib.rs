//! Filtered-query and streaming-export engine for retinal cone datasets.
//!
//! ```text
//!  request params ──► ConeFilter ──► FilterSpec ──► Query ──► Store
//!                                                              │
//!        ┌──────────────┬───────────────┬──────────────────────┤
//!        ▼              ▼               ▼                      ▼
//!   export (CSV)   binning (ranges)  legend (metadata)   pass-through
//! ```

pub mod binning;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod legend;
pub mod query;
pub mod service;
pub mod store;

pub use error::{Error, Result, ValidationError};
pub use service::ConeService;
