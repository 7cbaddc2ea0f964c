use std::sync::Arc;

use futures::stream::{StreamExt, TryStreamExt};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::binning::{bin_values, EccentricityRange};
use crate::config::{Limits, Settings};
use crate::data::filter::{non_empty, ConeFilter, FilterSpec};
use crate::data::model::{eye_description, Column, Row, Value};
use crate::error::{Error, Result, ValidationError};
use crate::export::{attachment_name, export_csv, CsvStream, ExportOptions};
use crate::legend::{aggregate, LegendResponse};
use crate::query::{resolve_offset, Projection, Query, Selection};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// `GET /cones`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConeQueryParams {
    pub subject_id: Option<String>,
    pub meridian: Option<String>,
    #[serde(rename = "cone_spectral_type")]
    pub cone_type: Option<String>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /plot-data`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlotParams {
    pub subject_id: Option<String>,
    pub meridian: Option<String>,
    #[serde(rename = "cone_spectral_type", default)]
    pub cone_types: Vec<String>,
    pub eccentricity_min: Option<f64>,
    pub eccentricity_max: Option<f64>,
    pub limit: Option<i64>,
}

/// `GET /metadata`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataParams {
    pub subject_id: Option<String>,
    pub meridian: Option<String>,
    #[serde(rename = "cone_spectral_type", default)]
    pub cone_types: Vec<String>,
    pub eccentricity_min: Option<f64>,
    pub eccentricity_max: Option<f64>,
}

/// `GET /eccentricity-ranges`; both fields are required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeParams {
    pub subject_id: Option<String>,
    pub meridian: Option<String>,
}

/// `GET /cones/export`; subject and meridian are required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportParams {
    pub subject_id: Option<String>,
    pub meridian: Option<String>,
    #[serde(rename = "cone_spectral_type", default)]
    pub cone_types: Vec<String>,
    pub eccentricity_min: Option<f64>,
    pub eccentricity_max: Option<f64>,
    pub limit: Option<i64>,
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ValidationError> {
    non_empty(value).ok_or(ValidationError::MissingParameter(name))
}

// ---------------------------------------------------------------------------
// Query construction (validated, no storage access)
// ---------------------------------------------------------------------------

pub fn subjects_query(limits: &Limits) -> Query {
    Query::new(
        Selection::Distinct(vec![Column::SubjectId, Column::Age, Column::Eye]),
        FilterSpec::new().not_null(Column::SubjectId),
    )
    .order_by(Column::SubjectId)
    .limit(limits.subjects)
}

pub fn cones_query(limits: &Limits, params: &ConeQueryParams) -> Result<Query, ValidationError> {
    let limit = limits.cones.resolve(params.limit)?;
    let offset = resolve_offset(params.offset)?;
    let filter = ConeFilter {
        subject_id: params.subject_id.clone(),
        meridian: params.meridian.clone(),
        cone_types: params.cone_type.iter().cloned().collect(),
        single_type: true,
        age_min: params.age_min,
        age_max: params.age_max,
        ..Default::default()
    };
    Ok(Query::points(Selection::All, filter.to_spec())
        .limit(limit)
        .offset(offset))
}

pub fn plot_query(limits: &Limits, params: &PlotParams) -> Result<Query, ValidationError> {
    let limit = limits.plot.resolve(params.limit)?;
    let filter = ConeFilter {
        subject_id: params.subject_id.clone(),
        meridian: params.meridian.clone(),
        cone_types: params.cone_types.clone(),
        eccentricity_min: params.eccentricity_min,
        eccentricity_max: params.eccentricity_max,
        ..Default::default()
    };
    let columns = vec![
        Projection::aliased(Column::ConeX, "x"),
        Projection::aliased(Column::ConeY, "y"),
        Projection::aliased(Column::ConeSpectralType, "cone_type"),
    ];
    Ok(Query::points(Selection::Columns(columns), filter.to_spec()).limit(limit))
}

pub fn metadata_filter(params: &MetadataParams) -> FilterSpec {
    ConeFilter {
        subject_id: params.subject_id.clone(),
        meridian: params.meridian.clone(),
        cone_types: params.cone_types.clone(),
        eccentricity_min: params.eccentricity_min,
        eccentricity_max: params.eccentricity_max,
        ..Default::default()
    }
    .to_spec()
}

pub fn ranges_query(params: &RangeParams) -> Result<Query, ValidationError> {
    let subject = required(&params.subject_id, "subject_id")?;
    let meridian = required(&params.meridian, "meridian")?;
    let filter = FilterSpec::new()
        .eq(Column::SubjectId, subject)
        .eq(Column::Meridian, meridian);
    Ok(Query::new(Selection::Distinct(vec![Column::EccentricityDeg]), filter)
        .order_by(Column::EccentricityDeg))
}

pub fn export_query(limits: &Limits, params: &ExportParams) -> Result<Query, ValidationError> {
    let subject = required(&params.subject_id, "subject_id")?;
    let meridian = required(&params.meridian, "meridian")?;
    let limit = limits.export.resolve(params.limit)?;
    let filter = ConeFilter {
        subject_id: Some(subject.to_string()),
        meridian: Some(meridian.to_string()),
        cone_types: params.cone_types.clone(),
        eccentricity_min: params.eccentricity_min,
        eccentricity_max: params.eccentricity_max,
        ..Default::default()
    };
    Ok(Query::points(Selection::All, filter.to_spec()).limit(limit))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Column-major plot payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotData {
    pub x: Vec<Value>,
    pub y: Vec<Value>,
    pub cone_type: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangesResponse {
    pub ranges: Vec<EccentricityRange>,
}

pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// A started export: the attachment name and the line stream.
pub struct Export {
    pub filename: String,
    pub body: CsvStream,
}

impl Export {
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

// ---------------------------------------------------------------------------
// ConeService – endpoint operations over a store
// ---------------------------------------------------------------------------

pub struct ConeService<S> {
    store: Arc<S>,
    settings: Settings,
}

impl<S> Clone for ConeService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
        }
    }
}

impl<S: Store> ConeService<S> {
    pub fn new(store: Arc<S>, settings: Settings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn fetch_all(&self, query: &Query) -> Result<Vec<Row>> {
        debug!("fetch {:?}", query.selection);
        let mut conn = self.store.acquire().await?;
        Ok(conn.fetch_all(query).await?)
    }

    /// Distinct subjects with their age and eye.
    pub async fn subjects(&self) -> Result<Vec<Row>> {
        let rows = self
            .fetch_all(&subjects_query(&self.settings.limits))
            .await
            .map_err(log_failure)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let eye = eye_description(row.value(Column::Eye.name()));
                row.with("eye_description", eye)
            })
            .collect())
    }

    /// Full cone records, paginated.
    pub async fn cones(&self, params: &ConeQueryParams) -> Result<Vec<Row>> {
        let query = cones_query(&self.settings.limits, params)?;
        self.fetch_all(&query).await.map_err(log_failure)
    }

    pub async fn plot_data(&self, params: &PlotParams) -> Result<PlotData> {
        let query = plot_query(&self.settings.limits, params)?;
        let rows = self.fetch_all(&query).await.map_err(log_failure)?;
        let mut plot = PlotData::default();
        for row in &rows {
            plot.x.push(row.value("x").clone());
            plot.y.push(row.value("y").clone());
            plot.cone_type.push(row.value("cone_type").clone());
        }
        Ok(plot)
    }

    /// Legend metadata for the current filter; `{}` when nothing matches.
    pub async fn metadata(&self, params: &MetadataParams) -> Result<LegendResponse> {
        let filter = metadata_filter(params);
        let legend = async move {
            let mut conn = self.store.acquire().await?;
            aggregate(conn.as_mut(), &filter).await
        }
        .await
        .map_err(log_failure)?;
        Ok(LegendResponse(legend))
    }

    pub async fn eccentricity_ranges(&self, params: &RangeParams) -> Result<RangesResponse> {
        let query = ranges_query(params)?;
        let rows = self.fetch_all(&query).await.map_err(log_failure)?;
        let name = Column::EccentricityDeg.name();
        Ok(RangesResponse {
            ranges: bin_values(rows.iter().map(|r| r.value(name))),
        })
    }

    /// Begin a CSV export. Validation, connection and shape failures are
    /// returned here; failures after the first line end the stream.
    pub async fn export(&self, params: &ExportParams) -> Result<Export> {
        let query = export_query(&self.settings.limits, params)?;
        let limit = query.limit.unwrap_or(self.settings.limits.export.default);
        let options = ExportOptions {
            limit,
            verify_metadata: self.settings.verify_export_metadata,
        };
        let body = async move {
            let conn = self.store.acquire().await?;
            export_csv(conn.into_rows(query), options).await
        }
        .await
        .map_err(log_failure)?;

        let filename = attachment_name(
            non_empty(&params.subject_id).unwrap_or_default(),
            non_empty(&params.meridian).unwrap_or_default(),
            &params.cone_types,
            params.eccentricity_min,
            params.eccentricity_max,
        );
        Ok(Export {
            filename,
            body: body.inspect_err(|e| error!("export aborted mid-stream: {e}")).boxed(),
        })
    }
}

/// Server-side failures are logged once, where they leave the engine.
fn log_failure(err: Error) -> Error {
    if !err.is_client_error() {
        error!("{err}");
    }
    err
}
