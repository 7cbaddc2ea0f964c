//! Streaming CSV export.
//!
//! Precondition: every row of one export belongs to a single acquisition, so
//! the metadata columns of the first row stand for the whole set. They are
//! copied into every line rather than read per row. Set
//! [`ExportOptions::verify_metadata`] to fail the stream when a later row
//! disagrees.

pub mod classify;

use std::borrow::Cow;

use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info};

use crate::data::model::{Row, Value};
use crate::error::{Error, Result};
use crate::store::RowStream;

pub use classify::FieldLayout;

/// Header written when the filter matches nothing.
pub const DEFAULT_HEADER: &str = "id,cone_x_microns,cone_y_microns,cone_spectral_type";

/// Encoded CSV lines, one item per line including its terminator.
pub type CsvStream = BoxStream<'static, Result<Vec<u8>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Stop after this many data lines whatever the row source yields.
    pub limit: u64,
    pub verify_metadata: bool,
}

impl ExportOptions {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            verify_metadata: false,
        }
    }
}

/// Start an export over `rows`.
///
/// Reads the first row before returning so shape errors surface before any
/// byte is sent. The returned stream owns the cursor; dropping it early
/// abandons the remaining rows and releases the connection.
pub async fn export_csv(mut rows: RowStream, options: ExportOptions) -> Result<CsvStream> {
    let Some(first) = rows.next().await.transpose()? else {
        info!("export matched no rows, writing default header");
        let line = format!("{DEFAULT_HEADER}\n").into_bytes();
        return Ok(stream::once(async move { Ok(line) }).boxed());
    };

    let layout = FieldLayout::from_row(&first);
    if let Some(missing) = layout.missing_metadata(&first) {
        return Err(Error::missing_metadata(missing.name()));
    }
    let metadata = layout
        .metadata_fields
        .iter()
        .map(|c| first.value(c.name()).clone())
        .collect();
    info!(
        "export started: {} columns, at most {} rows",
        layout.width(),
        options.limit
    );

    let state = ExportState {
        cursor: rows,
        layout,
        metadata,
        pending: Some(first),
        header_sent: false,
        emitted: 0,
        options,
    };
    Ok(stream::try_unfold(state, ExportState::step).boxed())
}

struct ExportState {
    cursor: RowStream,
    layout: FieldLayout,
    /// Representative values, aligned with `layout.metadata_fields`.
    metadata: Vec<Value>,
    pending: Option<Row>,
    header_sent: bool,
    emitted: u64,
    options: ExportOptions,
}

impl ExportState {
    async fn step(mut self) -> Result<Option<(Vec<u8>, Self)>> {
        if !self.header_sent {
            self.header_sent = true;
            let line = encode_line(self.layout.header())?;
            return Ok(Some((line, self)));
        }
        if self.emitted >= self.options.limit {
            debug!("export row cap of {} reached", self.options.limit);
            return Ok(None);
        }

        // Hand control back so the transport can flush the previous line.
        tokio::task::yield_now().await;

        let row = match self.pending.take() {
            Some(row) => row,
            None => match self.cursor.next().await {
                Some(row) => row?,
                None => {
                    info!("export finished: {} rows", self.emitted);
                    return Ok(None);
                }
            },
        };
        if self.options.verify_metadata {
            self.verify(&row)?;
        }
        let line = self.render(&row)?;
        self.emitted += 1;
        Ok(Some((line, self)))
    }

    fn render(&self, row: &Row) -> Result<Vec<u8>> {
        let fields: Vec<Cow<'_, str>> = self
            .layout
            .point_fields
            .iter()
            .map(|f| row.value(f).to_field())
            .chain(self.metadata.iter().map(Value::to_field))
            .collect();
        encode_line(fields.iter().map(|f| f.as_ref()))
    }

    fn verify(&self, row: &Row) -> Result<()> {
        let divergent = self
            .layout
            .metadata_fields
            .iter()
            .zip(&self.metadata)
            .find(|(column, expected)| row.get(column.name()) != Some(*expected));
        match divergent {
            Some((column, _)) => Err(Error::divergent_metadata(column.name())),
            None => Ok(()),
        }
    }
}

fn encode_line<'a, I>(fields: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| Error::Encode(e.into_error().into()))
}

// ---------------------------------------------------------------------------
// Attachment naming
// ---------------------------------------------------------------------------

/// `{subject}_{meridian}_{classes|all}[_ecc{min}-{max}]_cones.csv`
pub fn attachment_name(
    subject_id: &str,
    meridian: &str,
    cone_types: &[String],
    eccentricity_min: Option<f64>,
    eccentricity_max: Option<f64>,
) -> String {
    let classes = if cone_types.is_empty() {
        "all".to_string()
    } else {
        cone_types.join("_")
    };
    let ecc = if eccentricity_min.is_some() || eccentricity_max.is_some() {
        let min = eccentricity_min.map_or_else(|| "0".to_string(), |v| format!("{v:.1}"));
        let max = eccentricity_max.map_or_else(|| "inf".to_string(), |v| format!("{v:.1}"));
        format!("_ecc{min}-{max}")
    } else {
        String::new()
    };
    format!("{subject_id}_{meridian}_{classes}{ecc}_cones.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::METADATA_FIELDS;
    use crate::store::StorageError;
    use futures::TryStreamExt;

    fn acquisition_row(id: i64, x: f64) -> Row {
        let mut row = Row::new()
            .with("id", id)
            .with("cone_x_microns", x)
            .with("cone_y_microns", -x)
            .with("cone_spectral_type", "L");
        for column in METADATA_FIELDS {
            row.push(column.name(), format!("{}-{id}", column.name()));
        }
        row
    }

    fn source(rows: Vec<Result<Row, StorageError>>) -> RowStream {
        stream::iter(rows).boxed()
    }

    async fn collect(stream: CsvStream) -> Result<String> {
        let bytes = stream.try_concat().await?;
        Ok(String::from_utf8(bytes).unwrap())
    }

    #[tokio::test]
    async fn empty_result_writes_only_the_default_header() {
        let csv = collect(export_csv(source(Vec::new()), ExportOptions::new(10)).await.unwrap())
            .await
            .unwrap();
        assert_eq!(csv, format!("{DEFAULT_HEADER}\n"));
    }

    #[tokio::test]
    async fn metadata_is_replicated_from_the_first_row() {
        let rows = vec![Ok(acquisition_row(1, 0.5)), Ok(acquisition_row(2, 1.5))];
        let csv = collect(export_csv(source(rows), ExportOptions::new(10)).await.unwrap())
            .await
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,cone_x_microns,cone_y_microns,cone_spectral_type,subject_id,age,"));
        assert!(lines[0].ends_with(",zernike_optim_wave"));
        assert!(lines[2].starts_with("2,1.5,-1.5,L,subject_id-1,age-1,"));
        assert_eq!(lines[2].split(',').count(), 4 + 19);
    }

    #[tokio::test]
    async fn row_cap_truncates_an_oversized_source() {
        let rows = (0..50).map(|i| Ok(acquisition_row(i, i as f64))).collect();
        let csv = collect(export_csv(source(rows), ExportOptions::new(7)).await.unwrap())
            .await
            .unwrap();
        assert_eq!(csv.lines().count(), 1 + 7);
    }

    #[tokio::test]
    async fn missing_metadata_column_aborts_before_output() {
        let mut row = Row::new().with("id", 1i64);
        for column in METADATA_FIELDS.iter().filter(|c| c.name() != "fov") {
            row.push(column.name(), 1i64);
        }
        let err = export_csv(source(vec![Ok(row)]), ExportOptions::new(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::DataShape { ref field, .. } if field == "fov"));
    }

    #[tokio::test]
    async fn verification_mode_stops_at_divergent_metadata() {
        let mut odd = acquisition_row(1, 2.0);
        odd.push("id", 2i64);
        odd.push("lm_ratio", "different");
        let rows = vec![Ok(acquisition_row(1, 1.0)), Ok(odd)];
        let options = ExportOptions {
            limit: 10,
            verify_metadata: true,
        };
        let items: Vec<Result<Vec<u8>>> = export_csv(source(rows), options).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(&items[2], Err(Error::DataShape { field, .. }) if field == "lm_ratio"));
    }

    #[tokio::test]
    async fn storage_failure_mid_stream_truncates() {
        let rows = vec![
            Ok(acquisition_row(1, 1.0)),
            Err(StorageError::Query("connection reset".into())),
        ];
        let items: Vec<Result<Vec<u8>>> = export_csv(source(rows), ExportOptions::new(10))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Err(Error::Storage(_))));
    }

    #[test]
    fn attachment_names() {
        assert_eq!(
            attachment_name("AO001", "temporal", &[], None, None),
            "AO001_temporal_all_cones.csv"
        );
        assert_eq!(
            attachment_name("AO001", "nasal", &["L".into(), "M".into()], Some(1.3), None),
            "AO001_nasal_L_M_ecc1.3-inf_cones.csv"
        );
        assert_eq!(
            attachment_name("AO002", "superior", &["S".into()], None, Some(4.0)),
            "AO002_superior_S_ecc0-4.0_cones.csv"
        );
    }

    #[test]
    fn fields_are_quoted_when_needed() {
        let line = encode_line(["a,b", "plain", ""]).unwrap();
        assert_eq!(line, b"\"a,b\",plain,\n");
    }
}
