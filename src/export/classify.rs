use crate::data::model::{is_metadata_field, Column, Row, METADATA_FIELDS};

/// Column split for one result set: per-point fields in storage order, then
/// the fixed metadata allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub point_fields: Vec<String>,
    pub metadata_fields: Vec<Column>,
}

impl FieldLayout {
    /// Classify on the first row's shape. Later rows are read through this
    /// layout even if they carry other fields.
    pub fn from_row(first: &Row) -> Self {
        Self {
            point_fields: first
                .keys()
                .filter(|k| !is_metadata_field(k))
                .map(str::to_string)
                .collect(),
            metadata_fields: METADATA_FIELDS.to_vec(),
        }
    }

    pub fn header(&self) -> Vec<&str> {
        self.point_fields
            .iter()
            .map(String::as_str)
            .chain(self.metadata_fields.iter().map(|c| c.name()))
            .collect()
    }

    /// First metadata column the row does not carry, if any.
    pub fn missing_metadata(&self, row: &Row) -> Option<Column> {
        self.metadata_fields
            .iter()
            .copied()
            .find(|c| !row.contains(c.name()))
    }

    pub fn width(&self) -> usize {
        self.point_fields.len() + self.metadata_fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_point_and_metadata_fields() {
        let row = Row::new()
            .with("id", 1i64)
            .with("subject_id", "AO001")
            .with("cone_x_microns", 2.5)
            .with("fov", "1.5x1.5")
            .with("cone_spectral_type", "L");
        let layout = FieldLayout::from_row(&row);
        assert_eq!(layout.point_fields, ["id", "cone_x_microns", "cone_spectral_type"]);
        assert_eq!(layout.metadata_fields.len(), 19);
        assert_eq!(layout.header()[..4], ["id", "cone_x_microns", "cone_spectral_type", "subject_id"]);
        assert_eq!(layout.missing_metadata(&row), Some(Column::Age));
    }
}
