//! Loading of input tables from CSV, NDJSON, or JSON arrays
//!
//! Rows are checked for required columns first, then deserialized into row
//! types and converted into validated domain values.

use crate::error::AnalysisError;
use crate::schema::tables::*;
use crate::types::{Entity, Event, GeoUnit, ZipMapping};
use chrono::FixedOffset;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Supported on-disk table encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// Comma-separated with a header row
    Csv,
    /// Newline-delimited JSON objects
    Ndjson,
    /// A single JSON array of objects
    Json,
}

impl TableFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(TableFormat::Csv),
            "ndjson" | "jsonl" => Ok(TableFormat::Ndjson),
            "json" => Ok(TableFormat::Json),
            _ => Err(AnalysisError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// The four raw input tables after validation
#[derive(Debug, Clone, Default)]
pub struct InputTables {
    pub geo_units: Vec<GeoUnit>,
    pub zip_mappings: Vec<ZipMapping>,
    /// Entities with unresolved segments
    pub entities: Vec<Entity>,
    pub events: Vec<Event>,
}

/// File locations of the four input tables
#[derive(Debug, Clone)]
pub struct InputPaths<'a> {
    pub geo_units: &'a Path,
    pub zip_mappings: &'a Path,
    pub entities: &'a Path,
    pub events: &'a Path,
}

/// Loader for the pipeline's input tables
pub struct TableLoader {
    offset: FixedOffset,
}

impl TableLoader {
    /// Create a loader that interprets timestamps in the given local offset
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Load and validate all four tables
    pub fn load_all(&self, paths: &InputPaths<'_>) -> Result<InputTables, AnalysisError> {
        let tables = InputTables {
            geo_units: self.load_geo_units(paths.geo_units)?,
            zip_mappings: self.load_zip_mappings(paths.zip_mappings)?,
            entities: self.load_entities(paths.entities)?,
            events: self.load_events(paths.events)?,
        };

        log::info!(
            "Loaded {} regions, {} zip mappings, {} entities, {} events",
            tables.geo_units.len(),
            tables.zip_mappings.len(),
            tables.entities.len(),
            tables.events.len()
        );

        Ok(tables)
    }

    pub fn load_geo_units(&self, path: &Path) -> Result<Vec<GeoUnit>, AnalysisError> {
        let rows: Vec<GeoUnitRow> = read_table(Table::GeoUnits, path)?;
        Ok(Self::convert(rows, |row, n| row.into_geo_unit(n))?)
    }

    pub fn load_zip_mappings(&self, path: &Path) -> Result<Vec<ZipMapping>, AnalysisError> {
        let rows: Vec<ZipMappingRow> = read_table(Table::ZipMappings, path)?;
        Ok(Self::convert(rows, |row, n| row.into_mapping(n))?)
    }

    pub fn load_entities(&self, path: &Path) -> Result<Vec<Entity>, AnalysisError> {
        let rows: Vec<EntityRow> = read_table(Table::Entities, path)?;
        Ok(Self::convert(rows, |row, n| row.into_entity(n, self.offset))?)
    }

    pub fn load_events(&self, path: &Path) -> Result<Vec<Event>, AnalysisError> {
        let rows: Vec<EventRow> = read_table(Table::Events, path)?;
        Ok(Self::convert(rows, |row, n| row.into_event(n, self.offset))?)
    }

    /// Convert rows in order, numbering them from 1
    pub fn convert<R, T>(
        rows: Vec<R>,
        mut f: impl FnMut(R, usize) -> Result<T, SchemaViolation>,
    ) -> Result<Vec<T>, SchemaViolation> {
        rows.into_iter()
            .enumerate()
            .map(|(idx, row)| f(row, idx + 1))
            .collect()
    }
}

/// Read one table file in the format implied by its extension
pub fn read_table<R: DeserializeOwned>(table: Table, path: &Path) -> Result<Vec<R>, AnalysisError> {
    let format = TableFormat::from_path(path)?;
    let io_err = |source: std::io::Error| AnalysisError::Io {
        path: path.display().to_string(),
        source,
    };

    log::debug!("Reading {} from {}", table.as_str(), path.display());

    match format {
        TableFormat::Csv => {
            let file = fs::File::open(path).map_err(io_err)?;
            parse_csv(table, file)
        }
        TableFormat::Ndjson => parse_ndjson(table, &fs::read_to_string(path).map_err(io_err)?),
        TableFormat::Json => parse_array(table, &fs::read_to_string(path).map_err(io_err)?),
    }
}

/// Parse CSV with a header row
pub fn parse_csv<R: DeserializeOwned>(table: Table, reader: impl Read) -> Result<Vec<R>, AnalysisError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in table.required_columns() {
        if !headers.iter().any(|h| h == *column) {
            return Err(missing_column(table, column));
        }
    }

    let mut rows = Vec::new();
    for (idx, result) in csv_reader.deserialize::<R>().enumerate() {
        let row = result.map_err(|e| SchemaViolation::invalid(table, idx + 1, e.to_string()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Parse newline-delimited JSON objects, skipping blank lines
pub fn parse_ndjson<R: DeserializeOwned>(table: Table, ndjson: &str) -> Result<Vec<R>, AnalysisError> {
    let mut rows = Vec::new();
    for line in ndjson.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
            SchemaViolation::invalid(table, rows.len() + 1, format!("malformed JSON: {e}"))
        })?;
        rows.push(object_to_row(table, rows.len() + 1, value)?);
    }
    Ok(rows)
}

/// Parse a JSON array of objects
pub fn parse_array<R: DeserializeOwned>(table: Table, json: &str) -> Result<Vec<R>, AnalysisError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    values
        .into_iter()
        .enumerate()
        .map(|(idx, value)| object_to_row(table, idx + 1, value))
        .collect()
}

fn object_to_row<R: DeserializeOwned>(
    table: Table,
    row: usize,
    value: serde_json::Value,
) -> Result<R, AnalysisError> {
    let Some(object) = value.as_object() else {
        return Err(SchemaViolation::invalid(table, row, "expected a JSON object").into());
    };
    for column in table.required_columns() {
        if !object.contains_key(*column) {
            return Err(missing_column(table, column));
        }
    }
    serde_json::from_value(value).map_err(|e| SchemaViolation::invalid(table, row, e.to_string()).into())
}

fn missing_column(table: Table, column: &str) -> AnalysisError {
    SchemaViolation::MissingColumn {
        table: table.as_str().to_string(),
        column: column.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::far_future;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_parse_csv_geo_units() {
        let csv = "region_id,lean\n1001,0.73\n06075,0.09\n";
        let rows: Vec<GeoUnitRow> = parse_csv(Table::GeoUnits, csv.as_bytes()).unwrap();
        let units = TableLoader::convert(rows, |r, n| r.into_geo_unit(n)).unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].region_id, "01001");
        assert_eq!(units[1].region_id, "06075");
        assert!((units[0].lean - 0.73).abs() < 1e-12);
    }

    #[test]
    fn test_parse_csv_missing_column() {
        let csv = "region_id,vote_share\n1001,0.73\n";
        let err = parse_csv::<GeoUnitRow>(Table::GeoUnits, csv.as_bytes()).unwrap_err();
        match err {
            AnalysisError::Schema(SchemaViolation::MissingColumn { column, .. }) => {
                assert_eq!(column, "lean")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_csv_unparseable_value_is_violation() {
        let csv = "entity_id,from_state,to_state,occurred_at\nu1,abc,0.5,2016-11-08 10:00:00\n";
        let err = parse_csv::<EventRow>(Table::Events, csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Schema(SchemaViolation::InvalidValue { row: 1, .. })
        ));
    }

    #[test]
    fn test_parse_csv_entities_with_empty_deactivation() {
        let csv = "entity_id,zip,activated_at,deactivated_at\n\
                   u1,02134,2016-10-01 09:00:00,\n\
                   u2,10001,2016-09-01,2016-11-20 12:00:00\n";
        let rows: Vec<EntityRow> = parse_csv(Table::Entities, csv.as_bytes()).unwrap();
        let entities = TableLoader::convert(rows, |r, n| r.into_entity(n, utc())).unwrap();

        assert_eq!(entities[0].active_until, far_future());
        assert_eq!(entities[1].active_until.to_string(), "2016-11-20");
    }

    #[test]
    fn test_csv_entity_ids_are_kept_verbatim() {
        let csv = "entity_id,zip,activated_at,deactivated_at\n\
                   00123,02134,2016-10-01,\n\
                   0123,02134,2016-10-01,\n\
                   123,02134,2016-10-01,\n\
                   123456789012345678901234,02134,2016-10-01,\n";
        let rows: Vec<EntityRow> = parse_csv(Table::Entities, csv.as_bytes()).unwrap();
        let entities = TableLoader::convert(rows, |r, n| r.into_entity(n, utc())).unwrap();
        let ids: Vec<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();

        assert_eq!(ids, ["00123", "0123", "123", "123456789012345678901234"]);
    }

    #[test]
    fn test_parse_ndjson_events() {
        let ndjson = r#"
{"entity_id": "u1", "from_state": 0.9, "to_state": 0.6, "occurred_at": "2016-11-09T02:00:00Z"}

{"entity_id": "0042", "from_state": 0.5, "to_state": 0.5, "occurred_at": "2016-11-09 03:00:00"}
"#;
        let rows: Vec<EventRow> = parse_ndjson(Table::Events, ndjson).unwrap();
        let events = TableLoader::convert(rows, |r, n| r.into_event(n, utc())).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].entity_id, "0042");
        assert!((events[0].delta() + 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_parse_ndjson_missing_field() {
        let ndjson = r#"{"zip": "02134"}"#;
        let err = parse_ndjson::<ZipMappingRow>(Table::ZipMappings, ndjson).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Schema(SchemaViolation::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[{"zip": "2134", "region_id": "25025"}, {"zip": 2134, "region_id": 25017}]"#;
        let rows: Vec<ZipMappingRow> = parse_array(Table::ZipMappings, json).unwrap();
        let mappings = TableLoader::convert(rows, |r, n| r.into_mapping(n)).unwrap();
        assert_eq!(mappings[0].zip, "02134");
        assert_eq!(mappings[1].zip, "02134");
        assert_eq!(mappings[1].region_id, "25017");
    }

    #[test]
    fn test_table_format_from_path() {
        assert_eq!(
            TableFormat::from_path(Path::new("data/events.CSV")).unwrap(),
            TableFormat::Csv
        );
        assert_eq!(
            TableFormat::from_path(Path::new("events.jsonl")).unwrap(),
            TableFormat::Ndjson
        );
        assert!(TableFormat::from_path(Path::new("events.parquet")).is_err());
    }
}
