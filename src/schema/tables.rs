//! Input table definitions
//!
//! Each input table is described by a row type that mirrors its columns, plus
//! the conversion into the validated domain type. Values outside their
//! declared domain abort the run with a [`SchemaViolation`].

use crate::types::{far_future, Entity, Event, GeoUnit, ZipMapping};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Width of zip codes and county FIPS codes after normalization
pub const CODE_WIDTH: usize = 5;

/// The four input tables consumed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    GeoUnits,
    ZipMappings,
    Entities,
    Events,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::GeoUnits => "geo_units",
            Table::ZipMappings => "zip_mappings",
            Table::Entities => "entities",
            Table::Events => "events",
        }
    }

    /// Columns that must be present in the header (or in every NDJSON object)
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Table::GeoUnits => &["region_id", "lean"],
            Table::ZipMappings => &["zip", "region_id"],
            Table::Entities => &["entity_id", "zip", "activated_at", "deactivated_at"],
            Table::Events => &["entity_id", "from_state", "to_state", "occurred_at"],
        }
    }

    pub fn all() -> [Table; 4] {
        [
            Table::GeoUnits,
            Table::ZipMappings,
            Table::Entities,
            Table::Events,
        ]
    }
}

/// Fatal input problems
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("{table}: missing required column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("{table} row {row}: `{column}` = {value} is outside [0, 1]")]
    OutOfDomain {
        table: String,
        row: usize,
        column: String,
        value: f64,
    },

    #[error("{table} row {row}: {message}")]
    InvalidValue {
        table: String,
        row: usize,
        message: String,
    },
}

impl SchemaViolation {
    pub fn invalid(table: Table, row: usize, message: impl Into<String>) -> Self {
        SchemaViolation::InvalidValue {
            table: table.as_str().to_string(),
            row,
            message: message.into(),
        }
    }
}

/// Row of the region reference table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoUnitRow {
    #[serde(deserialize_with = "deserialize_code")]
    pub region_id: String,
    pub lean: f64,
}

impl GeoUnitRow {
    /// Validate the row; `row` is 1-based for error messages
    pub fn into_geo_unit(self, row: usize) -> Result<GeoUnit, SchemaViolation> {
        let lean = check_unit_interval(Table::GeoUnits, row, "lean", self.lean)?;
        Ok(GeoUnit {
            region_id: normalize_code(&self.region_id),
            lean,
        })
    }
}

/// Row of the zip to region crosswalk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZipMappingRow {
    #[serde(deserialize_with = "deserialize_code")]
    pub zip: String,
    #[serde(deserialize_with = "deserialize_code")]
    pub region_id: String,
}

impl ZipMappingRow {
    pub fn into_mapping(self, row: usize) -> Result<ZipMapping, SchemaViolation> {
        let zip = normalize_code(&self.zip);
        if zip.is_empty() {
            return Err(SchemaViolation::invalid(Table::ZipMappings, row, "empty zip"));
        }
        Ok(ZipMapping {
            zip,
            region_id: normalize_code(&self.region_id),
        })
    }
}

/// Row of the entity snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    /// Opaque identifier, kept verbatim apart from surrounding whitespace
    pub entity_id: String,
    #[serde(deserialize_with = "deserialize_code")]
    pub zip: String,
    pub activated_at: String,
    #[serde(default)]
    pub deactivated_at: Option<String>,
}

impl EntityRow {
    /// Convert timestamps to local dates; the segment is resolved later
    pub fn into_entity(self, row: usize, offset: FixedOffset) -> Result<Entity, SchemaViolation> {
        let active_from = parse_timestamp(&self.activated_at, offset)
            .map_err(|e| SchemaViolation::invalid(Table::Entities, row, e))?
            .date();

        let active_until = match self.deactivated_at.as_deref().map(str::trim) {
            None => far_future(),
            Some(raw) if is_null_literal(raw) => far_future(),
            Some(raw) => parse_timestamp(raw, offset)
                .map_err(|e| SchemaViolation::invalid(Table::Entities, row, e))?
                .date(),
        };

        Ok(Entity {
            entity_id: self.entity_id.trim().to_string(),
            zip: normalize_code(&self.zip),
            active_from,
            active_until,
            segment: None,
        })
    }
}

/// Row of the allocation change table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    /// Opaque identifier, kept verbatim apart from surrounding whitespace
    pub entity_id: String,
    pub from_state: f64,
    pub to_state: f64,
    pub occurred_at: String,
}

impl EventRow {
    pub fn into_event(self, row: usize, offset: FixedOffset) -> Result<Event, SchemaViolation> {
        let from_state = check_unit_interval(Table::Events, row, "from_state", self.from_state)?;
        let to_state = check_unit_interval(Table::Events, row, "to_state", self.to_state)?;
        let occurred_at = parse_timestamp(&self.occurred_at, offset)
            .map_err(|e| SchemaViolation::invalid(Table::Events, row, e))?;

        Ok(Event {
            entity_id: self.entity_id.trim().to_string(),
            from_state,
            to_state,
            occurred_at,
        })
    }
}

fn check_unit_interval(
    table: Table,
    row: usize,
    column: &str,
    value: f64,
) -> Result<f64, SchemaViolation> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(SchemaViolation::OutOfDomain {
            table: table.as_str().to_string(),
            row,
            column: column.to_string(),
            value,
        })
    }
}

fn is_null_literal(raw: &str) -> bool {
    raw.is_empty()
        || raw.eq_ignore_ascii_case("null")
        || raw.eq_ignore_ascii_case("none")
        || raw.eq_ignore_ascii_case("nat")
}

/// Normalize a zip or FIPS code.
///
/// Numeric codes lose leading zeros when they pass through spreadsheets or
/// float columns ("1001", "1001.0"); these are restored to 5 digits.
/// Anything else is only trimmed.
pub fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if !digits.is_empty() && digits.len() < CODE_WIDTH && digits.bytes().all(|b| b.is_ascii_digit())
    {
        format!("{digits:0>width$}", width = CODE_WIDTH)
    } else if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a timestamp into the analysis-local wall clock.
///
/// Timestamps carrying an offset (RFC 3339) are shifted into `offset`; naive
/// timestamps and bare dates are taken as already local.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&offset).naive_local());
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("unrecognized timestamp {raw:?}"))
}

/// Accept identifiers written either as strings or as bare integers
fn deserialize_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Integer(u64),
        Float(f64),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Text(s) => s,
        Code::Integer(n) => n.to_string(),
        Code::Float(f) => format!("{f}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_normalize_code_restores_leading_zeros() {
        assert_eq!(normalize_code("1001"), "01001");
        assert_eq!(normalize_code("501.0"), "00501");
        assert_eq!(normalize_code(" 94110 "), "94110");
        assert_eq!(normalize_code("user-17"), "user-17");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let naive = parse_timestamp("2016-11-08 14:35:10", utc()).unwrap();
        assert_eq!(naive.hour(), 14);

        let t_sep = parse_timestamp("2016-11-08T14:35:10.250", utc()).unwrap();
        assert_eq!(t_sep.minute(), 35);

        let date_only = parse_timestamp("2016-11-08", utc()).unwrap();
        assert_eq!(date_only.hour(), 0);

        assert!(parse_timestamp("Nov 8 2016", utc()).is_err());
    }

    #[test]
    fn test_parse_timestamp_shifts_rfc3339_into_local_offset() {
        let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
        let local = parse_timestamp("2016-11-09T03:30:00Z", eastern).unwrap();
        assert_eq!(local.to_string(), "2016-11-08 22:30:00");
    }

    #[test]
    fn test_geo_unit_lean_out_of_range_is_violation() {
        let row = GeoUnitRow {
            region_id: "1001".to_string(),
            lean: 1.2,
        };
        let err = row.into_geo_unit(3).unwrap_err();
        assert!(matches!(
            err,
            SchemaViolation::OutOfDomain { row: 3, ref column, .. } if column == "lean"
        ));
    }

    #[test]
    fn test_event_state_nan_is_violation() {
        let row = EventRow {
            entity_id: "u1".to_string(),
            from_state: f64::NAN,
            to_state: 0.5,
            occurred_at: "2016-11-08 10:00:00".to_string(),
        };
        assert!(row.into_event(1, utc()).is_err());
    }

    #[test]
    fn test_event_bad_timestamp_is_invalid_value() {
        let row = EventRow {
            entity_id: "u1".to_string(),
            from_state: 0.2,
            to_state: 0.5,
            occurred_at: "Nov 8 2016".to_string(),
        };
        let err = row.into_event(4, utc()).unwrap_err();
        assert!(matches!(
            err,
            SchemaViolation::InvalidValue { row: 4, ref table, .. } if table == "events"
        ));
    }

    #[test]
    fn test_entity_without_deactivation_gets_sentinel() {
        let row = EntityRow {
            entity_id: "u1".to_string(),
            zip: "2134".to_string(),
            activated_at: "2016-10-01 09:15:00".to_string(),
            deactivated_at: Some(String::new()),
        };
        let entity = row.into_entity(1, utc()).unwrap();
        assert_eq!(entity.zip, "02134");
        assert_eq!(entity.active_from, NaiveDate::from_ymd_opt(2016, 10, 1).unwrap());
        assert_eq!(entity.active_until, far_future());
        assert!(entity.segment.is_none());
    }

    #[test]
    fn test_entity_dates_follow_local_offset() {
        // 03:00 UTC on the 2nd is still the 1st in UTC-5
        let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
        let row = EntityRow {
            entity_id: "u1".to_string(),
            zip: "10001".to_string(),
            activated_at: "2016-10-02T03:00:00Z".to_string(),
            deactivated_at: None,
        };
        let entity = row.into_entity(1, eastern).unwrap();
        assert_eq!(entity.active_from, NaiveDate::from_ymd_opt(2016, 10, 1).unwrap());
    }
}
