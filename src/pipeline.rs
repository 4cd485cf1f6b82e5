//! Pipeline orchestration
//!
//! This module provides the public API for Allocation Flux. It runs the
//! stages in order over in-memory tables:
//!
//! 1. ZipLeanTable - Resolve zip leans and segment the entity snapshot
//! 2. TimeWindow - Drop events outside the analysis window
//! 3. Bucketizer + CohortSizer - Per-capita rates per (bucket, cohort)
//! 4. BaselineStore + Normalizer - Attach seasonal baselines
//! 5. DirectionAggregator - Raw deltas and their distribution near the pivot

use crate::baseline::BaselineStore;
use crate::cohort::CohortSizer;
use crate::config::AnalysisConfig;
use crate::direction::DirectionAggregator;
use crate::error::AnalysisError;
use crate::geography::ZipLeanTable;
use crate::normalizer::Normalizer;
use crate::schema::{InputPaths, InputTables, TableLoader};
use crate::types::{AnalysisOutput, CoverageReport};

/// Run the full analysis over loaded tables.
///
/// # Example
/// ```ignore
/// let config = AnalysisConfig::from_path(Path::new("analysis.json"))?;
/// let output = analyze(tables, &config)?;
/// ```
pub fn analyze(tables: InputTables, config: &AnalysisConfig) -> Result<AnalysisOutput, AnalysisError> {
    AnalysisPipeline::new(config.clone())?.run(tables)
}

/// Load the four tables from disk and run the full analysis
pub fn analyze_files(
    paths: &InputPaths<'_>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalysisError> {
    let pipeline = AnalysisPipeline::new(config.clone())?;
    let tables = pipeline.load(paths)?;
    pipeline.run(tables)
}

/// A validated configuration ready to run.
///
/// Holds no state between runs; the same pipeline can be run over any
/// number of table sets.
pub struct AnalysisPipeline {
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    /// Validate the configuration
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Loader interpreting timestamps in the configured offset
    pub fn loader(&self) -> Result<TableLoader, AnalysisError> {
        Ok(TableLoader::new(self.config.offset()?))
    }

    pub fn load(&self, paths: &InputPaths<'_>) -> Result<InputTables, AnalysisError> {
        self.loader()?.load_all(paths)
    }

    /// Run every stage and assemble the output tables
    pub fn run(&self, tables: InputTables) -> Result<AnalysisOutput, AnalysisError> {
        let config = &self.config;
        let InputTables {
            geo_units,
            zip_mappings,
            entities,
            events,
        } = tables;

        // Stage 1: resolve geography
        let zip_leans = ZipLeanTable::resolve(&geo_units, &zip_mappings)?;
        let entities = zip_leans.annotate(entities, &config.comparison_scheme);

        // Stage 2: window filter
        let window = config.window();
        let (events, events_outside_window) = window.filter_events(&events);
        if events_outside_window > 0 {
            log::debug!(
                "Dropped {events_outside_window} events outside [{}, {})",
                window.start,
                window.end
            );
        }

        // Stage 3: bucket and size
        let sizer = CohortSizer::new(&entities);
        let bucketizer = config.bucketizer();
        let rates = bucketizer.rates(&events, &entities, &sizer);
        let undefined_rates = rates.records.iter().filter(|r| r.rate.is_none()).count();
        let rate_records = rates.records.len();

        // Stage 4: baselines
        let pivot_date = config.pivot_date();
        let store = BaselineStore::from_history(&rates.records, pivot_date);
        let records = Normalizer::normalize(rates.records, &store, pivot_date);
        let missing_baselines = records.iter().filter(|r| r.baseline_rate.is_none()).count();
        if missing_baselines > 0 {
            log::warn!("{missing_baselines} records have no pre-pivot baseline");
        }

        // Stage 5: direction around the pivot
        let direction = DirectionAggregator::new(bucketizer, config.delta_half_width())
            .aggregate(&events, &entities, config.pivot);

        let coverage = CoverageReport {
            entities_total: entities.len() as u64,
            entities_without_segment: entities.iter().filter(|e| e.segment.is_none()).count() as u64,
            zips_in_mapping: zip_leans.zips_in_mapping() as u64,
            zips_without_lean: zip_leans.zips_without_lean() as u64,
            events_total: events.len() as u64 + events_outside_window,
            events_outside_window,
            events_unknown_entity: rates.unknown_entity_events,
            rate_records: rate_records as u64,
            undefined_rates: undefined_rates as u64,
            missing_baselines: missing_baselines as u64,
        };

        log::info!(
            "Analysis complete: {} records, {} baselines, {} deltas",
            records.len(),
            store.len(),
            direction.deltas.len()
        );

        Ok(AnalysisOutput {
            records,
            baselines: store.records(),
            deltas: direction.deltas,
            distribution: direction.distribution,
            coverage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{OutputEncoder, OutputFormat};
    use crate::schema::{parse_csv, EntityRow, EventRow, Table};
    use crate::types::{far_future, Cohort, Entity, Event, GeoUnit, Period, ZipMapping};
    use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
    use pretty_assertions::assert_eq;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn event(entity_id: &str, at: &str) -> Event {
        Event {
            entity_id: entity_id.to_string(),
            from_state: 0.8,
            to_state: 0.6,
            occurred_at: ts(at),
        }
    }

    fn sample_tables() -> InputTables {
        let geo_units = vec![
            GeoUnit {
                region_id: "00001".to_string(),
                lean: 0.2,
            },
            GeoUnit {
                region_id: "00002".to_string(),
                lean: 0.8,
            },
        ];
        let zip_mappings = vec![
            ZipMapping {
                zip: "10001".to_string(),
                region_id: "00001".to_string(),
            },
            ZipMapping {
                zip: "10002".to_string(),
                region_id: "00002".to_string(),
            },
            ZipMapping {
                zip: "10004".to_string(),
                region_id: "99999".to_string(),
            },
        ];
        let entities = (0..100)
            .map(|i| Entity {
                entity_id: format!("e{i:03}"),
                zip: "10001".to_string(),
                active_from: NaiveDate::from_ymd_opt(2016, 10, 1).unwrap(),
                active_until: far_future(),
                segment: None,
            })
            .collect();
        let events = vec![
            // Wednesday before the pivot
            event("e005", "2016-11-02 02:10"),
            // Wednesday after the pivot
            event("e000", "2016-11-09 02:01"),
            event("e001", "2016-11-09 02:12"),
            event("e002", "2016-11-09 02:23"),
            event("e003", "2016-11-09 02:34"),
            event("e004", "2016-11-09 02:45"),
            event("ghost", "2016-11-10 05:00"),
            event("e006", "2016-12-05 12:00"),
        ];

        InputTables {
            geo_units,
            zip_mappings,
            entities,
            events,
        }
    }

    #[test]
    fn test_end_to_end_rates_and_baselines() {
        let output = analyze(sample_tables(), &AnalysisConfig::default()).unwrap();

        assert_eq!(output.records.len(), 5);

        let post = &output.records[2];
        assert_eq!(post.bucket_start, ts("2016-11-09 02:00"));
        assert_eq!(post.cohort, Cohort::All);
        assert_eq!(post.period, Period::PostEvent);
        assert_eq!(post.event_count, 5);
        assert_eq!(post.active_population, 100);
        assert_eq!(post.rate, Some(0.05));
        assert_eq!(post.baseline_rate, Some(0.01));
        assert!((post.relative_rate.unwrap() - 5.0).abs() < 1e-9);

        let segment = &output.records[3];
        assert_eq!(segment.cohort.label(), "low");
        assert_eq!(segment.rate, Some(0.05));

        let ghost = &output.records[4];
        assert_eq!(ghost.cohort, Cohort::All);
        assert_eq!(ghost.baseline_rate, None);

        // (all, low) on Wednesday 02:00
        assert_eq!(output.baselines.len(), 2);
    }

    #[test]
    fn test_coverage_counts() {
        let output = analyze(sample_tables(), &AnalysisConfig::default()).unwrap();

        assert_eq!(
            output.coverage,
            CoverageReport {
                entities_total: 100,
                entities_without_segment: 0,
                zips_in_mapping: 3,
                zips_without_lean: 1,
                events_total: 8,
                events_outside_window: 1,
                events_unknown_entity: 1,
                rate_records: 5,
                undefined_rates: 0,
                missing_baselines: 1,
            }
        );
    }

    #[test]
    fn test_direction_tables() {
        let output = analyze(sample_tables(), &AnalysisConfig::default()).unwrap();

        assert_eq!(output.deltas.len(), 7);
        assert_eq!(output.deltas[0].entity_id, "e005");
        assert_eq!(output.deltas[6].entity_id, "ghost");
        assert_eq!(output.deltas[6].segment, None);
        assert_eq!(output.distribution.len(), 5);
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let encoder = OutputEncoder::new(OutputFormat::Json);
        let config = AnalysisConfig::default();

        let first = encoder.encode(&analyze(sample_tables(), &config).unwrap()).unwrap();
        let second = encoder.encode(&analyze(sample_tables(), &config).unwrap()).unwrap();
        assert_eq!(first, second);

        let mut reversed = sample_tables();
        reversed.events.reverse();
        reversed.entities.reverse();
        let third = encoder.encode(&analyze(reversed, &config).unwrap()).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_denominator_alignment_with_utc_offset() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let entities_csv = "entity_id,zip,activated_at,deactivated_at\n\
                            u1,10001,2016-11-08T03:00:00Z,\n";
        let events_csv = "entity_id,from_state,to_state,occurred_at\n\
                          u1,0.9,0.5,2016-11-08T04:30:00Z\n\
                          u1,0.5,0.4,2016-11-08T05:30:00Z\n";

        let entity_rows: Vec<EntityRow> = parse_csv(Table::Entities, entities_csv.as_bytes()).unwrap();
        let event_rows: Vec<EventRow> = parse_csv(Table::Events, events_csv.as_bytes()).unwrap();
        let mut tables = sample_tables();
        tables.entities = TableLoader::convert(entity_rows, |r, n| r.into_entity(n, offset)).unwrap();
        tables.events = TableLoader::convert(event_rows, |r, n| r.into_event(n, offset)).unwrap();

        let config = AnalysisConfig {
            utc_offset_minutes: -300,
            ..Default::default()
        };
        let output = analyze(tables, &config).unwrap();
        let all: Vec<_> = output
            .records
            .iter()
            .filter(|r| r.cohort == Cohort::All)
            .collect();

        // Activated 22:00 local on the 7th: not active on the 7th
        assert_eq!(all[0].bucket_start, ts("2016-11-07 23:00"));
        assert_eq!(all[0].active_population, 0);
        assert_eq!(all[0].rate, None);

        assert_eq!(all[1].bucket_start, ts("2016-11-08 00:00"));
        assert_eq!(all[1].active_population, 1);
        assert_eq!(all[1].rate, Some(1.0));
        assert_eq!(output.coverage.undefined_rates, 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = AnalysisConfig {
            bucket_minutes: 0,
            ..Default::default()
        };
        assert!(matches!(
            analyze(sample_tables(), &config),
            Err(AnalysisError::InvalidConfig(_))
        ));

        let config = AnalysisConfig {
            delta_half_width_hours: u32::MAX,
            ..Default::default()
        };
        assert!(matches!(
            analyze(sample_tables(), &config),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_window_edges_are_half_open() {
        let config = AnalysisConfig::default();
        let mut tables = sample_tables();
        // Exactly on window_start and exactly on window_end
        tables.events = vec![
            event("e000", "2016-10-01 00:00"),
            event("e001", "2016-11-22 00:00"),
        ];
        let output = analyze(tables, &config).unwrap();

        assert_eq!(output.coverage.events_total, 2);
        assert_eq!(output.coverage.events_outside_window, 1);
        assert_eq!(output.records[0].bucket_start, config.window_start);
        assert!(output.records.iter().all(|r| r.bucket_start < config.window_end));
    }

    #[test]
    fn test_duplicate_region_is_schema_violation() {
        let mut tables = sample_tables();
        tables.geo_units.push(GeoUnit {
            region_id: "00001".to_string(),
            lean: 0.4,
        });
        assert!(matches!(
            analyze(tables, &AnalysisConfig::default()),
            Err(AnalysisError::Schema(_))
        ));
    }

    #[test]
    fn test_analyze_files() {
        let dir = std::env::temp_dir().join(format!("allocation-flux-files-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            path
        };

        let geo = write("geo.csv", "region_id,lean\n1,0.2\n");
        let zips = write("zips.csv", "zip,region_id\n10001,1\n");
        let entities = write(
            "entities.ndjson",
            r#"{"entity_id": "u1", "zip": "10001", "activated_at": "2016-10-01", "deactivated_at": null}"#,
        );
        let events = write(
            "events.csv",
            "entity_id,from_state,to_state,occurred_at\nu1,0.6,0.3,2016-11-09 10:15:00\n",
        );

        let paths = InputPaths {
            geo_units: &geo,
            zip_mappings: &zips,
            entities: &entities,
            events: &events,
        };
        let output = analyze_files(&paths, &AnalysisConfig::default()).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[0].rate, Some(1.0));
        assert_eq!(output.records[1].cohort.label(), "low");
        assert_eq!(output.deltas.len(), 1);
    }

    #[test]
    fn test_csv_entities_join_ndjson_events() {
        let dir = std::env::temp_dir().join(format!("allocation-flux-ids-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            path
        };

        let geo = write("geo.csv", "region_id,lean\n1,0.2\n");
        let zips = write("zips.csv", "zip,region_id\n10001,1\n");
        let entities = write(
            "entities.csv",
            "entity_id,zip,activated_at,deactivated_at\n00123,10001,2016-10-01,\n123,10001,2016-10-01,\n",
        );
        let events = write(
            "events.ndjson",
            r#"{"entity_id": "00123", "from_state": 0.6, "to_state": 0.3, "occurred_at": "2016-11-09 10:15:00"}"#,
        );

        let paths = InputPaths {
            geo_units: &geo,
            zip_mappings: &zips,
            entities: &entities,
            events: &events,
        };
        let output = analyze_files(&paths, &AnalysisConfig::default()).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(output.coverage.entities_total, 2);
        assert_eq!(output.coverage.events_unknown_entity, 0);
        assert_eq!(output.deltas[0].entity_id, "00123");
        assert_eq!(output.deltas[0].segment.as_deref(), Some("low"));

        let low = &output.records[1];
        assert_eq!(low.cohort.label(), "low");
        assert_eq!(low.event_count, 1);
        assert_eq!(low.active_population, 2);
    }
}
