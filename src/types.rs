//! Core types for the Allocation Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: reference tables, the resolved entity table, bucketed rates,
//! baselines, and the final normalized output.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;

/// Deactivation date assigned to entities that were never deactivated
pub fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// County-equivalent region carrying a lean value in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoUnit {
    pub region_id: String,
    pub lean: f64,
}

/// One row of the many-to-many zip to region crosswalk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipMapping {
    pub zip: String,
    pub region_id: String,
}

/// Lean of a zip code, aggregated over its matched regions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipLean {
    pub zip: String,
    /// Number of matched region rows
    pub sample_count: u32,
    /// Arithmetic mean of matched region leans (0-1)
    pub mean_lean: f64,
}

/// Ordered categorical bucket of lean
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Segment {
    /// Position in the scheme, 0 = lowest lean
    pub rank: u8,
    pub label: String,
}

/// A user-equivalent whose activity window drives population denominators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub entity_id: String,
    pub zip: String,
    /// Activation date
    pub active_from: NaiveDate,
    /// Deactivation date, `far_future()` when never deactivated
    pub active_until: NaiveDate,
    /// Comparison segment, `None` when the zip has no resolvable lean
    pub segment: Option<Segment>,
}

/// A single allocation change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub entity_id: String,
    pub from_state: f64,
    pub to_state: f64,
    pub occurred_at: NaiveDateTime,
}

impl Event {
    /// Signed size of the change
    pub fn delta(&self) -> f64 {
        self.to_state - self.from_state
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Keep only events inside the window; returns the kept events and the
    /// number dropped
    pub fn filter_events(&self, events: &[Event]) -> (Vec<Event>, u64) {
        let kept: Vec<Event> = events
            .iter()
            .filter(|e| self.contains(e.occurred_at))
            .cloned()
            .collect();
        let dropped = (events.len() - kept.len()) as u64;
        (kept, dropped)
    }
}

/// Grouping of a rate: the whole population or one named segment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cohort {
    All,
    Segment(Segment),
}

impl Cohort {
    pub const ALL_LABEL: &'static str = "all";

    pub fn label(&self) -> &str {
        match self {
            Cohort::All => Self::ALL_LABEL,
            Cohort::Segment(segment) => segment.label.as_str(),
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Cohort {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Fixed-width time interval identified by its rounded-down start
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    pub start: NaiveDateTime,
}

impl Bucket {
    /// ISO weekday, Monday = 1 through Sunday = 7
    pub fn weekday(&self) -> u8 {
        self.start.weekday().number_from_monday() as u8
    }

    /// "HH:MM" of the bucket start, used only as a grouping key
    pub fn time_of_day(&self) -> String {
        format!("{:02}:{:02}", self.start.hour(), self.start.minute())
    }

    /// Calendar date used for the population denominator
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

/// Per-capita event rate for one bucket and cohort
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRecord {
    pub bucket_start: NaiveDateTime,
    pub weekday: u8,
    pub time_of_day: String,
    pub cohort: Cohort,
    pub event_count: u64,
    pub active_population: u64,
    /// `None` when the active population is zero
    pub rate: Option<f64>,
}

/// Pre-pivot mean rate for a (cohort, weekday, time-of-day) slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineRecord {
    pub cohort: Cohort,
    pub weekday: u8,
    pub time_of_day: String,
    pub mean_rate: f64,
    /// Number of historical buckets behind the mean
    pub sample_count: u32,
}

/// Which side of the pivot date a bucket falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Historical,
    PostEvent,
}

/// Rate record with its seasonal baseline attached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub bucket_start: NaiveDateTime,
    pub weekday: u8,
    pub time_of_day: String,
    pub cohort: Cohort,
    pub period: Period,
    pub event_count: u64,
    pub active_population: u64,
    pub rate: Option<f64>,
    /// `None` when the slot has no pre-pivot precedent
    pub baseline_rate: Option<f64>,
    /// rate / baseline_rate
    pub relative_rate: Option<f64>,
}

/// Raw signed change of a single event near the pivot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaRecord {
    pub occurred_at: NaiveDateTime,
    pub entity_id: String,
    pub segment: Option<String>,
    pub from_state: f64,
    pub to_state: f64,
    pub delta: f64,
}

/// Distribution of deltas within one bucket and cohort
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaSummary {
    pub bucket_start: NaiveDateTime,
    pub cohort: Cohort,
    pub count: u32,
    pub mean: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

/// Counters for every non-fatal data gap seen during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub entities_total: u64,
    /// Entities whose zip resolved to no lean
    pub entities_without_segment: u64,
    pub zips_in_mapping: u64,
    /// Zips present in the mapping whose regions all failed to match
    pub zips_without_lean: u64,
    pub events_total: u64,
    /// Events outside the analysis window
    pub events_outside_window: u64,
    /// Events whose entity is missing from the snapshot
    pub events_unknown_entity: u64,
    pub rate_records: u64,
    /// Rate records with zero active population
    pub undefined_rates: u64,
    /// Normalized records whose slot has no pre-pivot precedent
    pub missing_baselines: u64,
}

/// Everything a run produces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutput {
    pub records: Vec<NormalizedRecord>,
    pub baselines: Vec<BaselineRecord>,
    pub deltas: Vec<DeltaRecord>,
    pub distribution: Vec<DeltaSummary>,
    pub coverage: CoverageReport,
}
