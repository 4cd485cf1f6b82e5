//! Baseline normalization
//!
//! Left-joins slot baselines onto every rate record, historical and
//! post-event alike. Records whose slot has no history keep a null baseline
//! rather than a zero.

use crate::baseline::{is_historical, BaselineStore};
use crate::types::{NormalizedRecord, Period, RateRecord};
use chrono::NaiveDate;

/// Normalizer attaching baselines to rate records
pub struct Normalizer;

impl Normalizer {
    /// Attach the baseline and relative rate to each record, keeping order
    pub fn normalize(
        records: Vec<RateRecord>,
        store: &BaselineStore,
        pivot_date: NaiveDate,
    ) -> Vec<NormalizedRecord> {
        records
            .into_iter()
            .map(|record| {
                let baseline_rate = store.baseline_for(&record);
                let period = if is_historical(record.bucket_start, pivot_date) {
                    Period::Historical
                } else {
                    Period::PostEvent
                };

                NormalizedRecord {
                    bucket_start: record.bucket_start,
                    weekday: record.weekday,
                    relative_rate: relative_rate(record.rate, baseline_rate),
                    time_of_day: record.time_of_day,
                    cohort: record.cohort,
                    period,
                    event_count: record.event_count,
                    active_population: record.active_population,
                    rate: record.rate,
                    baseline_rate,
                }
            })
            .collect()
    }
}

/// Ratio of an observed rate to its baseline
fn relative_rate(rate: Option<f64>, baseline: Option<f64>) -> Option<f64> {
    match (rate, baseline) {
        (Some(rate), Some(base)) if base > 0.0 => Some(rate / base),
        _ => None,
    }
}
