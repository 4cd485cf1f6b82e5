//! Seasonal baseline computation
//!
//! The baseline of a slot is the mean rate of all pre-pivot buckets sharing
//! its cohort, weekday, and time of day, so "Tuesday 14:00" is only compared
//! with earlier Tuesday 14:00 buckets. This is a per-slot mean, not a
//! rolling average.

use crate::types::{BaselineRecord, Cohort, RateRecord};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;

/// Key of a seasonal slot
pub type SlotKey = (Cohort, u8, String);

/// Whether a bucket belongs to the history before the pivot date.
///
/// History ends at midnight of the pivot's calendar date, not at the pivot
/// timestamp itself.
pub fn is_historical(bucket_start: NaiveDateTime, pivot_date: NaiveDate) -> bool {
    bucket_start < pivot_date.and_time(NaiveTime::MIN)
}

/// Slot means computed from historical rate records
#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    /// Running (sum, count) per slot
    slots: BTreeMap<SlotKey, (f64, u32)>,
}

impl BaselineStore {
    /// Accumulate every historical record with a defined rate
    pub fn from_history(records: &[RateRecord], pivot_date: NaiveDate) -> Self {
        let mut store = Self::default();
        for record in records {
            if is_historical(record.bucket_start, pivot_date) {
                store.observe(record);
            }
        }

        log::info!(
            "Baseline covers {} slots before {pivot_date}",
            store.slots.len()
        );
        store
    }

    /// Add one record to its slot; undefined rates are skipped
    pub fn observe(&mut self, record: &RateRecord) {
        let Some(rate) = record.rate else {
            return;
        };
        let key = (
            record.cohort.clone(),
            record.weekday,
            record.time_of_day.clone(),
        );
        let entry = self.slots.entry(key).or_insert((0.0, 0));
        entry.0 += rate;
        entry.1 += 1;
    }

    /// Mean rate of a slot, `None` when the slot has no history
    pub fn baseline(&self, cohort: &Cohort, weekday: u8, time_of_day: &str) -> Option<f64> {
        self.slots
            .get(&(cohort.clone(), weekday, time_of_day.to_string()))
            .map(|(sum, count)| sum / *count as f64)
    }

    /// Baseline of the slot a record falls into
    pub fn baseline_for(&self, record: &RateRecord) -> Option<f64> {
        self.baseline(&record.cohort, record.weekday, &record.time_of_day)
    }

    /// All slots in (cohort, weekday, time of day) order
    pub fn records(&self) -> Vec<BaselineRecord> {
        self.slots
            .iter()
            .map(|((cohort, weekday, time_of_day), (sum, count))| BaselineRecord {
                cohort: cohort.clone(),
                weekday: *weekday,
                time_of_day: time_of_day.clone(),
                mean_rate: sum / *count as f64,
                sample_count: *count,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
