//! Event bucketing and per-capita rates
//!
//! Events are floored to fixed-width buckets aligned to local midnight and
//! counted per bucket, both for the whole population and per segment. Each
//! count is divided by the active population on the bucket's calendar date.
//!
//! Bucket dates and entity activation dates both come from the same local
//! wall clock (see `schema::parse_timestamp`), so a bucket starting at 00:00
//! on the 8th is sized with the population of the 8th.

use crate::cohort::CohortSizer;
use crate::types::{Bucket, Cohort, Entity, Event, RateRecord, Segment};
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use std::collections::{BTreeMap, HashMap};

/// Default bucket width in minutes
pub const DEFAULT_BUCKET_MINUTES: u32 = 60;

/// Largest supported bucket width (one day)
pub const MAX_BUCKET_MINUTES: u32 = 24 * 60;

/// Floors timestamps into buckets and turns counts into rates
#[derive(Debug, Clone, Copy)]
pub struct Bucketizer {
    width_secs: u32,
}

impl Default for Bucketizer {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_MINUTES)
    }
}

impl Bucketizer {
    /// Create a bucketizer; the width is clamped to 1..=1440 minutes
    pub fn new(width_minutes: u32) -> Self {
        Self {
            width_secs: width_minutes.clamp(1, MAX_BUCKET_MINUTES) * 60,
        }
    }

    pub fn width(&self) -> Duration {
        Duration::seconds(self.width_secs as i64)
    }

    /// Round a timestamp down to the start of its bucket
    pub fn bucket(&self, ts: NaiveDateTime) -> Bucket {
        let since_midnight = ts.time().num_seconds_from_midnight();
        let floored = since_midnight - since_midnight % self.width_secs;
        let start = ts.date().and_time(NaiveTime::MIN) + Duration::seconds(floored as i64);
        Bucket { start }
    }

    /// Count events per (bucket, cohort)
    ///
    /// Every event counts toward [`Cohort::All`]; events whose entity has a
    /// segment also count toward that segment.
    pub fn count(&self, events: &[Event], entities: &[Entity]) -> BucketCounts {
        let segments: HashMap<&str, Option<&Segment>> = entities
            .iter()
            .map(|e| (e.entity_id.as_str(), e.segment.as_ref()))
            .collect();

        let mut counts: BTreeMap<(Bucket, Cohort), u64> = BTreeMap::new();
        let mut unknown_entity_events = 0u64;

        for event in events {
            let bucket = self.bucket(event.occurred_at);
            *counts.entry((bucket, Cohort::All)).or_insert(0) += 1;

            match segments.get(event.entity_id.as_str()) {
                Some(Some(segment)) => {
                    *counts
                        .entry((bucket, Cohort::Segment((*segment).clone())))
                        .or_insert(0) += 1;
                }
                Some(None) => {}
                None => unknown_entity_events += 1,
            }
        }

        if unknown_entity_events > 0 {
            log::warn!("{unknown_entity_events} events reference entities missing from the snapshot");
        }

        BucketCounts {
            counts,
            unknown_entity_events,
        }
    }

    /// Bucket events and divide by the active population of each bucket's date
    pub fn rates(&self, events: &[Event], entities: &[Entity], sizer: &CohortSizer<'_>) -> BucketedRates {
        let BucketCounts {
            counts,
            unknown_entity_events,
        } = self.count(events, entities);

        let population = sizer.population_table(
            counts
                .keys()
                .map(|(bucket, cohort)| (bucket.date(), cohort.clone())),
        );

        let records: Vec<RateRecord> = counts
            .into_iter()
            .map(|((bucket, cohort), event_count)| {
                let active_population = population.get(bucket.date(), &cohort);
                RateRecord {
                    bucket_start: bucket.start,
                    weekday: bucket.weekday(),
                    time_of_day: bucket.time_of_day(),
                    cohort,
                    event_count,
                    active_population,
                    rate: per_capita(event_count, active_population),
                }
            })
            .collect();

        let undefined = records.iter().filter(|r| r.rate.is_none()).count();
        if undefined > 0 {
            log::warn!("{undefined} buckets have zero active population; their rate is undefined");
        }
        log::info!("Bucketed {} events into {} rate records", events.len(), records.len());

        BucketedRates {
            records,
            unknown_entity_events,
        }
    }
}

/// `count / population`, undefined for an empty population
pub fn per_capita(count: u64, population: u64) -> Option<f64> {
    if population == 0 {
        None
    } else {
        Some(count as f64 / population as f64)
    }
}

/// Raw event counts keyed by (bucket, cohort)
#[derive(Debug, Clone, Default)]
pub struct BucketCounts {
    pub counts: BTreeMap<(Bucket, Cohort), u64>,
    pub unknown_entity_events: u64,
}

/// Rate records in (bucket, cohort) order
#[derive(Debug, Clone, Default)]
pub struct BucketedRates {
    pub records: Vec<RateRecord>,
    pub unknown_entity_events: u64,
}
