//! Direction and distribution of allocation changes
//!
//! Works on raw event magnitudes around the pivot: no denominators and no
//! baselines. Each event's signed delta (`to_state - from_state`) is emitted
//! as-is, and deltas are summarized per (bucket, cohort) with quartiles.

use crate::bucket::Bucketizer;
use crate::types::{Bucket, Cohort, DeltaRecord, DeltaSummary, Entity, Event, Segment};
use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};

/// Default half width of the window around the pivot (one week)
pub const DEFAULT_DELTA_HALF_WIDTH_HOURS: u32 = 168;

/// Raw deltas and their per-bucket distribution
#[derive(Debug, Clone, Default)]
pub struct DirectionOutput {
    pub deltas: Vec<DeltaRecord>,
    pub distribution: Vec<DeltaSummary>,
}

/// Aggregator for event deltas in a symmetric window around the pivot
pub struct DirectionAggregator {
    bucketizer: Bucketizer,
    half_width: Duration,
}

impl DirectionAggregator {
    pub fn new(bucketizer: Bucketizer, half_width: Duration) -> Self {
        Self {
            bucketizer,
            half_width,
        }
    }

    /// Inclusive bounds `[pivot - half_width, pivot + half_width]`, clamped
    /// to the representable range
    pub fn window(&self, pivot: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let start = pivot
            .checked_sub_signed(self.half_width)
            .unwrap_or(NaiveDateTime::MIN);
        let end = pivot
            .checked_add_signed(self.half_width)
            .unwrap_or(NaiveDateTime::MAX);
        (start, end)
    }

    /// Compute raw deltas and their distribution
    pub fn aggregate(
        &self,
        events: &[Event],
        entities: &[Entity],
        pivot: NaiveDateTime,
    ) -> DirectionOutput {
        let segments: HashMap<&str, &Segment> = entities
            .iter()
            .filter_map(|e| e.segment.as_ref().map(|s| (e.entity_id.as_str(), s)))
            .collect();
        let (start, end) = self.window(pivot);

        let mut selected: Vec<(&Event, Option<&Segment>)> = events
            .iter()
            .filter(|e| start <= e.occurred_at && e.occurred_at <= end)
            .map(|e| (e, segments.get(e.entity_id.as_str()).copied()))
            .collect();
        selected.sort_by(|(a, _), (b, _)| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });

        let mut groups: BTreeMap<(Bucket, Cohort), Vec<f64>> = BTreeMap::new();
        let mut deltas = Vec::with_capacity(selected.len());

        for (event, segment) in &selected {
            let delta = event.delta();
            let bucket = self.bucketizer.bucket(event.occurred_at);

            groups.entry((bucket, Cohort::All)).or_default().push(delta);
            if let Some(segment) = segment {
                groups
                    .entry((bucket, Cohort::Segment((*segment).clone())))
                    .or_default()
                    .push(delta);
            }

            deltas.push(DeltaRecord {
                occurred_at: event.occurred_at,
                entity_id: event.entity_id.clone(),
                segment: segment.map(|s| s.label.clone()),
                from_state: event.from_state,
                to_state: event.to_state,
                delta,
            });
        }

        let distribution: Vec<DeltaSummary> = groups
            .into_iter()
            .filter_map(|((bucket, cohort), values)| summarize(bucket.start, cohort, values))
            .collect();

        log::info!(
            "Collected {} deltas in {} distribution groups between {start} and {end}",
            deltas.len(),
            distribution.len()
        );

        DirectionOutput {
            deltas,
            distribution,
        }
    }
}

/// Five-number summary plus mean; `None` for an empty group
fn summarize(bucket_start: NaiveDateTime, cohort: Cohort, mut values: Vec<f64>) -> Option<DeltaSummary> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;

    Some(DeltaSummary {
        bucket_start,
        cohort,
        count: n as u32,
        mean,
        min: values[0],
        q1: quantile(&values, 0.25),
        median: quantile(&values, 0.5),
        q3: quantile(&values, 0.75),
        max: values[n - 1],
    })
}

/// Quantile of sorted values, linearly interpolated between closest ranks
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}
