//! Active population sizing
//!
//! Counts the entities active on a given date, optionally restricted to a set
//! of segments. These counts are the denominators of every per-capita rate.
//!
//! An entity is active on `date` when `active_from < date` and
//! `active_until > date`. Both comparisons are strict, so an entity is not
//! counted on its activation date nor on its deactivation date.

use crate::types::{Cohort, Entity, Segment};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// Whether an entity counts toward the population of `date`
pub fn is_active(entity: &Entity, date: NaiveDate) -> bool {
    entity.active_from < date && entity.active_until > date
}

/// Active population lookup over a resolved entity table
pub struct CohortSizer<'a> {
    entities: &'a [Entity],
}

impl<'a> CohortSizer<'a> {
    pub fn new(entities: &'a [Entity]) -> Self {
        Self { entities }
    }

    /// Count entities active on `date`.
    ///
    /// With a filter, only entities whose segment is in the filter are
    /// counted and entities without a segment never are. Without a filter
    /// every entity counts.
    pub fn count_active(&self, date: NaiveDate, segment_filter: Option<&[Segment]>) -> u64 {
        self.entities
            .iter()
            .filter(|e| is_active(e, date))
            .filter(|e| match segment_filter {
                None => true,
                Some(filter) => e.segment.as_ref().is_some_and(|s| filter.contains(s)),
            })
            .count() as u64
    }

    /// Count for a single cohort
    pub fn count_cohort(&self, date: NaiveDate, cohort: &Cohort) -> u64 {
        match cohort {
            Cohort::All => self.count_active(date, None),
            Cohort::Segment(segment) => self.count_active(date, Some(std::slice::from_ref(segment))),
        }
    }

    /// Evaluate each distinct (date, cohort) pair once
    pub fn population_table(
        &self,
        keys: impl IntoIterator<Item = (NaiveDate, Cohort)>,
    ) -> PopulationTable {
        let keys: BTreeSet<(NaiveDate, Cohort)> = keys.into_iter().collect();
        let counts = keys
            .into_iter()
            .map(|(date, cohort)| {
                let count = self.count_cohort(date, &cohort);
                ((date, cohort), count)
            })
            .collect::<BTreeMap<_, _>>();

        log::debug!("Computed {} population denominators", counts.len());

        PopulationTable { counts }
    }
}

/// Precomputed denominators keyed by (date, cohort)
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    counts: BTreeMap<(NaiveDate, Cohort), u64>,
}

impl PopulationTable {
    /// Population for a key, zero when the key was never computed
    pub fn get(&self, date: NaiveDate, cohort: &Cohort) -> u64 {
        self.counts
            .get(&(date, cohort.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
