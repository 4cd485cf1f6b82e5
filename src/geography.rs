//! Geographic resolution
//!
//! Collapses the many-to-many zip to region crosswalk into one lean value per
//! zip (the [`ZipLeanTable`]) and bins that lean into ordered segments.
//!
//! Regions missing from the reference table are dropped by the join rather
//! than contributing a null lean, so a zip's lean is the mean over the
//! regions that actually matched. Zips with no matched region have no lean.

use crate::schema::{SchemaViolation, Table};
use crate::types::{Entity, GeoUnit, Segment, ZipLean, ZipMapping};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Ascending cut points with one label per resulting bin.
///
/// Bins are `[c_i, c_{i+1})`: a lean exactly on a cut point lands in the
/// upper bin. The first bin is open below and the last open above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentScheme {
    pub cut_points: Vec<f64>,
    pub labels: Vec<String>,
}

impl SegmentScheme {
    /// Five-level scheme used for display
    pub fn display() -> Self {
        Self {
            cut_points: vec![0.30, 0.45, 0.55, 0.70],
            labels: [
                "strong_opposition",
                "lean_opposition",
                "neutral",
                "lean_support",
                "strong_support",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    /// Three-level scheme used for every rate comparison
    pub fn comparison() -> Self {
        Self {
            cut_points: vec![0.40, 0.60],
            labels: ["low", "mid", "high"].iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check ordering, range, and label count
    pub fn validate(&self) -> Result<(), String> {
        if self.labels.len() != self.cut_points.len() + 1 {
            return Err(format!(
                "{} cut points need {} labels, got {}",
                self.cut_points.len(),
                self.cut_points.len() + 1,
                self.labels.len()
            ));
        }
        if self.labels.len() > u8::MAX as usize {
            return Err("too many segments".to_string());
        }
        if let Some(c) = self
            .cut_points
            .iter()
            .find(|c| !c.is_finite() || !(0.0..=1.0).contains(*c))
        {
            return Err(format!("cut point {c} is outside [0, 1]"));
        }
        if self.cut_points.windows(2).any(|w| w[0] >= w[1]) {
            return Err("cut points must be strictly ascending".to_string());
        }
        let unique: BTreeSet<&str> = self.labels.iter().map(String::as_str).collect();
        if unique.len() != self.labels.len() {
            return Err("segment labels must be unique".to_string());
        }
        if unique.contains(crate::types::Cohort::ALL_LABEL) {
            return Err(format!(
                "`{}` is reserved for the unsegmented cohort",
                crate::types::Cohort::ALL_LABEL
            ));
        }
        Ok(())
    }

    /// Bin a lean value; `None` when the scheme has no label for the bin
    pub fn assign(&self, lean: f64) -> Option<Segment> {
        let rank = self.cut_points.partition_point(|c| *c <= lean);
        self.labels.get(rank).map(|label| Segment {
            rank: rank as u8,
            label: label.clone(),
        })
    }

    /// All segments in rank order
    pub fn segments(&self) -> Vec<Segment> {
        self.labels
            .iter()
            .enumerate()
            .map(|(rank, label)| Segment {
                rank: rank as u8,
                label: label.clone(),
            })
            .collect()
    }
}

/// Derived, immutable table of per-zip leans
#[derive(Debug, Clone, Default)]
pub struct ZipLeanTable {
    leans: BTreeMap<String, ZipLean>,
    zips_in_mapping: usize,
}

impl ZipLeanTable {
    /// Inner-join the crosswalk to the region table and average per zip
    pub fn resolve(
        geo_units: &[GeoUnit],
        mappings: &[ZipMapping],
    ) -> Result<Self, SchemaViolation> {
        let mut region_leans: HashMap<&str, f64> = HashMap::with_capacity(geo_units.len());
        for (idx, unit) in geo_units.iter().enumerate() {
            if region_leans.insert(unit.region_id.as_str(), unit.lean).is_some() {
                return Err(SchemaViolation::invalid(
                    Table::GeoUnits,
                    idx + 1,
                    format!("duplicate region_id {}", unit.region_id),
                ));
            }
        }

        let mut all_zips: BTreeSet<&str> = BTreeSet::new();
        let mut sums: BTreeMap<&str, (f64, u32)> = BTreeMap::new();
        let mut unmatched_rows = 0usize;

        for mapping in mappings {
            all_zips.insert(mapping.zip.as_str());
            match region_leans.get(mapping.region_id.as_str()) {
                Some(lean) => {
                    let entry = sums.entry(mapping.zip.as_str()).or_insert((0.0, 0));
                    entry.0 += lean;
                    entry.1 += 1;
                }
                None => unmatched_rows += 1,
            }
        }

        let leans: BTreeMap<String, ZipLean> = sums
            .into_iter()
            .map(|(zip, (sum, count))| {
                let lean = ZipLean {
                    zip: zip.to_string(),
                    sample_count: count,
                    mean_lean: (sum / count as f64).clamp(0.0, 1.0),
                };
                (zip.to_string(), lean)
            })
            .collect();

        if unmatched_rows > 0 {
            log::debug!("{unmatched_rows} crosswalk rows reference unknown regions");
        }
        log::info!(
            "Resolved lean for {} of {} zips",
            leans.len(),
            all_zips.len()
        );

        Ok(Self {
            leans,
            zips_in_mapping: all_zips.len(),
        })
    }

    pub fn get(&self, zip: &str) -> Option<&ZipLean> {
        self.leans.get(zip)
    }

    pub fn lean(&self, zip: &str) -> Option<f64> {
        self.get(zip).map(|z| z.mean_lean)
    }

    /// Segment of a zip, `None` when the zip has no resolvable lean
    pub fn segment(&self, zip: &str, scheme: &SegmentScheme) -> Option<Segment> {
        self.lean(zip).and_then(|lean| scheme.assign(lean))
    }

    /// Rows in zip order
    pub fn iter(&self) -> impl Iterator<Item = &ZipLean> {
        self.leans.values()
    }

    pub fn len(&self) -> usize {
        self.leans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leans.is_empty()
    }

    /// Distinct zips seen in the crosswalk
    pub fn zips_in_mapping(&self) -> usize {
        self.zips_in_mapping
    }

    /// Zips present in the crosswalk whose regions all failed to match
    pub fn zips_without_lean(&self) -> usize {
        self.zips_in_mapping - self.leans.len()
    }

    /// Attach the segment of each entity's zip
    pub fn annotate(&self, entities: Vec<Entity>, scheme: &SegmentScheme) -> Vec<Entity> {
        let annotated: Vec<Entity> = entities
            .into_iter()
            .map(|mut entity| {
                entity.segment = self.segment(&entity.zip, scheme);
                entity
            })
            .collect();

        let unresolved = annotated.iter().filter(|e| e.segment.is_none()).count();
        if unresolved > 0 {
            log::warn!(
                "{unresolved} of {} entities have no resolvable segment",
                annotated.len()
            );
        }
        annotated
    }

    /// Per-zip rows with both segment schemes applied
    pub fn segment_rows(
        &self,
        display: &SegmentScheme,
        comparison: &SegmentScheme,
    ) -> Vec<ZipSegmentRow> {
        self.iter()
            .map(|z| ZipSegmentRow {
                zip: z.zip.clone(),
                sample_count: z.sample_count,
                mean_lean: z.mean_lean,
                display_segment: display.assign(z.mean_lean).map(|s| s.label),
                comparison_segment: comparison.assign(z.mean_lean).map(|s| s.label),
            })
            .collect()
    }
}

/// One zip with its lean and both segment labels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipSegmentRow {
    pub zip: String,
    pub sample_count: u32,
    pub mean_lean: f64,
    pub display_segment: Option<String>,
    pub comparison_segment: Option<String>,
}
