//! Analysis configuration
//!
//! Every run parameter lives here and is passed explicitly into the pipeline
//! stages. Configs load from JSON; absent fields take the defaults below,
//! which describe the November 2016 election window.

use crate::bucket::{Bucketizer, DEFAULT_BUCKET_MINUTES, MAX_BUCKET_MINUTES};
use crate::direction::DEFAULT_DELTA_HALF_WIDTH_HOURS;
use crate::error::AnalysisError;
use crate::geography::SegmentScheme;
use crate::types::TimeWindow;
use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// First instant of the analysis window (inclusive, local time)
    pub window_start: NaiveDateTime,
    /// End of the analysis window (exclusive, local time)
    pub window_end: NaiveDateTime,
    /// The event being studied; its calendar date splits history from
    /// post-event buckets
    pub pivot: NaiveDateTime,
    /// Bucket width in minutes
    pub bucket_minutes: u32,
    /// Half width of the delta window around the pivot, in hours
    pub delta_half_width_hours: u32,
    /// Offset of the local clock from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Five-level scheme for display
    pub display_scheme: SegmentScheme,
    /// Three-level scheme for rate comparisons
    pub comparison_scheme: SegmentScheme,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_start: midnight(2016, 10, 1),
            window_end: midnight(2016, 11, 22),
            pivot: midnight(2016, 11, 8),
            bucket_minutes: DEFAULT_BUCKET_MINUTES,
            delta_half_width_hours: DEFAULT_DELTA_HALF_WIDTH_HOURS,
            utc_offset_minutes: 0,
            display_scheme: SegmentScheme::display(),
            comparison_scheme: SegmentScheme::comparison(),
        }
    }
}

fn midnight(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl AnalysisConfig {
    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let json = std::fs::read_to_string(path).map_err(|source| AnalysisError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.window_start >= self.window_end {
            return Err(invalid(format!(
                "window_start {} must be before window_end {}",
                self.window_start, self.window_end
            )));
        }
        if !self.window().contains(self.pivot) {
            return Err(invalid(format!(
                "pivot {} is outside the analysis window",
                self.pivot
            )));
        }
        if self.bucket_minutes == 0 || self.bucket_minutes > MAX_BUCKET_MINUTES {
            return Err(invalid(format!(
                "bucket_minutes must be within 1..={MAX_BUCKET_MINUTES}, got {}",
                self.bucket_minutes
            )));
        }
        let half_width = self.delta_half_width();
        if self.pivot.checked_sub_signed(half_width).is_none()
            || self.pivot.checked_add_signed(half_width).is_none()
        {
            return Err(invalid(format!(
                "delta_half_width_hours {} puts the delta window outside the supported date range",
                self.delta_half_width_hours
            )));
        }
        self.offset()?;
        self.display_scheme
            .validate()
            .map_err(|e| invalid(format!("display_scheme: {e}")))?;
        self.comparison_scheme
            .validate()
            .map_err(|e| invalid(format!("comparison_scheme: {e}")))?;

        if self.pivot.date() <= self.window_start.date() {
            log::warn!("Analysis window starts on the pivot date; no baseline history is available");
        }
        Ok(())
    }

    /// Local clock offset used for every date derived from a timestamp
    pub fn offset(&self) -> Result<FixedOffset, AnalysisError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            invalid(format!(
                "utc_offset_minutes {} is outside +/-24h",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.window_start, self.window_end)
    }

    /// Calendar date separating history from post-event buckets
    pub fn pivot_date(&self) -> NaiveDate {
        self.pivot.date()
    }

    pub fn bucketizer(&self) -> Bucketizer {
        Bucketizer::new(self.bucket_minutes)
    }

    pub fn delta_half_width(&self) -> Duration {
        Duration::hours(self.delta_half_width_hours as i64)
    }
}

fn invalid(message: String) -> AnalysisError {
    AnalysisError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bucket_minutes, 60);
        assert_eq!(config.pivot_date().to_string(), "2016-11-08");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AnalysisConfig::from_json(
            r#"{"pivot": "2016-11-09T02:00:00", "bucket_minutes": 30, "utc_offset_minutes": -300}"#,
        )
        .unwrap();

        assert_eq!(config.bucket_minutes, 30);
        assert_eq!(config.pivot_date().to_string(), "2016-11-09");
        assert_eq!(config.comparison_scheme, SegmentScheme::comparison());
        assert_eq!(config.offset().unwrap().local_minus_utc(), -300 * 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = AnalysisConfig::default();
        let loaded = AnalysisConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = AnalysisConfig::default();
        config.window_end = config.window_start;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.pivot = midnight(2017, 1, 1);
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.bucket_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.utc_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.delta_half_width_hours = u32::MAX;
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));

        let mut config = AnalysisConfig::default();
        config.comparison_scheme.cut_points = vec![0.6, 0.4];
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));
    }
}
