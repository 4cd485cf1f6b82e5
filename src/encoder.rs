//! Output encoding
//!
//! Serializes an [`AnalysisOutput`] to JSON, pretty JSON, NDJSON, or CSV.
//! Encoding never consults the clock or any random source, so the same
//! output always encodes to the same bytes.

use crate::error::AnalysisError;
use crate::types::AnalysisOutput;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of each output table, in write order
pub const TABLE_NAMES: [&str; 5] = ["records", "baselines", "deltas", "distribution", "coverage"];

/// Supported output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    JsonPretty,
    Ndjson,
    Csv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::JsonPretty => "json-pretty",
            OutputFormat::Ndjson => "ndjson",
            OutputFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "pretty" => Ok(OutputFormat::JsonPretty),
            "ndjson" | "jsonl" => Ok(OutputFormat::Ndjson),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(AnalysisError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// One NDJSON line: the table name plus the row's own fields
#[derive(Serialize)]
struct TaggedRow<'a, T: Serialize> {
    table: &'static str,
    #[serde(flatten)]
    row: &'a T,
}

/// Encoder for analysis output
#[derive(Debug, Clone, Copy)]
pub struct OutputEncoder {
    format: OutputFormat,
}

impl OutputEncoder {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Encode the whole output as a single string.
    ///
    /// CSV output concatenates the tables, each preceded by a `# <table>`
    /// line; use [`OutputEncoder::write_csv_dir`] for one file per table.
    pub fn encode(&self, output: &AnalysisOutput) -> Result<String, AnalysisError> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(output)?),
            OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(output)?),
            OutputFormat::Ndjson => encode_ndjson(output),
            OutputFormat::Csv => {
                let mut out = String::new();
                for (name, table) in csv_tables(output)? {
                    out.push_str("# ");
                    out.push_str(name);
                    out.push('\n');
                    out.push_str(&table);
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }

    /// Write each table to `<dir>/<table>.csv`, creating `dir` if needed
    pub fn write_csv_dir(output: &AnalysisOutput, dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
        let io_err = |path: &Path, source: std::io::Error| AnalysisError::Io {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let mut written = Vec::with_capacity(TABLE_NAMES.len());
        for (name, table) in csv_tables(output)? {
            let path = dir.join(format!("{name}.csv"));
            fs::write(&path, table).map_err(|e| io_err(&path, e))?;
            log::debug!("Wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

fn encode_ndjson(output: &AnalysisOutput) -> Result<String, AnalysisError> {
    let mut out = String::new();
    push_lines(&mut out, "records", &output.records)?;
    push_lines(&mut out, "baselines", &output.baselines)?;
    push_lines(&mut out, "deltas", &output.deltas)?;
    push_lines(&mut out, "distribution", &output.distribution)?;
    push_lines(&mut out, "coverage", std::slice::from_ref(&output.coverage))?;
    Ok(out)
}

fn push_lines<T: Serialize>(out: &mut String, table: &'static str, rows: &[T]) -> Result<(), AnalysisError> {
    for row in rows {
        out.push_str(&serde_json::to_string(&TaggedRow { table, row })?);
        out.push('\n');
    }
    Ok(())
}

fn csv_tables(output: &AnalysisOutput) -> Result<Vec<(&'static str, String)>, AnalysisError> {
    Ok(vec![
        ("records", to_csv(&output.records)?),
        ("baselines", to_csv(&output.baselines)?),
        ("deltas", to_csv(&output.deltas)?),
        ("distribution", to_csv(&output.distribution)?),
        ("coverage", to_csv(std::slice::from_ref(&output.coverage))?),
    ])
}

/// Serialize rows as CSV with a header row
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String, AnalysisError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AnalysisError::EncodingError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AnalysisError::EncodingError(e.to_string()))
}
