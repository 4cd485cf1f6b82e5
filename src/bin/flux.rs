//! Flux CLI - Command-line interface for Allocation Flux
//!
//! Commands:
//! - analyze: Run the full pipeline over four input tables
//! - validate: Load and validate input tables, report coverage
//! - segments: Print the resolved zip lean table with segment labels
//! - schema: Print the required input columns

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use allocation_flux::geography::ZipLeanTable;
use allocation_flux::schema::{parse_timestamp, InputPaths, Table, TableLoader};
use allocation_flux::{
    AnalysisConfig, AnalysisError, AnalysisPipeline, OutputEncoder, OutputFormat, FLUX_VERSION,
    PRODUCER_NAME,
};

/// Flux - per-capita event rates around a pivot, segmented by geographic lean
#[derive(Parser)]
#[command(name = "flux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Measure allocation-change rates around a pivot event", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis
    Analyze {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        overrides: ConfigArgs,

        /// Output path (use - for stdout; a directory for csv)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        format: FormatArg,
    },

    /// Load and validate the input tables
    Validate {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        overrides: ConfigArgs,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the zip lean table with both segment schemes
    Segments {
        /// Region table (region_id, lean)
        #[arg(long)]
        geo: PathBuf,

        /// Zip to region crosswalk (zip, region_id)
        #[arg(long)]
        zips: PathBuf,

        /// Analysis config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        format: FormatArg,
    },

    /// Print the required input columns
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Region table (region_id, lean)
    #[arg(long)]
    geo: PathBuf,

    /// Zip to region crosswalk (zip, region_id)
    #[arg(long)]
    zips: PathBuf,

    /// Entity snapshot (entity_id, zip, activated_at, deactivated_at)
    #[arg(long)]
    entities: PathBuf,

    /// Allocation changes (entity_id, from_state, to_state, occurred_at)
    #[arg(long)]
    events: PathBuf,
}

impl InputArgs {
    fn paths(&self) -> InputPaths<'_> {
        InputPaths {
            geo_units: &self.geo,
            zip_mappings: &self.zips,
            entities: &self.entities,
            events: &self.events,
        }
    }
}

/// Flags that override values from the config file
#[derive(Args)]
struct ConfigArgs {
    /// Analysis config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start of the analysis window
    #[arg(long)]
    window_start: Option<String>,

    /// End of the analysis window (exclusive)
    #[arg(long)]
    window_end: Option<String>,

    /// Pivot timestamp
    #[arg(long)]
    pivot: Option<String>,

    /// Bucket width in minutes
    #[arg(long)]
    bucket_minutes: Option<u32>,

    /// Half width of the delta window in hours
    #[arg(long)]
    delta_half_width_hours: Option<u32>,

    /// Local clock offset from UTC in minutes
    #[arg(long, allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,
}

impl ConfigArgs {
    /// Config file (or defaults) with command-line overrides applied
    fn resolve(&self) -> Result<AnalysisConfig, FluxCliError> {
        let mut config = load_config(self.config.as_deref())?;

        if let Some(minutes) = self.utc_offset_minutes {
            config.utc_offset_minutes = minutes;
        }
        if let Some(minutes) = self.bucket_minutes {
            config.bucket_minutes = minutes;
        }
        if let Some(hours) = self.delta_half_width_hours {
            config.delta_half_width_hours = hours;
        }

        let offset = config.offset()?;
        let parse = |raw: &str| {
            parse_timestamp(raw, offset).map_err(|e| FluxCliError::InvalidArgument(format!("{raw}: {e}")))
        };
        if let Some(raw) = &self.window_start {
            config.window_start = parse(raw)?;
        }
        if let Some(raw) = &self.window_end {
            config.window_end = parse(raw)?;
        }
        if let Some(raw) = &self.pivot {
            config.pivot = parse(raw)?;
        }

        Ok(config)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// Single JSON document
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Newline-delimited JSON, one row per line tagged with its table
    Ndjson,
    /// CSV, one file per table
    Csv,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::JsonPretty => OutputFormat::JsonPretty,
            FormatArg::Ndjson => OutputFormat::Ndjson,
            FormatArg::Csv => OutputFormat::Csv,
        }
    }
}

fn main() -> ExitCode {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Analyze {
            inputs,
            overrides,
            output,
            format,
        } => cmd_analyze(&inputs, &overrides, &output, format.into()),

        Commands::Validate {
            inputs,
            overrides,
            json,
        } => cmd_validate(&inputs, &overrides, json),

        Commands::Segments {
            geo,
            zips,
            config,
            format,
        } => cmd_segments(&geo, &zips, config.as_deref(), format.into()),

        Commands::Schema { json } => cmd_schema(json),
    }
}

fn cmd_analyze(
    inputs: &InputArgs,
    overrides: &ConfigArgs,
    output: &Path,
    format: OutputFormat,
) -> Result<(), FluxCliError> {
    let pipeline = AnalysisPipeline::new(overrides.resolve()?)?;
    let tables = pipeline.load(&inputs.paths())?;
    let result = pipeline.run(tables)?;

    if is_stdout(output) {
        let encoded = OutputEncoder::new(format).encode(&result)?;
        let mut stdout = io::stdout();
        write!(stdout, "{encoded}")?;
        stdout.flush()?;
    } else if format == OutputFormat::Csv {
        let written = OutputEncoder::write_csv_dir(&result, output)?;
        log::info!("Wrote {} CSV tables to {}", written.len(), output.display());
    } else {
        fs::write(output, OutputEncoder::new(format).encode(&result)?)?;
    }

    Ok(())
}

fn cmd_validate(inputs: &InputArgs, overrides: &ConfigArgs, json: bool) -> Result<(), FluxCliError> {
    let config = overrides.resolve()?;
    config.validate()?;
    let tables = TableLoader::new(config.offset()?).load_all(&inputs.paths())?;

    let zip_leans = ZipLeanTable::resolve(&tables.geo_units, &tables.zip_mappings)?;
    let entity_count = tables.entities.len();
    let entities = zip_leans.annotate(tables.entities, &config.comparison_scheme);
    let (in_window, outside) = config.window().filter_events(&tables.events);
    let known: std::collections::HashSet<&str> =
        entities.iter().map(|e| e.entity_id.as_str()).collect();

    let report = ValidationReport {
        geo_units: tables.geo_units.len(),
        zip_mappings: tables.zip_mappings.len(),
        entities: entity_count,
        events: tables.events.len(),
        zips_in_mapping: zip_leans.zips_in_mapping(),
        zips_with_lean: zip_leans.len(),
        zips_without_lean: zip_leans.zips_without_lean(),
        entities_without_segment: entities.iter().filter(|e| e.segment.is_none()).count(),
        events_outside_window: outside as usize,
        events_unknown_entity: in_window
            .iter()
            .filter(|e| !known.contains(e.entity_id.as_str()))
            .count(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Regions:                  {}", report.geo_units);
        println!("Zip mappings:             {}", report.zip_mappings);
        println!("Entities:                 {}", report.entities);
        println!("Events:                   {}", report.events);
        println!();
        println!("Zips in mapping:          {}", report.zips_in_mapping);
        println!("Zips with lean:           {}", report.zips_with_lean);
        println!("Zips without lean:        {}", report.zips_without_lean);
        println!("Entities without segment: {}", report.entities_without_segment);
        println!("Events outside window:    {}", report.events_outside_window);
        println!("Events for unknown ids:   {}", report.events_unknown_entity);
    }

    Ok(())
}

fn cmd_segments(
    geo: &Path,
    zips: &Path,
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<(), FluxCliError> {
    let config = load_config(config)?;
    config.validate()?;
    let loader = TableLoader::new(config.offset()?);
    let geo_units = loader.load_geo_units(geo)?;
    let mappings = loader.load_zip_mappings(zips)?;

    let rows = ZipLeanTable::resolve(&geo_units, &mappings)?
        .segment_rows(&config.display_scheme, &config.comparison_scheme);

    let output = match format {
        OutputFormat::Json => serde_json::to_string(&rows)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&rows)?,
        OutputFormat::Ndjson => {
            let mut lines = Vec::with_capacity(rows.len());
            for row in &rows {
                lines.push(serde_json::to_string(row)?);
            }
            lines.join("\n")
        }
        OutputFormat::Csv => allocation_flux::encoder::to_csv(&rows)?,
    };
    println!("{}", output.trim_end());

    Ok(())
}

fn cmd_schema(json: bool) -> Result<(), FluxCliError> {
    if json {
        let tables: serde_json::Map<String, serde_json::Value> = Table::all()
            .iter()
            .map(|t| (t.as_str().to_string(), serde_json::json!(t.required_columns())))
            .collect();
        let report = serde_json::json!({
            "producer": PRODUCER_NAME,
            "version": FLUX_VERSION,
            "tables": tables,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Input tables ({PRODUCER_NAME} {FLUX_VERSION})");
    println!();
    for table in Table::all() {
        println!("{}: {}", table.as_str(), table.required_columns().join(", "));
    }
    println!();
    println!("Formats: .csv (header row), .ndjson/.jsonl, .json (array of objects)");
    println!("Timestamps: RFC 3339, YYYY-MM-DD HH:MM:SS[.f], YYYY-MM-DDTHH:MM:SS[.f], YYYY-MM-DD");
    println!("lean, from_state and to_state must lie in [0, 1]");

    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, FluxCliError> {
    match path {
        Some(path) => Ok(AnalysisConfig::from_path(path)?),
        None => Ok(AnalysisConfig::default()),
    }
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

// Error handling

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Analysis(AnalysisError),
    Json(serde_json::Error),
    InvalidArgument(String),
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<AnalysisError> for FluxCliError {
    fn from(e: AnalysisError) -> Self {
        FluxCliError::Analysis(e)
    }
}

impl From<allocation_flux::SchemaViolation> for FluxCliError {
    fn from(e: allocation_flux::SchemaViolation) -> Self {
        FluxCliError::Analysis(e.into())
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FluxCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: Some("Timestamps look like 2016-11-08T20:00:00".to_string()),
            },
            FluxCliError::Analysis(e) => {
                let (code, hint) = match &e {
                    AnalysisError::Schema(_) => (
                        "SCHEMA_VIOLATION",
                        Some("Run 'flux schema' for the required columns"),
                    ),
                    AnalysisError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", Some("Check the config file and overrides"))
                    }
                    AnalysisError::JsonError(_) => ("JSON_ERROR", Some("Check JSON syntax")),
                    AnalysisError::CsvError(_) => ("CSV_ERROR", Some("Check CSV quoting and header row")),
                    AnalysisError::Io { .. } => ("IO_ERROR", Some("Check file paths and permissions")),
                    AnalysisError::UnsupportedFormat(_) => (
                        "UNSUPPORTED_FORMAT",
                        Some("Use .csv, .ndjson, .jsonl or .json"),
                    ),
                    AnalysisError::EncodingError(_) => ("ENCODING_ERROR", None),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    geo_units: usize,
    zip_mappings: usize,
    entities: usize,
    events: usize,
    zips_in_mapping: usize,
    zips_with_lean: usize,
    zips_without_lean: usize,
    entities_without_segment: usize,
    events_outside_window: usize,
    events_unknown_entity: usize,
}
