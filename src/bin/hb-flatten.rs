//! hb-flatten CLI - Command-line interface for the telemetry flattener
//!
//! Commands:
//! - flatten: Flatten nested payloads into flat records
//! - unflatten: Rebuild nested payloads from flat records
//! - run: Flatten the payload embedded in a config file
//! - validate: Check payloads against the declared input schema
//! - mapping: Print the default path table
//! - schema: Print the declared input schema

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hb_flatten::schema::input_schema;
use hb_flatten::{
    ndjson_records, FlatRecord, FlattenError, FlattenProcessor, FlattenerConfig,
    PathMappedFlattener, PathTable, FLATTEN_VERSION,
};

/// Environment variable holding the log filter directive
const LOG_ENV: &str = "HB_FLATTEN_LOG";

/// hb-flatten - Path-table flattening of behavioral interaction telemetry
#[derive(Parser)]
#[command(name = "hb-flatten")]
#[command(version = FLATTEN_VERSION)]
#[command(about = "Flatten nested interaction telemetry into flat records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flatten nested payloads into flat records
    Flatten {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// JSON file with a custom path table
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Validate payloads against the declared input schema
        #[arg(long)]
        strict: bool,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Rebuild nested payloads from flat records
    Unflatten {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// JSON file with a custom path table
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Flatten the payload embedded in a config file
    Run {
        /// Config file with field_mapping, input_data and is_validate
        #[arg(short, long)]
        config: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Check payloads against the declared input schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// JSON file with a custom path table
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default path table
    Mapping {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the declared input schema
    Schema {
        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// A JSON array of records, or a single record
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CliFailure> {
    match cli.command {
        Commands::Flatten {
            input,
            output,
            mapping,
            strict,
            input_format,
            output_format,
        } => cmd_flatten(
            &input,
            &output,
            mapping.as_deref(),
            strict,
            input_format,
            output_format,
        ),

        Commands::Unflatten {
            input,
            output,
            mapping,
            input_format,
            output_format,
        } => cmd_unflatten(&input, &output, mapping.as_deref(), input_format, output_format),

        Commands::Run {
            config,
            output_format,
        } => cmd_run(&config, output_format),

        Commands::Validate {
            input,
            mapping,
            input_format,
            json,
        } => cmd_validate(&input, mapping.as_deref(), input_format, json),

        Commands::Mapping { json } => cmd_mapping(json),

        Commands::Schema { json_schema } => cmd_schema(json_schema),
    }
}

fn cmd_flatten(
    input: &Path,
    output: &Path,
    mapping: Option<&Path>,
    strict: bool,
    input_format: InputFormat,
    output_format: OutputFormat,
) -> Result<(), CliFailure> {
    let table = load_table(mapping)?;
    let records = read_records(input, &input_format)?;
    if records.is_empty() {
        return Err(CliFailure::NoRecords);
    }

    let mut processor = FlattenProcessor::with_table(table, strict);
    let mut flat_records: Vec<FlatRecord> = Vec::with_capacity(records.len());
    for record in &records {
        flat_records.push(processor.process_value(record)?);
    }

    let stats = processor.stats();
    info!(
        records = stats.records_processed,
        absent_fields = stats.absent_fields.values().sum::<u64>(),
        "flattened records"
    );

    write_output(output, &format_output(&flat_records, &output_format)?)
}

fn cmd_unflatten(
    input: &Path,
    output: &Path,
    mapping: Option<&Path>,
    input_format: InputFormat,
    output_format: OutputFormat,
) -> Result<(), CliFailure> {
    let flattener = PathMappedFlattener::new(load_table(mapping)?);
    let records = read_records(input, &input_format)?;
    if records.is_empty() {
        return Err(CliFailure::NoRecords);
    }

    let mut nested: Vec<Value> = Vec::with_capacity(records.len());
    for record in &records {
        let flat = FlatRecord::from_json_value(record, flattener.table())?;
        nested.push(flattener.unflatten(&flat)?);
    }

    write_output(output, &format_output(&nested, &output_format)?)
}

fn cmd_run(config_path: &Path, output_format: OutputFormat) -> Result<(), CliFailure> {
    let config = FlattenerConfig::load(config_path)?;
    let flat = config.flatten()?;
    print!("{}", format_output(&[flat], &output_format)?);
    Ok(())
}

fn cmd_validate(
    input: &Path,
    mapping: Option<&Path>,
    input_format: InputFormat,
    json: bool,
) -> Result<(), CliFailure> {
    let flattener = PathMappedFlattener::new(load_table(mapping)?);
    let records = read_records(input, &input_format)?;

    let errors: Vec<ValidationErrorDetail> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            flattener
                .flatten(record, true)
                .err()
                .map(|e| ValidationErrorDetail::new(index, e))
        })
        .collect();

    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - errors.len(),
        invalid_records: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Record {}: {} ({})",
                    err.index,
                    err.error,
                    err.field.as_deref().unwrap_or("unknown field")
                );
            }
        }
    }

    if report.invalid_records > 0 {
        Err(CliFailure::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_mapping(json: bool) -> Result<(), CliFailure> {
    let table = PathTable::default_mapping();
    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        println!("Default path table ({} fields)", table.len());
        println!();
        let width = table.keys().map(str::len).max().unwrap_or(0);
        for (key, path) in table.iter() {
            println!("  {:width$}  {}", key, path, width = width);
        }
    }
    Ok(())
}

fn cmd_schema(json_schema: bool) -> Result<(), CliFailure> {
    if json_schema {
        let mut schema = input_schema().to_json_schema();
        schema["$schema"] = Value::String("https://json-schema.org/draft/2020-12/schema".into());
        schema["title"] = Value::String("InputData".into());
        println!("{}", serde_json::to_string_pretty(&schema)?);
    } else {
        println!("Input schema: InputData");
        println!();
        println!("- project_id: string or null");
        println!("- user_id: string or null");
        println!("- metrics:");
        println!("  - mouse: {{ movements[{{x, y, timestamp}}], clicks[], mouseDowns[], mouseUps[] }}");
        println!("  - keyboard: {{ keypresses[], keydowns[], keyups[], specificKeyEvents[] }}");
        println!("  - signInButton: {{ hoverToClickTime: number or null, mouseLeaveCount: number }}");
        println!("- additional: any");
        println!();
        println!("Unknown top-level keys are allowed and kept.");
    }
    Ok(())
}

// Helper functions

fn load_table(mapping: Option<&Path>) -> Result<PathTable, CliFailure> {
    match mapping {
        Some(path) => {
            debug!(path = %path.display(), "loading path table");
            let contents = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        }
        None => Ok(PathTable::default_mapping()),
    }
}

fn read_input(input: &Path) -> Result<String, CliFailure> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_records(input: &Path, format: &InputFormat) -> Result<Vec<Value>, CliFailure> {
    let data = read_input(input)?;
    match format {
        InputFormat::Ndjson => Ok(ndjson_records(&data).collect::<Result<Vec<Value>, _>>()?),
        InputFormat::Json => match serde_json::from_str::<Value>(&data)? {
            Value::Array(items) => Ok(items),
            single => Ok(vec![single]),
        },
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), CliFailure> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, CliFailure> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum CliFailure {
    Io(io::Error),
    Flatten(FlattenError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
}

impl From<io::Error> for CliFailure {
    fn from(e: io::Error) -> Self {
        CliFailure::Io(e)
    }
}

impl From<FlattenError> for CliFailure {
    fn from(e: FlattenError) -> Self {
        CliFailure::Flatten(e)
    }
}

impl From<serde_json::Error> for CliFailure {
    fn from(e: serde_json::Error) -> Self {
        CliFailure::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliFailure> for CliError {
    fn from(e: CliFailure) -> Self {
        match e {
            CliFailure::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CliFailure::Flatten(e) => {
                let (code, hint) = match &e {
                    FlattenError::SchemaValidation { .. } => (
                        "SCHEMA_VALIDATION_ERROR",
                        "Run 'hb-flatten validate' for details, or drop --strict",
                    ),
                    FlattenError::PathConflict { .. } => (
                        "PATH_CONFLICT",
                        "No table path may be a prefix of another",
                    ),
                    FlattenError::Parse(_) => ("PARSE_ERROR", "Check input format"),
                    FlattenError::InvalidPathTable(_) => (
                        "INVALID_MAPPING",
                        "Paths need at least one non-empty segment",
                    ),
                    _ => ("FLATTEN_ERROR", "Check input format"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            CliFailure::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CliFailure::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            CliFailure::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    field: Option<String>,
    error: String,
}

impl ValidationErrorDetail {
    fn new(index: usize, error: FlattenError) -> Self {
        let field = match &error {
            FlattenError::SchemaValidation { field, .. } => Some(field.clone()),
            _ => None,
        };
        Self {
            index,
            field,
            error: error.to_string(),
        }
    }
}
