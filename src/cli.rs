use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_SESSION_FILE: &str = "csv-mapper-session.json";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Map CSV files onto a target schema with model-generated transforms",
    long_about = None
)]
pub struct Cli {
    /// YAML configuration file for the model endpoint and pipeline limits
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Draft a schema (descriptions, categories, validation rules) from an example dataset
    Synthesize(SynthesizeArgs),
    /// List the editable fields of a schema
    Fields(FieldsArgs),
    /// Apply field edits to a schema; invalid edits leave the file untouched
    Edit(EditArgs),
    /// Plan how each schema column is derived from the source files and start a session
    Plan(PlanArgs),
    /// Compile the session's plan into a script and build the candidate table
    Generate(GenerateArgs),
    /// Run a saved transform script
    Execute(ExecuteArgs),
    /// Check a table against a schema's validation rules
    Validate(ValidateArgs),
    /// Apply natural-language corrections to the session's candidate table
    Correct(CorrectArgs),
    /// Write the session's final table and end the session
    Export(ExportArgs),
    /// Preview the first few rows of a CSV file in a formatted table
    Preview(PreviewArgs),
}

/// Options for reading delimited input files.
#[derive(Debug, Clone, Args)]
pub struct InputFormatArgs {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct SynthesizeArgs {
    /// Example dataset to draft the schema from
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination schema file (YAML)
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Schema name (defaults to the dataset's file stem)
    #[arg(long)]
    pub name: Option<String>,
    #[command(flatten)]
    pub format: InputFormatArgs,
}

#[derive(Debug, Args)]
pub struct FieldsArgs {
    /// Schema file to describe
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Emit the fields as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Schema file to edit in place
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Field edit as key=value (e.g. description_dict_age=Age in years)
    #[arg(long = "set", value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub edits: Vec<(String, String)>,
    /// Replace the validation schema with the YAML or JSON in this file
    #[arg(long = "validation-file")]
    pub validation_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Target schema file
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Source CSV file (repeatable)
    #[arg(short = 'i', long = "source", required = true, action = clap::ArgAction::Append)]
    pub sources: Vec<PathBuf>,
    /// Session file to create
    #[arg(long, default_value = DEFAULT_SESSION_FILE)]
    pub session: PathBuf,
    /// Build the plan from same-named columns without calling the model
    #[arg(long)]
    pub offline: bool,
    #[command(flatten)]
    pub format: InputFormatArgs,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Session file created by `plan`
    #[arg(long, default_value = DEFAULT_SESSION_FILE)]
    pub session: PathBuf,
    /// Plan override as column=plan text (repeatable)
    #[arg(long = "override", value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub overrides: Vec<(String, String)>,
    /// Where to write the candidate table
    #[arg(short = 'o', long = "output", default_value = "candidate.csv")]
    pub output: PathBuf,
    /// Also write the compiled script to this file
    #[arg(long = "script-out")]
    pub script_out: Option<PathBuf>,
    /// Rows of the candidate table to preview
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
    #[command(flatten)]
    pub format: InputFormatArgs,
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// Script file to run
    #[arg(long)]
    pub script: PathBuf,
    /// Table bound to `current` by a `start current` line
    #[arg(long)]
    pub current: Option<PathBuf>,
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Delimiter for the output (defaults from the output extension)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    #[command(flatten)]
    pub format: InputFormatArgs,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Schema whose validation rules apply
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Table to validate
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    #[command(flatten)]
    pub format: InputFormatArgs,
}

#[derive(Debug, Args)]
pub struct CorrectArgs {
    /// Session file with a generated candidate table
    #[arg(long, default_value = DEFAULT_SESSION_FILE)]
    pub session: PathBuf,
    /// Correction as column=instruction (repeatable)
    #[arg(long = "instruction", value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub instructions: Vec<(String, String)>,
    /// Where to write the corrected table (defaults to the session's table)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Also write the correction script to this file
    #[arg(long = "script-out")]
    pub script_out: Option<PathBuf>,
    /// Rows of the corrected table to preview
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Session file to finish
    #[arg(long, default_value = DEFAULT_SESSION_FILE)]
    pub session: PathBuf,
    /// Destination of the final table
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Delimiter for the output (defaults from the output extension)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Input CSV file to preview
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of rows to show
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
    #[command(flatten)]
    pub format: InputFormatArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

/// Parses `key=value`; the value may itself contain `=`.
pub fn parse_key_value(value: &str) -> Result<(String, String), String> {
    let (key, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected key=value, got '{value}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Missing key in '{value}'"));
    }
    Ok((key.to_string(), rest.to_string()))
}
