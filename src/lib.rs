pub mod cli;
pub mod compile;
pub mod config;
pub mod correct;
pub mod data;
pub mod expr;
pub mod io_utils;
mod mapping_cmd;
pub mod model;
pub mod plan;
mod preview;
pub mod prompt;
pub mod rules;
mod schema_cmd;
pub mod schema;
pub mod script;
pub mod session;
pub mod source;
pub mod stage;
pub mod synth;
pub mod table;
pub mod validate;

use std::{env, sync::OnceLock, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug};
use thiserror::Error;

use crate::{
    cli::{Cli, Commands, InputFormatArgs},
    config::MapperConfig,
    io_utils::CsvOptions,
    model::{HttpModelClient, RetryingModel},
    stage::StageError,
};

/// Exit status when a script line fails.
pub const EXIT_EXECUTION_FAILED: i32 = 2;
/// Exit status when a table does not satisfy its validation schema.
pub const EXIT_VALIDATION_FAILED: i32 = 3;

/// A table failed validation. Carried as an error so the command exits with
/// [`EXIT_VALIDATION_FAILED`].
#[derive(Debug, Error)]
#[error("validation failed for {count} column(s)")]
pub struct ValidationFailed {
    pub count: usize,
}

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_mapper", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = MapperConfig::resolve(cli.config.as_deref())?;
    debug!(
        "Model '{}' at {} (stage limit {:?})",
        config.model.model,
        config.model.endpoint,
        config.stage_timeout()
    );
    match cli.command {
        Commands::Synthesize(args) => schema_cmd::synthesize(&args, &config),
        Commands::Fields(args) => schema_cmd::fields(&args),
        Commands::Edit(args) => schema_cmd::edit(&args),
        Commands::Plan(args) => mapping_cmd::plan(&args, &config),
        Commands::Generate(args) => mapping_cmd::generate(&args, &config),
        Commands::Execute(args) => mapping_cmd::execute(&args, &config),
        Commands::Validate(args) => mapping_cmd::validate(&args),
        Commands::Correct(args) => mapping_cmd::correct(&args, &config),
        Commands::Export(args) => mapping_cmd::export(&args),
        Commands::Preview(args) => preview::execute(&args),
    }
}

/// Process exit status for an error returned by [`run`].
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ValidationFailed>().is_some() {
        return EXIT_VALIDATION_FAILED;
    }
    match err.downcast_ref::<StageError>() {
        Some(StageError::Execution(_)) => EXIT_EXECUTION_FAILED,
        _ if err.downcast_ref::<script::ExecutionError>().is_some() => EXIT_EXECUTION_FAILED,
        _ => 1,
    }
}

pub(crate) fn csv_options(args: &InputFormatArgs) -> Result<CsvOptions> {
    CsvOptions::new(args.delimiter, args.input_encoding.as_deref())
}

pub(crate) fn build_model(config: &MapperConfig) -> Result<RetryingModel<HttpModelClient>> {
    let client =
        HttpModelClient::new(&config.model).context("Configuring the model endpoint")?;
    Ok(RetryingModel::new(
        client,
        config.model.max_retries,
        Duration::from_millis(config.model.retry_backoff_ms),
    ))
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
