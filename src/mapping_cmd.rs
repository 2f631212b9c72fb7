use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use log::{info, warn};

use crate::{
    ValidationFailed, build_model,
    cli::{CorrectArgs, ExecuteArgs, ExportArgs, GenerateArgs, PlanArgs, ValidateArgs},
    compile::PlanCompiler,
    config::MapperConfig,
    correct::{CorrectionCompiler, correction_fields},
    csv_options,
    data::Frame,
    io_utils::{self, CsvOptions},
    plan::{MappingPlan, MappingPlanner, initial_plan},
    schema::Schema,
    script::{Interpreter, Script},
    session::SessionContext,
    table,
    validate::{ValidationErrors, validate as validate_frame},
};

pub fn plan(args: &PlanArgs, config: &MapperConfig) -> Result<()> {
    let options = csv_options(&args.format)?;
    let schema = Schema::load(&args.schema)?;
    let mut session = SessionContext::new(&args.schema, &args.sources, &config.upload_limits())?;
    let sources = session.sources(&options)?;
    let plan = if args.offline {
        info!("Building an offline plan from same-named columns");
        initial_plan(&schema, &sources)
    } else {
        let model = build_model(config)?;
        MappingPlanner::new(&model)
            .with_sample_rows(config.sample_rows)
            .with_stage_timeout(config.stage_timeout())
            .plan(&schema, &sources)?
    };
    print_plan(&plan);
    session.plan = Some(plan);
    session.save(&args.session)?;
    info!(
        "Session for schema '{}' with {} source file(s) saved to {:?}",
        schema.name,
        session.files.len(),
        args.session
    );
    Ok(())
}

pub fn generate(args: &GenerateArgs, config: &MapperConfig) -> Result<()> {
    let options = csv_options(&args.format)?;
    let mut session = SessionContext::load(&args.session)?;
    let schema = Schema::load(&session.schema_path)?;
    let sources = session.sources(&options)?;
    let mut plan = session
        .plan
        .clone()
        .ok_or_else(|| anyhow!("Session {:?} has no plan; run `plan` first", args.session))?;
    let overrides = args.overrides.iter().cloned().collect::<IndexMap<_, _>>();
    plan.apply_overrides(&overrides);

    let model = build_model(config)?;
    let compiler = PlanCompiler::new(&model)
        .with_sample_rows(config.sample_rows)
        .with_stage_timeout(config.stage_timeout());
    let script = compiler.compile(&schema, &plan, &sources)?;
    session.plan = Some(plan);
    session.script = Some(script.to_string());
    session.touch();
    session.save(&args.session)?;
    if let Some(path) = &args.script_out {
        write_script(&script, path)?;
    }

    let frame = compiler.execute(&script, &sources, &options)?;
    write_table(&frame, &args.output, None)?;
    session.output_table = Some(args.output.clone());
    session.touch();
    session.save(&args.session)?;

    print!("{}", table::render_frame(&frame, args.rows));
    report_validation(&validate_frame(&frame, &schema.validation_schema));
    Ok(())
}

pub fn execute(args: &ExecuteArgs, config: &MapperConfig) -> Result<()> {
    let options = csv_options(&args.format)?;
    let text = fs::read_to_string(&args.script)
        .with_context(|| format!("Reading script {:?}", args.script))?;
    let script = Script::parse(&text).with_context(|| format!("Parsing {:?}", args.script))?;
    let current = args
        .current
        .as_deref()
        .map(|path| read_table(path, &options))
        .transpose()?;
    let model = build_model(config)?;
    let mut interpreter = Interpreter::new(options).with_model(&model);
    if let Some(frame) = &current {
        interpreter = interpreter.with_current(frame);
    }
    let frame = interpreter.run(&script)?;
    let delimiter = io_utils::resolve_output_delimiter(args.output.as_deref(), args.output_delimiter);
    frame.write_csv(args.output.as_deref(), delimiter)?;
    info!(
        "Script {:?} produced {} row(s)",
        args.script,
        frame.row_count()
    );
    Ok(())
}

pub fn validate(args: &ValidateArgs) -> Result<()> {
    let options = csv_options(&args.format)?;
    let schema = Schema::load(&args.schema)?;
    let frame = read_table(&args.input, &options)?;
    let errors = validate_frame(&frame, &schema.validation_schema);
    if errors.is_empty() {
        println!("Validation passed");
        info!("✓ {:?} satisfies schema '{}'", args.input, schema.name);
        return Ok(());
    }
    print_errors(&errors);
    Err(ValidationFailed {
        count: errors.len(),
    }
    .into())
}

pub fn correct(args: &CorrectArgs, config: &MapperConfig) -> Result<()> {
    // The candidate was written by `write_table`: UTF-8, delimiter from its extension.
    let options = CsvOptions::default();
    let mut session = SessionContext::load(&args.session)?;
    let schema = Schema::load(&session.schema_path)?;
    let input = session.output_table.clone().ok_or_else(|| {
        anyhow!(
            "Session {:?} has no candidate table; run `generate` first",
            args.session
        )
    })?;
    let current = read_table(&input, &options)?;

    if args.instructions.is_empty() {
        let errors = validate_frame(&current, &schema.validation_schema);
        let headers = ["column", "validation error"].map(String::from).to_vec();
        let rows = correction_fields(&schema, &errors)
            .into_iter()
            .map(|field| vec![field.label, field.help.unwrap_or_default()])
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
        info!("Pass --instruction column=text to correct a column");
        return Ok(());
    }

    let instructions = args.instructions.iter().cloned().collect::<IndexMap<_, _>>();
    let model = build_model(config)?;
    let (script, frame) = CorrectionCompiler::new(&model)
        .with_sample_rows(config.sample_rows)
        .with_stage_timeout(config.stage_timeout())
        .correct(&current, &instructions, &options)?;
    if let Some(path) = &args.script_out {
        write_script(&script, path)?;
    }

    let output = args.output.clone().unwrap_or(input);
    write_table(&frame, &output, None)?;
    session.script = Some(script.to_string());
    session.output_table = Some(output);
    session.touch();
    session.save(&args.session)?;

    print!("{}", table::render_frame(&frame, args.rows));
    report_validation(&validate_frame(&frame, &schema.validation_schema));
    Ok(())
}

pub fn export(args: &ExportArgs) -> Result<()> {
    let session = SessionContext::load(&args.session)?;
    let input = session.output_table.as_deref().ok_or_else(|| {
        anyhow!(
            "Session {:?} has no table to export; run `generate` first",
            args.session
        )
    })?;
    let frame = read_table(input, &CsvOptions::default())?;
    write_table(&frame, &args.output, args.output_delimiter)?;
    SessionContext::clear(&args.session)?;
    info!(
        "Exported {} row(s) to {:?}; session {:?} cleared",
        frame.row_count(),
        args.output,
        args.session
    );
    Ok(())
}

fn read_table(path: &Path, options: &CsvOptions) -> Result<Frame> {
    Frame::read_csv(path, options).with_context(|| format!("Reading {path:?}"))
}

fn write_table(frame: &Frame, path: &Path, delimiter: Option<u8>) -> Result<()> {
    let delimiter = io_utils::resolve_output_delimiter(Some(path), delimiter);
    frame
        .write_csv(Some(path), delimiter)
        .with_context(|| format!("Writing table to {path:?}"))?;
    info!("Wrote {} row(s) to {path:?}", frame.row_count());
    Ok(())
}

fn write_script(script: &Script, path: &Path) -> Result<()> {
    fs::write(path, script.to_string()).with_context(|| format!("Writing script to {path:?}"))
}

fn print_plan(plan: &MappingPlan) {
    let headers = ["column", "kind", "plan"].map(String::from).to_vec();
    let rows = plan
        .iter()
        .map(|(column, value)| {
            let kind = if value.is_categorical() { "categorical" } else { "formula" };
            vec![column.clone(), kind.to_string(), value.body().to_string()]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
}

fn print_errors(errors: &ValidationErrors) {
    let headers = ["column", "error"].map(String::from).to_vec();
    let rows = errors
        .iter()
        .map(|(column, error)| vec![column.clone(), error.clone()])
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
}

fn report_validation(errors: &ValidationErrors) {
    if errors.is_empty() {
        info!("✓ Candidate table passes validation");
        return;
    }
    print_errors(errors);
    warn!(
        "{} column(s) failed validation; use `correct` to fix them",
        errors.len()
    );
}
