use std::fs;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::info;
use serde_json::json;

use crate::{
    build_model,
    cli::{EditArgs, FieldsArgs, SynthesizeArgs},
    config::MapperConfig,
    csv_options,
    data::Frame,
    schema::{Schema, VALIDATION_FIELD},
    synth::SchemaSynthesizer,
    table,
};

pub fn synthesize(args: &SynthesizeArgs, config: &MapperConfig) -> Result<()> {
    let options = csv_options(&args.format)?;
    let dataset = Frame::read_csv(&args.input, &options)
        .with_context(|| format!("Reading example dataset {:?}", args.input))?;
    let name = args.name.clone().unwrap_or_else(|| {
        args.input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("schema")
            .to_string()
    });
    info!(
        "Synthesizing schema '{name}' from {} column(s) of {:?}",
        dataset.column_count(),
        args.input
    );
    let model = build_model(config)?;
    let schema = SchemaSynthesizer::new(&model)
        .with_sample_rows(config.sample_rows)
        .with_stage_timeout(config.stage_timeout())
        .synthesize(&name, &dataset);
    schema
        .save(&args.schema)
        .with_context(|| format!("Writing schema to {:?}", args.schema))?;
    info!("Schema written to {:?}", args.schema);
    Ok(())
}

pub fn fields(args: &FieldsArgs) -> Result<()> {
    let schema = Schema::load(&args.schema)?;
    let fields = schema.edit_fields();
    if args.json {
        let entries = fields
            .iter()
            .map(|f| {
                json!({
                    "key": f.key,
                    "label": f.label,
                    "initial": f.initial,
                    "help": f.help,
                })
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    let headers = ["key", "label", "value"].map(String::from).to_vec();
    let rows = fields
        .into_iter()
        .map(|f| vec![f.key, f.label, f.initial])
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    Ok(())
}

pub fn edit(args: &EditArgs) -> Result<()> {
    let mut schema = Schema::load(&args.schema)?;
    let mut edits = args.edits.iter().cloned().collect::<IndexMap<_, _>>();
    if let Some(path) = &args.validation_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Reading validation schema from {path:?}"))?;
        edits.insert(VALIDATION_FIELD.to_string(), text);
    }
    schema
        .apply_edits(&edits)
        .with_context(|| format!("Editing {:?}", args.schema))?;
    schema
        .save(&args.schema)
        .with_context(|| format!("Writing schema to {:?}", args.schema))?;
    info!("Applied {} edit(s) to {:?}", edits.len(), args.schema);
    Ok(())
}
