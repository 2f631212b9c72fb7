//! Drafts a [`Schema`] from an example dataset.
//!
//! Descriptions and category sets come from the model, one column at a time;
//! the validation rules are inferred from the data alone. A column the model
//! fails on gets a placeholder description and no categories.

use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    data::Frame,
    model::ModelClient,
    prompt,
    rules::infer_validation_schema,
    schema::{Categories, Schema},
    stage::Deadline,
    table,
};

pub fn placeholder_description(column: &str) -> String {
    format!("Description for {column}")
}

pub struct SchemaSynthesizer<'a> {
    model: &'a dyn ModelClient,
    sample_rows: usize,
    stage_timeout: Option<Duration>,
}

impl<'a> SchemaSynthesizer<'a> {
    pub fn new(model: &'a dyn ModelClient) -> Self {
        Self {
            model,
            sample_rows: 3,
            stage_timeout: None,
        }
    }

    pub fn with_sample_rows(mut self, rows: usize) -> Self {
        self.sample_rows = rows;
        self
    }

    pub fn with_stage_timeout(mut self, limit: Option<Duration>) -> Self {
        self.stage_timeout = limit;
        self
    }

    /// Never fails: model trouble degrades individual columns.
    pub fn synthesize(&self, name: &str, dataset: &Frame) -> Schema {
        let deadline = Deadline::start("synthesize", self.stage_timeout);
        let sample = table::render_frame(dataset, self.sample_rows);
        let mut schema = Schema::new(name);

        for column in dataset.headers() {
            if let Err(err) = deadline.check() {
                warn!("{err}; using a placeholder for '{column}'");
                schema
                    .description_dict
                    .insert(column.clone(), placeholder_description(column));
                continue;
            }
            let description = self.describe(&sample, column);
            schema.description_dict.insert(column.clone(), description);
            if let Some(categories) = self.categories(dataset, column) {
                schema.categories_dict.insert(column.clone(), categories);
            }
        }

        schema.validation_schema = infer_validation_schema(dataset);
        info!(
            "Synthesized schema '{}' with {} column(s), {} categorical",
            schema.name,
            schema.description_dict.len(),
            schema.categories_dict.len()
        );
        schema
    }

    fn describe(&self, sample: &str, column: &str) -> String {
        let response = match self.model.complete(&prompt::describe_column(sample, column)) {
            Ok(response) => response,
            Err(err) => {
                warn!("Describing '{column}' failed: {err}");
                return placeholder_description(column);
            }
        };
        let description = prompt::strip_fences(&response)
            .trim_start_matches("Description:")
            .trim()
            .to_string();
        if description.is_empty() {
            warn!("Empty description for '{column}'");
            return placeholder_description(column);
        }
        debug!("Described '{column}': {description}");
        description
    }

    fn categories(&self, dataset: &Frame, column: &str) -> Option<Categories> {
        let values = dataset
            .column_values(column)?
            .into_iter()
            .filter(|v| !v.trim().is_empty())
            .collect::<Vec<_>>();
        if values.is_empty() {
            return None;
        }
        let answer = self
            .model
            .complete(&prompt::categorical_judgment(column, &values))
            .map_err(|err| warn!("Categorical check for '{column}' failed: {err}"))
            .ok()?;
        match prompt::parse_yes_no(&answer) {
            Some(true) => {}
            Some(false) => return None,
            None => {
                warn!("Unclear categorical answer for '{column}': {answer:?}");
                return None;
            }
        }

        let distinct = dataset.distinct_values(column);
        let distinct = distinct.iter().map(String::as_str).collect::<Vec<_>>();
        let answer = self
            .model
            .complete(&prompt::extract_categories(column, &distinct))
            .map_err(|err| warn!("Extracting categories for '{column}' failed: {err}"))
            .ok()?;
        match prompt::parse_category_list(&answer) {
            Some(categories) => {
                debug!("Categories for '{column}': {categories:?}");
                Some(Categories::Values(categories))
            }
            None => {
                warn!("Could not read categories for '{column}' from {answer:?}");
                None
            }
        }
    }
}
