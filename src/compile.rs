//! Turns a reviewed mapping plan into a transform script and runs it.
//!
//! Formula columns get one model-written line each, in schema order, after
//! the load statements. Categorical columns get a fixed `nearest` or
//! `classify` step fed by the source columns their plan names. A final
//! `select` pins the output to the schema's columns and order.

use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    data::{Frame, normalize_column_name},
    io_utils::CsvOptions,
    model::ModelClient,
    plan::{MappingPlan, PLAN_MARKER, PlanValue},
    prompt,
    schema::{Categories, Schema},
    script::{ColumnTransform, Interpreter, Script, ScriptStep},
    source::{SourceSet, variable_name},
    stage::{Deadline, StageError},
};

pub struct PlanCompiler<'a> {
    model: &'a dyn ModelClient,
    sample_rows: usize,
    stage_timeout: Option<Duration>,
}

impl<'a> PlanCompiler<'a> {
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

    pub fn compile(
        &self,
        schema: &Schema,
        plan: &MappingPlan,
        sources: &SourceSet,
    ) -> Result<Script, StageError> {
        let deadline = Deadline::start("compile", self.stage_timeout);
        let samples = sources.render_samples(self.sample_rows);
        let example = example_variable(sources);

        let mut script = Script::default();
        for table in sources.tables() {
            script.push(ScriptStep::Load {
                id: table.id.clone(),
                path: table.path.clone(),
            });
        }

        let mut categorical = Vec::new();
        for (column, description) in &schema.description_dict {
            let plan_text = match plan.get(column) {
                Some(value) => value.body().to_string(),
                None => {
                    warn!("No plan for '{column}'; compiling from its description");
                    description.clone()
                }
            };
            if let Some(categories) = schema.categories_for(column) {
                categorical.push((column, categories, plan_text));
                continue;
            }
            if plan.get(column).is_some_and(PlanValue::is_categorical) {
                warn!("'{column}' has no categories; treating its plan as a formula");
            }

            deadline.check()?;
            let prompt = prompt::compile_line(
                &samples,
                &script.to_string(),
                column,
                &plan_text,
                &example,
            );
            debug!("Compile prompt for '{column}':\n{prompt}");
            let response = self
                .model
                .complete(&prompt)
                .map_err(|err| deadline.model_error(err))?;
            let line = assignment_for(column, &response);
            debug!("Compiled '{column}': {}", line.expression);
            script.push(ScriptStep::Assign(line));
        }

        for (column, categories, plan_text) in categorical {
            script.push(categorical_step(column, categories, &plan_text, sources));
        }
        script.push(ScriptStep::Select(schema.columns()));
        info!("Compiled a {}-line script", script.len());
        Ok(script)
    }

    /// Runs a compiled script against the loaded sources. `classify` steps
    /// use this compiler's model.
    pub fn execute(
        &self,
        script: &Script,
        sources: &SourceSet,
        options: &CsvOptions,
    ) -> Result<Frame, StageError> {
        let frame = Interpreter::new(*options)
            .with_sources(sources)
            .with_model(self.model)
            .run(script)?;
        Ok(frame)
    }

    pub fn compile_and_run(
        &self,
        schema: &Schema,
        plan: &MappingPlan,
        sources: &SourceSet,
        options: &CsvOptions,
    ) -> Result<(Script, Frame), StageError> {
        let script = self.compile(schema, plan, sources)?;
        let frame = self.execute(&script, sources, options)?;
        Ok((script, frame))
    }
}

/// Reads a model-written line as an assignment to `column`. Whatever target
/// the model wrote, the schema column is the one assigned.
pub fn assignment_for(column: &str, response: &str) -> ColumnTransform {
    let Some(line) = prompt::extract_code_line(response) else {
        warn!("Empty code line for '{column}'");
        return ColumnTransform::new(column, "");
    };
    let (target, expression) = prompt::split_assignment(&line);
    if let Some(target) = target.filter(|t| t != column) {
        if target.starts_with(PLAN_MARKER) {
            warn!("Generated line for '{column}' assigned to marker column '{target}'");
        } else {
            warn!("Generated line for '{column}' assigned to '{target}'; using '{column}'");
        }
    }
    ColumnTransform::new(column, expression)
}

fn categorical_step(
    column: &str,
    categories: &Categories,
    plan_text: &str,
    sources: &SourceSet,
) -> ScriptStep {
    let mut inputs = sources
        .references_in(plan_text)
        .iter()
        .map(|c| c.variable())
        .collect::<Vec<_>>();
    if inputs.is_empty() {
        inputs = same_named(column, sources).into_iter().collect();
    }
    if inputs.is_empty() {
        warn!("Plan for '{column}' names no source column; it will be left empty");
        return ScriptStep::Assign(ColumnTransform::new(column, "\"\""));
    }
    match categories {
        Categories::Values(values) => ScriptStep::Nearest {
            column: column.to_string(),
            sources: inputs,
            categories: values.clone(),
        },
        Categories::Description(description) => ScriptStep::Classify {
            column: column.to_string(),
            sources: inputs,
            description: description.clone(),
        },
    }
}

fn same_named(column: &str, sources: &SourceSet) -> Option<String> {
    let wanted = normalize_column_name(column);
    sources.tables().iter().find_map(|t| {
        t.frame
            .headers()
            .iter()
            .find(|h| normalize_column_name(h) == wanted)
            .map(|h| variable_name(&t.id, h))
    })
}

fn example_variable(sources: &SourceSet) -> String {
    sources
        .tables()
        .iter()
        .find_map(|t| t.frame.headers().first().map(|h| variable_name(&t.id, h)))
        .unwrap_or_else(|| "people__age".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    #[test]
    fn assignment_target_is_always_the_schema_column() {
        let line = assignment_for("age", "```\nderived-from: age = to_int(people__age)\n```");
        assert_eq!(line.column, "age");
        assert_eq!(line.expression, "to_int(people__age)");
        assert_eq!(line.references, vec!["people__age".to_string()]);

        let bare = assignment_for("name", "people__first_name");
        assert_eq!(bare.expression, "people__first_name");
        assert!(assignment_for("name", "").expression.is_empty());
    }

    #[test]
    fn categorical_columns_use_fixed_steps_after_formulas() {
        let mut sources = SourceSet::default();
        sources.push(
            "people.csv".into(),
            "data/people.csv".into(),
            Frame::from_rows(
                vec!["age".into(), "score".into()],
                vec![vec!["36".into(), "hi".into()]],
            )
            .unwrap(),
        );
        let mut schema = Schema::new("patients");
        schema.description_dict.insert("risk".into(), "Risk".into());
        schema.description_dict.insert("age".into(), "Age".into());
        schema.categories_dict.insert(
            "risk".into(),
            Categories::Values(vec!["low".into(), "high".into()]),
        );
        let mut plan = MappingPlan::default();
        // Edited without the marker: the schema still decides.
        plan.insert("risk", PlanValue::Formula("people.score".into()));
        plan.insert("age", PlanValue::Formula("people.age".into()));

        let model = ScriptedModel::new(["age = people__age"]);
        let compiler = PlanCompiler::new(&model);
        let (script, frame) = compiler
            .compile_and_run(&schema, &plan, &sources, &CsvOptions::default())
            .unwrap();
        assert_eq!(
            script.to_string(),
            "load people \"data/people.csv\"\n\
             set age = people__age\n\
             nearest risk <- people__score [\"low\",\"high\"]\n\
             select [\"risk\",\"age\"]\n"
        );
        assert_eq!(frame.rows(), &[vec!["high".to_string(), "36".to_string()]]);
        assert_eq!(model.prompts().len(), 1);
    }
}
