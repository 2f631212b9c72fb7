//! Applies human correction instructions to a candidate table.
//!
//! Each non-blank instruction becomes one model-written line rewriting its
//! column; the script starts from the current table, so columns without an
//! instruction pass through unchanged.

use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info};

use crate::{
    compile::assignment_for,
    data::Frame,
    io_utils::CsvOptions,
    model::ModelClient,
    prompt,
    schema::{FormField, Schema},
    script::{CURRENT_TABLE, Interpreter, Script, ScriptStep},
    source::variable_name,
    stage::{Deadline, StageError},
    table,
    validate::ValidationErrors,
};

/// One form entry per schema column, seeded with that column's validation
/// error as help text.
pub fn correction_fields(schema: &Schema, errors: &ValidationErrors) -> Vec<FormField> {
    schema
        .description_dict
        .keys()
        .map(|column| FormField {
            key: column.clone(),
            initial: String::new(),
            label: column.clone(),
            help: errors.get(column).cloned(),
        })
        .collect()
}

pub struct CorrectionCompiler<'a> {
    model: &'a dyn ModelClient,
    sample_rows: usize,
    stage_timeout: Option<Duration>,
}

impl<'a> CorrectionCompiler<'a> {
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
        current: &Frame,
        instructions: &IndexMap<String, String>,
    ) -> Result<Script, StageError> {
        let deadline = Deadline::start("correct", self.stage_timeout);
        let sample = table::render_frame(current, self.sample_rows);
        let mut script = Script::new(vec![ScriptStep::Start { path: None }]);
        for (column, instruction) in instructions {
            let instruction = instruction.trim();
            if instruction.is_empty() {
                continue;
            }
            deadline.check()?;
            let prompt = prompt::correction_line(
                &sample,
                column,
                instruction,
                &variable_name(CURRENT_TABLE, column),
            );
            debug!("Correction prompt for '{column}':\n{prompt}");
            let response = self
                .model
                .complete(&prompt)
                .map_err(|err| deadline.model_error(err))?;
            script.push(ScriptStep::Assign(assignment_for(column, &response)));
        }
        info!("Compiled {} correction line(s)", script.len() - 1);
        Ok(script)
    }

    /// Compiles and runs the corrections. On any failure the current table is
    /// left as it was.
    pub fn correct(
        &self,
        current: &Frame,
        instructions: &IndexMap<String, String>,
        options: &CsvOptions,
    ) -> Result<(Script, Frame), StageError> {
        let script = self.compile(current, instructions)?;
        let frame = Interpreter::new(*options)
            .with_current(current)
            .with_model(self.model)
            .run(&script)?;
        Ok((script, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NoModel, ScriptedModel};

    fn current() -> Frame {
        Frame::from_rows(
            vec!["name".into(), "age".into()],
            vec![
                vec!["ada".into(), "36 years".into()],
                vec!["alan".into(), "41 years".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn blank_instructions_return_the_table_unchanged() {
        let instructions = IndexMap::from([
            ("name".to_string(), "   ".to_string()),
            ("age".to_string(), String::new()),
        ]);
        let (script, frame) = CorrectionCompiler::new(&NoModel)
            .correct(&current(), &instructions, &CsvOptions::default())
            .unwrap();
        assert_eq!(script.to_string(), "start current\n");
        assert_eq!(frame, current());
    }

    #[test]
    fn instructions_rewrite_only_their_column() {
        let model = ScriptedModel::new([r#"age = extract(current__age, "([0-9]+)")"#]);
        let instructions = IndexMap::from([("age".to_string(), "keep the number".to_string())]);
        let (_, frame) = CorrectionCompiler::new(&model)
            .correct(&current(), &instructions, &CsvOptions::default())
            .unwrap();
        assert_eq!(frame.column_values("age").unwrap(), vec!["36", "41"]);
        assert_eq!(frame.column_values("name"), current().column_values("name"));
        assert!(model.prompts()[0].contains("keep the number"));
    }

    #[test]
    fn failing_correction_reports_its_line() {
        let model = ScriptedModel::new(["age = current__weight"]);
        let instructions = IndexMap::from([("age".to_string(), "use weight".to_string())]);
        let err = CorrectionCompiler::new(&model)
            .correct(&current(), &instructions, &CsvOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::Execution(ref e) if e.line == 2), "{err}");
    }

    #[test]
    fn correction_form_carries_validation_errors() {
        let mut schema = Schema::new("people");
        schema.description_dict.insert("name".into(), "Name".into());
        schema.description_dict.insert("age".into(), "Age".into());
        let errors = ValidationErrors::from([("age".to_string(), "bad age".to_string())]);
        let fields = correction_fields(&schema, &errors);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].help, None);
        assert_eq!(fields[1].help.as_deref(), Some("bad age"));
    }
}
