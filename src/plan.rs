//! Mapping plans: one natural-language derivation per target column.
//!
//! A plan value is either categorical (prefixed with [`PLAN_MARKER`], naming
//! the source columns a category is derived from) or a free formula over
//! `table.column` tokens. Plans are reviewed and overridden by a human before
//! they are compiled.

use std::{fmt, time::Duration};

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    data::normalize_column_name,
    model::ModelClient,
    prompt,
    schema::Schema,
    source::SourceSet,
    stage::{Deadline, StageError},
};

pub const PLAN_MARKER: &str = "derived-from:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanValue {
    /// Text after the marker.
    Categorical(String),
    Formula(String),
}

impl PlanValue {
    /// Reads raw plan text; a leading marker makes it categorical.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.strip_prefix(PLAN_MARKER) {
            Some(rest) => PlanValue::Categorical(rest.trim().to_string()),
            None => PlanValue::Formula(trimmed.to_string()),
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, PlanValue::Categorical(_))
    }

    /// The plan text without the marker.
    pub fn body(&self) -> &str {
        match self {
            PlanValue::Categorical(text) | PlanValue::Formula(text) => text,
        }
    }
}

impl fmt::Display for PlanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanValue::Categorical(text) => write!(f, "{PLAN_MARKER} {text}"),
            PlanValue::Formula(text) => f.write_str(text),
        }
    }
}

impl Serialize for PlanValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlanValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(PlanValue::parse(&text))
    }
}

/// Column → plan value, in schema column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingPlan {
    entries: IndexMap<String, PlanValue>,
}

impl MappingPlan {
    pub fn insert(&mut self, column: impl Into<String>, value: PlanValue) {
        self.entries.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&PlanValue> {
        self.entries.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PlanValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn covers(&self, schema: &Schema) -> bool {
        schema
            .description_dict
            .keys()
            .all(|column| self.entries.contains_key(column))
    }

    /// Replaces plan values with human edits. Keys that are not planned
    /// columns are ignored.
    pub fn apply_overrides(&mut self, overrides: &IndexMap<String, String>) {
        for (column, text) in overrides {
            match self.entries.get_mut(column) {
                Some(value) => {
                    debug!("Plan override for '{column}': {text}");
                    *value = PlanValue::parse(text);
                }
                None => warn!("Ignoring plan override for unknown column '{column}'"),
            }
        }
    }
}

/// A plan built without the model: each target column points at a source
/// column with the same normalized name, when one exists.
pub fn initial_plan(schema: &Schema, sources: &SourceSet) -> MappingPlan {
    let mut plan = MappingPlan::default();
    for column in schema.description_dict.keys() {
        let wanted = normalize_column_name(column);
        let matched = sources.tables().iter().find_map(|t| {
            t.frame
                .headers()
                .iter()
                .find(|h| normalize_column_name(h) == wanted)
                .map(|h| format!("{}.{h}", t.id))
        });
        let text = matched.unwrap_or_else(|| {
            warn!("No source column matches '{column}'; leaving its plan empty");
            String::new()
        });
        let value = if schema.is_categorical(column) {
            PlanValue::Categorical(text)
        } else {
            PlanValue::Formula(text)
        };
        plan.insert(column.clone(), value);
    }
    plan
}

pub struct MappingPlanner<'a> {
    model: &'a dyn ModelClient,
    sample_rows: usize,
    stage_timeout: Option<Duration>,
}

impl<'a> MappingPlanner<'a> {
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

    /// Asks the model for a plan value per schema column, in order.
    pub fn plan(&self, schema: &Schema, sources: &SourceSet) -> Result<MappingPlan, StageError> {
        let deadline = Deadline::start("plan", self.stage_timeout);
        let samples = sources.render_samples(self.sample_rows);
        let mut plan = MappingPlan::default();
        for (column, description) in &schema.description_dict {
            deadline.check()?;
            let value = match schema.categories_for(column) {
                Some(categories) => {
                    let prompt =
                        prompt::categorical_plan(&samples, column, description, categories);
                    debug!("Categorical plan prompt for '{column}':\n{prompt}");
                    let response = self
                        .model
                        .complete(&prompt)
                        .map_err(|err| deadline.model_error(err))?;
                    // The model sometimes echoes the marker back.
                    match PlanValue::parse(&prompt::strip_fences(&response)) {
                        PlanValue::Categorical(text) | PlanValue::Formula(text) => {
                            PlanValue::Categorical(text)
                        }
                    }
                }
                None => {
                    let prompt = prompt::formula_plan(&samples, column, description);
                    debug!("Formula plan prompt for '{column}':\n{prompt}");
                    let response = self
                        .model
                        .complete(&prompt)
                        .map_err(|err| deadline.model_error(err))?;
                    PlanValue::Formula(prompt::strip_fences(&response))
                }
            };
            debug!("Planned '{column}': {value}");
            plan.insert(column.clone(), value);
        }
        info!("Planned {} column(s) for schema '{}'", plan.len(), schema.name);
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Frame, model::ScriptedModel, schema::Categories};

    fn sources() -> SourceSet {
        let mut set = SourceSet::default();
        set.push(
            "people.csv".into(),
            "people.csv".into(),
            Frame::new(vec!["Age".to_string(), "risk".to_string()]),
        );
        set
    }

    fn schema() -> Schema {
        let mut schema = Schema::new("patients");
        schema.description_dict.insert("age".into(), "Age in years".into());
        schema.description_dict.insert("risk".into(), "Risk level".into());
        schema.description_dict.insert("ward".into(), "Hospital ward".into());
        schema.categories_dict.insert(
            "risk".into(),
            Categories::Values(vec!["low".into(), "high".into()]),
        );
        schema
    }

    #[test]
    fn plan_value_text_round_trips_through_the_marker() {
        let value = PlanValue::parse("  derived-from: people.risk ");
        assert_eq!(value, PlanValue::Categorical("people.risk".into()));
        assert_eq!(value.to_string(), "derived-from: people.risk");
        assert_eq!(PlanValue::parse(&value.to_string()), value);
        assert!(!PlanValue::parse("people.age").is_categorical());
    }

    #[test]
    fn planner_covers_every_column_and_marks_categories() {
        let model = ScriptedModel::new(["people.Age", "derived-from: people.risk", "unknown"]);
        let plan = MappingPlanner::new(&model).plan(&schema(), &sources()).unwrap();
        assert!(plan.covers(&schema()));
        assert_eq!(plan.get("age"), Some(&PlanValue::Formula("people.Age".into())));
        assert_eq!(
            plan.get("risk"),
            Some(&PlanValue::Categorical("people.risk".into()))
        );
        let prompts = model.prompts();
        assert!(prompts[1].contains("low, high"));
        assert!(prompts[0].contains("parsed from"));
    }

    #[test]
    fn planner_propagates_model_errors() {
        let model = ScriptedModel::new(["people.Age"]);
        let err = MappingPlanner::new(&model)
            .plan(&schema(), &sources())
            .unwrap_err();
        assert!(matches!(err, StageError::Model { stage: "plan", .. }));
    }

    #[test]
    fn initial_plan_matches_same_named_columns() {
        let plan = initial_plan(&schema(), &sources());
        assert_eq!(plan.get("age"), Some(&PlanValue::Formula("people.Age".into())));
        assert_eq!(
            plan.get("risk"),
            Some(&PlanValue::Categorical("people.risk".into()))
        );
        assert_eq!(plan.get("ward"), Some(&PlanValue::Formula(String::new())));
    }

    #[test]
    fn overrides_replace_in_place_and_skip_unknown_columns() {
        let mut plan = initial_plan(&schema(), &sources());
        let overrides = IndexMap::from([
            ("ward".to_string(), "derived-from: people.risk".to_string()),
            ("bogus".to_string(), "x".to_string()),
        ]);
        plan.apply_overrides(&overrides);
        assert!(plan.get("ward").is_some_and(PlanValue::is_categorical));
        assert!(plan.get("bogus").is_none());
        assert_eq!(plan.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), ["age", "risk", "ward"]);

        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"ward\":\"derived-from: people.risk\""), "{json}");
        assert_eq!(serde_json::from_str::<MappingPlan>(&json).unwrap(), plan);
    }
}
