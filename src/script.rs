//! Transform scripts: a typed list of steps that builds a table, one line per
//! step, run by a single interpreter.
//!
//! A script renders to (and parses from) a line-oriented text form:
//!
//! ```text
//! load people "data/people.csv"
//! set age = to_int(people__age)
//! set "Full Name" = join(" ", people__first, people__last)
//! nearest risk <- people__risk_score ["low","high"]
//! classify smoker <- people__notes "yes if the notes mention smoking, otherwise no"
//! select ["age","Full Name","risk","smoker"]
//! ```
//!
//! Running a script is all-or-nothing: the first failing line aborts the run
//! with an [`ExecutionError`] and no table is returned.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt,
    path::PathBuf,
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use log::{debug, info};
use serde::de::DeserializeOwned;
use similar::TextDiff;
use thiserror::Error;

use crate::{
    data::{Frame, normalize_column_name},
    expr,
    io_utils::CsvOptions,
    model::ModelClient,
    prompt,
    source::SourceSet,
};

/// Table name the `start` step binds the table being corrected to.
pub const CURRENT_TABLE: &str = "current";

/// One synthesized line: the target column, the source variables its
/// expression reads, and the expression itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTransform {
    pub column: String,
    pub references: Vec<String>,
    pub expression: String,
}

impl ColumnTransform {
    pub fn new(column: impl Into<String>, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        Self {
            column: column.into(),
            references: referenced_variables(&expression),
            expression,
        }
    }
}

/// Table variables (`table__column` or `table.column`) an expression reads,
/// in order of first use. String literals are ignored.
pub fn referenced_variables(expression: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut token = String::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut flush = |token: &mut String| {
        let candidate = token.trim_end_matches('.');
        if (candidate.contains("__") || candidate.contains('.')) && seen.insert(candidate.to_string())
        {
            found.push(candidate.to_string());
        }
        token.clear();
    };
    for ch in expression.chars() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        let continues = ch.is_ascii_alphanumeric() || ch == '_' || (ch == '.' && !token.is_empty());
        if continues && !(token.is_empty() && ch.is_ascii_digit()) {
            token.push(ch);
            continue;
        }
        flush(&mut token);
        if ch == '"' {
            in_string = true;
        }
    }
    flush(&mut token);
    found
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Binds a source file under an identifier.
    Load { id: String, path: PathBuf },
    /// Starts from an existing table, bound as `current`; the output begins
    /// as a copy of it.
    Start { path: Option<PathBuf> },
    Assign(ColumnTransform),
    /// Maps source values to the most similar of a fixed category list.
    Nearest {
        column: String,
        sources: Vec<String>,
        categories: Vec<String>,
    },
    /// Asks the model to pick a category for each distinct source value.
    Classify {
        column: String,
        sources: Vec<String>,
        description: String,
    },
    /// Keeps exactly these output columns, in this order.
    Select(Vec<String>),
}

impl ScriptStep {
    /// The output column this step writes, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            ScriptStep::Assign(transform) => Some(&transform.column),
            ScriptStep::Nearest { column, .. } | ScriptStep::Classify { column, .. } => {
                Some(column)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptStep::Load { id, path } => {
                write!(f, "load {id} {}", quote(&path.to_string_lossy()))
            }
            ScriptStep::Start { path: None } => write!(f, "start {CURRENT_TABLE}"),
            ScriptStep::Start { path: Some(path) } => {
                write!(f, "start {CURRENT_TABLE} {}", quote(&path.to_string_lossy()))
            }
            ScriptStep::Assign(transform) => write!(
                f,
                "set {} = {}",
                name_token(&transform.column),
                transform.expression
            ),
            ScriptStep::Nearest {
                column,
                sources,
                categories,
            } => write!(
                f,
                "nearest {} <- {} {}",
                name_token(column),
                sources.join(", "),
                serde_json::to_string(categories).map_err(|_| fmt::Error)?
            ),
            ScriptStep::Classify {
                column,
                sources,
                description,
            } => write!(
                f,
                "classify {} <- {} {}",
                name_token(column),
                sources.join(", "),
                quote(description)
            ),
            ScriptStep::Select(columns) => write!(
                f,
                "select {}",
                serde_json::to_string(columns).map_err(|_| fmt::Error)?
            ),
        }
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

fn name_token(name: &str) -> String {
    let bare = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if bare { name.to_string() } else { quote(name) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("script line {line}: {message}")]
pub struct ScriptParseError {
    pub line: usize,
    pub message: String,
}

/// A script line that failed while running. `line` is 1-based.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line} failed ({text}): {reason}")]
pub struct ExecutionError {
    pub line: usize,
    pub text: String,
    pub reason: String,
}

impl Script {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    pub fn push(&mut self, step: ScriptStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parses the text form. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, ScriptParseError> {
        let mut steps = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let step = parse_step(line).map_err(|message| ScriptParseError {
                line: idx + 1,
                message,
            })?;
            steps.push(step);
        }
        Ok(Self { steps })
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{step}")?;
        }
        Ok(())
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn word(&mut self) -> Option<&'a str> {
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return None;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        self.rest = &rest[end..];
        Some(&rest[..end])
    }

    fn json<T: DeserializeOwned>(&mut self, what: &str) -> Result<T, String> {
        let rest = self.rest.trim_start();
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<T>();
        match stream.next() {
            Some(Ok(value)) => {
                self.rest = &rest[stream.byte_offset()..];
                Ok(value)
            }
            Some(Err(err)) => Err(format!("invalid {what}: {err}")),
            None => Err(format!("missing {what}")),
        }
    }

    /// A column name: JSON-quoted, or a bare token ending at whitespace or
    /// `=`.
    fn name(&mut self) -> Result<String, String> {
        let rest = self.rest.trim_start();
        if rest.starts_with('"') {
            return self.json("column name");
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        if end == 0 {
            return Err("missing column name".to_string());
        }
        self.rest = &rest[end..];
        Ok(rest[..end].to_string())
    }

    fn expect(&mut self, token: &str) -> Result<(), String> {
        let rest = self.rest.trim_start();
        match rest.strip_prefix(token) {
            Some(after) => {
                self.rest = after;
                Ok(())
            }
            None => Err(format!("expected '{token}'")),
        }
    }

    /// Comma-separated source variables up to the next `[` or `"`.
    fn sources(&mut self) -> Result<Vec<String>, String> {
        let rest = self.rest.trim_start();
        let end = rest.find(['[', '"']).unwrap_or(rest.len());
        self.rest = &rest[end..];
        let sources = rest[..end]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if sources.is_empty() {
            return Err("missing source columns".to_string());
        }
        Ok(sources)
    }

    fn finish(&self) -> Result<(), String> {
        let rest = self.rest.trim();
        if rest.is_empty() {
            Ok(())
        } else {
            Err(format!("unexpected trailing text '{rest}'"))
        }
    }
}

fn parse_step(line: &str) -> Result<ScriptStep, String> {
    let mut cursor = Cursor { rest: line };
    let keyword = cursor.word().unwrap_or_default();
    let step = match keyword {
        "load" => {
            let id = cursor
                .word()
                .ok_or_else(|| "missing table identifier".to_string())?
                .to_string();
            let path: String = cursor.json("path")?;
            ScriptStep::Load {
                id,
                path: PathBuf::from(path),
            }
        }
        "start" => {
            cursor.expect(CURRENT_TABLE)?;
            let path = if cursor.rest.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(cursor.json::<String>("path")?))
            };
            ScriptStep::Start { path }
        }
        "set" => {
            let column = cursor.name()?;
            cursor.expect("=")?;
            let expression = cursor.rest.trim().to_string();
            cursor.rest = "";
            ScriptStep::Assign(ColumnTransform::new(column, expression))
        }
        "nearest" => {
            let column = cursor.name()?;
            cursor.expect("<-")?;
            let sources = cursor.sources()?;
            let categories: Vec<String> = cursor.json("category list")?;
            ScriptStep::Nearest {
                column,
                sources,
                categories,
            }
        }
        "classify" => {
            let column = cursor.name()?;
            cursor.expect("<-")?;
            let sources = cursor.sources()?;
            let description: String = cursor.json("category description")?;
            ScriptStep::Classify {
                column,
                sources,
                description,
            }
        }
        "select" => ScriptStep::Select(cursor.json("column list")?),
        other => return Err(format!("unknown statement '{other}'")),
    };
    cursor.finish()?;
    Ok(step)
}

/// The category most similar to `value`. Case-insensitive exact matches win;
/// otherwise the highest character-level similarity ratio, first on ties.
/// Empty values stay empty.
pub fn nearest_category(value: &str, categories: &[String]) -> String {
    let value = value.trim();
    if value.is_empty() || categories.is_empty() {
        return value.to_string();
    }
    if let Some(exact) = categories.iter().find(|c| c.trim().eq_ignore_ascii_case(value)) {
        return exact.clone();
    }
    let needle = value.to_lowercase();
    let mut best = (&categories[0], f32::MIN);
    for category in categories {
        let hay = category.to_lowercase();
        let ratio = TextDiff::from_chars(needle.as_str(), hay.as_str()).ratio();
        if ratio > best.1 {
            best = (category, ratio);
        }
    }
    best.0.clone()
}

/// Runs scripts against preloaded sources, an optional current table, and an
/// optional model for `classify` steps.
pub struct Interpreter<'a> {
    sources: Option<&'a SourceSet>,
    current: Option<&'a Frame>,
    model: Option<&'a dyn ModelClient>,
    options: CsvOptions,
}

/// The private namespace of one run.
struct Run<'a> {
    tables: HashMap<String, Cow<'a, Frame>>,
    output: Frame,
}

impl<'a> Interpreter<'a> {
    pub fn new(options: CsvOptions) -> Self {
        Self {
            sources: None,
            current: None,
            model: None,
            options,
        }
    }

    /// `load` steps naming one of these tables use it instead of reading the
    /// file again.
    pub fn with_sources(mut self, sources: &'a SourceSet) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_current(mut self, frame: &'a Frame) -> Self {
        self.current = Some(frame);
        self
    }

    pub fn with_model(mut self, model: &'a dyn ModelClient) -> Self {
        self.model = Some(model);
        self
    }

    pub fn run(&self, script: &Script) -> Result<Frame, ExecutionError> {
        let mut run = Run {
            tables: HashMap::new(),
            output: Frame::default(),
        };
        for (idx, step) in script.steps().iter().enumerate() {
            debug!("Executing line {}: {step}", idx + 1);
            self.execute(&mut run, step)
                .map_err(|err| ExecutionError {
                    line: idx + 1,
                    text: step.to_string(),
                    reason: format!("{err:#}"),
                })?;
        }
        info!(
            "Script produced {} row(s) across {} column(s)",
            run.output.row_count(),
            run.output.column_count()
        );
        Ok(run.output)
    }

    fn execute(&self, run: &mut Run<'a>, step: &ScriptStep) -> Result<()> {
        match step {
            ScriptStep::Load { id, path } => {
                let frame = match self.sources.and_then(|s| s.get(id)) {
                    Some(table) => Cow::Borrowed(&table.frame),
                    None => Cow::Owned(
                        Frame::read_csv(path, &self.options)
                            .with_context(|| format!("Loading {path:?}"))?,
                    ),
                };
                run.tables.insert(id.clone(), frame);
            }
            ScriptStep::Start { path } => {
                let frame = match (self.current, path) {
                    (Some(frame), _) => Cow::Borrowed(frame),
                    (None, Some(path)) => Cow::Owned(
                        Frame::read_csv(path, &self.options)
                            .with_context(|| format!("Loading {path:?}"))?,
                    ),
                    (None, None) => bail!("no current table to start from"),
                };
                run.output = (*frame).clone();
                run.tables.insert(CURRENT_TABLE.to_string(), frame);
            }
            ScriptStep::Assign(transform) => {
                let values = evaluate_transform(&run.tables, run.output.row_count(), transform)?;
                run.output.set_column(&transform.column, values);
            }
            ScriptStep::Nearest {
                column,
                sources,
                categories,
            } => {
                ensure!(!categories.is_empty(), "no categories to choose from");
                let values = source_text(&run.tables, run.output.row_count(), sources)?
                    .iter()
                    .map(|value| nearest_category(value, categories))
                    .collect();
                run.output.set_column(column, values);
            }
            ScriptStep::Classify {
                column,
                sources,
                description,
            } => {
                let model = self
                    .model
                    .ok_or_else(|| anyhow!("classify needs a model but none is configured"))?;
                let inputs = source_text(&run.tables, run.output.row_count(), sources)?;
                let mut answers: HashMap<String, String> = HashMap::new();
                let mut values = Vec::with_capacity(inputs.len());
                for input in inputs {
                    if input.is_empty() {
                        values.push(String::new());
                        continue;
                    }
                    if let Some(answer) = answers.get(&input) {
                        values.push(answer.clone());
                        continue;
                    }
                    let response = model
                        .complete(&prompt::classify_value(&input, description))
                        .with_context(|| format!("Classifying '{input}'"))?;
                    let answer = prompt::strip_fences(&response)
                        .lines()
                        .next()
                        .unwrap_or_default()
                        .trim()
                        .trim_matches(['"', '\''])
                        .to_string();
                    answers.insert(input, answer.clone());
                    values.push(answer);
                }
                run.output.set_column(column, values);
            }
            ScriptStep::Select(columns) => {
                run.output = run.output.select(columns)?;
            }
        }
        Ok(())
    }
}

/// A loaded table and column index for a `table__column` or `table.column`
/// variable.
fn resolve<'t>(
    tables: &'t HashMap<String, Cow<'_, Frame>>,
    variable: &str,
) -> Result<(&'t Frame, usize)> {
    let split = [variable.find("__").map(|i| (i, 2)), variable.find('.').map(|i| (i, 1))]
        .into_iter()
        .flatten()
        .min_by_key(|(idx, _)| *idx);
    let Some((idx, width)) = split else {
        bail!("'{variable}' does not name a table column");
    };
    let (table, column) = (&variable[..idx], &variable[idx + width..]);
    let frame = tables
        .get(table)
        .ok_or_else(|| anyhow!("unknown table '{table}' in '{variable}'"))?;
    let wanted = normalize_column_name(column);
    let index = frame
        .headers()
        .iter()
        .position(|h| h == column || normalize_column_name(h) == wanted)
        .ok_or_else(|| anyhow!("table '{table}' has no column '{column}'"))?;
    Ok((&**frame, index))
}

fn bind_all<'t>(
    tables: &'t HashMap<String, Cow<'_, Frame>>,
    variables: &[String],
) -> Result<Vec<(&'t Frame, usize)>> {
    variables.iter().map(|v| resolve(tables, v)).collect()
}

/// Rows a step covers: the longest table it reads, or the longest loaded
/// table when it reads none, and never fewer than the output already has.
fn row_span(
    tables: &HashMap<String, Cow<'_, Frame>>,
    bound: &[(&Frame, usize)],
    output_rows: usize,
) -> usize {
    let longest = if bound.is_empty() {
        tables.values().map(|frame| frame.row_count()).max()
    } else {
        bound.iter().map(|(frame, _)| frame.row_count()).max()
    };
    longest.unwrap_or(0).max(output_rows)
}

fn evaluate_transform(
    tables: &HashMap<String, Cow<'_, Frame>>,
    output_rows: usize,
    transform: &ColumnTransform,
) -> Result<Vec<String>> {
    ensure!(
        !transform.expression.trim().is_empty(),
        "empty expression for '{}'",
        transform.column
    );
    let node = expr::compile_expression(&transform.expression)?;
    let bound = bind_all(tables, &transform.references)?;
    let rows = row_span(tables, &bound, output_rows);
    let mut context = expr::function_context()?;
    let mut values = Vec::with_capacity(rows);
    for row in 0..rows {
        for (name, (frame, column)) in transform.references.iter().zip(&bound) {
            expr::bind(&mut context, name, frame.cell(row, *column))?;
        }
        let value = expr::evaluate(&node, &context)
            .with_context(|| format!("Evaluating row {}", row + 1))?;
        values.push(value);
    }
    Ok(values)
}

/// Per row, the non-empty source cells joined with a space.
fn source_text(
    tables: &HashMap<String, Cow<'_, Frame>>,
    output_rows: usize,
    sources: &[String],
) -> Result<Vec<String>> {
    let bound = bind_all(tables, sources)?;
    let rows = row_span(tables, &bound, output_rows);
    Ok((0..rows)
        .map(|row| {
            bound
                .iter()
                .map(|(frame, column)| frame.cell(row, *column).trim())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FnModel, ModelError, ScriptedModel};
    use std::cell::Cell;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn people() -> SourceSet {
        let mut set = SourceSet::default();
        set.push(
            "people.csv".into(),
            "people.csv".into(),
            Frame::from_rows(
                strings(&["First Name", "Last", "age", "risk score"]),
                vec![
                    strings(&["Ada", "Lovelace", "36", "hi"]),
                    strings(&["Alan", "Turing", "41", "LOW"]),
                    strings(&["Grace", "Hopper", "", ""]),
                ],
            )
            .unwrap(),
        );
        set.push(
            "visits.csv".into(),
            "visits.csv".into(),
            Frame::from_rows(strings(&["notes"]), vec![strings(&["smokes"])]).unwrap(),
        );
        set
    }

    #[test]
    fn references_skip_string_literals_and_functions() {
        assert_eq!(
            referenced_variables(
                r#"join(" ", people__first_name, people.last) + "people__fake" + to_int(people__age)"#
            ),
            strings(&["people__first_name", "people.last", "people__age"])
        );
    }

    #[test]
    fn text_form_round_trips() {
        let script = Script::new(vec![
            ScriptStep::Load {
                id: "people".into(),
                path: "data/people 1.csv".into(),
            },
            ScriptStep::Assign(ColumnTransform::new("age", "to_int(people__age)")),
            ScriptStep::Assign(ColumnTransform::new(
                "Full Name",
                r#"join(" ", people__first_name, people__last)"#,
            )),
            ScriptStep::Nearest {
                column: "risk".into(),
                sources: strings(&["people__risk_score"]),
                categories: strings(&["low", "high"]),
            },
            ScriptStep::Classify {
                column: "smoker".into(),
                sources: strings(&["visits__notes", "people__last"]),
                description: "yes or \"no\"".into(),
            },
            ScriptStep::Select(strings(&["age", "Full Name", "risk", "smoker"])),
        ]);
        let text = script.to_string();
        assert!(text.contains("set \"Full Name\" = join"), "{text}");
        assert_eq!(Script::parse(&text).unwrap(), script);
    }

    #[test]
    fn parse_reports_line_numbers() {
        let err = Script::parse("# header\nload people \"a.csv\"\nfrobnicate x\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("frobnicate"));
        assert!(Script::parse("set age people__age").is_err());
        assert!(Script::parse("start current").is_ok());
    }

    #[test]
    fn nearest_prefers_exact_then_similar() {
        let categories = strings(&["low", "medium", "high"]);
        assert_eq!(nearest_category("LOW", &categories), "low");
        assert_eq!(nearest_category("hi", &categories), "high");
        assert_eq!(nearest_category("med.", &categories), "medium");
        assert_eq!(nearest_category("  ", &categories), "");
    }

    #[test]
    fn rows_align_by_position_across_sources() {
        let sources = people();
        let script = Script::new(vec![
            ScriptStep::Load {
                id: "people".into(),
                path: "people.csv".into(),
            },
            ScriptStep::Load {
                id: "visits".into(),
                path: "visits.csv".into(),
            },
            ScriptStep::Assign(ColumnTransform::new("notes", "visits__notes")),
            ScriptStep::Assign(ColumnTransform::new(
                "name",
                r#"join(" ", people__first_name, people__last)"#,
            )),
            ScriptStep::Nearest {
                column: "risk".into(),
                sources: strings(&["people__risk_score"]),
                categories: strings(&["low", "high"]),
            },
            ScriptStep::Select(strings(&["name", "notes", "risk"])),
        ]);
        let output = Interpreter::new(CsvOptions::default())
            .with_sources(&sources)
            .run(&script)
            .unwrap();
        assert_eq!(output.headers(), strings(&["name", "notes", "risk"]).as_slice());
        assert_eq!(
            output.rows(),
            &[
                strings(&["Ada Lovelace", "smokes", "high"]),
                strings(&["Alan Turing", "", "low"]),
                strings(&["Grace Hopper", "", ""]),
            ]
        );
    }

    #[test]
    fn constant_column_fills_every_row_wherever_it_appears() {
        let sources = people();
        let script = Script::parse(
            "load people \"people.csv\"\n\
             set country = \"US\"\n\
             set age = people__age\n\
             set source = \"intake\"\n\
             select [\"country\",\"age\",\"source\"]\n",
        )
        .unwrap();
        let output = Interpreter::new(CsvOptions::default())
            .with_sources(&sources)
            .run(&script)
            .unwrap();
        assert_eq!(output.column_values("country").unwrap(), vec!["US", "US", "US"]);
        assert_eq!(output.column_values("age").unwrap(), vec!["36", "41", ""]);
        assert_eq!(
            output.column_values("source").unwrap(),
            vec!["intake", "intake", "intake"]
        );
    }

    #[test]
    fn failing_line_aborts_the_whole_run() {
        let sources = people();
        let script = Script::new(vec![
            ScriptStep::Load {
                id: "people".into(),
                path: "people.csv".into(),
            },
            ScriptStep::Assign(ColumnTransform::new("age", "people__age")),
            ScriptStep::Assign(ColumnTransform::new("height", "people__height")),
        ]);
        let err = Interpreter::new(CsvOptions::default())
            .with_sources(&sources)
            .run(&script)
            .unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.text, "set height = people__height");
        assert!(err.reason.contains("no column 'height'"), "{}", err.reason);

        let empty = Script::new(vec![ScriptStep::Assign(ColumnTransform::new("x", " "))]);
        let err = Interpreter::new(CsvOptions::default()).run(&empty).unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn start_current_rewrites_in_place() {
        let current = Frame::from_rows(
            strings(&["name", "age"]),
            vec![strings(&["ada", "36"]), strings(&["alan", "41"])],
        )
        .unwrap();
        let script = Script::new(vec![
            ScriptStep::Start { path: None },
            ScriptStep::Assign(ColumnTransform::new("name", "uppercase(current__name)")),
        ]);
        let output = Interpreter::new(CsvOptions::default())
            .with_current(&current)
            .run(&script)
            .unwrap();
        assert_eq!(output.headers(), current.headers());
        assert_eq!(output.rows()[1], strings(&["ALAN", "41"]));

        let untouched = Interpreter::new(CsvOptions::default())
            .with_current(&current)
            .run(&Script::new(vec![ScriptStep::Start { path: None }]))
            .unwrap();
        assert_eq!(untouched, current);
    }

    #[test]
    fn classify_asks_once_per_distinct_value() {
        let current = Frame::from_rows(
            strings(&["notes"]),
            vec![strings(&["smokes"]), strings(&["smokes"]), strings(&[""])],
        )
        .unwrap();
        let calls = Cell::new(0);
        let model = FnModel(|_prompt: &str| {
            calls.set(calls.get() + 1);
            Ok::<_, ModelError>(" \"yes\"\n".to_string())
        });
        let script = Script::new(vec![
            ScriptStep::Start { path: None },
            ScriptStep::Classify {
                column: "smoker".into(),
                sources: strings(&["current__notes"]),
                description: "yes or no".into(),
            },
        ]);
        let output = Interpreter::new(CsvOptions::default())
            .with_current(&current)
            .with_model(&model)
            .run(&script)
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(output.column_values("smoker").unwrap(), vec!["yes", "yes", ""]);

        let silent = ScriptedModel::new(Vec::<String>::new());
        let err = Interpreter::new(CsvOptions::default())
            .with_current(&current)
            .with_model(&silent)
            .run(&script)
            .unwrap_err();
        assert_eq!(err.line, 2);
    }
}
