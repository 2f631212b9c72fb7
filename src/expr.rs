//! The evaluation environment generated transform lines run in.
//!
//! Lines are `evalexpr` expressions evaluated once per row. Every cell is bound
//! as a string, so numeric work goes through `to_int`/`to_float`. On top of the
//! evalexpr builtins this module registers string, extraction and date helpers.

use anyhow::{Context, Result};
use chrono::Duration;
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value as EvalValue, build_operator_tree,
};
use heck::{ToLowerCamelCase, ToSnakeCase, ToUpperCamelCase};
use regex::Regex;

use crate::data::{parse_naive_date, parse_naive_datetime};

type EvalResult<T> = std::result::Result<T, EvalexprError>;

const UNARY_STRING_FUNCTIONS: &[(&str, fn(&str) -> String)] = &[
    ("lowercase", |s| s.to_lowercase()),
    ("uppercase", |s| s.to_uppercase()),
    ("trim", |s| s.trim().to_string()),
    ("snake_case", |s| s.to_snake_case()),
    ("camel_case", |s| s.to_lower_camel_case()),
    ("pascal_case", |s| s.to_upper_camel_case()),
];

/// Names of every function generated code may call, for prompts.
pub fn function_names() -> Vec<&'static str> {
    let mut names = UNARY_STRING_FUNCTIONS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>();
    names.extend([
        "substring",
        "regex_replace",
        "extract",
        "to_int",
        "to_float",
        "concat",
        "join",
        "coalesce",
        "is_empty",
        "date_add",
        "date_sub",
        "date_diff_days",
        "date_format",
        "datetime_format",
        "datetime_to_date",
    ]);
    names
}

/// A context with the whole function library registered and no variables.
pub fn function_context() -> Result<HashMapContext> {
    let mut context = HashMapContext::new();
    register_string_functions(&mut context)?;
    register_value_functions(&mut context)?;
    register_temporal_functions(&mut context)?;
    Ok(context)
}

pub fn compile_expression(expression: &str) -> Result<Node> {
    build_operator_tree(expression)
        .with_context(|| format!("Parsing expression '{expression}'"))
}

/// Binds `value` as a string variable, replacing any previous binding.
pub fn bind(context: &mut HashMapContext, name: &str, value: &str) -> Result<()> {
    context
        .set_value(name.to_string(), EvalValue::String(value.to_string()))
        .with_context(|| format!("Binding variable '{name}'"))
}

pub fn evaluate(node: &Node, context: &HashMapContext) -> Result<String> {
    let value = node.eval_with_context(context)?;
    Ok(eval_to_cell(&value))
}

/// Renders an evaluated value as a table cell.
pub fn eval_to_cell(value: &EvalValue) -> String {
    match value {
        EvalValue::String(s) => s.clone(),
        EvalValue::Int(i) => i.to_string(),
        EvalValue::Float(f) => f.to_string(),
        EvalValue::Boolean(b) => b.to_string(),
        EvalValue::Tuple(values) => values
            .iter()
            .map(eval_to_cell)
            .collect::<Vec<_>>()
            .join("|"),
        EvalValue::Empty => String::new(),
    }
}

fn register_string_functions(context: &mut HashMapContext) -> Result<()> {
    for (name, func) in UNARY_STRING_FUNCTIONS {
        let func = *func;
        let label = *name;
        context
            .set_function(
                label.to_string(),
                Function::new(move |argument| {
                    let args = expect_args(argument, 1, label)?;
                    Ok(EvalValue::String(func(&eval_to_cell(&args[0]))))
                }),
            )
            .map_err(anyhow::Error::from)?;
    }

    context
        .set_function(
            "substring".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 3, "substring")?;
                let value = eval_to_cell(&args[0]);
                let start = parse_i64_arg(&args[1], "start")?.max(0) as usize;
                let length = parse_i64_arg(&args[2], "length")?.max(0) as usize;
                Ok(EvalValue::String(
                    value.chars().skip(start).take(length).collect(),
                ))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "regex_replace".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 3, "regex_replace")?;
                let value = eval_to_cell(&args[0]);
                let regex = compile_regex(&args[1])?;
                let replacement = expect_string(&args[2], "replacement")?;
                Ok(EvalValue::String(
                    regex.replace_all(&value, replacement).into_owned(),
                ))
            }),
        )
        .map_err(anyhow::Error::from)?;

    // First capture group, or the whole match when the pattern has none.
    context
        .set_function(
            "extract".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "extract")?;
                let value = eval_to_cell(&args[0]);
                let regex = compile_regex(&args[1])?;
                let extracted = regex
                    .captures(&value)
                    .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                Ok(EvalValue::String(extracted))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "concat".into(),
            Function::new(|arguments| {
                Ok(EvalValue::String(
                    variadic(arguments).iter().map(eval_to_cell).collect(),
                ))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "join".into(),
            Function::new(|arguments| {
                let args = variadic(arguments);
                let Some((separator, values)) = args.split_first() else {
                    return Err(eval_error("join expects a separator and values"));
                };
                let separator = expect_string(separator, "separator")?;
                let joined = values
                    .iter()
                    .map(eval_to_cell)
                    .filter(|v| !v.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(separator);
                Ok(EvalValue::String(joined))
            }),
        )
        .map_err(anyhow::Error::from)?;

    Ok(())
}

fn register_value_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "to_int".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "to_int")?;
                match &args[0] {
                    EvalValue::Int(i) => Ok(EvalValue::Int(*i)),
                    EvalValue::Float(f) => Ok(EvalValue::Int(f.trunc() as i64)),
                    other => {
                        let text = eval_to_cell(other);
                        let text = text.trim();
                        if text.is_empty() {
                            return Ok(EvalValue::Empty);
                        }
                        text.parse::<i64>()
                            .or_else(|_| text.parse::<f64>().map(|f| f.trunc() as i64))
                            .map(EvalValue::Int)
                            .map_err(|_| eval_error(&format!("to_int cannot parse '{text}'")))
                    }
                }
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "to_float".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "to_float")?;
                match &args[0] {
                    EvalValue::Int(i) => Ok(EvalValue::Float(*i as f64)),
                    EvalValue::Float(f) => Ok(EvalValue::Float(*f)),
                    other => {
                        let text = eval_to_cell(other);
                        let text = text.trim();
                        if text.is_empty() {
                            return Ok(EvalValue::Empty);
                        }
                        text.parse::<f64>()
                            .map(EvalValue::Float)
                            .map_err(|_| eval_error(&format!("to_float cannot parse '{text}'")))
                    }
                }
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "coalesce".into(),
            Function::new(|arguments| {
                Ok(variadic(arguments)
                    .into_iter()
                    .find(|value| !eval_to_cell(value).trim().is_empty())
                    .unwrap_or_else(|| EvalValue::String(String::new())))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "is_empty".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "is_empty")?;
                Ok(EvalValue::Boolean(eval_to_cell(&args[0]).trim().is_empty()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    Ok(())
}

fn register_temporal_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "date_add".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_add")?;
                let date = parse_date_arg(&args[0])?;
                let days = parse_i64_arg(&args[1], "days")?;
                let result = date
                    .checked_add_signed(Duration::days(days))
                    .ok_or_else(|| eval_error("date_add overflow"))?;
                Ok(EvalValue::String(result.format("%Y-%m-%d").to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "date_sub".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_sub")?;
                let date = parse_date_arg(&args[0])?;
                let days = parse_i64_arg(&args[1], "days")?;
                let result = date
                    .checked_sub_signed(Duration::days(days))
                    .ok_or_else(|| eval_error("date_sub overflow"))?;
                Ok(EvalValue::String(result.format("%Y-%m-%d").to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "date_diff_days".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_diff_days")?;
                let end = parse_date_arg(&args[0])?;
                let start = parse_date_arg(&args[1])?;
                Ok(EvalValue::Int((end - start).num_days()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "date_format".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_format")?;
                let date = parse_date_arg(&args[0])?;
                let fmt = expect_string(&args[1], "format")?;
                Ok(EvalValue::String(date.format(fmt).to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "datetime_format".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "datetime_format")?;
                let raw = eval_to_cell(&args[0]);
                let dt = parse_naive_datetime(raw.trim()).map_err(|err| eval_error(&err.to_string()))?;
                let fmt = expect_string(&args[1], "format")?;
                Ok(EvalValue::String(dt.format(fmt).to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "datetime_to_date".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "datetime_to_date")?;
                let raw = eval_to_cell(&args[0]);
                let dt = parse_naive_datetime(raw.trim()).map_err(|err| eval_error(&err.to_string()))?;
                Ok(EvalValue::String(dt.date().format("%Y-%m-%d").to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    Ok(())
}

fn variadic(arguments: &EvalValue) -> Vec<EvalValue> {
    match arguments {
        EvalValue::Tuple(values) => values.clone(),
        EvalValue::Empty => Vec::new(),
        other => vec![other.clone()],
    }
}

fn expect_args(arguments: &EvalValue, expected: usize, name: &str) -> EvalResult<Vec<EvalValue>> {
    let values = variadic(arguments);
    if values.len() != expected {
        return Err(eval_error(&format!(
            "{name} expects {expected} argument(s), got {}",
            values.len()
        )));
    }
    Ok(values)
}

fn eval_error(message: &str) -> EvalexprError {
    EvalexprError::CustomMessage(message.to_string())
}

fn compile_regex(value: &EvalValue) -> EvalResult<Regex> {
    let pattern = expect_string(value, "pattern")?;
    Regex::new(pattern).map_err(|err| eval_error(&format!("Invalid regex: {err}")))
}

fn parse_date_arg(value: &EvalValue) -> EvalResult<chrono::NaiveDate> {
    let raw = eval_to_cell(value);
    parse_naive_date(raw.trim()).map_err(|err| eval_error(&err.to_string()))
}

fn parse_i64_arg(value: &EvalValue, name: &str) -> EvalResult<i64> {
    match value {
        EvalValue::Int(i) => Ok(*i),
        EvalValue::Float(f) => Ok(*f as i64),
        EvalValue::String(s) => s
            .trim()
            .parse()
            .map_err(|_| eval_error(&format!("Expected integer for {name}, got '{s}'"))),
        other => Err(eval_error(&format!(
            "Expected integer for {name}, got {other:?}"
        ))),
    }
}

fn expect_string<'a>(value: &'a EvalValue, name: &str) -> EvalResult<&'a str> {
    if let EvalValue::String(s) = value {
        Ok(s)
    } else {
        Err(eval_error(&format!("Expected string for {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expression: &str, bindings: &[(&str, &str)]) -> String {
        let mut context = function_context().expect("function context");
        for (name, value) in bindings {
            bind(&mut context, name, value).unwrap();
        }
        let node = compile_expression(expression).expect("parse");
        evaluate(&node, &context).expect("evaluate")
    }

    #[test]
    fn string_helpers_apply_to_bound_cells() {
        assert_eq!(eval("uppercase(people__name)", &[("people__name", "ada")]), "ADA");
        assert_eq!(eval("trim(x)", &[("x", "  pad ")]), "pad");
        assert_eq!(eval("substring(\"abcdef\", 1, 3)", &[]), "bcd");
        assert_eq!(eval("regex_replace(\"abc123\", \"[a-z]+\", \"X\")", &[]), "X123");
        assert_eq!(eval("snake_case(\"Foo Bar\")", &[]), "foo_bar");
    }

    #[test]
    fn extraction_and_joining() {
        let notes = [("notes", "Patient is 42 years old")];
        assert_eq!(eval("extract(notes, \"(\\\\d+) years\")", &notes), "42");
        assert_eq!(eval("extract(notes, \"zzz\")", &notes), "");
        assert_eq!(
            eval("join(\" \", first, last)", &[("first", "Ada"), ("last", "Lovelace")]),
            "Ada Lovelace"
        );
        assert_eq!(eval("concat(a, \"-\", b)", &[("a", "x"), ("b", "y")]), "x-y");
        assert_eq!(eval("coalesce(a, b)", &[("a", ""), ("b", "fallback")]), "fallback");
    }

    #[test]
    fn numeric_conversion_requires_explicit_casts() {
        assert_eq!(eval("to_int(a) + 1", &[("a", "41")]), "42");
        assert_eq!(eval("to_float(a) * 2", &[("a", "1.25")]), "2.5");
        assert_eq!(eval("to_int(a)", &[("a", "")]), "");
        let mut context = function_context().unwrap();
        bind(&mut context, "a", "abc").unwrap();
        let node = compile_expression("to_int(a)").unwrap();
        assert!(evaluate(&node, &context).is_err());
    }

    #[test]
    fn date_helpers() {
        assert_eq!(eval("date_add(d, 5)", &[("d", "2024-01-01")]), "2024-01-06");
        assert_eq!(eval("date_diff_days(\"2024-01-10\", \"2024-01-01\")", &[]), "9");
        assert_eq!(
            eval("datetime_to_date(\"2024-05-06 14:30:00\")", &[]),
            "2024-05-06"
        );
    }

    #[test]
    fn unknown_variables_fail() {
        let context = function_context().unwrap();
        let node = compile_expression("missing__column").unwrap();
        assert!(evaluate(&node, &context).is_err());
    }
}
