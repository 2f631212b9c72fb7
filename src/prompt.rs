//! Prompt templates for every model call, and parsers for what comes back.

use itertools::Itertools;

use crate::{expr, plan::PLAN_MARKER, schema::Categories};

pub fn describe_column(sample: &str, column: &str) -> String {
    format!(
        "Here are the first rows of a table:\n\n{sample}\n\
         Write one sentence describing what the values of the column `{column}` represent. \
         Do not mention \"the dataset\", \"the table\" or \"this column\"; describe the values themselves.\n\
         Description:"
    )
}

pub fn categorical_judgment(column: &str, values: &[&str]) -> String {
    format!(
        "Decide whether a column's values, taken at face value, are already categorical: \
         a small set of labels that repeat across rows. Identifiers such as names, dates, \
         free text and measurements are not categorical.\n\
         Answer with a single word: yes or no.\n\n\
         Column: first_name\nValues: Ada, Grace, Alan, Barbara, Edsger\nCategorical: no\n\n\
         Column: admission_date\nValues: 2024-01-02, 2024-01-05, 2024-02-11\nCategorical: no\n\n\
         Column: smoker\nValues: yes, no, no, yes, no\nCategorical: yes\n\n\
         Column: blood_type\nValues: A+, O-, O+, A+, B+, O+\nCategorical: yes\n\n\
         Column: {column}\nValues: {}\nCategorical:",
        values.join(", ")
    )
}

pub fn extract_categories(column: &str, values: &[&str]) -> String {
    format!(
        "The column `{column}` holds these values:\n{}\n\n\
         List its distinct categories. Answer with a JSON array of strings and nothing else, \
         for example [\"low\", \"medium\", \"high\"].",
        values.join(", ")
    )
}

fn describe_categories(categories: &Categories) -> String {
    match categories {
        Categories::Values(values) => format!("one of {}", values.join(", ")),
        Categories::Description(text) => text.clone(),
    }
}

pub fn categorical_plan(
    samples: &str,
    column: &str,
    description: &str,
    categories: &Categories,
) -> String {
    format!(
        "You are mapping uploaded source files onto a target table.\n\n\
         Source tables (first rows of each):\n{samples}\n\
         Target column `{column}`: {description}\n\
         Each row must be assigned a category: {}.\n\n\
         Name the source column(s) the category of each row should be derived from. \
         Refer to each column as `table.column` using the table names above. \
         Answer in one sentence.",
        describe_categories(categories)
    )
}

pub fn formula_plan(samples: &str, column: &str, description: &str) -> String {
    format!(
        "You are mapping uploaded source files onto a target table.\n\n\
         Source tables (first rows of each):\n{samples}\n\
         For a target column, write a formula naming the source columns it comes from, \
         as `table.column` tokens.\n\n\
         Example 1. Target column `age` (age in years); table `patients` has `age_years`.\n\
         Formula: patients.age_years\n\n\
         Example 2. Target column `full_name` (the person's full name); table `patients` has \
         `first` and `last`.\n\
         Formula: patients.first patients.last\n\
         (Tokens separated by a space are combined into one value: they are the same conceptual unit.)\n\n\
         Example 3. Target column `weight_kg` (body weight in kilograms); table `visits` has a \
         free-text column `notes` such as \"weighs 72 kg, BP normal\".\n\
         Formula: parsed from visits.notes\n\
         (\"parsed from\" means the value has to be extracted from unstructured text.)\n\n\
         Target column `{column}`: {description}\n\
         Formula:"
    )
}

fn language_rules(column: &str, example_variable: &str) -> String {
    format!(
        "Each line has the form `<output column> = <expression>`. Expressions are evaluated \
         once per row. Cells are variables named `<table>__<column>` (column names lowercased, \
         other characters replaced by `_`), for example `{example_variable}`. \
         Every variable holds a string: wrap it in to_int(...) or to_float(...) before arithmetic. \
         Strings concatenate with `+`. Functions: {}, if(condition, a, b).\n\n\
         Rules:\n\
         - Write exactly one line and nothing else: no explanation, no code fences.\n\
         - The output column is `{column}` exactly. Never prefix it with `{PLAN_MARKER}` and never \
         derive it from a file name.",
        expr::function_names().join(", ")
    )
}

pub fn compile_line(
    samples: &str,
    script_so_far: &str,
    column: &str,
    plan_text: &str,
    example_variable: &str,
) -> String {
    format!(
        "You write one line of transform code that fills a column of an output table.\n\n\
         Source tables (first rows of each):\n{samples}\n\
         Script so far:\n{script_so_far}\n\n\
         {}\n\n\
         Mapping plan for `{column}`: {plan_text}\n\
         Line:",
        language_rules(column, example_variable)
    )
}

pub fn correction_line(sample: &str, column: &str, instruction: &str, example_variable: &str) -> String {
    format!(
        "You write one line of transform code that rewrites a column of a table in place.\n\n\
         Current table (first rows):\n{sample}\n\
         {}\n\
         The current table's cells are variables named `current__<column>`.\n\n\
         Column to transform: `{column}`\n\
         Instruction: {instruction}\n\
         Line:",
        language_rules(column, example_variable)
    )
}

pub fn classify_value(value: &str, description: &str) -> String {
    format!(
        "Classify the value below into exactly one category.\n\
         Categories: {description}\n\
         Answer with the category only.\n\n\
         Value: {value}\n\
         Category:"
    )
}

/// Drops Markdown code fences and surrounding whitespace.
pub fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .join("\n")
        .trim()
        .to_string()
}

pub fn parse_yes_no(text: &str) -> Option<bool> {
    let first = strip_fences(text)
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase();
    match first.as_str() {
        "yes" | "y" | "true" => Some(true),
        "no" | "n" | "false" => Some(false),
        _ => None,
    }
}

/// Reads a category list: a JSON array when one is present, otherwise one
/// category per line or comma. `None` when nothing usable is found.
pub fn parse_category_list(text: &str) -> Option<Vec<String>> {
    let cleaned = strip_fences(text);
    let from_json = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<Vec<serde_json::Value>>(&cleaned[start..=end])
                .ok()
                .map(|values| {
                    values
                        .into_iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                })
        }
        _ => None,
    };
    let raw = from_json.unwrap_or_else(|| {
        cleaned
            .split(['\n', ','])
            .map(|item| {
                item.trim()
                    .trim_start_matches(['-', '*', '•'])
                    .trim()
                    .trim_matches(['"', '\''])
                    .to_string()
            })
            .collect()
    });
    let categories = raw
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unique()
        .collect::<Vec<_>>();
    (!categories.is_empty()).then_some(categories)
}

/// First non-empty line of a completion, without fences or wrapping
/// backticks.
pub fn extract_code_line(text: &str) -> Option<String> {
    let cleaned = strip_fences(text);
    let line = cleaned.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_matches('`').trim().trim_end_matches(';').trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Splits `target = expression`. Comparison operators and `=` inside string
/// literals do not count. Returns no target when the left side does not look
/// like a column name.
pub fn split_assignment(line: &str) -> (Option<String>, String) {
    let chars = line.char_indices().collect::<Vec<_>>();
    let mut in_string = false;
    let mut escaped = false;
    for (pos, &(idx, ch)) in chars.iter().enumerate() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '=' => {
                let prev = pos.checked_sub(1).map(|p| chars[p].1);
                let next = chars.get(pos + 1).map(|&(_, c)| c);
                if matches!(prev, Some('=' | '!' | '<' | '>')) || next == Some('=') {
                    continue;
                }
                let target = line[..idx].trim().trim_matches(['`', '\'', '"']).trim();
                let expression = line[idx + 1..].trim();
                if target.is_empty() || target.contains(['(', ')', '"']) {
                    return (None, line.trim().to_string());
                }
                return (Some(target.to_string()), expression.to_string());
            }
            _ => {}
        }
    }
    (None, line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_answers_tolerate_punctuation_and_case() {
        assert_eq!(parse_yes_no("Yes."), Some(true));
        assert_eq!(parse_yes_no("  no, these are names"), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
        assert_eq!(parse_yes_no(""), None);
    }

    #[test]
    fn category_lists_from_json_or_plain_text() {
        assert_eq!(
            parse_category_list("Sure: [\"low\", \"high\", \"low\"]"),
            Some(vec!["low".to_string(), "high".to_string()])
        );
        assert_eq!(
            parse_category_list("- red\n- green\n"),
            Some(vec!["red".to_string(), "green".to_string()])
        );
        assert_eq!(parse_category_list("   "), None);
    }

    #[test]
    fn code_lines_are_unwrapped() {
        assert_eq!(
            extract_code_line("```\nage = people__age\n```"),
            Some("age = people__age".to_string())
        );
        assert_eq!(extract_code_line("`x = 1`;"), Some("x = 1".to_string()));
        assert_eq!(extract_code_line("\n\n"), None);
    }

    #[test]
    fn assignments_split_on_the_first_bare_equals() {
        assert_eq!(
            split_assignment("age = people__age"),
            (Some("age".to_string()), "people__age".to_string())
        );
        assert_eq!(
            split_assignment("flag = if(a == \"x=y\", \"1\", \"0\")"),
            (
                Some("flag".to_string()),
                "if(a == \"x=y\", \"1\", \"0\")".to_string()
            )
        );
        assert_eq!(
            split_assignment("if(a >= 3, 1, 0)"),
            (None, "if(a >= 3, 1, 0)".to_string())
        );
        assert_eq!(
            split_assignment("people__age"),
            (None, "people__age".to_string())
        );
    }
}
