use std::collections::HashSet;

use indexmap::IndexMap;
use regex::Regex;

use crate::{
    data::{Frame, parse_typed_value},
    rules::{Check, ColumnRule, ValidationSchema},
};

/// Column name → human-readable reason. Empty means the table passes.
pub type ValidationErrors = IndexMap<String, String>;

/// Checks a candidate table against a rule set.
///
/// Each column is checked on its own and reports the first failure it hits,
/// so one bad column never taints the others. Validation holds no state:
/// the same table and rules always give the same map.
pub fn validate(frame: &Frame, schema: &ValidationSchema) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    for (column, rule) in &schema.columns {
        let Some(index) = frame.column_index(column) else {
            if rule.required {
                errors.insert(
                    column.clone(),
                    format!("column '{column}' not in table"),
                );
            }
            continue;
        };
        if let Some(message) = check_column(frame, index, column, rule) {
            errors.insert(column.clone(), message);
        }
    }
    if schema.strict {
        for header in frame.headers() {
            if !schema.columns.contains_key(header) && !errors.contains_key(header) {
                errors.insert(
                    header.clone(),
                    format!("column '{header}' not in validation schema"),
                );
            }
        }
    }
    errors
}

fn check_column(frame: &Frame, index: usize, column: &str, rule: &ColumnRule) -> Option<String> {
    let patterns = rule
        .checks
        .iter()
        .map(|check| match check {
            Check::StrMatches(pattern) => Regex::new(pattern).ok(),
            _ => None,
        })
        .collect::<Vec<_>>();
    let mut seen = HashSet::new();

    for (row_idx, row) in frame.rows().iter().enumerate() {
        let row_number = row_idx + 1;
        let raw = row[index].as_str();
        if raw.trim().is_empty() {
            if !rule.nullable {
                return Some(format!(
                    "non-nullable column '{column}' contains null values at row {row_number}"
                ));
            }
            continue;
        }
        let typed = match parse_typed_value(raw, &rule.datatype) {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(_) => {
                return Some(format!(
                    "expected column '{column}' to have type {}, got '{raw}' at row {row_number}",
                    rule.datatype
                ));
            }
        };
        if rule.unique && !seen.insert(raw) {
            return Some(format!(
                "column '{column}' contains duplicate value '{raw}' at row {row_number}"
            ));
        }
        for (check, pattern) in rule.checks.iter().zip(&patterns) {
            let passed = match check {
                Check::GreaterThanOrEqual(bound) => typed.as_f64().is_some_and(|v| v >= *bound),
                Check::LessThanOrEqual(bound) => typed.as_f64().is_some_and(|v| v <= *bound),
                Check::Isin(allowed) => allowed.iter().any(|a| a == raw),
                Check::StrMatches(_) => pattern.as_ref().is_some_and(|re| re.is_match(raw)),
                Check::StrLength { min, max } => {
                    let len = raw.chars().count();
                    min.is_none_or(|m| len >= m) && max.is_none_or(|m| len <= m)
                }
            };
            if !passed {
                return Some(format!(
                    "column '{column}' failed check {check} at row {row_number}: '{raw}'"
                ));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ColumnType;

    fn frame(headers: &[&str], rows: &[&[&str]]) -> Frame {
        Frame::from_rows(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn rule(datatype: ColumnType, checks: Vec<Check>) -> ColumnRule {
        ColumnRule {
            datatype,
            checks,
            ..ColumnRule::default()
        }
    }

    #[test]
    fn passing_table_yields_empty_map() {
        let table = frame(&["age"], &[&["30"], &["41"]]);
        let mut schema = ValidationSchema::default();
        schema.columns.insert(
            "age".into(),
            rule(ColumnType::Integer, vec![Check::GreaterThanOrEqual(0.0)]),
        );
        assert!(validate(&table, &schema).is_empty());
    }

    #[test]
    fn failures_are_isolated_per_column() {
        let table = frame(&["age", "risk"], &[&["30", "low"], &["x", "high"]]);
        let mut schema = ValidationSchema::default();
        schema
            .columns
            .insert("age".into(), rule(ColumnType::Integer, Vec::new()));
        schema.columns.insert(
            "risk".into(),
            rule(
                ColumnType::String,
                vec![Check::Isin(vec!["low".into(), "high".into()])],
            ),
        );
        let errors = validate(&table, &schema);
        assert_eq!(errors.len(), 1);
        assert!(errors["age"].contains("type integer"), "{}", errors["age"]);
        assert!(errors["age"].contains("row 2"));
    }

    #[test]
    fn missing_required_and_strict_extra_columns_are_reported() {
        let table = frame(&["extra"], &[&["1"]]);
        let mut schema = ValidationSchema::default();
        schema.columns.insert("age".into(), ColumnRule::default());
        schema.columns.insert(
            "nickname".into(),
            ColumnRule {
                required: false,
                ..ColumnRule::default()
            },
        );
        let errors = validate(&table, &schema);
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["age"]);

        schema.strict = true;
        let errors = validate(&table, &schema);
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["age", "extra"]);
    }

    #[test]
    fn nullability_uniqueness_and_string_checks() {
        let table = frame(&["code", "id"], &[&["AB", "1"], &["", "1"]]);
        let mut schema = ValidationSchema::default();
        schema.columns.insert(
            "code".into(),
            ColumnRule {
                nullable: false,
                checks: vec![
                    Check::StrMatches("^[A-Z]+$".into()),
                    Check::StrLength {
                        min: Some(2),
                        max: Some(2),
                    },
                ],
                ..ColumnRule::default()
            },
        );
        schema.columns.insert(
            "id".into(),
            ColumnRule {
                unique: true,
                ..ColumnRule::default()
            },
        );
        let errors = validate(&table, &schema);
        assert!(errors["code"].contains("non-nullable"));
        assert!(errors["id"].contains("duplicate value '1'"));
    }
}
