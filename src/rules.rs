//! The structural validation schema: per-column datatype, nullability,
//! uniqueness and value checks, plus inference of that rule set from a
//! dataset's observed values.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::data::{Frame, parse_boolean_token, parse_naive_date, parse_naive_datetime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Guid,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Guid => "guid",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "string", "integer", "float", "boolean", "date", "datetime", "guid",
        ]
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "object" => Ok(ColumnType::String),
            "integer" | "int" | "int64" => Ok(ColumnType::Integer),
            "float" | "double" | "float64" => Ok(ColumnType::Float),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" | "date-time" | "timestamp" | "datetime64[ns]" => Ok(ColumnType::DateTime),
            "guid" | "uuid" => Ok(ColumnType::Guid),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// A value-level constraint on one column. Serialized externally tagged, e.g.
/// `greater_than_or_equal: 0` or `isin: [low, high]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    GreaterThanOrEqual(f64),
    LessThanOrEqual(f64),
    Isin(Vec<String>),
    StrMatches(String),
    StrLength {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
    },
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::GreaterThanOrEqual(v) => write!(f, "greater_than_or_equal({v})"),
            Check::LessThanOrEqual(v) => write!(f, "less_than_or_equal({v})"),
            Check::Isin(values) => write!(f, "isin({values:?})"),
            Check::StrMatches(pattern) => write!(f, "str_matches('{pattern}')"),
            Check::StrLength { min, max } => write!(
                f,
                "str_length({}, {})",
                min.map_or_else(|| "None".to_string(), |v| v.to_string()),
                max.map_or_else(|| "None".to_string(), |v| v.to_string())
            ),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnRule {
    #[serde(default)]
    pub datatype: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<Check>,
}

impl Default for ColumnRule {
    fn default() -> Self {
        Self {
            datatype: ColumnType::String,
            nullable: true,
            unique: false,
            required: true,
            checks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ValidationSchema {
    #[serde(default)]
    pub columns: IndexMap<String, ColumnRule>,
    /// Reject columns the rule set does not mention.
    #[serde(default)]
    pub strict: bool,
}

impl ValidationSchema {
    /// Parses rule-set text. YAML is accepted, and so is JSON since every JSON
    /// document is valid YAML. Regex checks must compile.
    pub fn parse(text: &str) -> Result<Self, String> {
        let schema: ValidationSchema = if text.trim().is_empty() {
            ValidationSchema::default()
        } else {
            serde_yaml::from_str(text).map_err(|err| err.to_string())?
        };
        for (column, rule) in &schema.columns {
            for check in &rule.checks {
                if let Check::StrMatches(pattern) = check {
                    Regex::new(pattern).map_err(|err| {
                        format!("column '{column}': invalid str_matches pattern: {err}")
                    })?;
                }
            }
        }
        Ok(schema)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    possible_boolean: bool,
    possible_integer: bool,
    possible_float: bool,
    possible_date: bool,
    possible_datetime: bool,
    possible_guid: bool,
    seen: usize,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            possible_boolean: true,
            possible_integer: true,
            possible_float: true,
            possible_date: true,
            possible_datetime: true,
            possible_guid: true,
            seen: 0,
        }
    }

    fn update(&mut self, value: &str) {
        self.seen += 1;
        if self.possible_boolean
            && !(parse_boolean_token(value).is_some() && value.parse::<i64>().is_err())
        {
            self.possible_boolean = false;
        }
        if self.possible_integer && value.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && value.parse::<f64>().is_err() {
            self.possible_float = false;
        }
        if self.possible_date && parse_naive_date(value).is_err() {
            self.possible_date = false;
        }
        if self.possible_datetime && parse_naive_datetime(value).is_err() {
            self.possible_datetime = false;
        }
        if self.possible_guid
            && uuid::Uuid::parse_str(value.trim_matches(|c| matches!(c, '{' | '}'))).is_err()
        {
            self.possible_guid = false;
        }
    }

    fn decide(&self) -> ColumnType {
        if self.seen == 0 {
            ColumnType::String
        } else if self.possible_boolean {
            ColumnType::Boolean
        } else if self.possible_integer {
            ColumnType::Integer
        } else if self.possible_float {
            ColumnType::Float
        } else if self.possible_date {
            ColumnType::Date
        } else if self.possible_datetime {
            ColumnType::DateTime
        } else if self.possible_guid {
            ColumnType::Guid
        } else {
            ColumnType::String
        }
    }
}

/// Infers a rule set from a dataset: datatype per column, nullability from
/// empty cells, and min/max range checks for numeric columns.
pub fn infer_validation_schema(frame: &Frame) -> ValidationSchema {
    let mut columns = IndexMap::new();
    for (idx, header) in frame.headers().iter().enumerate() {
        let mut candidate = TypeCandidate::new();
        let mut has_nulls = false;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for row in frame.rows() {
            let value = row[idx].trim();
            if value.is_empty() {
                has_nulls = true;
                continue;
            }
            candidate.update(value);
            if let Ok(number) = value.parse::<f64>() {
                min = min.min(number);
                max = max.max(number);
            }
        }
        let datatype = candidate.decide();
        let checks = if datatype.is_numeric() && min.is_finite() && max.is_finite() {
            vec![Check::GreaterThanOrEqual(min), Check::LessThanOrEqual(max)]
        } else {
            Vec::new()
        };
        columns.insert(
            header.clone(),
            ColumnRule {
                datatype,
                nullable: has_nulls,
                unique: false,
                required: true,
                checks,
            },
        );
    }
    ValidationSchema {
        columns,
        strict: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(headers: &[&str], rows: &[&[&str]]) -> Frame {
        Frame::from_rows(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn infer_detects_types_nulls_and_ranges() {
        let data = frame(
            &["id", "age", "score", "joined", "active", "name"],
            &[
                &["1", "34", "1.5", "2024-01-01", "yes", "Ann"],
                &["2", "", "2", "2024-02-03", "no", "Bob"],
                &["3", "51", "3.25", "2024-03-09", "y", "Cy"],
            ],
        );
        let schema = infer_validation_schema(&data);
        let types = schema
            .columns
            .values()
            .map(|rule| rule.datatype)
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                ColumnType::Integer,
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::Date,
                ColumnType::Boolean,
                ColumnType::String,
            ]
        );
        let age = &schema.columns["age"];
        assert!(age.nullable);
        assert_eq!(
            age.checks,
            vec![Check::GreaterThanOrEqual(34.0), Check::LessThanOrEqual(51.0)]
        );
        assert!(!schema.columns["id"].nullable);
    }

    #[test]
    fn parse_accepts_yaml_and_json() {
        let yaml = "columns:\n  risk:\n    datatype: string\n    checks:\n      - isin: [low, high]\n";
        let parsed = ValidationSchema::parse(yaml).unwrap();
        assert_eq!(
            parsed.columns["risk"].checks,
            vec![Check::Isin(vec!["low".into(), "high".into()])]
        );

        let json = r#"{"columns": {"age": {"datatype": "int", "nullable": false}}, "strict": true}"#;
        let parsed = ValidationSchema::parse(json).unwrap();
        assert!(parsed.strict);
        assert_eq!(parsed.columns["age"].datatype, ColumnType::Integer);
        assert!(parsed.columns["age"].required);
    }

    #[test]
    fn parse_rejects_malformed_text_and_bad_patterns() {
        assert!(ValidationSchema::parse("columns: [unclosed").is_err());
        assert!(ValidationSchema::parse("columns:\n  a:\n    datatype: money\n").is_err());
        let bad_regex = "columns:\n  a:\n    checks:\n      - str_matches: '([a-z'\n";
        let err = ValidationSchema::parse(bad_regex).unwrap_err();
        assert!(err.contains("str_matches"), "{err}");
    }

    #[test]
    fn rule_set_text_round_trips() {
        let data = frame(&["n"], &[&["1"], &["2"]]);
        let schema = infer_validation_schema(&data);
        let text = schema.to_text().unwrap();
        assert_eq!(ValidationSchema::parse(&text).unwrap(), schema);
    }
}
