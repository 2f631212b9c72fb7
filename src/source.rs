//! Uploaded source files loaded as tables, and how generated code refers to
//! them.
//!
//! Each file gets a stable identifier derived from its file name
//! (`Patient Visits.csv` → `patient_visits`). A source column is addressed in
//! generated code as `<identifier>__<normalized column>`; plans written by the
//! model or a human may also say `<identifier>.<column>` or
//! `<file name>.<column>`.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use heck::ToSnakeCase;
use log::debug;

use crate::{
    data::{Frame, normalize_column_name},
    io_utils::CsvOptions,
    table,
};

#[derive(Debug, Clone)]
pub struct SourceTable {
    pub id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub frame: Frame,
}

/// One column of one source table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceColumn {
    pub table: String,
    pub column: String,
}

impl SourceColumn {
    /// The variable this column is bound to in generated code.
    pub fn variable(&self) -> String {
        variable_name(&self.table, &self.column)
    }
}

pub fn variable_name(table: &str, column: &str) -> String {
    format!("{table}__{}", normalize_column_name(column))
}

/// Derives a code identifier from a file name: snake_case stem, prefixed when
/// it would start with a digit, suffixed to stay unique among `taken`.
pub fn source_identifier(file_name: &str, taken: &HashSet<String>) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let mut base = stem.to_snake_case();
    if base.is_empty() {
        base = "source".to_string();
    }
    if base.starts_with(|c: char| c.is_ascii_digit()) {
        base = format!("f_{base}");
    }
    if !taken.contains(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(base)
}

#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    tables: Vec<SourceTable>,
}

impl SourceSet {
    pub fn load(paths: &[PathBuf], options: &CsvOptions) -> Result<Self> {
        let mut set = Self::default();
        for path in paths {
            let frame =
                Frame::read_csv(path, options).with_context(|| format!("Loading source {path:?}"))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("source")
                .to_string();
            set.push(file_name, path.clone(), frame);
        }
        Ok(set)
    }

    /// Adds an already-loaded table and returns its identifier.
    pub fn push(&mut self, file_name: String, path: PathBuf, frame: Frame) -> String {
        let taken: HashSet<String> = self.tables.iter().map(|t| t.id.clone()).collect();
        let id = source_identifier(&file_name, &taken);
        debug!(
            "Source {file_name:?} loaded as '{id}' ({} row(s), {} column(s))",
            frame.row_count(),
            frame.column_count()
        );
        self.tables.push(SourceTable {
            id: id.clone(),
            file_name,
            path,
            frame,
        });
        id
    }

    pub fn tables(&self) -> &[SourceTable] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SourceTable> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Every source table's first `rows` rows, each under a label naming its
    /// identifier and file.
    pub fn render_samples(&self, rows: usize) -> String {
        self.tables
            .iter()
            .map(|t| {
                format!(
                    "Table `{}` (file {}):\n{}",
                    t.id,
                    t.file_name,
                    table::render_table(t.frame.headers(), t.frame.head(rows).rows())
                )
            })
            .join("\n")
    }

    /// Source columns mentioned in free text, in order of first mention.
    ///
    /// Recognized forms, case-insensitively: `id__column`, `id.column`,
    /// `file_name.column` and `file_stem.column`.
    pub fn references_in(&self, text: &str) -> Vec<SourceColumn> {
        let haystack = text.to_lowercase();
        let mut found = Vec::new();
        for t in &self.tables {
            let stem = Path::new(&t.file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&t.file_name)
                .to_lowercase();
            let file_name = t.file_name.to_lowercase();
            for header in t.frame.headers() {
                let column = header.to_lowercase();
                let forms = [
                    variable_name(&t.id, header),
                    format!("{}.{column}", t.id),
                    format!("{file_name}.{column}"),
                    format!("{stem}.{column}"),
                ];
                let position = forms
                    .iter()
                    .filter_map(|form| find_token(&haystack, form))
                    .min();
                if let Some(position) = position {
                    found.push((
                        position,
                        SourceColumn {
                            table: t.id.clone(),
                            column: header.clone(),
                        },
                    ));
                }
            }
        }
        found.sort_by_key(|(position, _)| *position);
        found.into_iter().map(|(_, column)| column).collect()
    }
}

/// Position of `token` in `haystack` where it is not part of a longer word.
fn find_token(haystack: &str, token: &str) -> Option<usize> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(token).map(|(idx, _)| idx).find(|&idx| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + token.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(headers: &[&str]) -> Frame {
        Frame::new(headers.iter().map(|h| h.to_string()).collect())
    }

    #[test]
    fn identifiers_are_snake_case_prefixed_and_unique() {
        let mut taken = HashSet::new();
        assert_eq!(source_identifier("Patient Visits.csv", &taken), "patient_visits");
        assert_eq!(source_identifier("2023-sales.tsv", &taken), "f_2023_sales");
        taken.insert("people".to_string());
        assert_eq!(source_identifier("people.csv", &taken), "people_2");
        taken.insert("people_2".to_string());
        assert_eq!(source_identifier("People.csv", &taken), "people_3");
    }

    #[test]
    fn references_follow_order_of_mention() {
        let mut set = SourceSet::default();
        set.push("people.csv".into(), "people.csv".into(), frame(&["First Name", "age"]));
        set.push("visits.csv".into(), "visits.csv".into(), frame(&["notes"]));

        let refs = set.references_in("Parsed from visits.notes, joined with people.csv.age");
        assert_eq!(
            refs,
            vec![
                SourceColumn {
                    table: "visits".into(),
                    column: "notes".into()
                },
                SourceColumn {
                    table: "people".into(),
                    column: "age".into()
                },
            ]
        );
        assert_eq!(refs[1].variable(), "people__age");

        let refs = set.references_in("people__first_name");
        assert_eq!(refs[0].column, "First Name");
        assert!(set.references_in("people.ages and visits.notes_extra").is_empty());
    }
}
