#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_mapper::{data::Frame, schema::Schema};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Saves `schema` as YAML under the workspace and returns the path.
    pub fn write_schema(&self, name: &str, schema: &Schema) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        schema.save(&path).expect("save schema");
        path
    }
}

/// Builds a frame from string literals.
pub fn frame(headers: &[&str], rows: &[&[&str]]) -> Frame {
    Frame::from_rows(
        headers.iter().map(|h| h.to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
    .expect("well-formed frame")
}

/// A schema whose columns are `(name, description)` pairs.
pub fn schema(name: &str, columns: &[(&str, &str)]) -> Schema {
    let mut schema = Schema::new(name);
    for (column, description) in columns {
        schema
            .description_dict
            .insert(column.to_string(), description.to_string());
    }
    schema
}
