//! State carried between the steps of one mapping session, persisted as JSON.
//!
//! `plan` creates a session, `generate` and `correct` update it, and `export`
//! clears it.

use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail, ensure};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{data::Frame, io_utils::CsvOptions, plan::MappingPlan, source::SourceSet};

/// A source file registered with a session. Never modified once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: Uuid,
    pub path: PathBuf,
    pub original_name: String,
}

/// Bounds on the source files one session accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_sources: usize,
    pub max_source_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_sources: 5,
            max_source_bytes: 5 * 1024 * 1024,
        }
    }
}

impl UploadedFile {
    pub fn register(path: &Path, limits: &UploadLimits) -> Result<Self> {
        ensure!(path.is_file(), "Source file {path:?} does not exist");
        let size = fs::metadata(path)
            .with_context(|| format!("Reading metadata for {path:?}"))?
            .len();
        ensure!(
            size <= limits.max_source_bytes,
            "Source file {path:?} is {size} bytes; the limit is {} bytes",
            limits.max_source_bytes
        );
        let original_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("source.csv")
            .to_string();
        Ok(Self {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            original_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub schema_path: PathBuf,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<MappingPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_table: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(schema_path: &Path, sources: &[PathBuf], limits: &UploadLimits) -> Result<Self> {
        if sources.is_empty() {
            bail!("A session needs at least one source file");
        }
        ensure!(
            sources.len() <= limits.max_sources,
            "{} source files given; at most {} are accepted",
            sources.len(),
            limits.max_sources
        );
        let files = sources
            .iter()
            .map(|path| UploadedFile::register(path, limits))
            .collect::<Result<Vec<_>>>()?;
        let now = Utc::now();
        Ok(Self {
            schema_path: schema_path.to_path_buf(),
            files,
            plan: None,
            script: None,
            output_table: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening session file {path:?}"))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing session file {path:?}"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Serializing session")?;
        fs::write(path, json).with_context(|| format!("Writing session file {path:?}"))?;
        debug!("Session saved to {path:?}");
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Loads every registered file, named after its original file name.
    pub fn sources(&self, options: &CsvOptions) -> Result<SourceSet> {
        let mut set = SourceSet::default();
        for file in &self.files {
            let frame = Frame::read_csv(&file.path, options)
                .with_context(|| format!("Loading source {:?}", file.original_name))?;
            set.push(file.original_name.clone(), file.path.clone(), frame);
        }
        Ok(set)
    }

    /// Removes the session file. A missing file is not an error.
    pub fn clear(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Removing session file {path:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanValue;

    #[test]
    fn session_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("People List.csv");
        fs::write(&source, "age\n36\n").unwrap();
        let mut session = SessionContext::new(
            &dir.path().join("schema.yaml"),
            &[source],
            &UploadLimits::default(),
        )
        .unwrap();
        assert_eq!(session.files[0].original_name, "People List.csv");

        let mut plan = MappingPlan::default();
        plan.insert("age", PlanValue::Formula("people_list.age".into()));
        session.plan = Some(plan);
        session.touch();
        assert!(session.updated_at >= session.created_at);

        let path = dir.path().join("session.json");
        session.save(&path).unwrap();
        let loaded = SessionContext::load(&path).unwrap();
        assert_eq!(loaded, session);

        let sources = loaded.sources(&CsvOptions::default()).unwrap();
        assert_eq!(sources.tables()[0].id, "people_list");

        SessionContext::clear(&path).unwrap();
        assert!(!path.exists());
        SessionContext::clear(&path).unwrap();
    }

    #[test]
    fn missing_source_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");
        let limits = UploadLimits::default();
        assert!(SessionContext::new(&dir.path().join("schema.yaml"), &[missing], &limits).is_err());
    }

    #[test]
    fn source_count_and_size_limits_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.yaml");
        let source = dir.path().join("people.csv");
        fs::write(&source, "age\n36\n41\n").unwrap();
        let limits = UploadLimits {
            max_sources: 2,
            max_source_bytes: 32,
        };

        assert!(SessionContext::new(&schema, &[source.clone(), source.clone()], &limits).is_ok());
        let err = SessionContext::new(&schema, &[source.clone(), source.clone(), source.clone()], &limits)
            .unwrap_err();
        assert!(err.to_string().contains("at most 2"));
        assert!(SessionContext::new(&schema, &[], &limits).is_err());

        let tight = UploadLimits {
            max_source_bytes: 4,
            ..limits
        };
        let err = SessionContext::new(&schema, &[source], &tight).unwrap_err();
        assert!(err.to_string().contains("the limit is 4 bytes"));
    }
}
