//! Migration sources
//!
//! A source only enumerates `(file name, body)` pairs. Parsing identities
//! and ordering happen in [`crate::loader`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::loader;

/// One candidate as read from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMigration {
    pub file_name: String,
    pub body: String,
}

impl RawMigration {
    pub fn new(file_name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            body: body.into(),
        }
    }
}

/// Enumerates migration candidates, in no particular order
pub trait MigrationSource: Send + Sync {
    fn candidates(&self) -> Result<Vec<RawMigration>, SourceError>;

    /// Where the candidates come from, for log output
    fn describe(&self) -> String;
}

impl MigrationSource for Vec<RawMigration> {
    fn candidates(&self) -> Result<Vec<RawMigration>, SourceError> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        "in-memory migrations".to_string()
    }
}

/// `.sql` files directly inside one directory
///
/// Other entries are never opened, so unrelated files (editor swap files,
/// `.DS_Store`, archives) cannot affect a run.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unavailable(&self, source: io::Error) -> SourceError {
        SourceError::Unavailable {
            location: self.describe(),
            source,
        }
    }
}

impl MigrationSource for DirectorySource {
    fn candidates(&self) -> Result<Vec<RawMigration>, SourceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| self.unavailable(e))? {
            let entry = entry.map_err(|e| self.unavailable(e))?;

            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
                continue;
            };
            if loader::sql_stem(&file_name).is_none() {
                tracing::debug!(file = %file_name, "Ignoring file that is not a SQL migration");
                continue;
            }

            let path = entry.path();
            let unreadable = |source: io::Error| SourceError::Unreadable {
                file: path.display().to_string(),
                source,
            };
            if !fs::metadata(&path).map_err(unreadable)?.is_file() {
                continue;
            }

            let body = fs::read_to_string(&path).map_err(unreadable)?;
            candidates.push(RawMigration { file_name, body });
        }

        Ok(candidates)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}
