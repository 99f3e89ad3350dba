use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::fixture::{FixtureFile, TestFixture, DEFAULT_SUITE_PREFIX};

pub const FIXTURE_FILE_NAME: &str = "lambda.test";

/// Fatal catalog errors. Any of these aborts the run before execution starts.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate fixture name '{name}' derived from {first} and {second}")]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Where and how to discover fixtures.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub root: PathBuf,
    pub suite_prefix: String,
    /// Substring matched against `<runtime-dir>/<fixture-dir>`.
    pub filter: Option<String>,
}

impl CatalogOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            suite_prefix: DEFAULT_SUITE_PREFIX.to_string(),
            filter: None,
        }
    }
}

/// Loads every `<root>/<runtime>/<fixture>/lambda.test` in path order.
pub fn load_catalog(options: &CatalogOptions) -> Result<Vec<TestFixture>, LoadError> {
    let mut fixtures = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for runtime_dir in sorted_subdirectories(&options.root)? {
        for fixture_dir in sorted_subdirectories(&runtime_dir)? {
            let relative = fixture_dir
                .strip_prefix(&options.root)
                .unwrap_or(&fixture_dir)
                .to_string_lossy()
                .replace('\\', "/");
            if let Some(filter) = options.filter.as_deref() {
                if !relative.contains(filter) {
                    continue;
                }
            }

            let path = fixture_dir.join(FIXTURE_FILE_NAME);
            let fixture = read_fixture(&path, &options.suite_prefix)?;
            if let Some(first) = seen.get(&fixture.derived_name) {
                return Err(LoadError::DuplicateName {
                    name: fixture.derived_name.clone(),
                    first: first.clone(),
                    second: path,
                });
            }
            debug!(fixture = %fixture.derived_name, path = %path.display(), "loaded fixture");
            seen.insert(fixture.derived_name.clone(), path);
            fixtures.push(fixture);
        }
    }

    Ok(fixtures)
}

fn read_fixture(path: &Path, suite_prefix: &str) -> Result<TestFixture, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: FixtureFile = serde_json::from_str(&raw).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(TestFixture::from_file(
        file,
        suite_prefix,
        path.to_path_buf(),
    ))
}

fn sorted_subdirectories(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
