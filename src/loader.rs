use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

/// One parsed YAML document plus its provenance. Immutable after load.
#[derive(Debug, Clone)]
pub struct TestDocument {
    pub filename: String,
    pub path: PathBuf,
    pub body: Value,
}

#[derive(Debug)]
pub enum LoaderError {
    TestsDirMissing {
        path: PathBuf,
    },
    Walk {
        path: PathBuf,
        error: walkdir::Error,
    },
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    Parse {
        path: PathBuf,
        error: serde_yaml::Error,
    },
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::TestsDirMissing { path } => {
                write!(f, "tests directory {} does not exist", path.display())
            }
            LoaderError::Walk { path, error } => {
                write!(f, "failed to scan {}: {error}", path.display())
            }
            LoaderError::Read { path, error } => {
                write!(f, "failed to read {}: {error}", path.display())
            }
            LoaderError::Parse { path, error } => {
                write!(f, "failed to parse {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for LoaderError {}

/// Collects every YAML stream under `tests_path` in sorted order. Each file
/// may hold multiple documents; empty documents are dropped.
pub fn load_documents(tests_path: &Path) -> Result<Vec<TestDocument>, LoaderError> {
    if !tests_path.is_dir() {
        return Err(LoaderError::TestsDirMissing {
            path: tests_path.to_path_buf(),
        });
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(tests_path).sort_by_file_name() {
        let entry = entry.map_err(|error| LoaderError::Walk {
            path: tests_path.to_path_buf(),
            error,
        })?;
        if !entry.file_type().is_file() || !is_test_file(entry.path()) {
            continue;
        }

        let path = entry.path().to_path_buf();
        let source = fs::read_to_string(&path).map_err(|error| LoaderError::Read {
            path: path.clone(),
            error,
        })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .unwrap_or_default();

        for deserializer in serde_yaml::Deserializer::from_str(&source) {
            let body = Value::deserialize(deserializer).map_err(|error| LoaderError::Parse {
                path: path.clone(),
                error,
            })?;
            if body.is_null() {
                continue;
            }
            documents.push(TestDocument {
                filename: filename.clone(),
                path: path.clone(),
                body,
            });
        }
    }

    tracing::debug!(count = documents.len(), "loaded test documents");
    Ok(documents)
}

fn is_test_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}
