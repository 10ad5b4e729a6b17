use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::RunArgs;

pub const PROJECT_MANIFEST_FILE: &str = "dexit.toml";

const DEFAULT_TESTS_DIR: &str = "tests";
const DEFAULT_MODULES_DIR: &str = "dexit_modules";

/// Declarative per-project configuration block.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectManifest {
    #[serde(default)]
    base_path: Option<PathBuf>,
    #[serde(default)]
    tests_path: Option<PathBuf>,
    #[serde(default)]
    modules_path: Option<PathBuf>,
    #[serde(default)]
    ignore_invalid_tests: Option<bool>,
    #[serde(default)]
    load_builtin_modules: Option<bool>,
    #[serde(default)]
    autoload_modules: Option<bool>,
    #[serde(default)]
    reporters: IndexMap<String, toml::Value>,
}

/// Effective configuration: the project manifest deep-merged with CLI
/// options, CLI winning on collisions.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_path: PathBuf,
    pub tests_path: PathBuf,
    pub modules_path: PathBuf,
    pub ignore_invalid_tests: bool,
    pub load_builtin_modules: bool,
    pub autoload_modules: bool,
    /// Reporter name to its options mapping, in activation order.
    pub reporters: IndexMap<String, Value>,
    pub debug: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    ManifestRead {
        path: PathBuf,
        error: std::io::Error,
    },
    ManifestParse {
        path: PathBuf,
        error: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ManifestRead { path, error } => {
                write!(f, "failed to read {}: {error}", path.display())
            }
            ConfigError::ManifestParse { path, error } => {
                write!(f, "failed to parse {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn resolve(args: &RunArgs, cwd: &Path) -> Result<Self, ConfigError> {
        let manifest_dir = match &args.base_path {
            Some(base) => resolve_path(cwd, base),
            None => cwd.to_path_buf(),
        };

        let manifest_path = manifest_dir.join(PROJECT_MANIFEST_FILE);
        let manifest: ProjectManifest = if manifest_path.is_file() {
            let source =
                fs::read_to_string(&manifest_path).map_err(|error| ConfigError::ManifestRead {
                    path: manifest_path.clone(),
                    error,
                })?;
            toml::from_str(&source).map_err(|error| ConfigError::ManifestParse {
                path: manifest_path,
                error,
            })?
        } else {
            ProjectManifest::default()
        };

        // The manifest may re-root relative paths; it cannot retroactively
        // change where the manifest itself was found, and an explicit
        // `--base-path` wins.
        let base_path = match &manifest.base_path {
            Some(base) if args.base_path.is_none() => resolve_path(&manifest_dir, base),
            _ => manifest_dir,
        };

        let tests_path = args
            .tests_path
            .clone()
            .or(manifest.tests_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TESTS_DIR));
        let modules_path = args
            .modules_path
            .clone()
            .or(manifest.modules_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULES_DIR));

        let project_reporters: IndexMap<String, Value> = manifest
            .reporters
            .into_iter()
            .map(|(name, options)| (name, toml_to_json(options)))
            .collect();
        let reporters = if args.reporters.is_empty() {
            if project_reporters.is_empty() {
                let mut defaults = IndexMap::new();
                defaults.insert("console".to_owned(), Value::Object(Default::default()));
                defaults
            } else {
                project_reporters
            }
        } else {
            // CLI selects the reporter set; the project file still supplies
            // options for the ones it names.
            args.reporters
                .iter()
                .map(|name| {
                    let options = project_reporters
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default()));
                    (name.clone(), options)
                })
                .collect()
        };

        Ok(Self {
            tests_path: resolve_path(&base_path, &tests_path),
            modules_path: resolve_path(&base_path, &modules_path),
            base_path,
            ignore_invalid_tests: args.ignore_invalid || manifest.ignore_invalid_tests.unwrap_or(false),
            load_builtin_modules: !args.no_builtin && manifest.load_builtin_modules.unwrap_or(true),
            autoload_modules: !args.no_autoload && manifest.autoload_modules.unwrap_or(true),
            reporters,
            debug: args.debug,
        })
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub(crate) fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(text) => Value::String(text),
        toml::Value::Integer(number) => Value::Number(number.into()),
        toml::Value::Float(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(flag) => Value::Bool(flag),
        toml::Value::Datetime(datetime) => Value::String(datetime.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, item)| (key, toml_to_json(item)))
                .collect(),
        ),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
