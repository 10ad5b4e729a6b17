use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;

use crate::repository::{TaskSchema, TestEntry, TestSetEntry, ValidationRecord};
use crate::runner::{CompleteReport, TaskReport, TaskScope, TestReport, TestSetReport};

pub mod console;
mod discovery;

pub use console::ConsoleReporter;

/// Lifecycle sink. Every operation has a no-op default so reporters only
/// implement what they render.
pub trait Reporter: Send + fmt::Debug {
    fn log_validation_errors(&mut self, _records: &[ValidationRecord]) {}
    fn log_test_set_begin(&mut self, _set: &TestSetEntry) {}
    fn log_test_set_complete(&mut self, _set: &TestSetEntry, _report: &TestSetReport) {}
    fn log_test_set_skip(&mut self, _set: &TestSetEntry) {}
    fn log_test_begin(&mut self, _set: &TestSetEntry, _test: &TestEntry) {}
    fn log_test_complete(&mut self, _set: &TestSetEntry, _test: &TestEntry, _report: &TestReport) {}
    fn log_test_skip(&mut self, _set: &TestSetEntry, _test: &TestEntry) {}
    fn log_task_begin(&mut self, _scope: &TaskScope, _task: &TaskSchema, _label: &str) {}
    fn log_task_complete(&mut self, _scope: &TaskScope, _task: &TaskSchema, _report: &TaskReport) {}
    fn generate_report(&mut self, _complete: &CompleteReport) {}
}

#[derive(Debug)]
pub enum ReporterError {
    UnknownReporter {
        name: String,
        available: Vec<String>,
    },
    PackagesDirMissing {
        path: PathBuf,
    },
    PackageManifestRead {
        path: PathBuf,
        error: std::io::Error,
    },
    PackageManifestParse {
        path: PathBuf,
        error: toml::de::Error,
    },
    PackageProviderMissing {
        package: String,
        path: PathBuf,
    },
    PackageOptionsNotTable {
        package: String,
        path: PathBuf,
    },
}

impl fmt::Display for ReporterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReporterError::UnknownReporter { name, available } => write!(
                f,
                "unknown reporter `{name}` (available: {})",
                available.join(", ")
            ),
            ReporterError::PackagesDirMissing { path } => {
                write!(f, "reporter packages path {} is not a directory", path.display())
            }
            ReporterError::PackageManifestRead { path, error } => {
                write!(f, "failed to read {}: {error}", path.display())
            }
            ReporterError::PackageManifestParse { path, error } => {
                write!(f, "failed to parse {}: {error}", path.display())
            }
            ReporterError::PackageProviderMissing { package, path } => write!(
                f,
                "reporter package `{package}` ({}) declares no provider",
                path.display()
            ),
            ReporterError::PackageOptionsNotTable { package, path } => write!(
                f,
                "reporter package `{package}` ({}) has a non-table `options` entry",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ReporterError {}

/// Instantiates a reporter by name with its configuration mapping. Native
/// reporter packages resolve against this factory table the way module
/// packages resolve against the module provider table.
pub fn create_reporter(name: &str, options: &Value) -> Result<Box<dyn Reporter>, ReporterError> {
    match name {
        "console" => Ok(Box::new(ConsoleReporter::stdout(options))),
        other => Err(ReporterError::UnknownReporter {
            name: other.to_owned(),
            available: reporter_names(),
        }),
    }
}

pub fn reporter_names() -> Vec<String> {
    vec!["console".to_owned()]
}

/// Forwards every lifecycle event to each registered reporter in
/// registration order.
#[derive(Default, Debug)]
pub struct Broadcast {
    reporters: Vec<Box<dyn Reporter>>,
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// Loads every eligible reporter package under `path`, passing each one
    /// its configuration mapping from `options` (keyed by reporter name).
    /// Returns the loaded names; any per-package failure is fatal.
    pub fn load_from_path(
        &mut self,
        path: &Path,
        options: &IndexMap<String, Value>,
    ) -> Result<Vec<String>, ReporterError> {
        discovery::load_packages(self, path, options)
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Reporter for Broadcast {
    fn log_validation_errors(&mut self, records: &[ValidationRecord]) {
        for reporter in &mut self.reporters {
            reporter.log_validation_errors(records);
        }
    }

    fn log_test_set_begin(&mut self, set: &TestSetEntry) {
        for reporter in &mut self.reporters {
            reporter.log_test_set_begin(set);
        }
    }

    fn log_test_set_complete(&mut self, set: &TestSetEntry, report: &TestSetReport) {
        for reporter in &mut self.reporters {
            reporter.log_test_set_complete(set, report);
        }
    }

    fn log_test_set_skip(&mut self, set: &TestSetEntry) {
        for reporter in &mut self.reporters {
            reporter.log_test_set_skip(set);
        }
    }

    fn log_test_begin(&mut self, set: &TestSetEntry, test: &TestEntry) {
        for reporter in &mut self.reporters {
            reporter.log_test_begin(set, test);
        }
    }

    fn log_test_complete(&mut self, set: &TestSetEntry, test: &TestEntry, report: &TestReport) {
        for reporter in &mut self.reporters {
            reporter.log_test_complete(set, test, report);
        }
    }

    fn log_test_skip(&mut self, set: &TestSetEntry, test: &TestEntry) {
        for reporter in &mut self.reporters {
            reporter.log_test_skip(set, test);
        }
    }

    fn log_task_begin(&mut self, scope: &TaskScope, task: &TaskSchema, label: &str) {
        for reporter in &mut self.reporters {
            reporter.log_task_begin(scope, task, label);
        }
    }

    fn log_task_complete(&mut self, scope: &TaskScope, task: &TaskSchema, report: &TaskReport) {
        for reporter in &mut self.reporters {
            reporter.log_task_complete(scope, task, report);
        }
    }

    fn generate_report(&mut self, complete: &CompleteReport) {
        for reporter in &mut self.reporters {
            reporter.generate_report(complete);
        }
    }
}

#[cfg(test)]
#[path = "../tests/reporter_tests.rs"]
mod tests;
