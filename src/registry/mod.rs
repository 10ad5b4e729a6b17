use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::schema::validator::{CompiledSchema, SchemaViolation};

pub(crate) mod discovery;

/// Identifier prefix reserved for registry-internal bookkeeping. Modules and
/// commands must not claim it.
pub const RESERVED_PREFIX: &str = "_";

/// Single-shot latch a command fires once it has reached the point where
/// subsequent tasks in the same list may start (subscribed, bound, spawned).
/// Cloneable so the runner can force-resolve it when a command completes
/// without notifying.
#[derive(Clone)]
pub struct ReadySignal {
    sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ReadySignal {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Fires the latch. Subsequent calls are no-ops.
    pub fn notify(&self) {
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadySignal")
    }
}

/// Runtime failure raised by a command's `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<std::io::Error> for CommandError {
    fn from(value: std::io::Error) -> Self {
        Self::new(value.to_string())
    }
}

/// Assertion failure returned (never thrown) by validation and expect hooks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionError {
    pub detail: AssertionDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AssertionDetail {
    Message(String),
    Violations(Vec<SchemaViolation>),
}

impl AssertionError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            detail: AssertionDetail::Message(message.into()),
            expected: None,
            actual: None,
        }
    }

    pub fn mismatch(message: impl Into<String>, expected: Value, actual: Value) -> Self {
        Self {
            detail: AssertionDetail::Message(message.into()),
            expected: Some(expected),
            actual: Some(actual),
        }
    }

    pub fn violations(violations: Vec<SchemaViolation>) -> Self {
        Self {
            detail: AssertionDetail::Violations(violations),
            expected: None,
            actual: None,
        }
    }
}

impl fmt::Display for AssertionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            AssertionDetail::Message(message) => f.write_str(message)?,
            AssertionDetail::Violations(violations) => {
                let rendered = violations
                    .iter()
                    .map(SchemaViolation::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                f.write_str(&rendered)?;
            }
        }
        if let (Some(expected), Some(actual)) = (&self.expected, &self.actual) {
            write!(f, " (expected {expected}, actual {actual})")?;
        }
        Ok(())
    }
}

pub type CommandFuture = BoxFuture<'static, Result<Value, CommandError>>;

/// A module command. Implementations own everything their returned future
/// needs; the future must not borrow the command.
pub trait Command: Send + Sync {
    fn description(&self) -> &str;

    fn args_schema(&self) -> Option<Value> {
        None
    }

    fn expect_schema(&self) -> Option<Value> {
        None
    }

    fn validate_args(&self, _args: &Value) -> Vec<AssertionError> {
        Vec::new()
    }

    fn validate_expect(&self, _expect: &Value) -> Vec<AssertionError> {
        Vec::new()
    }

    fn run(&self, args: Value, ready: ReadySignal) -> CommandFuture;

    /// Evaluates expectations against the task result. `None` means the
    /// command has no expect support at all.
    fn expect(&self, _expect: &Value, _result: &Value) -> Option<Vec<AssertionError>> {
        None
    }

    fn label(&self, _run_args: &Value, _expect_args: &Value) -> Option<String> {
        None
    }
}

pub struct Module {
    pub name: String,
    pub description: Option<String>,
    pub defaults_schema: Option<Value>,
    /// Baseline defaults for this module's commands, below any
    /// document-level defaults. Package manifests may supply them.
    pub defaults: Map<String, Value>,
    pub commands: IndexMap<String, Arc<dyn Command>>,
}

/// A command with its validators compiled at registration time.
pub struct RegisteredCommand {
    pub command: Arc<dyn Command>,
    pub args_validator: Option<CompiledSchema>,
    pub expect_validator: Option<CompiledSchema>,
}

pub struct RegisteredModule {
    pub description: Option<String>,
    pub defaults_schema: Option<Value>,
    pub defaults: Map<String, Value>,
    pub commands: IndexMap<String, RegisteredCommand>,
}

#[derive(Debug)]
pub enum RegistryError {
    DuplicateModule {
        name: String,
    },
    ReservedIdentifier {
        module: String,
        identifier: String,
    },
    InvalidCommandSchema {
        module: String,
        command: String,
        which: &'static str,
        detail: String,
    },
    ModulesDirMissing {
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
    PackageDefaultsNotTable {
        package: String,
        path: PathBuf,
    },
    UnknownProvider {
        package: String,
        provider: String,
        available: Vec<String>,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateModule { name } => {
                write!(f, "module `{name}` is already registered")
            }
            RegistryError::ReservedIdentifier { module, identifier } => write!(
                f,
                "module `{module}` uses reserved identifier `{identifier}` (prefix `{RESERVED_PREFIX}` is reserved)"
            ),
            RegistryError::InvalidCommandSchema {
                module,
                command,
                which,
                detail,
            } => write!(
                f,
                "command `{module}.{command}` has an invalid {which} schema: {detail}"
            ),
            RegistryError::ModulesDirMissing { path } => {
                write!(f, "modules path {} is not a directory", path.display())
            }
            RegistryError::PackageManifestRead { path, error } => {
                write!(f, "failed to read {}: {error}", path.display())
            }
            RegistryError::PackageManifestParse { path, error } => {
                write!(f, "failed to parse {}: {error}", path.display())
            }
            RegistryError::PackageProviderMissing { package, path } => write!(
                f,
                "module package `{package}` ({}) declares no provider",
                path.display()
            ),
            RegistryError::PackageDefaultsNotTable { package, path } => write!(
                f,
                "module package `{package}` ({}) has a non-table `defaults` entry",
                path.display()
            ),
            RegistryError::UnknownProvider {
                package,
                provider,
                available,
            } => write!(
                f,
                "module package `{package}` names unknown provider `{provider}` (available: {})",
                available.join(", ")
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Holds every loaded module and resolves `module.command` identifiers.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, RegisteredModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Module) -> Result<(), RegistryError> {
        if module.name.starts_with(RESERVED_PREFIX) {
            return Err(RegistryError::ReservedIdentifier {
                module: module.name.clone(),
                identifier: module.name,
            });
        }
        if self.modules.contains_key(&module.name) {
            return Err(RegistryError::DuplicateModule { name: module.name });
        }

        let mut commands = IndexMap::new();
        for (name, command) in module.commands {
            if name.starts_with(RESERVED_PREFIX) {
                return Err(RegistryError::ReservedIdentifier {
                    module: module.name.clone(),
                    identifier: name,
                });
            }
            let args_validator = compile_schema(
                command.args_schema().as_ref(),
                &module.name,
                &name,
                "args",
            )?;
            let expect_validator = compile_schema(
                command.expect_schema().as_ref(),
                &module.name,
                &name,
                "expect",
            )?;
            commands.insert(
                name,
                RegisteredCommand {
                    command,
                    args_validator,
                    expect_validator,
                },
            );
        }

        tracing::debug!(module = %module.name, commands = commands.len(), "registered module");
        self.modules.insert(
            module.name,
            RegisteredModule {
                description: module.description,
                defaults_schema: module.defaults_schema,
                defaults: module.defaults,
                commands,
            },
        );
        Ok(())
    }

    /// Loads every eligible module package under `path`. Returns the number
    /// of modules registered; any per-package failure is fatal.
    pub fn load_from_path(&mut self, path: &std::path::Path) -> Result<usize, RegistryError> {
        discovery::load_packages(self, path)
    }

    /// Splits `id` at the first `.` into `(module, command)`.
    pub fn parse_command(id: &str) -> Option<(&str, &str)> {
        id.split_once('.')
    }

    pub fn get_command(&self, id: &str) -> Option<&RegisteredCommand> {
        let (module, command) = Self::parse_command(id)?;
        self.modules.get(module)?.commands.get(command)
    }

    pub fn get_module(&self, name: &str) -> Option<&RegisteredModule> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&String, &RegisteredModule)> {
        self.modules.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn compile_schema(
    schema: Option<&Value>,
    module: &str,
    command: &str,
    which: &'static str,
) -> Result<Option<CompiledSchema>, RegistryError> {
    schema
        .map(|schema| {
            CompiledSchema::compile(schema).map_err(|err| RegistryError::InvalidCommandSchema {
                module: module.to_owned(),
                command: command.to_owned(),
                which,
                detail: err.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
#[path = "../tests/registry_tests.rs"]
mod tests;
