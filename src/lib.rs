pub mod config;
pub mod interpolate;
pub mod loader;
pub mod modules;
pub mod registry;
pub mod reporter;
pub mod repository;
pub mod runner;
pub mod schema;

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunArgs),
    Version,
    Help,
}

/// Options for a test run, prior to merging with the project manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub tests_path: Option<PathBuf>,
    pub base_path: Option<PathBuf>,
    pub modules_path: Option<PathBuf>,
    pub no_autoload: bool,
    pub no_builtin: bool,
    pub ignore_invalid: bool,
    pub reporters: Vec<String>,
    pub debug: bool,
    pub generate_schema: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliParseError {
    MissingValue(String),
    UnknownArgument(String),
    ExtraPositional(String),
}

impl std::fmt::Display for CliParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliParseError::MissingValue(flag) => write!(f, "{flag} requires a value"),
            CliParseError::UnknownArgument(arg) => write!(f, "unknown argument: {arg}"),
            CliParseError::ExtraPositional(arg) => {
                write!(f, "unexpected extra positional argument: {arg}")
            }
        }
    }
}

impl std::error::Error for CliParseError {}

pub fn parse_command<I>(args: I) -> Result<Command, CliParseError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut run = RunArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" => return Ok(Command::Version),
            "--base-path" => {
                let Some(path) = args.next() else {
                    return Err(CliParseError::MissingValue("--base-path".to_owned()));
                };
                run.base_path = Some(PathBuf::from(path));
            }
            "--modules-path" => {
                let Some(path) = args.next() else {
                    return Err(CliParseError::MissingValue("--modules-path".to_owned()));
                };
                run.modules_path = Some(PathBuf::from(path));
            }
            "--reporter" => {
                let Some(name) = args.next() else {
                    return Err(CliParseError::MissingValue("--reporter".to_owned()));
                };
                run.reporters.push(name);
            }
            "--generate-schema" => {
                let Some(path) = args.next() else {
                    return Err(CliParseError::MissingValue("--generate-schema".to_owned()));
                };
                run.generate_schema = Some(PathBuf::from(path));
            }
            "--no-autoload" => run.no_autoload = true,
            "--no-builtin" => run.no_builtin = true,
            "--ignore-invalid" => run.ignore_invalid = true,
            "--debug" => run.debug = true,
            other if other.starts_with('-') => {
                return Err(CliParseError::UnknownArgument(other.to_owned()));
            }
            positional => {
                if run.tests_path.is_some() {
                    return Err(CliParseError::ExtraPositional(positional.to_owned()));
                }
                run.tests_path = Some(PathBuf::from(positional));
            }
        }
    }

    Ok(Command::Run(run))
}

pub fn help_text() -> String {
    let mut help = String::new();
    help.push_str("Usage\n");
    help.push_str("  dexit [testsPath] [options]\n\n");
    help.push_str("Arguments\n");
    help.push_str("  testsPath                  Directory of YAML test documents (default: ./tests)\n\n");
    help.push_str("Options\n");
    help.push_str("  --base-path <PATH>         Project base directory (default: cwd)\n");
    help.push_str("  --modules-path <PATH>      Module packages directory (default: <base>/dexit_modules)\n");
    help.push_str("  --no-autoload              Do not load module packages from the modules path\n");
    help.push_str("  --no-builtin               Do not register built-in modules\n");
    help.push_str("  --ignore-invalid           Drop invalid test documents instead of aborting\n");
    help.push_str("  --reporter <NAME>          Activate a reporter (repeatable, default: console)\n");
    help.push_str("  --generate-schema <FILE>   Write the composed document schema and exit\n");
    help.push_str("  --debug                    Verbose diagnostics on stderr\n");
    help.push_str("  --version                  Print the version\n");
    help.push_str("  -h, --help                 Print this help\n\n");
    help.push_str("Exit codes\n");
    help.push_str("  0  all tests passed\n");
    help.push_str("  1  some tests failed\n");
    help.push_str("  2  validation or bootstrap error\n");
    help
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
