use std::fs;
use std::process::ExitCode;

use dexit::config::Config;
use dexit::registry::ModuleRegistry;
use dexit::reporter::{create_reporter, Broadcast, Reporter};
use dexit::repository::Repository;
use dexit::runner::Runner;
use dexit::{help_text, modules, parse_command, schema, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(args) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            eprint!("{}", help_text());
            return ExitCode::from(2);
        }
    };

    let run = match command {
        Command::Help => {
            print!("{}", help_text());
            return ExitCode::SUCCESS;
        }
        Command::Version => {
            println!("dexit {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Command::Run(run) => run,
    };

    if run.debug {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dexit=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(err) => {
            eprintln!("error: failed to resolve current directory: {err}");
            return ExitCode::from(2);
        }
    };
    let config = match Config::resolve(&run, &cwd) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let mut registry = ModuleRegistry::new();
    if config.load_builtin_modules {
        for module in modules::builtin_modules() {
            if let Err(err) = registry.register(module) {
                eprintln!("error: {err}");
                return ExitCode::from(2);
            }
        }
    }
    if config.autoload_modules {
        // A fresh project has no modules directory; only an explicitly
        // configured path is required to exist.
        if config.modules_path.is_dir() || run.modules_path.is_some() {
            match registry.load_from_path(&config.modules_path) {
                Ok(count) => tracing::debug!(count, "loaded module packages"),
                Err(err) => {
                    eprintln!("error: {err}");
                    return ExitCode::from(2);
                }
            }
        }
    }

    if let Some(out) = &run.generate_schema {
        let document = schema::document_schema(&registry);
        let rendered = match serde_json::to_string_pretty(&document) {
            Ok(rendered) => rendered,
            Err(err) => {
                eprintln!("error: failed to encode schema: {err}");
                return ExitCode::from(2);
            }
        };
        if let Err(err) = fs::write(out, rendered + "\n") {
            eprintln!("error: failed to write {}: {err}", out.display());
            return ExitCode::from(2);
        }
        println!("schema written to {}", out.display());
        return ExitCode::SUCCESS;
    }

    let documents = match dexit::loader::load_documents(&config.tests_path) {
        Ok(documents) => documents,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let mut broadcast = Broadcast::new();
    let mut package_reporters = Vec::new();
    if config.autoload_modules && (config.modules_path.is_dir() || run.modules_path.is_some()) {
        match broadcast.load_from_path(&config.modules_path, &config.reporters) {
            Ok(names) => {
                tracing::debug!(count = names.len(), "loaded reporter packages");
                package_reporters = names;
            }
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::from(2);
            }
        }
    }
    for (name, options) in &config.reporters {
        // Config entries naming a loaded package already supplied its
        // options; the rest resolve against the built-in factories.
        if package_reporters.iter().any(|loaded| loaded == name) {
            continue;
        }
        match create_reporter(name, options) {
            Ok(reporter) => broadcast.register(reporter),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::from(2);
            }
        }
    }

    let mut repository = Repository::new(&registry);
    match repository.load_documents(&documents, config.ignore_invalid_tests) {
        Ok(records) => {
            if !records.is_empty() {
                broadcast.log_validation_errors(&records);
            }
        }
        Err(dexit::repository::LoadError::Validation(records)) => {
            broadcast.log_validation_errors(&records);
            return ExitCode::from(2);
        }
    }
    repository.build();

    let runner = Runner::new(&registry, broadcast);
    let report = runner.run(&repository).await;

    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
