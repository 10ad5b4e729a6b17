use crate::registry::Module;

pub mod control;
pub mod shell;

pub type ModuleFactory = fn() -> Module;

/// Resolves a module-package `provider` key to its compiled-in factory.
pub fn provider(name: &str) -> Option<ModuleFactory> {
    match name {
        "shell" => Some(shell::module),
        "control" => Some(control::module),
        _ => None,
    }
}

pub fn provider_names() -> Vec<String> {
    vec!["shell".to_owned(), "control".to_owned()]
}

/// The modules registered by default unless `--no-builtin` is given.
pub fn builtin_modules() -> Vec<Module> {
    vec![shell::module(), control::module()]
}
