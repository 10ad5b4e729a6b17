use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{json, Value};

use super::{document_schema, structural_document_schema, CompiledSchema};
use crate::registry::{Command, CommandFuture, Module, ModuleRegistry, ReadySignal};

struct EvalCommand;

impl Command for EvalCommand {
    fn description(&self) -> &str {
        "evaluate"
    }

    fn args_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["code"],
            "properties": { "code": { "type": "string" } },
        }))
    }

    fn expect_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "value": {} },
        }))
    }

    fn run(&self, _args: Value, _ready: ReadySignal) -> CommandFuture {
        async { Ok(Value::Null) }.boxed()
    }
}

fn registry() -> ModuleRegistry {
    let mut commands: IndexMap<String, Arc<dyn Command>> = IndexMap::new();
    commands.insert("eval".to_owned(), Arc::new(EvalCommand));
    let mut registry = ModuleRegistry::new();
    registry
        .register(Module {
            name: "js".to_owned(),
            description: None,
            defaults_schema: Some(json!({
                "type": "object",
                "properties": { "timeout": { "type": "integer" } },
            })),
            defaults: Default::default(),
            commands,
        })
        .expect("register");
    registry
}

#[test]
fn composed_schema_discriminates_over_registered_commands() {
    let schema = document_schema(&registry());
    let branches = schema["properties"]["beforeAll"]["items"]["anyOf"]
        .as_array()
        .expect("anyOf branches");
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0]["properties"]["do"]["enum"], json!(["js.eval"]));
    assert_eq!(
        branches[0]["properties"]["args"]["required"],
        json!(["code"])
    );
}

#[test]
fn composed_defaults_include_module_schema_and_catch_all() {
    let schema = document_schema(&registry());
    let defaults = &schema["properties"]["defaults"];
    assert!(defaults["properties"]["js"].is_object());
    assert!(defaults["patternProperties"][".*"].is_object());
}

#[test]
fn composed_schema_accepts_valid_document_and_rejects_unknown_command() {
    let compiled = CompiledSchema::compile(&document_schema(&registry())).expect("compile");
    let valid = json!({
        "name": "api.auth",
        "tests": [{
            "description": "login",
            "tasks": [{ "do": "js.eval", "args": { "code": "1" } }],
        }],
    });
    assert!(compiled.is_valid(&valid));

    let unknown_command = json!({
        "name": "api.auth",
        "tests": [{
            "description": "login",
            "tasks": [{ "do": "foo.bar" }],
        }],
    });
    assert!(!compiled.is_valid(&unknown_command));
}

#[test]
fn structural_schema_accepts_unregistered_commands() {
    let compiled = CompiledSchema::compile(&structural_document_schema()).expect("compile");
    let document = json!({
        "name": "pub",
        "tests": [{
            "description": "anything",
            "tasks": [{ "do": "foo.bar" }],
        }],
    });
    assert!(compiled.is_valid(&document));
}

#[test]
fn structural_schema_rejects_grammar_violations() {
    let compiled = CompiledSchema::compile(&structural_document_schema()).expect("compile");

    let missing_name = json!({ "tests": [] });
    assert!(!compiled.is_valid(&missing_name));

    let bad_order = json!({ "name": "x", "executionOrder": "parallel" });
    assert!(!compiled.is_valid(&bad_order));

    let extra_task_field = json!({
        "name": "x",
        "tests": [{
            "description": "t",
            "tasks": [{ "do": "a.b", "bogus": 1 }],
        }],
    });
    assert!(!compiled.is_valid(&extra_task_field));

    let task_without_do = json!({
        "name": "x",
        "beforeAll": [{ "id": "only-id" }],
    });
    assert!(!compiled.is_valid(&task_without_do));
}

#[test]
fn validator_reports_paths_into_the_document() {
    let compiled = CompiledSchema::compile(&structural_document_schema()).expect("compile");
    let document = json!({
        "name": "x",
        "tests": [{ "description": "t", "tasks": [{ "do": 42 }] }],
    });
    let violations = compiled.validate(&document);
    assert!(!violations.is_empty());
    assert!(violations
        .iter()
        .any(|violation| violation.path.contains("tests[0].tasks[0]")));
}
