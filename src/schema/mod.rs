use serde_json::{json, Map, Value};

use crate::registry::ModuleRegistry;

pub mod validator;

pub use validator::{CompiledSchema, SchemaCompileError, SchemaViolation};

/// Dotted test-set identifier: `api`, `api.auth`, ...
pub const SET_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$";

/// Unified JSON Schema for a full test document, with the task grammar
/// discriminated over every registered `module.command` pair. This is the
/// schema written by `--generate-schema` for editor tooling.
pub fn document_schema(registry: &ModuleRegistry) -> Value {
    let mut branches = Vec::new();
    for (module_name, module) in registry.modules() {
        for (command_name, registered) in &module.commands {
            let id = format!("{module_name}.{command_name}");
            let mut branch = Map::new();
            let mut properties = Map::new();
            properties.insert("do".to_owned(), json!({ "enum": [id] }));
            if let Some(args) = registered.command.args_schema() {
                properties.insert("args".to_owned(), args);
            }
            if let Some(expect) = registered.command.expect_schema() {
                properties.insert("expect".to_owned(), expect);
            }
            branch.insert(
                "description".to_owned(),
                Value::String(registered.command.description().to_owned()),
            );
            branch.insert("properties".to_owned(), Value::Object(properties));
            branches.push(Value::Object(branch));
        }
    }

    let mut defaults_properties = Map::new();
    for (module_name, module) in registry.modules() {
        if let Some(schema) = &module.defaults_schema {
            defaults_properties.insert(module_name.clone(), schema.clone());
        }
    }

    skeleton(
        task_schema(Some(Value::Array(branches))),
        json!({
            "type": "object",
            "properties": Value::Object(defaults_properties),
            "patternProperties": { ".*": { "type": "object" } },
        }),
    )
}

/// The same grammar without command discrimination. The repository validates
/// documents against this and resolves commands itself, so structural
/// validity plus command registration is exactly composed-schema validity.
pub fn structural_document_schema() -> Value {
    skeleton(
        task_schema(None),
        json!({
            "type": "object",
            "patternProperties": { ".*": { "type": "object" } },
        }),
    )
}

fn skeleton(task: Value, defaults: Value) -> Value {
    let task_list = json!({ "type": "array", "items": task });
    let test = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["description", "tasks"],
        "properties": {
            "name": { "type": "string" },
            "description": { "type": "string" },
            "tags": { "type": "array", "items": { "type": "string" } },
            "defaults": defaults.clone(),
            "params": { "type": "object" },
            "skip": { "type": "boolean" },
            "tasks": task_list.clone(),
        },
    });

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "dexit test document",
        "type": "object",
        "additionalProperties": false,
        "required": ["name"],
        "properties": {
            "name": { "type": "string", "pattern": SET_NAME_PATTERN },
            "description": { "type": "string" },
            "tags": { "type": "array", "items": { "type": "string" } },
            "defaults": defaults,
            "params": { "type": "object" },
            "beforeAll": task_list.clone(),
            "afterAll": task_list.clone(),
            "beforeEach": task_list.clone(),
            "afterEach": task_list,
            "executionOrder": { "enum": ["async", "sync"] },
            "skip": { "type": "boolean" },
            "tests": { "type": "array", "items": test },
        },
    })
}

fn task_schema(branches: Option<Value>) -> Value {
    let mut task = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["do"],
        "properties": {
            "id": { "type": "string" },
            "description": { "type": "string" },
            "do": { "type": "string", "pattern": r"^[^.\s]+\.[^\s]+$" },
            "args": { "type": "object" },
            "expect": { "type": "object" },
            "set": { "type": "object" },
            "runBeforeAsync": { "type": "string" },
            "continueOnError": { "type": "boolean" },
        },
    });
    if let Some(branches) = branches {
        task["anyOf"] = branches;
    }
    task
}

/// Compiles the structural grammar once per repository.
pub fn compile_structural_schema() -> CompiledSchema {
    CompiledSchema::compile(&structural_document_schema())
        .expect("structural document schema must compile")
}

#[cfg(test)]
#[path = "../tests/schema_tests.rs"]
mod tests;
