use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::registry::{AssertionError, Command, CommandError, CommandFuture, Module, ReadySignal};

pub fn module() -> Module {
    let mut commands: IndexMap<String, Arc<dyn Command>> = IndexMap::new();
    commands.insert("echo".to_owned(), Arc::new(EchoCommand));
    commands.insert("sleep".to_owned(), Arc::new(SleepCommand));
    commands.insert("fail".to_owned(), Arc::new(FailCommand));
    Module {
        name: "control".to_owned(),
        description: Some("Pure commands for wiring and exercising test flows".to_owned()),
        defaults_schema: None,
        defaults: Default::default(),
        commands,
    }
}

/// Resolves to its own `value` argument. Useful for seeding params via `set`
/// and for asserting interpolation results.
struct EchoCommand;

impl Command for EchoCommand {
    fn description(&self) -> &str {
        "Return the `value` argument unchanged"
    }

    fn args_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "value": {} },
        }))
    }

    fn expect_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "value": {} },
        }))
    }

    fn run(&self, args: Value, _ready: ReadySignal) -> CommandFuture {
        async move { Ok(args.get("value").cloned().unwrap_or(Value::Null)) }.boxed()
    }

    fn expect(&self, expect: &Value, result: &Value) -> Option<Vec<AssertionError>> {
        let mut errors = Vec::new();
        if let Some(expected) = expect.get("value") {
            if expected != result {
                errors.push(AssertionError::mismatch(
                    "value mismatch",
                    expected.clone(),
                    result.clone(),
                ));
            }
        }
        Some(errors)
    }
}

/// Sleeps in the background: ready fires immediately, so later tasks overlap
/// with the delay.
struct SleepCommand;

impl Command for SleepCommand {
    fn description(&self) -> &str {
        "Wait for `ms` milliseconds"
    }

    fn args_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["ms"],
            "properties": { "ms": { "type": "integer", "minimum": 0 } },
        }))
    }

    fn validate_args(&self, args: &Value) -> Vec<AssertionError> {
        match args.get("ms").map(Value::as_u64) {
            Some(Some(_)) => Vec::new(),
            Some(None) => vec![AssertionError::message(
                "args.ms must be a non-negative integer",
            )],
            None => vec![AssertionError::message("args.ms is required")],
        }
    }

    fn run(&self, args: Value, ready: ReadySignal) -> CommandFuture {
        async move {
            let ms = args
                .get("ms")
                .and_then(Value::as_u64)
                .ok_or_else(|| CommandError::new("args.ms must be a non-negative integer"))?;
            ready.notify();
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "slept": ms }))
        }
        .boxed()
    }

    fn label(&self, run_args: &Value, _expect_args: &Value) -> Option<String> {
        run_args
            .get("ms")
            .and_then(Value::as_u64)
            .map(|ms| format!("sleep {ms}ms"))
    }
}

/// Always fails; exercises error propagation and `continueOnError`.
struct FailCommand;

impl Command for FailCommand {
    fn description(&self) -> &str {
        "Fail with the given message"
    }

    fn args_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "message": { "type": "string" } },
        }))
    }

    fn run(&self, args: Value, _ready: ReadySignal) -> CommandFuture {
        async move {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("task failed")
                .to_owned();
            Err(CommandError::new(message))
        }
        .boxed()
    }
}
