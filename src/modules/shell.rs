use std::process::Stdio;
use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::registry::{AssertionError, Command, CommandError, CommandFuture, Module, ReadySignal};

const LABEL_WIDTH: usize = 60;

pub fn module() -> Module {
    let mut commands: IndexMap<String, Arc<dyn Command>> = IndexMap::new();
    commands.insert("run".to_owned(), Arc::new(RunCommand));
    Module {
        name: "shell".to_owned(),
        description: Some("Run command lines and assert on their output".to_owned()),
        defaults_schema: Some(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "shell": { "type": "string" },
                "cwd": { "type": "string" },
                "env": { "type": "object", "additionalProperties": { "type": "string" } },
            },
        })),
        defaults: Default::default(),
        commands,
    }
}

struct RunCommand;

impl Command for RunCommand {
    fn description(&self) -> &str {
        "Run a command line through the shell and capture exit code and output"
    }

    fn args_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["command"],
            "properties": {
                "command": { "type": "string", "minLength": 1 },
                "shell": { "type": "string" },
                "cwd": { "type": "string" },
                "env": { "type": "object", "additionalProperties": { "type": "string" } },
            },
        }))
    }

    fn expect_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "exitCode": { "type": "integer" },
                "success": { "type": "boolean" },
                "stdout": { "type": "string" },
                "stdoutContains": { "type": "string" },
                "stderrContains": { "type": "string" },
            },
        }))
    }

    fn validate_args(&self, args: &Value) -> Vec<AssertionError> {
        match args.get("command").map(Value::as_str) {
            Some(Some(command)) if !command.is_empty() => Vec::new(),
            Some(_) => vec![AssertionError::message(
                "args.command must be a non-empty string",
            )],
            None => vec![AssertionError::message("args.command is required")],
        }
    }

    fn run(&self, args: Value, ready: ReadySignal) -> CommandFuture {
        async move {
            let command_line = args
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| CommandError::new("args.command must be a string"))?
                .to_owned();
            let shell = args
                .get("shell")
                .and_then(Value::as_str)
                .unwrap_or("sh")
                .to_owned();

            let mut process = tokio::process::Command::new(&shell);
            process
                .arg("-c")
                .arg(&command_line)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            if let Some(cwd) = args.get("cwd").and_then(Value::as_str) {
                process.current_dir(cwd);
            }
            if let Some(Value::Object(env)) = args.get("env") {
                for (key, value) in env {
                    if let Some(value) = value.as_str() {
                        process.env(key, value);
                    }
                }
            }

            let child = process.spawn()?;
            // The child is running; later tasks may start while we collect
            // its output.
            ready.notify();
            let output = child.wait_with_output().await?;

            Ok(json!({
                "exitCode": output.status.code(),
                "success": output.status.success(),
                "stdout": String::from_utf8_lossy(&output.stdout).into_owned(),
                "stderr": String::from_utf8_lossy(&output.stderr).into_owned(),
            }))
        }
        .boxed()
    }

    fn expect(&self, expect: &Value, result: &Value) -> Option<Vec<AssertionError>> {
        let mut errors = Vec::new();

        if let Some(expected) = expect.get("exitCode") {
            let actual = result.get("exitCode").cloned().unwrap_or(Value::Null);
            if *expected != actual {
                errors.push(AssertionError::mismatch(
                    "exit code mismatch",
                    expected.clone(),
                    actual,
                ));
            }
        }
        if let Some(expected) = expect.get("success") {
            let actual = result.get("success").cloned().unwrap_or(Value::Null);
            if *expected != actual {
                errors.push(AssertionError::mismatch(
                    "success mismatch",
                    expected.clone(),
                    actual,
                ));
            }
        }
        if let Some(expected) = expect.get("stdout").and_then(Value::as_str) {
            let actual = result.get("stdout").and_then(Value::as_str).unwrap_or("");
            if expected != actual {
                errors.push(AssertionError::mismatch(
                    "stdout mismatch",
                    Value::String(expected.to_owned()),
                    Value::String(actual.to_owned()),
                ));
            }
        }
        for (key, stream) in [("stdoutContains", "stdout"), ("stderrContains", "stderr")] {
            if let Some(needle) = expect.get(key).and_then(Value::as_str) {
                let haystack = result.get(stream).and_then(Value::as_str).unwrap_or("");
                if !haystack.contains(needle) {
                    errors.push(AssertionError::mismatch(
                        format!("{stream} does not contain expected text"),
                        Value::String(needle.to_owned()),
                        Value::String(haystack.to_owned()),
                    ));
                }
            }
        }

        Some(errors)
    }

    fn label(&self, run_args: &Value, _expect_args: &Value) -> Option<String> {
        let command_line = run_args.get("command").and_then(Value::as_str)?;
        let first_line = command_line.lines().next().unwrap_or("");
        let mut label: String = first_line.chars().take(LABEL_WIDTH).collect();
        if first_line.chars().count() > LABEL_WIDTH {
            label.push('…');
        }
        Some(format!("sh: {label}"))
    }
}
