use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared shape of a test-set document, deserialized after structural
/// validation. Field names mirror the document grammar.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestSetSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub before_all: Vec<TaskSchema>,
    #[serde(default)]
    pub after_all: Vec<TaskSchema>,
    #[serde(default)]
    pub before_each: Vec<TaskSchema>,
    #[serde(default)]
    pub after_each: Vec<TaskSchema>,
    #[serde(default)]
    pub execution_order: ExecutionOrder,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub tests: Vec<TestSchema>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestSchema {
    #[serde(default)]
    pub name: Option<String>,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub skip: bool,
    pub tasks: Vec<TaskSchema>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskSchema {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "do")]
    pub command: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub expect: Option<Map<String, Value>>,
    #[serde(default)]
    pub set: Option<Map<String, Value>>,
    #[serde(default)]
    pub run_before_async: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    #[default]
    Async,
    Sync,
}

/// A namespace node after inheritance. Placeholder nodes (created for
/// intermediate path segments nobody claimed) keep `schema: None` and carry
/// only inherited state.
#[derive(Debug)]
pub struct TestSetEntry {
    /// Fully qualified id, e.g. `$.api.auth`.
    pub id: String,
    /// Local path segment, e.g. `auth`.
    pub name: String,
    pub path: Vec<String>,
    pub source: Option<PathBuf>,
    pub schema: Option<TestSetSchema>,
    pub tags: Vec<String>,
    pub defaults: Map<String, Value>,
    pub params: Map<String, Value>,
    pub before_all_tasks: Vec<TaskSchema>,
    pub after_all_tasks: Vec<TaskSchema>,
    /// Parent's accumulated before-each list followed by this node's own.
    pub before_each_tasks: Vec<TaskSchema>,
    pub after_each_tasks: Vec<TaskSchema>,
    pub execution_order: ExecutionOrder,
    pub skip: bool,
    /// Own tests plus every descendant's, computed during `build`.
    pub test_count: usize,
    pub tests: Vec<TestEntry>,
    pub children: IndexMap<String, TestSetEntry>,
}

impl TestSetEntry {
    pub(super) fn placeholder(path: Vec<String>) -> Self {
        let name = path.last().cloned().unwrap_or_default();
        let id = if path.is_empty() {
            "$".to_owned()
        } else {
            format!("$.{}", path.join("."))
        };
        Self {
            id,
            name,
            path,
            source: None,
            schema: None,
            tags: Vec::new(),
            defaults: Map::new(),
            params: Map::new(),
            before_all_tasks: Vec::new(),
            after_all_tasks: Vec::new(),
            before_each_tasks: Vec::new(),
            after_each_tasks: Vec::new(),
            execution_order: ExecutionOrder::default(),
            skip: false,
            test_count: 0,
            tests: Vec::new(),
            children: IndexMap::new(),
        }
    }
}

/// A test after inheritance of tags and skip from its set.
#[derive(Debug)]
pub struct TestEntry {
    pub name: Option<String>,
    pub description: String,
    pub tags: Vec<String>,
    pub defaults: Map<String, Value>,
    pub params: Map<String, Value>,
    pub skip: bool,
    pub tasks: Vec<TaskSchema>,
}
