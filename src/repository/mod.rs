use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;

use crate::loader::TestDocument;
use crate::registry::ModuleRegistry;
use crate::schema::{self, CompiledSchema, SchemaViolation};

mod model;

pub use model::{ExecutionOrder, TaskSchema, TestEntry, TestSchema, TestSetEntry, TestSetSchema};

/// One validation finding, addressed by the set id (when known) and a path
/// into the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRecord {
    /// Fully qualified set id, `None` when the document never named one.
    pub set: Option<String>,
    /// Location of the finding, e.g. `$.api.auth.tests[0].tasks[2]`.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub detail: ValidationDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationDetail {
    Schema(Vec<SchemaViolation>),
    Malformed(String),
    DuplicateName,
    UnknownCommand { id: String },
    InvalidArgs(Vec<SchemaViolation>),
    InvalidExpect(Vec<SchemaViolation>),
    DuplicateTaskId { id: String },
    MissingRunBeforeTarget { target: String },
}

impl fmt::Display for ValidationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            ValidationDetail::Schema(violations) => {
                write!(f, "{}: invalid document: {}", self.path, join(violations))
            }
            ValidationDetail::Malformed(detail) => {
                write!(f, "{}: malformed document: {detail}", self.path)
            }
            ValidationDetail::DuplicateName => {
                write!(f, "{}: test set name is already defined", self.path)
            }
            ValidationDetail::UnknownCommand { id } => {
                write!(f, "{}: unknown command `{id}`", self.path)
            }
            ValidationDetail::InvalidArgs(violations) => {
                write!(f, "{}: invalid args: {}", self.path, join(violations))
            }
            ValidationDetail::InvalidExpect(violations) => {
                write!(f, "{}: invalid expect: {}", self.path, join(violations))
            }
            ValidationDetail::DuplicateTaskId { id } => {
                write!(f, "{}: duplicate task id `{id}`", self.path)
            }
            ValidationDetail::MissingRunBeforeTarget { target } => write!(
                f,
                "{}: runBeforeAsync names unknown task `{target}`",
                self.path
            ),
        }
    }
}

fn join(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(SchemaViolation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug)]
pub enum LoadError {
    /// Accumulated findings; raised when `ignore_invalid` is off.
    Validation(Vec<ValidationRecord>),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Validation(records) => {
                write!(f, "{} invalid test document(s)", records.len())
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Owns the namespaced test-set tree from document ingestion until the
/// runner has finished reading it.
pub struct Repository<'r> {
    registry: &'r ModuleRegistry,
    structural: CompiledSchema,
    root: TestSetEntry,
}

impl<'r> Repository<'r> {
    pub fn new(registry: &'r ModuleRegistry) -> Self {
        Self {
            registry,
            structural: schema::compile_structural_schema(),
            root: TestSetEntry::placeholder(Vec::new()),
        }
    }

    /// Ingests every document, accumulating validation findings. With
    /// `ignore_invalid` the findings are returned for reporting and the
    /// offending documents are dropped; otherwise any finding fails the
    /// whole load.
    pub fn load_documents(
        &mut self,
        documents: &[TestDocument],
        ignore_invalid: bool,
    ) -> Result<Vec<ValidationRecord>, LoadError> {
        let mut records = Vec::new();
        for document in documents {
            self.load_test_set(document, &mut records);
        }
        if !ignore_invalid && !records.is_empty() {
            return Err(LoadError::Validation(records));
        }
        Ok(records)
    }

    fn load_test_set(&mut self, document: &TestDocument, records: &mut Vec<ValidationRecord>) {
        let violations = self.structural.validate(&document.body);
        if !violations.is_empty() {
            records.push(ValidationRecord {
                set: None,
                path: "$".to_owned(),
                source: Some(document.path.clone()),
                detail: ValidationDetail::Schema(violations),
            });
            return;
        }

        let schema: TestSetSchema = match serde_json::from_value(document.body.clone()) {
            Ok(schema) => schema,
            Err(err) => {
                records.push(ValidationRecord {
                    set: None,
                    path: "$".to_owned(),
                    source: Some(document.path.clone()),
                    detail: ValidationDetail::Malformed(err.to_string()),
                });
                return;
            }
        };

        let segments: Vec<String> = schema.name.split('.').map(str::to_owned).collect();
        let set_id = format!("$.{}", schema.name);

        let node = walk_or_create(&mut self.root, &segments);
        if node.schema.is_some() {
            records.push(ValidationRecord {
                set: Some(set_id.clone()),
                path: set_id,
                source: Some(document.path.clone()),
                detail: ValidationDetail::DuplicateName,
            });
            return;
        }

        let before = records.len();
        let lists = [
            ("beforeAll", &schema.before_all),
            ("afterAll", &schema.after_all),
            ("beforeEach", &schema.before_each),
            ("afterEach", &schema.after_each),
        ];
        for (label, tasks) in lists {
            self.validate_task_list(
                tasks,
                &format!("{set_id}.{label}"),
                &set_id,
                document,
                records,
            );
        }
        for (index, test) in schema.tests.iter().enumerate() {
            self.validate_task_list(
                &test.tasks,
                &format!("{set_id}.tests[{index}].tasks"),
                &set_id,
                document,
                records,
            );
        }

        if records.len() > before {
            return;
        }

        tracing::debug!(set = %set_id, tests = schema.tests.len(), "claimed test set");
        let node = walk_or_create(&mut self.root, &segments);
        node.source = Some(document.path.clone());
        node.schema = Some(schema);
    }

    fn validate_task_list(
        &self,
        tasks: &[TaskSchema],
        prefix: &str,
        set_id: &str,
        document: &TestDocument,
        records: &mut Vec<ValidationRecord>,
    ) {
        let mut ids: HashSet<&str> = HashSet::new();
        for task in tasks {
            if let Some(id) = task.id.as_deref() {
                if !ids.insert(id) {
                    records.push(ValidationRecord {
                        set: Some(set_id.to_owned()),
                        path: prefix.to_owned(),
                        source: Some(document.path.clone()),
                        detail: ValidationDetail::DuplicateTaskId { id: id.to_owned() },
                    });
                }
            }
        }

        for (index, task) in tasks.iter().enumerate() {
            let task_path = format!("{prefix}[{index}]");
            let Some(registered) = self.registry.get_command(&task.command) else {
                records.push(ValidationRecord {
                    set: Some(set_id.to_owned()),
                    path: task_path,
                    source: Some(document.path.clone()),
                    detail: ValidationDetail::UnknownCommand {
                        id: task.command.clone(),
                    },
                });
                continue;
            };

            if let Some(validator) = &registered.args_validator {
                let violations =
                    validator.validate(&serde_json::Value::Object(task.args.clone()));
                if !violations.is_empty() {
                    records.push(ValidationRecord {
                        set: Some(set_id.to_owned()),
                        path: task_path.clone(),
                        source: Some(document.path.clone()),
                        detail: ValidationDetail::InvalidArgs(violations),
                    });
                }
            }
            if let (Some(expect), Some(validator)) =
                (&task.expect, &registered.expect_validator)
            {
                let violations = validator.validate(&serde_json::Value::Object(expect.clone()));
                if !violations.is_empty() {
                    records.push(ValidationRecord {
                        set: Some(set_id.to_owned()),
                        path: task_path.clone(),
                        source: Some(document.path.clone()),
                        detail: ValidationDetail::InvalidExpect(violations),
                    });
                }
            }

            if let Some(target) = task.run_before_async.as_deref() {
                let exists = tasks.iter().any(|peer| peer.id.as_deref() == Some(target));
                if !exists {
                    records.push(ValidationRecord {
                        set: Some(set_id.to_owned()),
                        path: task_path,
                        source: Some(document.path.clone()),
                        detail: ValidationDetail::MissingRunBeforeTarget {
                            target: target.to_owned(),
                        },
                    });
                }
            }
        }
    }

    /// Propagates inheritance top-down and computes transitive test counts.
    pub fn build(&mut self) {
        let mut children = std::mem::take(&mut self.root.children);
        for child in children.values_mut() {
            propagate(&self.root, child);
        }
        self.root.children = children;
        self.root.test_count = self
            .root
            .children
            .values()
            .map(|child| child.test_count)
            .sum();
    }

    /// The resolved top-level test sets, keyed by local name.
    pub fn tests(&self) -> &IndexMap<String, TestSetEntry> {
        &self.root.children
    }

    pub fn root(&self) -> &TestSetEntry {
        &self.root
    }
}

fn walk_or_create<'a>(root: &'a mut TestSetEntry, segments: &[String]) -> &'a mut TestSetEntry {
    let mut node = root;
    for (depth, segment) in segments.iter().enumerate() {
        node = node
            .children
            .entry(segment.clone())
            .or_insert_with(|| TestSetEntry::placeholder(segments[..=depth].to_vec()));
    }
    node
}

fn propagate(parent: &TestSetEntry, node: &mut TestSetEntry) {
    if let Some(schema) = node.schema.take() {
        node.tags = concat(&parent.tags, &schema.tags);
        node.defaults = schema.defaults.clone();
        node.params = schema.params.clone();
        node.before_all_tasks = schema.before_all.clone();
        node.after_all_tasks = schema.after_all.clone();
        node.before_each_tasks = concat(&parent.before_each_tasks, &schema.before_each);
        node.after_each_tasks = concat(&parent.after_each_tasks, &schema.after_each);
        node.execution_order = schema.execution_order;
        node.skip = parent.skip || schema.skip;
        node.tests = schema
            .tests
            .iter()
            .map(|test| TestEntry {
                name: test.name.clone(),
                description: test.description.clone(),
                tags: concat(&node.tags, &test.tags),
                defaults: test.defaults.clone(),
                params: test.params.clone(),
                skip: node.skip || test.skip,
                tasks: test.tasks.clone(),
            })
            .collect();
        node.schema = Some(schema);
    } else {
        // Placeholder: nothing of its own, but inherited state must still
        // flow through to claimed descendants.
        node.tags = parent.tags.clone();
        node.before_each_tasks = parent.before_each_tasks.clone();
        node.after_each_tasks = parent.after_each_tasks.clone();
        node.skip = parent.skip;
    }

    let mut children = std::mem::take(&mut node.children);
    for child in children.values_mut() {
        propagate(node, child);
    }
    node.children = children;
    node.test_count = node.tests.len()
        + node
            .children
            .values()
            .map(|child| child.test_count)
            .sum::<usize>();
}

fn concat<T: Clone>(left: &[T], right: &[T]) -> Vec<T> {
    let mut combined = Vec::with_capacity(left.len() + right.len());
    combined.extend_from_slice(left);
    combined.extend_from_slice(right);
    combined
}

#[cfg(test)]
#[path = "../tests/repository_tests.rs"]
mod tests;
