use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use super::{Repository, ValidationDetail};
use crate::loader::TestDocument;
use crate::registry::{Command, CommandFuture, Module, ModuleRegistry, ReadySignal};

struct EvalCommand;

impl Command for EvalCommand {
    fn description(&self) -> &str {
        "evaluate"
    }

    fn args_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "code": { "type": "string" } },
        }))
    }

    fn expect_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "additionalProperties": false,
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
            defaults_schema: None,
            defaults: Default::default(),
            commands,
        })
        .expect("register");
    registry
}

fn document(body: Value) -> TestDocument {
    TestDocument {
        filename: "suite.yaml".to_owned(),
        path: "/tests/suite.yaml".into(),
        body,
    }
}

fn eval_task(id: Option<&str>) -> Value {
    match id {
        Some(id) => json!({ "id": id, "do": "js.eval", "args": { "code": "1" } }),
        None => json!({ "do": "js.eval", "args": { "code": "1" } }),
    }
}

#[test]
fn loads_a_valid_document_into_the_tree() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![document(json!({
        "name": "api.auth",
        "tests": [{ "description": "login", "tasks": [eval_task(None)] }],
    }))];

    let records = repository.load_documents(&docs, false).expect("load");
    assert!(records.is_empty());
    repository.build();

    let api = repository.tests().get("api").expect("api placeholder");
    assert!(api.schema.is_none());
    let auth = api.children.get("auth").expect("auth node");
    assert_eq!(auth.id, "$.api.auth");
    assert_eq!(auth.path, vec!["api".to_owned(), "auth".to_owned()]);
    assert_eq!(auth.tests.len(), 1);
}

#[test]
fn invalid_grammar_is_recorded_without_a_set_id() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![document(json!({ "tests": [] }))];

    let records = repository.load_documents(&docs, true).expect("load");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].set, None);
    assert!(matches!(records[0].detail, ValidationDetail::Schema(_)));
}

#[test]
fn unknown_command_is_keyed_by_task_path() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![document(json!({
        "name": "pub",
        "tests": [{
            "description": "broken",
            "tasks": [eval_task(None), { "do": "foo.bar" }],
        }],
    }))];

    let records = repository.load_documents(&docs, true).expect("load");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].set.as_deref(), Some("$.pub"));
    assert_eq!(records[0].path, "$.pub.tests[0].tasks[1]");
    assert!(matches!(
        &records[0].detail,
        ValidationDetail::UnknownCommand { id } if id == "foo.bar"
    ));
    // The invalid document is dropped, not partially claimed.
    repository.build();
    assert!(repository
        .tests()
        .get("pub")
        .map_or(true, |node| node.schema.is_none()));
}

#[test]
fn load_fails_when_ignore_invalid_is_off() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![document(json!({
        "name": "pub",
        "tests": [{ "description": "broken", "tasks": [{ "do": "foo.bar" }] }],
    }))];

    let err = repository.load_documents(&docs, false).expect_err("load");
    let super::LoadError::Validation(records) = err;
    assert_eq!(records.len(), 1);
}

#[test]
fn duplicate_set_name_produces_exactly_one_error_on_second_document() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![
        document(json!({ "name": "pub", "tests": [] })),
        document(json!({ "name": "pub", "tests": [] })),
    ];

    let records = repository.load_documents(&docs, true).expect("load");
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].detail, ValidationDetail::DuplicateName));
    assert_eq!(records[0].set.as_deref(), Some("$.pub"));
}

#[test]
fn bad_args_and_bad_expect_are_validated_separately() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![document(json!({
        "name": "pub",
        "beforeAll": [{
            "do": "js.eval",
            "args": { "code": 42 },
            "expect": { "bogus": 1 },
        }],
    }))];

    let records = repository.load_documents(&docs, true).expect("load");
    let details: Vec<&ValidationDetail> = records.iter().map(|r| &r.detail).collect();
    assert_eq!(records.len(), 2);
    assert!(matches!(details[0], ValidationDetail::InvalidArgs(_)));
    assert!(matches!(details[1], ValidationDetail::InvalidExpect(_)));
    assert!(records.iter().all(|r| r.path == "$.pub.beforeAll[0]"));
}

#[test]
fn run_before_async_target_must_exist_in_same_list() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![document(json!({
        "name": "pub",
        "tests": [{
            "description": "dep",
            "tasks": [
                eval_task(Some("a")),
                { "do": "js.eval", "runBeforeAsync": "missing" },
            ],
        }],
    }))];

    let records = repository.load_documents(&docs, true).expect("load");
    assert_eq!(records.len(), 1);
    assert!(matches!(
        &records[0].detail,
        ValidationDetail::MissingRunBeforeTarget { target } if target == "missing"
    ));
}

#[test]
fn duplicate_task_ids_within_a_list_are_rejected() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![document(json!({
        "name": "pub",
        "afterAll": [eval_task(Some("x")), eval_task(Some("x"))],
    }))];

    let records = repository.load_documents(&docs, true).expect("load");
    assert_eq!(records.len(), 1);
    assert!(matches!(
        &records[0].detail,
        ValidationDetail::DuplicateTaskId { id } if id == "x"
    ));
}

#[test]
fn build_propagates_tags_hooks_and_skip() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![
        document(json!({
            "name": "api",
            "tags": ["api"],
            "beforeEach": [eval_task(Some("t1"))],
            "tests": [],
        })),
        document(json!({
            "name": "api.auth",
            "tags": ["auth"],
            "beforeEach": [eval_task(Some("t2"))],
            "tests": [{
                "description": "login",
                "tags": ["smoke"],
                "tasks": [eval_task(None)],
            }],
        })),
    ];

    repository.load_documents(&docs, false).expect("load");
    repository.build();

    let api = repository.tests().get("api").expect("api");
    let auth = api.children.get("auth").expect("auth");
    assert_eq!(auth.tags, vec!["api".to_owned(), "auth".to_owned()]);

    let before_ids: Vec<Option<&str>> = auth
        .before_each_tasks
        .iter()
        .map(|task| task.id.as_deref())
        .collect();
    assert_eq!(before_ids, vec![Some("t1"), Some("t2")]);

    assert_eq!(
        auth.tests[0].tags,
        vec!["api".to_owned(), "auth".to_owned(), "smoke".to_owned()]
    );
}

#[test]
fn skip_is_monotone_under_descent() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![
        document(json!({ "name": "api", "skip": true, "tests": [] })),
        document(json!({
            "name": "api.auth",
            "skip": false,
            "tests": [{ "description": "login", "skip": false, "tasks": [eval_task(None)] }],
        })),
    ];

    repository.load_documents(&docs, false).expect("load");
    repository.build();

    let api = repository.tests().get("api").expect("api");
    let auth = api.children.get("auth").expect("auth");
    assert!(api.skip);
    assert!(auth.skip);
    assert!(auth.tests[0].skip);
}

#[test]
fn test_count_is_transitive() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![
        document(json!({
            "name": "api",
            "tests": [{ "description": "one", "tasks": [eval_task(None)] }],
        })),
        document(json!({
            "name": "api.auth",
            "tests": [
                { "description": "two", "tasks": [eval_task(None)] },
                { "description": "three", "tasks": [eval_task(None)] },
            ],
        })),
    ];

    repository.load_documents(&docs, false).expect("load");
    repository.build();

    let api = repository.tests().get("api").expect("api");
    assert_eq!(api.test_count, 3);
    assert_eq!(api.children.get("auth").expect("auth").test_count, 2);
}

#[test]
fn hooks_are_own_only_but_before_each_accumulates_through_placeholders() {
    let registry = registry();
    let mut repository = Repository::new(&registry);
    let docs = vec![
        document(json!({
            "name": "root",
            "beforeAll": [eval_task(Some("ba"))],
            "beforeEach": [eval_task(Some("be"))],
            "tests": [],
        })),
        document(json!({
            "name": "root.mid.leaf",
            "tests": [{ "description": "deep", "tasks": [eval_task(None)] }],
        })),
    ];

    repository.load_documents(&docs, false).expect("load");
    repository.build();

    let root = repository.tests().get("root").expect("root");
    let mid = root.children.get("mid").expect("mid placeholder");
    let leaf = mid.children.get("leaf").expect("leaf");

    assert!(mid.schema.is_none());
    // beforeAll does not inherit; beforeEach does, through the placeholder.
    assert!(leaf.before_all_tasks.is_empty());
    let ids: Vec<Option<&str>> = leaf
        .before_each_tasks
        .iter()
        .map(|task| task.id.as_deref())
        .collect();
    assert_eq!(ids, vec![Some("be")]);
}
