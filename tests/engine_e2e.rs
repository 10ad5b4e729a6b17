use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{json, Value};

use dexit::loader;
use dexit::modules;
use dexit::registry::{Command, CommandFuture, Module, ModuleRegistry, ReadySignal};
use dexit::reporter::Broadcast;
use dexit::repository::{LoadError, Repository};
use dexit::runner::Runner;

fn temp_tests_dir(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("dexit-e2e-{name}-{ts}"));
    fs::create_dir_all(&root).expect("mkdir tests dir");
    root
}

fn builtin_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    for module in modules::builtin_modules() {
        registry.register(module).expect("register builtin");
    }
    registry
}

/// Registers a `probe.record` command that logs every `run` invocation.
fn probe_registry(log: &Arc<Mutex<Vec<String>>>) -> ModuleRegistry {
    struct RecordCommand {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Command for RecordCommand {
        fn description(&self) -> &str {
            "record run order"
        }

        fn run(&self, args: Value, ready: ReadySignal) -> CommandFuture {
            let log = Arc::clone(&self.log);
            async move {
                let tag = args
                    .get("tag")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_owned();
                log.lock().expect("log lock").push(tag.clone());
                ready.notify();
                Ok(json!({ "tag": tag }))
            }
            .boxed()
        }
    }

    let mut commands: IndexMap<String, Arc<dyn Command>> = IndexMap::new();
    commands.insert(
        "record".to_owned(),
        Arc::new(RecordCommand {
            log: Arc::clone(log),
        }),
    );
    let mut registry = builtin_registry();
    registry
        .register(Module {
            name: "probe".to_owned(),
            description: None,
            defaults_schema: None,
            defaults: Default::default(),
            commands,
        })
        .expect("register probe");
    registry
}

async fn run_suite(
    registry: &ModuleRegistry,
    dir: &std::path::Path,
) -> dexit::runner::CompleteReport {
    let documents = loader::load_documents(dir).expect("load documents");
    let mut repository = Repository::new(registry);
    repository
        .load_documents(&documents, false)
        .expect("validate documents");
    repository.build();
    let runner = Runner::new(registry, Broadcast::new());
    runner.run(&repository).await
}

#[tokio::test]
async fn dependent_task_runs_first_but_completes_after_its_target() {
    let dir = temp_tests_dir("run-before");
    fs::write(
        dir.join("pub.yaml"),
        concat!(
            "name: pub\n",
            "tests:\n",
            "  - description: publish then consume\n",
            "    tasks:\n",
            "      - id: a\n",
            "        do: probe.record\n",
            "        args: { tag: A }\n",
            "      - do: probe.record\n",
            "        args: { tag: B }\n",
            "        runBeforeAsync: a\n",
        ),
    )
    .expect("write suite");

    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = probe_registry(&log);
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.error_count, 0);
    // B's run is invoked before A's.
    assert_eq!(*log.lock().expect("log lock"), vec!["B", "A"]);
    // Wait completions are recorded in declaration order: A, then B.
    let tasks = &report.sets[0].tests[0].tasks;
    let tags: Vec<&Value> = tasks
        .iter()
        .map(|task| task.result.as_ref().expect("result").get("tag").expect("tag"))
        .collect();
    assert_eq!(tags, vec![&json!("A"), &json!("B")]);
}

#[tokio::test]
async fn inherited_hooks_run_root_to_leaf_around_each_test() {
    let dir = temp_tests_dir("inheritance");
    fs::write(
        dir.join("api.yaml"),
        concat!(
            "name: api\n",
            "tags: [api]\n",
            "beforeEach:\n",
            "  - do: probe.record\n",
            "    args: { tag: t1 }\n",
            "---\n",
            "name: api.auth\n",
            "tags: [auth]\n",
            "beforeEach:\n",
            "  - do: probe.record\n",
            "    args: { tag: t2 }\n",
            "tests:\n",
            "  - description: login\n",
            "    tasks:\n",
            "      - do: probe.record\n",
            "        args: { tag: body }\n",
        ),
    )
    .expect("write suite");

    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = probe_registry(&log);
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.error_count, 0);
    assert_eq!(
        *log.lock().expect("log lock"),
        vec!["t1", "t2", "body"]
    );

    let api = &report.sets[0];
    let auth = &api.children[0];
    assert_eq!(auth.tests[0].before_each.len(), 2);
    assert_eq!(auth.tests[0].tasks.len(), 1);
}

#[tokio::test]
async fn set_parameters_flow_into_later_tasks() {
    let dir = temp_tests_dir("params");
    fs::write(
        dir.join("auth.yaml"),
        concat!(
            "name: auth\n",
            "tests:\n",
            "  - description: token handoff\n",
            "    tasks:\n",
            "      - do: control.echo\n",
            "        args:\n",
            "          value: { body: { token: xyz } }\n",
            "        set:\n",
            "          token: '${body.token}'\n",
            "      - do: control.echo\n",
            "        args:\n",
            "          value: { auth: '${token}' }\n",
            "        expect:\n",
            "          value: { auth: xyz }\n",
        ),
    )
    .expect("write suite");

    let registry = builtin_registry();
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.error_count, 0);
    let tasks = &report.sets[0].tests[0].tasks;
    assert_eq!(tasks[0].set_args, Some(json!({ "token": "xyz" })));
    assert_eq!(
        tasks[1].run_args,
        Some(json!({ "value": { "auth": "xyz" } }))
    );
}

#[tokio::test]
async fn skip_propagates_and_counts_transitive_tests() {
    let dir = temp_tests_dir("skip");
    fs::write(
        dir.join("suite.yaml"),
        concat!(
            "name: api\n",
            "skip: true\n",
            "tests:\n",
            "  - description: direct\n",
            "    tasks:\n",
            "      - do: control.echo\n",
            "---\n",
            "name: api.auth\n",
            "skip: false\n",
            "tests:\n",
            "  - description: nested\n",
            "    tasks:\n",
            "      - do: control.echo\n",
        ),
    )
    .expect("write suite");

    let registry = builtin_registry();
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.test_count, 2);
    assert_eq!(report.skipped_count, 2);
    assert_eq!(report.error_count, 0);
    assert!(report.sets.is_empty());
}

#[tokio::test]
async fn failing_task_truncates_the_list_and_counts_errors() {
    let dir = temp_tests_dir("continue-on-error");
    fs::write(
        dir.join("suite.yaml"),
        concat!(
            "name: failing\n",
            "tests:\n",
            "  - description: stops at the first failure\n",
            "    tasks:\n",
            "      - do: control.fail\n",
            "        args: { message: boom }\n",
            "      - do: control.echo\n",
            "        args: { value: 1 }\n",
            "      - do: control.echo\n",
            "        args: { value: 2 }\n",
        ),
    )
    .expect("write suite");

    let registry = builtin_registry();
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.error_count, 1);
    assert_eq!(report.test_count, 1);
    let test = &report.sets[0].tests[0];
    assert_eq!(test.tasks.len(), 1);
    assert_eq!(test.tasks[0].errors.len(), 1);
}

#[tokio::test]
async fn unregistered_command_fails_validation() {
    let dir = temp_tests_dir("validation");
    fs::write(
        dir.join("suite.yaml"),
        concat!(
            "name: broken\n",
            "tests:\n",
            "  - description: bad reference\n",
            "    tasks:\n",
            "      - do: foo.bar\n",
        ),
    )
    .expect("write suite");

    let documents = loader::load_documents(&dir).expect("load documents");
    let registry = builtin_registry();

    // Strict mode: the whole load fails.
    let mut repository = Repository::new(&registry);
    let LoadError::Validation(records) = repository
        .load_documents(&documents, false)
        .expect_err("strict load");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "$.broken.tests[0].tasks[0]");

    // Ignore mode: the invalid set is dropped and the run proceeds empty.
    let mut repository = Repository::new(&registry);
    let records = repository
        .load_documents(&documents, true)
        .expect("lenient load");
    assert_eq!(records.len(), 1);
    repository.build();
    let runner = Runner::new(&registry, Broadcast::new());
    let report = runner.run(&repository).await;
    assert_eq!(report.test_count, 0);
    assert_eq!(report.error_count, 0);
}

#[tokio::test]
async fn after_each_runs_despite_test_body_failure() {
    let dir = temp_tests_dir("after-each");
    fs::write(
        dir.join("suite.yaml"),
        concat!(
            "name: cleanup\n",
            "afterEach:\n",
            "  - do: probe.record\n",
            "    args: { tag: cleanup }\n",
            "tests:\n",
            "  - description: fails but cleans up\n",
            "    tasks:\n",
            "      - do: control.fail\n",
            "        args: { message: boom }\n",
        ),
    )
    .expect("write suite");

    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = probe_registry(&log);
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.error_count, 1);
    assert_eq!(*log.lock().expect("log lock"), vec!["cleanup"]);
    let test = &report.sets[0].tests[0];
    assert_eq!(test.after_each.len(), 1);
    assert!(test.after_each[0].passed());
}

#[tokio::test]
async fn before_each_failure_skips_the_test_body() {
    let dir = temp_tests_dir("before-each-failure");
    fs::write(
        dir.join("suite.yaml"),
        concat!(
            "name: guarded\n",
            "beforeEach:\n",
            "  - do: control.fail\n",
            "    args: { message: no setup }\n",
            "tests:\n",
            "  - description: never runs its body\n",
            "    tasks:\n",
            "      - do: probe.record\n",
            "        args: { tag: body }\n",
        ),
    )
    .expect("write suite");

    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = probe_registry(&log);
    let report = run_suite(&registry, &dir).await;

    assert!(log.lock().expect("log lock").is_empty());
    let test = &report.sets[0].tests[0];
    assert!(test.tasks.is_empty());
    assert_eq!(test.before_each.len(), 1);
    assert_eq!(report.error_count, 1);
}

#[tokio::test]
async fn complete_report_counts_satisfy_the_accounting_law() {
    let dir = temp_tests_dir("accounting");
    fs::write(
        dir.join("suite.yaml"),
        concat!(
            "name: mixed\n",
            "tests:\n",
            "  - description: runs\n",
            "    tasks:\n",
            "      - do: control.echo\n",
            "  - description: skipped\n",
            "    skip: true\n",
            "    tasks:\n",
            "      - do: control.echo\n",
            "---\n",
            "name: mixed.child\n",
            "tests:\n",
            "  - description: nested\n",
            "    tasks:\n",
            "      - do: control.echo\n",
        ),
    )
    .expect("write suite");

    let registry = builtin_registry();
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.test_count, 3);
    assert_eq!(report.skipped_count, 1);
    let executed: usize = report.sets.iter().map(count_executed).sum();
    assert_eq!(report.test_count, report.skipped_count + executed);
}

fn count_executed(set: &dexit::runner::TestSetReport) -> usize {
    set.tests.len() + set.children.iter().map(count_executed).sum::<usize>()
}

#[tokio::test]
async fn sync_sets_run_tests_in_declaration_order() {
    let dir = temp_tests_dir("sync-order");
    fs::write(
        dir.join("suite.yaml"),
        concat!(
            "name: ordered\n",
            "executionOrder: sync\n",
            "tests:\n",
            "  - description: first\n",
            "    tasks:\n",
            "      - do: probe.record\n",
            "        args: { tag: one }\n",
            "  - description: second\n",
            "    tasks:\n",
            "      - do: probe.record\n",
            "        args: { tag: two }\n",
        ),
    )
    .expect("write suite");

    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = probe_registry(&log);
    let report = run_suite(&registry, &dir).await;

    assert_eq!(report.error_count, 0);
    assert_eq!(*log.lock().expect("log lock"), vec!["one", "two"]);
}
