use serde_json::Value;
use tokio::task::JoinHandle;

use crate::interpolate;
use crate::registry::{ModuleRegistry, ReadySignal};
use crate::reporter::Reporter;
use crate::repository::TaskSchema;

use super::context::{deep_merge, deep_merge_maps, RunContext};
use super::plan::{build_plan, StepKind};
use super::report::{TaskFailure, TaskPhase, TaskReport};
use super::{SharedBroadcast, TaskScope};

/// Result of running a task list to completion (or early termination).
#[derive(Debug, Default)]
pub(super) struct TaskListOutcome {
    pub(super) reports: Vec<TaskReport>,
    pub(super) terminated: bool,
}

impl TaskListOutcome {
    pub(super) fn error_count(&self) -> usize {
        super::report::task_list_errors(&self.reports)
    }
}

/// What the spawned portion of a task hands back at its wait step.
struct RunOutcome {
    failures: Vec<TaskFailure>,
    result: Option<Value>,
}

enum TaskSlot {
    Pending,
    /// Spawned and past its ready point; the handle completes with the
    /// run/expect outcome.
    Started {
        report: TaskReport,
        handle: JoinHandle<RunOutcome>,
    },
    /// Finished before spawning (validation errors) or never spawned.
    Finished {
        report: TaskReport,
    },
    Recorded,
}

/// Executes a task list on a single coordinator: run steps start tasks and
/// block on their ready latch, wait steps record completions in plan order.
/// `ctx.params` is only mutated here, between a wait step and the next step.
pub(super) async fn run_task_list(
    registry: &ModuleRegistry,
    broadcast: &SharedBroadcast,
    scope: &TaskScope,
    tasks: &[TaskSchema],
    ctx: &mut RunContext,
) -> TaskListOutcome {
    let plan = build_plan(tasks);
    let mut slots: Vec<TaskSlot> = tasks.iter().map(|_| TaskSlot::Pending).collect();
    let mut outcome = TaskListOutcome::default();

    for step in &plan.steps {
        match step.kind {
            StepKind::Run => {
                if outcome.terminated {
                    continue;
                }
                let task = &tasks[step.index];
                slots[step.index] =
                    start_task(registry, broadcast, scope, task, &step.id, ctx).await;
            }
            StepKind::Wait => {
                let slot = std::mem::replace(&mut slots[step.index], TaskSlot::Recorded);
                let report = match slot {
                    TaskSlot::Pending => {
                        // A forward reference moved the run step behind this
                        // wait step; nothing was started, nothing to record.
                        slots[step.index] = TaskSlot::Pending;
                        continue;
                    }
                    TaskSlot::Recorded => continue,
                    TaskSlot::Finished { report } => report,
                    TaskSlot::Started { mut report, handle } => {
                        apply_outcome(&mut report, handle.await);
                        report
                    }
                };
                record(broadcast, scope, tasks, step.index, report, ctx, &mut outcome);
            }
        }
    }

    // Pathological plans can leave a started task without a processed wait
    // step; drain them so their reports are not lost.
    for index in 0..slots.len() {
        let slot = std::mem::replace(&mut slots[index], TaskSlot::Recorded);
        let report = match slot {
            TaskSlot::Started { mut report, handle } => {
                apply_outcome(&mut report, handle.await);
                report
            }
            TaskSlot::Finished { report } => report,
            _ => continue,
        };
        record(broadcast, scope, tasks, index, report, ctx, &mut outcome);
    }

    outcome
}

fn apply_outcome(report: &mut TaskReport, joined: Result<RunOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(run) => {
            report.errors.extend(run.failures);
            report.result = run.result;
        }
        Err(join_error) => {
            let detail = if join_error.is_panic() {
                "task panicked".to_owned()
            } else {
                join_error.to_string()
            };
            report
                .errors
                .push(TaskFailure::runtime(TaskPhase::Run, detail));
        }
    }
}

/// Records a completed task: applies its `set` phase to the context, emits
/// the completion event, and arms the termination flag.
fn record(
    broadcast: &SharedBroadcast,
    scope: &TaskScope,
    tasks: &[TaskSchema],
    index: usize,
    mut report: TaskReport,
    ctx: &mut RunContext,
    outcome: &mut TaskListOutcome,
) {
    let task = &tasks[index];
    if let (Some(set), Some(result)) = (&task.set, &report.result) {
        match interpolate::resolve_map(result, set) {
            Value::Object(resolved) => {
                ctx.params = deep_merge_maps(&ctx.params, &resolved);
                report.set_args = Some(Value::Object(resolved));
            }
            other => {
                report.errors.push(TaskFailure::runtime(
                    TaskPhase::Set,
                    format!("set must resolve to a mapping, got {other}"),
                ));
            }
        }
    }

    if let Ok(mut reporters) = broadcast.lock() {
        reporters.log_task_complete(scope, task, &report);
    }
    if !report.errors.is_empty() && !task.continue_on_error {
        outcome.terminated = true;
    }
    outcome.reports.push(report);
}

/// Runs the validation phase on the coordinator and, when clean, spawns the
/// run/expect phases. Returns once the task's ready latch has fired.
async fn start_task(
    registry: &ModuleRegistry,
    broadcast: &SharedBroadcast,
    scope: &TaskScope,
    task: &TaskSchema,
    id: &str,
    ctx: &RunContext,
) -> TaskSlot {
    let mut report = TaskReport {
        id: id.to_owned(),
        command: task.command.clone(),
        label: task.command.clone(),
        run_args: None,
        expect_args: None,
        result: None,
        set_args: None,
        errors: Vec::new(),
    };

    let Some(registered) = registry.get_command(&task.command) else {
        report.errors.push(TaskFailure::runtime(
            TaskPhase::Validation,
            format!("unknown command `{}`", task.command),
        ));
        emit_begin(broadcast, scope, task, &report);
        return TaskSlot::Finished { report };
    };
    let command = registered.command.clone();

    let params = ctx.params_value();
    let interpolated = interpolate::resolve_map(&params, &task.args);
    let module_name = task
        .command
        .split_once('.')
        .map(|(module, _)| module)
        .unwrap_or(task.command.as_str());
    // Package-level module defaults sit below the context's, which sit
    // below the task's own args.
    let mut defaults = registry
        .get_module(module_name)
        .map(|module| Value::Object(module.defaults.clone()))
        .unwrap_or(Value::Null);
    if let Some(scoped) = ctx.defaults.get(module_name) {
        defaults = deep_merge(defaults, scoped.clone());
    }
    let run_args = match defaults {
        Value::Null => interpolated,
        defaults => deep_merge(defaults, interpolated),
    };
    let expect_args = match &task.expect {
        Some(expect) => interpolate::resolve_map(&params, expect),
        None => Value::Object(serde_json::Map::new()),
    };

    for error in command.validate_args(&run_args) {
        report.errors.push(TaskFailure::Assertion {
            phase: TaskPhase::Validation,
            error,
        });
    }
    for error in command.validate_expect(&expect_args) {
        report.errors.push(TaskFailure::Assertion {
            phase: TaskPhase::Validation,
            error,
        });
    }

    report.label = task
        .description
        .clone()
        .or_else(|| command.label(&run_args, &expect_args))
        .unwrap_or_else(|| task.command.clone());
    report.run_args = Some(run_args.clone());
    if task.expect.is_some() {
        report.expect_args = Some(expect_args.clone());
    }
    emit_begin(broadcast, scope, task, &report);

    if !report.errors.is_empty() {
        // Done with errors; no run, so the ready latch never exists.
        return TaskSlot::Finished { report };
    }

    let (ready, ready_rx) = ReadySignal::new();
    let force_ready = ready.clone();
    let future = command.run(run_args, ready);
    let has_expect = task.expect.is_some();
    let handle = tokio::spawn(async move {
        let mut failures = Vec::new();
        let result = match future.await {
            Ok(value) => Some(value),
            Err(error) => {
                failures.push(TaskFailure::runtime(TaskPhase::Run, error.to_string()));
                None
            }
        };
        // A command that resolves without notifying must not deadlock the
        // coordinator.
        force_ready.notify();

        if let Some(result_value) = &result {
            if has_expect {
                if let Some(assertions) = command.expect(&expect_args, result_value) {
                    failures.extend(assertions.into_iter().map(|error| TaskFailure::Assertion {
                        phase: TaskPhase::Expect,
                        error,
                    }));
                }
            }
        }
        RunOutcome { failures, result }
    });

    let _ = ready_rx.await;
    TaskSlot::Started { report, handle }
}

fn emit_begin(
    broadcast: &SharedBroadcast,
    scope: &TaskScope,
    task: &TaskSchema,
    report: &TaskReport,
) {
    if let Ok(mut reporters) = broadcast.lock() {
        reporters.log_task_begin(scope, task, &report.label);
    }
}
