use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{join_all, BoxFuture, FutureExt};

use crate::registry::ModuleRegistry;
use crate::reporter::{Broadcast, Reporter};
use crate::repository::{ExecutionOrder, Repository, TestEntry, TestSetEntry};

pub mod context;
mod plan;
pub mod report;
mod task;

pub use context::RunContext;
pub use plan::{build_plan, task_id, ExecutionPlan, PlanStep, StepKind};
pub use report::{CompleteReport, TaskFailure, TaskPhase, TaskReport, TestReport, TestSetReport};

use task::run_task_list;

pub type SharedBroadcast = Arc<Mutex<Broadcast>>;

/// Names the enclosing set (and test, when inside one) for task events.
#[derive(Debug, Clone)]
pub struct TaskScope {
    pub set: String,
    pub test: Option<String>,
}

/// Executes a resolved test-set tree. The repository is read immutably; the
/// runner produces a parallel report tree.
pub struct Runner<'a> {
    registry: &'a ModuleRegistry,
    broadcast: SharedBroadcast,
}

impl<'a> Runner<'a> {
    pub fn new(registry: &'a ModuleRegistry, broadcast: Broadcast) -> Self {
        Self {
            registry,
            broadcast: Arc::new(Mutex::new(broadcast)),
        }
    }

    pub async fn run(&self, repository: &Repository<'_>) -> CompleteReport {
        let started = Instant::now();
        let ctx = RunContext::default();

        let mut test_count = 0;
        let mut skipped_count = 0;
        let mut futures = Vec::new();
        for set in repository.tests().values() {
            if set.skip {
                if let Ok(mut reporters) = self.broadcast.lock() {
                    reporters.log_test_set_skip(set);
                }
                test_count += set.test_count;
                skipped_count += set.test_count;
                continue;
            }
            futures.push(self.run_test_set(set, ctx.clone()));
        }

        let sets = join_all(futures).await;
        let mut error_count = 0;
        for set in &sets {
            error_count += set.error_count;
            test_count += set.test_count;
            skipped_count += set.skipped_count;
        }

        let complete = CompleteReport {
            sets,
            duration_secs: started.elapsed().as_secs_f64(),
            error_count,
            test_count,
            skipped_count,
        };
        if let Ok(mut reporters) = self.broadcast.lock() {
            reporters.generate_report(&complete);
        }
        complete
    }

    fn run_test_set<'s>(
        &'s self,
        set: &'s TestSetEntry,
        parent_ctx: RunContext,
    ) -> BoxFuture<'s, TestSetReport> {
        async move {
            let mut ctx = parent_ctx.child(&set.defaults, &set.params);
            if let Ok(mut reporters) = self.broadcast.lock() {
                reporters.log_test_set_begin(set);
            }
            tracing::debug!(set = %set.id, "test set begin");

            let scope = TaskScope {
                set: set.id.clone(),
                test: None,
            };
            let before_all = run_task_list(
                self.registry,
                &self.broadcast,
                &scope,
                &set.before_all_tasks,
                &mut ctx,
            )
            .await;

            let mut tests = Vec::new();
            let mut children = Vec::new();
            let mut test_count = 0;
            let mut skipped_count = 0;

            if before_all.error_count() == 0 {
                let mut test_futures = Vec::new();
                for test in &set.tests {
                    test_count += 1;
                    if test.skip {
                        skipped_count += 1;
                        if let Ok(mut reporters) = self.broadcast.lock() {
                            reporters.log_test_skip(set, test);
                        }
                        continue;
                    }
                    test_futures.push(self.run_test(set, test, ctx.clone()));
                }

                let mut child_futures = Vec::new();
                for child in set.children.values() {
                    if child.skip {
                        test_count += child.test_count;
                        skipped_count += child.test_count;
                        if let Ok(mut reporters) = self.broadcast.lock() {
                            reporters.log_test_set_skip(child);
                        }
                        continue;
                    }
                    child_futures.push(self.run_test_set(child, ctx.clone()));
                }

                let order = set.execution_order;
                let tests_future = async {
                    match order {
                        ExecutionOrder::Sync => {
                            let mut reports = Vec::with_capacity(test_futures.len());
                            for future in test_futures {
                                reports.push(future.await);
                            }
                            reports
                        }
                        ExecutionOrder::Async => join_all(test_futures).await,
                    }
                };
                let (test_reports, child_reports) =
                    futures::join!(tests_future, join_all(child_futures));
                tests = test_reports;
                children = child_reports;
            }

            let after_all = run_task_list(
                self.registry,
                &self.broadcast,
                &scope,
                &set.after_all_tasks,
                &mut ctx,
            )
            .await;

            let mut error_count = before_all.error_count() + after_all.error_count();
            for test in &tests {
                error_count += test.error_count;
            }
            for child in &children {
                error_count += child.error_count;
                test_count += child.test_count;
                skipped_count += child.skipped_count;
            }

            let report = TestSetReport {
                id: set.id.clone(),
                before_all: before_all.reports,
                after_all: after_all.reports,
                tests,
                children,
                error_count,
                test_count,
                skipped_count,
            };
            if let Ok(mut reporters) = self.broadcast.lock() {
                reporters.log_test_set_complete(set, &report);
            }
            report
        }
        .boxed()
    }

    async fn run_test(
        &self,
        set: &TestSetEntry,
        test: &TestEntry,
        parent_ctx: RunContext,
    ) -> TestReport {
        let mut ctx = parent_ctx.child(&test.defaults, &test.params);
        if let Ok(mut reporters) = self.broadcast.lock() {
            reporters.log_test_begin(set, test);
        }
        tracing::debug!(set = %set.id, test = %test.description, "test begin");

        let scope = TaskScope {
            set: set.id.clone(),
            test: Some(test.description.clone()),
        };
        let before_each = run_task_list(
            self.registry,
            &self.broadcast,
            &scope,
            &set.before_each_tasks,
            &mut ctx,
        )
        .await;

        let tasks = if before_each.error_count() == 0 {
            run_task_list(self.registry, &self.broadcast, &scope, &test.tasks, &mut ctx).await
        } else {
            task::TaskListOutcome::default()
        };

        let after_each = run_task_list(
            self.registry,
            &self.broadcast,
            &scope,
            &set.after_each_tasks,
            &mut ctx,
        )
        .await;

        let error_count =
            before_each.error_count() + tasks.error_count() + after_each.error_count();
        let report = TestReport {
            description: test.description.clone(),
            before_each: before_each.reports,
            tasks: tasks.reports,
            after_each: after_each.reports,
            error_count,
        };
        if let Ok(mut reporters) = self.broadcast.lock() {
            reporters.log_test_complete(set, test, &report);
        }
        report
    }
}

#[cfg(test)]
#[path = "../tests/runner_tests.rs"]
mod tests;
