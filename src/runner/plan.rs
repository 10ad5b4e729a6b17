use indexmap::IndexMap;

use crate::repository::TaskSchema;

/// Spacing between positional priorities, leaving room for `runBeforeAsync`
/// rewrites to slot a task just ahead of its target.
const ORDER_STRIDE: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Run,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// Position of the task in the declared list.
    pub index: usize,
    pub id: String,
    pub kind: StepKind,
    pub priority: i64,
}

/// The ordered run/wait steps derived from a task list after
/// `runBeforeAsync` resolution.
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    pub steps: Vec<PlanStep>,
}

/// Effective id of the task at `index`: its declared id, or a synthetic
/// positional one.
pub fn task_id(task: &TaskSchema, index: usize) -> String {
    task.id.clone().unwrap_or_else(|| format!("$_i_{index}"))
}

pub fn build_plan(tasks: &[TaskSchema]) -> ExecutionPlan {
    struct Orders {
        index: usize,
        run_order: i64,
        wait_order: i64,
    }

    let mut by_id: IndexMap<String, Orders> = IndexMap::new();
    for (index, task) in tasks.iter().enumerate() {
        let position = index as i64 * ORDER_STRIDE;
        by_id.insert(
            task_id(task, index),
            Orders {
                index,
                run_order: position,
                wait_order: position + 1,
            },
        );
    }

    let mut rewrites: Vec<(String, i64)> = Vec::new();
    for (index, task) in tasks.iter().enumerate() {
        if let Some(target) = task.run_before_async.as_deref() {
            if let Some(orders) = by_id.get(target) {
                rewrites.push((task_id(task, index), orders.run_order - 1));
            }
        }
    }
    for (id, run_order) in rewrites {
        if let Some(orders) = by_id.get_mut(&id) {
            orders.run_order = run_order;
        }
    }

    let mut steps = Vec::with_capacity(tasks.len() * 2);
    for (id, orders) in &by_id {
        steps.push(PlanStep {
            index: orders.index,
            id: id.clone(),
            kind: StepKind::Run,
            priority: orders.run_order,
        });
        steps.push(PlanStep {
            index: orders.index,
            id: id.clone(),
            kind: StepKind::Wait,
            priority: orders.wait_order,
        });
    }
    steps.sort_by_key(|step| step.priority);

    ExecutionPlan { steps }
}

#[cfg(test)]
#[path = "../tests/plan_tests.rs"]
mod tests;
