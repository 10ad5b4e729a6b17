use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::registry::AssertionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    Validation,
    Run,
    Expect,
    Set,
}

impl TaskPhase {
    pub fn label(self) -> &'static str {
        match self {
            TaskPhase::Validation => "validation",
            TaskPhase::Run => "run",
            TaskPhase::Expect => "expect",
            TaskPhase::Set => "set",
        }
    }
}

/// One recorded task failure: either a returned assertion or a caught
/// runtime error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskFailure {
    Assertion {
        phase: TaskPhase,
        error: AssertionError,
    },
    Runtime {
        phase: TaskPhase,
        message: String,
    },
}

impl TaskFailure {
    pub fn runtime(phase: TaskPhase, message: impl Into<String>) -> Self {
        TaskFailure::Runtime {
            phase,
            message: message.into(),
        }
    }

    pub fn phase(&self) -> TaskPhase {
        match self {
            TaskFailure::Assertion { phase, .. } | TaskFailure::Runtime { phase, .. } => *phase,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Assertion { error, .. } => write!(f, "{error}"),
            TaskFailure::Runtime { phase, message } => {
                write!(f, "Failed to execute task {}: {message}", phase.label())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub id: String,
    /// The `module.command` identifier.
    pub command: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect_args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_args: Option<Value>,
    pub errors: Vec<TaskFailure>,
}

impl TaskReport {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub description: String,
    pub before_each: Vec<TaskReport>,
    pub tasks: Vec<TaskReport>,
    pub after_each: Vec<TaskReport>,
    pub error_count: usize,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.error_count == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSetReport {
    pub id: String,
    pub before_all: Vec<TaskReport>,
    pub after_all: Vec<TaskReport>,
    pub tests: Vec<TestReport>,
    pub children: Vec<TestSetReport>,
    pub error_count: usize,
    pub test_count: usize,
    pub skipped_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReport {
    pub sets: Vec<TestSetReport>,
    pub duration_secs: f64,
    pub error_count: usize,
    pub test_count: usize,
    pub skipped_count: usize,
}

impl CompleteReport {
    pub fn passed(&self) -> bool {
        self.error_count == 0
    }
}

pub(super) fn task_list_errors(reports: &[TaskReport]) -> usize {
    reports.iter().map(TaskReport::error_count).sum()
}
