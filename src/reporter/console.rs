use std::io::{IsTerminal, Write};

use anstream::{AutoStream, ColorChoice};
use anstyle::{AnsiColor, Color, Style};
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style as TableStyle;

use crate::repository::{TaskSchema, TestEntry, TestSetEntry, ValidationRecord};
use crate::runner::{CompleteReport, TaskReport, TaskScope, TestReport};

use super::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Auto,
    Always,
    Never,
}

impl OutputMode {
    pub fn from_env() -> Self {
        match std::env::var("DEXIT_COLOR").ok().as_deref() {
            Some("always") => OutputMode::Always,
            Some("never") => OutputMode::Never,
            _ => OutputMode::Auto,
        }
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("always") => OutputMode::Always,
            Some("never") => OutputMode::Never,
            Some("auto") | None => OutputMode::from_env(),
            Some(_) => OutputMode::from_env(),
        }
    }
}

pub fn resolve_color_enabled(mode: OutputMode, is_tty: bool) -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    match mode {
        OutputMode::Always => true,
        OutputMode::Never => false,
        OutputMode::Auto => is_tty,
    }
}

#[derive(Debug, Clone, Copy)]
struct Theme {
    accent: Style,
    muted: Style,
    success: Style,
    error: Style,
    warning: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            accent: Style::new()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan)))
                .bold(),
            muted: Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))),
            success: Style::new()
                .fg_color(Some(Color::Ansi(AnsiColor::Green)))
                .bold(),
            error: Style::new()
                .fg_color(Some(Color::Ansi(AnsiColor::Red)))
                .bold(),
            warning: Style::new()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow)))
                .bold(),
        }
    }
}

/// Line-oriented reporter for terminals. Each lifecycle event renders as an
/// indented step line; the final report is a per-set table plus a summary.
pub struct ConsoleReporter<W: Write> {
    writer: W,
    color_enabled: bool,
    show_tasks: bool,
    theme: Theme,
}

impl<W: Write> std::fmt::Debug for ConsoleReporter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleReporter")
            .field("color_enabled", &self.color_enabled)
            .field("show_tasks", &self.show_tasks)
            .field("theme", &self.theme)
            .finish()
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(writer: W, color_enabled: bool) -> Self {
        Self {
            writer,
            color_enabled,
            show_tasks: false,
            theme: Theme::default(),
        }
    }

    pub fn with_tasks(mut self, enabled: bool) -> Self {
        self.show_tasks = enabled;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn style_text(&self, style: Style, text: &str) -> String {
        if !self.color_enabled {
            return text.to_owned();
        }
        format!("{}{}{}", style.render(), text, style.render_reset())
    }

    fn section(&mut self, title: &str) {
        let rendered = self.style_text(self.theme.accent, title);
        let underline = self.style_text(self.theme.muted, &"─".repeat(title.chars().count()));
        let _ = writeln!(self.writer, "{rendered}");
        let _ = writeln!(self.writer, "{underline}");
    }

    fn step(&mut self, indent: usize, symbol: &str, style: Style, label: &str) {
        let symbol = self.style_text(style, symbol);
        let _ = writeln!(self.writer, "{}{symbol} {label}", "  ".repeat(indent));
    }

    fn failure_lines(&mut self, indent: usize, report: &TaskReport) {
        for failure in &report.errors {
            let marker = self.style_text(self.theme.error, "!");
            let _ = writeln!(
                self.writer,
                "{}{marker} {failure}",
                "  ".repeat(indent)
            );
        }
    }
}

impl ConsoleReporter<AutoStream<std::io::Stdout>> {
    /// Builds the stdout reporter from its configuration mapping
    /// (`color: auto|always|never`, `tasks: bool`).
    pub fn stdout(options: &Value) -> Self {
        let mode = OutputMode::parse(options.get("color").and_then(Value::as_str));
        let show_tasks = options
            .get("tasks")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let choice = match mode {
            OutputMode::Auto => ColorChoice::Auto,
            OutputMode::Always => ColorChoice::AlwaysAnsi,
            OutputMode::Never => ColorChoice::Never,
        };
        let stream = AutoStream::new(std::io::stdout(), choice);
        let color_enabled = resolve_color_enabled(mode, std::io::stdout().is_terminal());
        Self::new(stream, color_enabled).with_tasks(show_tasks)
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn log_validation_errors(&mut self, records: &[ValidationRecord]) {
        self.section("Validation Errors");
        for record in records {
            let marker = self.style_text(self.theme.error, "✕");
            let _ = writeln!(self.writer, "{marker} {record}");
            if let Some(source) = &record.source {
                let source = self.style_text(self.theme.muted, &source.display().to_string());
                let _ = writeln!(self.writer, "  {source}");
            }
        }
        let _ = writeln!(self.writer);
    }

    fn log_test_set_begin(&mut self, set: &TestSetEntry) {
        self.section(&set.id);
    }

    fn log_test_set_skip(&mut self, set: &TestSetEntry) {
        self.step(0, "·", self.theme.muted, &format!("{} (skipped)", set.id));
    }

    fn log_test_skip(&mut self, _set: &TestSetEntry, test: &TestEntry) {
        self.step(
            1,
            "·",
            self.theme.muted,
            &format!("{} (skipped)", test.description),
        );
    }

    fn log_test_complete(&mut self, _set: &TestSetEntry, test: &TestEntry, report: &TestReport) {
        if report.passed() {
            self.step(1, "✓", self.theme.success, &test.description);
        } else {
            self.step(1, "✕", self.theme.error, &test.description);
            let failed: Vec<&TaskReport> = report
                .before_each
                .iter()
                .chain(&report.tasks)
                .chain(&report.after_each)
                .filter(|task| !task.passed())
                .collect();
            for task in failed {
                self.step(2, "✕", self.theme.error, &task.label);
                self.failure_lines(3, task);
            }
        }
    }

    fn log_task_complete(&mut self, scope: &TaskScope, _task: &TaskSchema, report: &TaskReport) {
        if !self.show_tasks {
            return;
        }
        let prefix = match &scope.test {
            Some(test) => format!("{test} » {}", report.label),
            None => report.label.clone(),
        };
        if report.passed() {
            self.step(2, "✓", self.theme.success, &prefix);
        } else {
            self.step(2, "✕", self.theme.error, &prefix);
        }
    }

    fn generate_report(&mut self, complete: &CompleteReport) {
        let _ = writeln!(self.writer);
        self.section("Results");

        let mut builder = Builder::default();
        builder.push_record(["test set", "tests", "skipped", "errors"]);
        for set in &complete.sets {
            builder.push_record([
                set.id.clone(),
                set.test_count.to_string(),
                set.skipped_count.to_string(),
                set.error_count.to_string(),
            ]);
        }
        let mut table = builder.build();
        table.with(TableStyle::rounded());
        let _ = writeln!(self.writer, "{table}");

        let verdict = if complete.passed() {
            self.style_text(self.theme.success, "passed")
        } else {
            self.style_text(self.theme.error, "failed")
        };
        let skipped = if complete.skipped_count > 0 {
            self.style_text(
                self.theme.warning,
                &format!("  skipped:{}", complete.skipped_count),
            )
        } else {
            String::new()
        };
        let _ = writeln!(
            self.writer,
            "{verdict}  tests:{}  errors:{}{skipped}  ({:.3}s)",
            complete.test_count, complete.error_count, complete.duration_secs
        );
    }
}

#[cfg(test)]
#[path = "../tests/console_tests.rs"]
mod tests;
