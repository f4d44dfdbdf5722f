//! Output formatters for execution reports and run records
//!
//! Provides JSON, CSV, table and summary output formats.

use serde::Serialize;

use crate::models::{AggregatedResult, ExecutionReport, PerformanceTest, RunStatus, TestId, TestRun};
use crate::results::RunInfo;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: Serialize>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn status_label(&self, status: RunStatus) -> String {
        self.paint(
            status,
            format!("{} {}", status.symbol(), status.to_string().to_uppercase()),
        )
    }

    fn paint(&self, status: RunStatus, text: String) -> String {
        if !self.colorize {
            return text;
        }
        let color = match status {
            RunStatus::Completed => "32",
            RunStatus::Error => "31",
            RunStatus::Stopping | RunStatus::Stopped => "33",
            RunStatus::Pending | RunStatus::Started => "36",
        };
        format!("\x1b[{color}m{text}\x1b[0m")
    }

    /// Format the outcome of one execution
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(report),
            OutputFormat::Summary => report.to_string(),
            OutputFormat::Csv => {
                let mut output = String::from(CSV_HEADER);
                output.push('\n');
                output.push_str(&csv_row(
                    &report.run_id,
                    report.test_id,
                    report.status,
                    report.result.as_ref(),
                    report.message.as_deref(),
                ));
                output.push('\n');
                output
            }
            OutputFormat::Table => {
                let mut output = format!(
                    "Test {} in run '{}': {} ({}ms)\n",
                    report.test_id,
                    report.run_id,
                    self.status_label(report.status),
                    report.duration_ms
                );
                if let Some(result) = &report.result {
                    output.push_str(&format!(
                        "  Rows: {} | Success: {} | Failure: {} | Rate: {:.1}%\n",
                        result.total,
                        result.success_count,
                        result.failure_count,
                        result.success_rate()
                    ));
                    if let Some(timing) = &result.timing {
                        output.push_str(&format!(
                            "  Response time: min {:.1}ms | mean {:.1}ms | max {:.1}ms\n",
                            timing.min_ms, timing.mean_ms, timing.max_ms
                        ));
                    }
                }
                if let Some(message) = &report.message {
                    output.push_str(&format!("  {message}\n"));
                }
                output
            }
        }
    }

    /// Format a run record with one line per test
    pub fn format_run(&self, run: &TestRun) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(run),
            OutputFormat::Csv => {
                let mut output = String::from(CSV_HEADER);
                output.push('\n');
                for (test_id, status) in &run.statuses {
                    output.push_str(&csv_row(
                        &run.id,
                        *test_id,
                        *status,
                        run.result(*test_id),
                        run.errors.get(test_id).map(String::as_str),
                    ));
                    output.push('\n');
                }
                output
            }
            OutputFormat::Summary => format!(
                "Run {}: {} test(s), {} completed, {} error, {} stopped",
                run.id,
                run.statuses.len(),
                run.count(RunStatus::Completed),
                run.count(RunStatus::Error),
                run.count(RunStatus::Stopped)
            ),
            OutputFormat::Table => self.format_run_table(run),
        }
    }

    fn format_run_table(&self, run: &TestRun) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" Run: {}\n", run.id));
        output.push_str(&format!(
            " Created: {} | Updated: {}\n",
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.updated_at.format("%Y-%m-%d %H:%M:%S")
        ));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        if run.statuses.is_empty() {
            output.push_str(" No tests executed yet\n");
            return output;
        }

        output.push_str(&format!(
            " {:>6}  {:14} {:>7} {:>7} {:>7} {:>10}\n",
            "Test", "Status", "Rows", "Pass", "Fail", "Mean"
        ));
        output.push_str(" ───────────────────────────────────────────────────────────\n");

        for (test_id, status) in &run.statuses {
            // pad before colouring so escape codes do not skew the columns
            let label = self.paint(
                *status,
                format!("{:14}", format!("{} {}", status.symbol(), status)),
            );

            match run.result(*test_id) {
                Some(result) => output.push_str(&format!(
                    " {:>6}  {} {:>7} {:>7} {:>7} {:>10}\n",
                    test_id,
                    label,
                    result.total,
                    result.success_count,
                    result.failure_count,
                    result
                        .timing
                        .as_ref()
                        .map(|t| format!("{:.1}ms", t.mean_ms))
                        .unwrap_or_else(|| "-".to_string())
                )),
                None => output.push_str(&format!(" {:>6}  {}\n", test_id, label)),
            }

            if let Some(error) = run.errors.get(test_id) {
                output.push_str(&format!("         ! {error}\n"));
            }
        }

        output
    }

    /// Format a listing of stored runs
    pub fn format_runs(&self, runs: &[RunInfo]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => {
                #[derive(Serialize)]
                struct RunJson<'a> {
                    id: &'a str,
                    created_at: String,
                    tests: usize,
                    completed: usize,
                    failed: usize,
                    active: usize,
                }

                let items: Vec<_> = runs
                    .iter()
                    .map(|r| RunJson {
                        id: &r.id,
                        created_at: r.created_at.to_rfc3339(),
                        tests: r.tests,
                        completed: r.completed,
                        failed: r.failed,
                        active: r.active,
                    })
                    .collect();
                self.json(&items)
            }
            OutputFormat::Csv => {
                let mut output = String::from("run_id,created_at,tests,completed,failed,active\n");
                for r in runs {
                    output.push_str(&format!(
                        "{},{},{},{},{},{}\n",
                        csv_field(&r.id),
                        r.created_at.to_rfc3339(),
                        r.tests,
                        r.completed,
                        r.failed,
                        r.active
                    ));
                }
                output
            }
            OutputFormat::Table | OutputFormat::Summary => {
                if runs.is_empty() {
                    return "No runs recorded\n".to_string();
                }
                let mut output = format!(
                    "{:32} {:20} {:>5} {:>9} {:>6} {:>6}\n",
                    "Run", "Created", "Tests", "Completed", "Failed", "Active"
                );
                for r in runs {
                    output.push_str(&format!(
                        "{:32} {:20} {:>5} {:>9} {:>6} {:>6}\n",
                        r.id,
                        r.created_at.format("%Y-%m-%d %H:%M:%S"),
                        r.tests,
                        r.completed,
                        r.failed,
                        r.active
                    ));
                }
                output
            }
        }
    }

    /// Format the available performance test definitions
    pub fn format_tests(&self, tests: &[PerformanceTest]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(&tests),
            OutputFormat::Csv => {
                let mut output = String::from("id,name,host,locustfile\n");
                for t in tests {
                    output.push_str(&format!(
                        "{},{},{},{}\n",
                        t.id,
                        csv_field(&t.name),
                        csv_field(t.config.host.as_deref().unwrap_or("")),
                        csv_field(t.config.locustfile.as_deref().unwrap_or(""))
                    ));
                }
                output
            }
            OutputFormat::Table | OutputFormat::Summary => {
                if tests.is_empty() {
                    return "No performance tests defined\n".to_string();
                }
                let mut output = String::new();
                for t in tests {
                    output.push_str(&format!(
                        "{:>6}. {:24} {} -> {}\n",
                        t.id,
                        t.name,
                        t.config.locustfile.as_deref().unwrap_or("<no locustfile>"),
                        t.config.host.as_deref().unwrap_or("<no host>")
                    ));
                    if let Some(description) = &t.description {
                        output.push_str(&format!("        {description}\n"));
                    }
                }
                output
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

const CSV_HEADER: &str = "run_id,test_id,status,total,success_count,failure_count,mean_ms,message";

fn csv_row(
    run_id: &str,
    test_id: TestId,
    status: RunStatus,
    result: Option<&AggregatedResult>,
    message: Option<&str>,
) -> String {
    let (total, success, failure, mean) = match result {
        Some(r) => (
            r.total.to_string(),
            r.success_count.to_string(),
            r.failure_count.to_string(),
            r.timing
                .as_ref()
                .map(|t| format!("{:.2}", t.mean_ms))
                .unwrap_or_default(),
        ),
        None => Default::default(),
    };
    format!(
        "{},{},{},{},{},{},{},{}",
        csv_field(run_id),
        test_id,
        status,
        total,
        success,
        failure,
        mean,
        csv_field(message.unwrap_or(""))
    )
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoadTestConfig, TimingStats};

    fn report() -> ExecutionReport {
        ExecutionReport {
            run_id: "run-A".to_string(),
            test_id: 7,
            status: RunStatus::Completed,
            result: Some(AggregatedResult {
                total: 3,
                success_count: 2,
                failure_count: 1,
                timing: Some(TimingStats {
                    count: 3,
                    min_ms: 10.0,
                    max_ms: 30.0,
                    mean_ms: 20.0,
                }),
                exit_code: Some(0),
            }),
            message: None,
            duration_ms: 1200,
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("unknown"), None);
    }

    #[test]
    fn test_format_report_table() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_report(&report());
        assert!(output.contains("COMPLETED"));
        assert!(output.contains("Success: 2 | Failure: 1"));
        assert!(output.contains("mean 20.0ms"));
    }

    #[test]
    fn test_format_report_json() {
        let output = ResultFormatter::new(OutputFormat::Json).format_report(&report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["result"]["failure_count"], 1);
    }

    #[test]
    fn test_format_run_csv_escapes_messages() {
        let mut run = TestRun::new("run-A");
        run.statuses.insert(8, RunStatus::Error);
        run.errors.insert(8, "bad \"script\", missing".to_string());

        let output = ResultFormatter::new(OutputFormat::Csv).format_run(&run);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "run-A,8,error,,,,,\"bad \"\"script\"\", missing\""
        );
    }

    #[test]
    fn test_format_run_table_lists_errors() {
        let mut run = TestRun::new("run-A");
        run.statuses.insert(7, RunStatus::Completed);
        run.results.insert(7, report().result.unwrap());
        run.statuses.insert(8, RunStatus::Error);
        run.errors.insert(8, "locustfile not found".to_string());

        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_run(&run);
        assert!(output.contains("20.0ms"));
        assert!(output.contains("! locustfile not found"));
    }

    #[test]
    fn test_format_tests() {
        let tests = vec![PerformanceTest::new(
            7,
            "checkout",
            LoadTestConfig::new("http://shop", "checkout.py"),
        )];
        let output = ResultFormatter::new(OutputFormat::Summary).format_tests(&tests);
        assert!(output.contains("checkout.py -> http://shop"));
    }
}
