//! Output formatters for test results
//!
//! Provides table, JSON, CSV and one-line summary formats.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::models::{RunSummary, TestResult, TestStatus};

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

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::JsonPretty => "json-pretty",
            OutputFormat::Csv => "csv",
            OutputFormat::Summary => "summary",
        }
    }

    /// Whether results should be printed live while a run progresses
    pub fn is_streamable(&self) -> bool {
        matches!(self, OutputFormat::Table | OutputFormat::Summary)
    }
}

/// One CSV line
#[derive(Serialize)]
struct CsvRow<'a> {
    round: u32,
    id: &'a str,
    name: &'a str,
    status: TestStatus,
    duration_ms: u64,
    retries_used: u32,
    error: String,
}

impl<'a> CsvRow<'a> {
    fn new(round: u32, result: &'a TestResult) -> Self {
        Self {
            round,
            id: &result.id,
            name: &result.name,
            status: result.status,
            duration_ms: result.duration_ms,
            retries_used: result.retries_used,
            error: result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default(),
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

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Format a single test result
    pub fn format_result(&self, result: &TestResult) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.format_result_table(result)),
            OutputFormat::Json => to_json(result, false),
            OutputFormat::JsonPretty => to_json(result, true),
            OutputFormat::Csv => to_csv(std::iter::once(CsvRow::new(0, result)), false),
            OutputFormat::Summary => Ok(self.format_result_summary(result)),
        }
    }

    fn status_label(&self, status: TestStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return label;
        }
        let color = match status {
            TestStatus::Passed => "32",
            TestStatus::Failed => "31",
            TestStatus::Skipped => "33",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_result_table(&self, result: &TestResult) -> String {
        let mut line = format!(
            "{:28} {} [{:>6}ms]",
            truncate(&result.name, 28),
            self.status_label(result.status),
            result.duration_ms
        );
        if result.retries_used > 0 {
            line.push_str(&format!(" retries={}", result.retries_used));
        }
        if let Some(error) = &result.error {
            line.push_str(&format!(" {error}"));
        }
        line
    }

    fn format_result_summary(&self, result: &TestResult) -> String {
        format!(
            "{} {} ({}ms)",
            result.status.symbol(),
            result.name,
            result.duration_ms
        )
    }

    /// Format one run summary
    pub fn format_summary(&self, summary: &RunSummary) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.format_summary_table(summary)),
            OutputFormat::Json => to_json(summary, false),
            OutputFormat::JsonPretty => to_json(summary, true),
            OutputFormat::Csv => to_csv(
                summary.results.iter().map(|r| CsvRow::new(summary.round, r)),
                true,
            ),
            OutputFormat::Summary => Ok(self.format_summary_brief(summary)),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Round {:3} - {:46} ║\n",
            summary.round,
            truncate(&summary.suite, 46)
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for result in &summary.results {
            output.push_str(&format!("║  {}\n", self.format_result_table(result)));
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_str = if self.colorize && summary.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };

        output.push_str(&format!(
            "║  Total: {} | Pass: {} | Fail: {} | Skip: {} | Retried: {}\n",
            summary.total, pass_str, fail_str, summary.skipped, summary.retried
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));
        if summary.durations.count > 0 {
            output.push_str(&format!("║  {}\n", summary.durations.format_summary()));
        }
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_summary_brief(&self, summary: &RunSummary) -> String {
        format!(
            "{} - Round {}: {}/{} passed ({:.1}%), {} skipped in {}ms",
            summary.suite,
            summary.round,
            summary.passed,
            summary.total - summary.skipped,
            summary.pass_rate(),
            summary.skipped,
            summary.total_duration_ms
        )
    }

    /// Format every round of a multi-round invocation
    pub fn format_rounds(&self, summaries: &[RunSummary]) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(&summaries, false),
            OutputFormat::JsonPretty => to_json(&summaries, true),
            OutputFormat::Csv => to_csv(
                summaries
                    .iter()
                    .flat_map(|s| s.results.iter().map(|r| CsvRow::new(s.round, r))),
                true,
            ),
            OutputFormat::Table | OutputFormat::Summary => {
                let mut output = String::new();
                for summary in summaries {
                    output.push_str(&self.format_summary(summary)?);
                    output.push('\n');
                }
                Ok(output)
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    json.context("Failed to serialize results")
}

fn to_csv<'a>(rows: impl Iterator<Item = CsvRow<'a>>, headers: bool) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(headers)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("Failed to write CSV row")?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV output")?;
    let mut text = String::from_utf8(bytes).context("CSV output is not UTF-8")?;
    if !headers && text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Write all rounds to a file, without ANSI colours
pub fn write_results_to_file(
    path: &Path,
    summaries: &[RunSummary],
    format: OutputFormat,
) -> Result<()> {
    let content = ResultFormatter::new(format).no_color().format_rounds(summaries)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write results file: {}", path.display()))?;
    Ok(())
}
