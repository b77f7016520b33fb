use crate::metrics::{overall_error_rate, summarize, MetricsSummary};
use crate::pool::PoolReport;
use crate::recorder::Collections;
use crate::records::WorkerResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const METRICS_SHEET: &str = "Performance Metrics";
const WORKERS_SHEET: &str = "Worker Results";
const MAX_COLUMN_WIDTH: usize = 80;

/// Everything the report shows about one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub threads: u32,
    pub total_workers: usize,
    pub successful_workers: usize,
    pub failed_workers: usize,
    /// Percentage of workers that did not complete their job
    pub overall_error_rate: f64,
    pub token_refreshes: u64,
    pub token_cache_hits: u64,
    pub pool_timed_out: bool,
    pub token: MetricsSummary,
    pub trigger: MetricsSummary,
    pub status: MetricsSummary,
}

impl RunSummary {
    pub fn build(
        threads: u32,
        pool: &PoolReport,
        collections: &Collections,
        token_refreshes: u64,
        token_cache_hits: u64,
    ) -> Self {
        let workers = &collections.workers;
        let successful_workers = workers.iter().filter(|w| w.success).count();

        Self {
            generated_at: Utc::now(),
            duration_secs: pool.duration.as_secs_f64(),
            threads,
            total_workers: workers.len(),
            successful_workers,
            failed_workers: workers.len() - successful_workers,
            overall_error_rate: overall_error_rate(workers),
            token_refreshes,
            token_cache_hits,
            pool_timed_out: pool.timed_out,
            token: summarize(&collections.tokens, |s| s.latency, pool.duration),
            trigger: summarize(&collections.processes, |s| s.latency, pool.duration),
            status: summarize(&collections.statuses, |s| s.elapsed, pool.duration),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(u64),
    Float(f64),
}

impl Cell {
    fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Text as it appears in the sheet; used for column sizing.
    pub fn display(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => format!("{v:.3}"),
        }
    }
}

/// A sheet's rows and the indices of rows rendered in bold.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub rows: Vec<Vec<Cell>>,
    pub bold_rows: Vec<usize>,
}

impl Table {
    fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    fn push_bold(&mut self, row: Vec<Cell>) {
        self.bold_rows.push(self.rows.len());
        self.rows.push(row);
    }

    /// Looks up the cell right of the first cell reading `label`.
    pub fn value_of(&self, label: &str) -> Option<&Cell> {
        self.rows
            .iter()
            .find(|row| matches!(row.first(), Some(Cell::Text(s)) if s == label))
            .and_then(|row| row.get(1))
    }

    /// Width per column: longest rendered cell plus padding.
    pub fn column_widths(&self) -> Vec<usize> {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        (0..columns)
            .map(|col| {
                let longest = self
                    .rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(|cell| cell.display().chars().count())
                    .max()
                    .unwrap_or(0);
                (longest + 2).min(MAX_COLUMN_WIDTH)
            })
            .collect()
    }
}

type MetricRow = (&'static str, fn(&MetricsSummary) -> Cell);

const METRIC_ROWS: &[MetricRow] = &[
    ("Total Requests", |m| Cell::Int(m.total as u64)),
    ("Successful Requests", |m| Cell::Int(m.successes as u64)),
    ("Failed Requests", |m| Cell::Int(m.failures as u64)),
    ("Error Rate (%)", |m| Cell::Float(m.error_rate)),
    ("Mean Latency (s)", |m| Cell::Float(m.mean)),
    ("Min Latency (s)", |m| Cell::Float(m.min)),
    ("Max Latency (s)", |m| Cell::Float(m.max)),
    ("Median Latency (s)", |m| Cell::Float(m.median)),
    ("P90 Latency (s)", |m| Cell::Float(m.p90)),
    ("P95 Latency (s)", |m| Cell::Float(m.p95)),
    ("P99 Latency (s)", |m| Cell::Float(m.p99)),
    ("Throughput (req/s)", |m| Cell::Float(m.throughput)),
    ("Total Sent (bytes)", |m| Cell::Int(m.bytes_sent)),
    ("Total Received (bytes)", |m| Cell::Int(m.bytes_received)),
    ("Sent KB/s", |m| Cell::Float(m.sent_kb_per_sec)),
    ("Received KB/s", |m| Cell::Float(m.received_kb_per_sec)),
];

/// Metrics per endpoint class followed by the run summary block.
pub fn metrics_table(summary: &RunSummary) -> Table {
    let mut table = Table::default();
    table.push_bold(vec![
        Cell::text("Metric"),
        Cell::text("Token"),
        Cell::text("Trigger"),
        Cell::text("Status"),
    ]);

    for (name, value) in METRIC_ROWS {
        table.push(vec![
            Cell::text(*name),
            value(&summary.token),
            value(&summary.trigger),
            value(&summary.status),
        ]);
    }

    table.push(vec![Cell::Empty]);
    table.push_bold(vec![Cell::text("Summary")]);
    let block = [
        ("Test Duration (s)", Cell::Float(summary.duration_secs)),
        ("Thread Count", Cell::Int(summary.threads as u64)),
        ("Total Workers", Cell::Int(summary.total_workers as u64)),
        ("Successful Workers", Cell::Int(summary.successful_workers as u64)),
        ("Failed Workers", Cell::Int(summary.failed_workers as u64)),
        (
            "Overall Error Rate",
            Cell::text(format!("{:.2}%", summary.overall_error_rate)),
        ),
        ("Token Refreshes", Cell::Int(summary.token_refreshes)),
        ("Token Cache Hits", Cell::Int(summary.token_cache_hits)),
        (
            "Pool Timed Out",
            Cell::text(if summary.pool_timed_out { "Yes" } else { "No" }),
        ),
        (
            "Generated At",
            Cell::text(summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ),
    ];
    for (label, value) in block {
        table.push(vec![Cell::text(label), value]);
    }

    table
}

/// One row per worker, ordered by worker id.
pub fn workers_table(workers: &[WorkerResult]) -> Table {
    let mut table = Table::default();
    table.push_bold(
        [
            "Worker",
            "Started At",
            "Process ID",
            "Final Status",
            "Success",
            "Error Category",
            "Error",
            "Token From Cache",
            "Token Latency (s)",
            "Trigger Latency (s)",
            "Status Elapsed (s)",
            "Status Checks",
            "Total Time (s)",
        ]
        .into_iter()
        .map(Cell::text)
        .collect(),
    );

    let mut sorted: Vec<&WorkerResult> = workers.iter().collect();
    sorted.sort_by_key(|w| w.worker_id);
    for w in sorted {
        table.push(vec![
            Cell::Int(w.worker_id as u64),
            Cell::text(w.started_at.format("%H:%M:%S%.3f").to_string()),
            w.process_id.clone().map_or(Cell::Empty, Cell::Text),
            Cell::text(w.final_status.to_string()),
            Cell::text(if w.success { "Yes" } else { "No" }),
            w.error_category
                .map_or(Cell::Empty, |c| Cell::text(c.to_string())),
            w.error.clone().map_or(Cell::Empty, Cell::Text),
            Cell::text(if w.token_from_cache { "Yes" } else { "No" }),
            Cell::Float(w.token_latency.as_secs_f64()),
            Cell::Float(w.trigger_latency.as_secs_f64()),
            Cell::Float(w.status_elapsed.as_secs_f64()),
            Cell::Int(w.status_checks as u64),
            Cell::Float(w.total_time.as_secs_f64()),
        ]);
    }
    table
}

fn render_sheet(worksheet: &mut Worksheet, name: &str, table: &Table) -> Result<(), XlsxError> {
    let bold = Format::new().set_bold();
    let decimal = Format::new().set_num_format("0.000");

    worksheet.set_name(name)?;
    for (r, row) in table.rows.iter().enumerate() {
        let r = r as u32;
        let is_bold = table.bold_rows.contains(&(r as usize));
        for (c, cell) in row.iter().enumerate() {
            let c = c as u16;
            match cell {
                Cell::Empty => {}
                Cell::Text(s) if is_bold => {
                    worksheet.write_string_with_format(r, c, s, &bold)?;
                }
                Cell::Text(s) => {
                    worksheet.write_string(r, c, s)?;
                }
                Cell::Int(v) => {
                    worksheet.write_number(r, c, *v as f64)?;
                }
                Cell::Float(v) => {
                    worksheet.write_number_with_format(r, c, *v, &decimal)?;
                }
            }
        }
    }
    for (c, width) in table.column_widths().into_iter().enumerate() {
        worksheet.set_column_width(c as u16, width as f64)?;
    }
    Ok(())
}

/// Output paths for a run stamped `stamp`: spreadsheet and JSON summary.
pub fn report_paths(dir: &Path, stamp: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("performance_report_{stamp}.xlsx")),
        dir.join(format!("performance_summary_{stamp}.json")),
    )
}

/// Writes the spreadsheet. Any failure, such as the file being locked by
/// another program, is returned to the caller.
pub fn write_workbook(path: &Path, summary: &RunSummary, workers: &[WorkerResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {:?}", parent))?;
    }

    let mut workbook = Workbook::new();
    render_sheet(workbook.add_worksheet(), METRICS_SHEET, &metrics_table(summary))?;
    render_sheet(workbook.add_worksheet(), WORKERS_SHEET, &workers_table(workers))?;
    workbook
        .save(path)
        .with_context(|| format!("Failed to write report {:?} (is it open elsewhere?)", path))?;

    info!("Report written to {:?}", path);
    Ok(())
}

pub fn write_json_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write summary {:?}", path))?;
    info!("Summary written to {:?}", path);
    Ok(())
}
