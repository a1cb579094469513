//! Output writers.
//!
//! Serialize a batch report to a SQL file (one statement per resolved
//! query, original template echoed as a comment) and to a JSON twin for
//! structured diagnostics. The core record stays format-agnostic; only this
//! module knows about files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::batch::BatchReport;
use crate::error::OmopgenResult;
use crate::resolver::Status;

/// Write both output files into `dir`, returning their paths
/// (`<stem>.sql`, `<stem>.json`).
pub fn write_report(report: &BatchReport, dir: &Path, stem: &str) -> OmopgenResult<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;
    let sql_path = dir.join(format!("{stem}.sql"));
    let json_path = dir.join(format!("{stem}.json"));

    write_sql(report, &sql_path)?;
    write_json(report, &json_path)?;

    info!(sql = %sql_path.display(), json = %json_path.display(), "report written");
    Ok((sql_path, json_path))
}

/// Write the SQL file. Failed queries are retained with their error list and
/// partial text as comments, never dropped.
pub fn write_sql(report: &BatchReport, path: &Path) -> OmopgenResult<()> {
    let mut f = fs::File::create(path)?;
    writeln!(f, "-- Rendered SQL queries")?;
    writeln!(f, "-- Generated by omopgen on {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(f)?;

    for record in &report.records {
        writeln!(f, "-- Query ID: {}", record.id)?;
        writeln!(
            f,
            "-- Status: {}",
            match record.status {
                Status::Success => "success",
                Status::Failure => "failure",
            }
        )?;
        writeln!(f, "-- Original template:")?;
        for line in record.template.lines() {
            writeln!(f, "-- {line}")?;
        }
        for warning in &record.warnings {
            writeln!(f, "-- Warning: {warning}")?;
        }
        if record.status == Status::Success {
            if !record.required_args.is_empty() {
                let summary: Vec<String> = record
                    .required_args
                    .iter()
                    .map(|(cat, n)| format!("{cat}={n}"))
                    .collect();
                writeln!(f, "-- Required arguments: {}", summary.join(", "))?;
            }
            let mut sql = record.sql.trim_end().to_string();
            if !sql.ends_with(';') {
                sql.push(';');
            }
            writeln!(f, "{sql}")?;
        } else {
            for error in &record.errors {
                writeln!(f, "-- Error: {error}")?;
            }
            writeln!(f, "-- Partial output:")?;
            for line in record.sql.lines() {
                writeln!(f, "-- {line}")?;
            }
        }
        writeln!(f)?;
        writeln!(f, "{}", "-".repeat(80))?;
        writeln!(f)?;
    }
    Ok(())
}

/// Write the full per-query records as pretty-printed JSON.
pub fn write_json(report: &BatchReport, path: &Path) -> OmopgenResult<()> {
    let f = fs::File::create(path)?;
    serde_json::to_writer_pretty(f, report)?;
    Ok(())
}
