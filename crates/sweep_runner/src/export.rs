//! Run report export.
//!
//! JSON carries the summary and a snapshot per job; CSV carries one row per
//! job. [`export_report`] picks the format from the file extension.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sweep_core::contract::JobSnapshot;
use sweep_core::events::RunSummary;
use sweep_core::Result;
use tracing::info;
use uuid::Uuid;

use crate::scheduler::RunReport;

#[derive(Debug, Serialize)]
struct ReportDocument<'a> {
    run_id: Option<Uuid>,
    generated_at: DateTime<Utc>,
    summary: &'a RunSummary,
    jobs: Vec<JobSnapshot>,
}

fn create_output_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

pub fn export_to_json(report: &RunReport, run_id: Option<Uuid>, path: impl AsRef<Path>) -> Result<()> {
    let document = ReportDocument {
        run_id,
        generated_at: Utc::now(),
        summary: &report.summary,
        jobs: report.jobs.iter().map(|job| job.snapshot()).collect(),
    };
    let mut file = create_output_file(path.as_ref())?;
    serde_json::to_writer_pretty(&mut file, &document)?;
    file.write_all(b"\n")?;
    Ok(())
}

pub fn export_to_csv(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
    let file = create_output_file(path.as_ref())?;
    let mut wtr = csv::Writer::from_writer(file);

    wtr.write_record(["id", "state", "exit_code", "fingerprint", "command_line"])
        .map_err(std::io::Error::from)?;
    for job in &report.jobs {
        let id = job.id().to_string();
        let exit_code = job.exit_code().map(|code| code.to_string()).unwrap_or_default();
        let command_line = job.command_line();
        wtr.write_record([
            id.as_str(),
            job.state().as_str(),
            exit_code.as_str(),
            job.fingerprint(),
            command_line.as_str(),
        ])
        .map_err(std::io::Error::from)?;
    }
    wtr.flush()?;
    Ok(())
}

/// `.csv` → CSV, anything else → JSON.
pub fn export_report(report: &RunReport, run_id: Option<Uuid>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        export_to_csv(report, path)?;
    } else {
        export_to_json(report, run_id, path)?;
    }
    info!(path = %path.display(), jobs = report.jobs.len(), "report written");
    Ok(())
}
