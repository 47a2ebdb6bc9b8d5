// CSV import of dose logs and export of dose reports.

use std::collections::HashMap;
use std::io::{Read, Write};

use anyhow::Context;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use medtrack_adherence::DoseRecord;
use medtrack_core::model::{format_datetime, parse_datetime, AssignmentId, DoseStatus};

use crate::access::Actor;
use crate::tracker::{DoseEntry, Tracker};

/// One row of an import file. Column names match the header line.
#[derive(Debug, Deserialize)]
struct LogRow {
    assignment_id: AssignmentId,
    scheduled_time: Option<String>,
    actual_time: Option<String>,
    status: String,
    notes: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportSummary {
    pub imported: usize,
    /// `(line number, reason)` for every row that was not stored.
    pub rejected: Vec<(usize, String)>,
}

fn parse_optional_time(raw: Option<&str>, column: &str) -> Result<Option<NaiveDateTime>, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(text) => parse_datetime(text)
            .map(Some)
            .map_err(|e| format!("bad {column} `{text}`: {e}")),
    }
}

fn row_to_entry(row: &LogRow) -> Result<DoseEntry, String> {
    let status = DoseStatus::parse(&row.status).map_err(|e| e.to_string())?;
    let scheduled_time = parse_optional_time(row.scheduled_time.as_deref(), "scheduled_time")?;
    let actual_time = parse_optional_time(row.actual_time.as_deref(), "actual_time")?;
    match status {
        DoseStatus::Taken if actual_time.is_none() => {
            return Err("taken dose needs an actual_time".into());
        }
        DoseStatus::Skipped | DoseStatus::Missed if scheduled_time.is_none() => {
            return Err(format!("{} dose needs a scheduled_time", status.as_str()));
        }
        _ => {}
    }
    Ok(DoseEntry {
        assignment_id: row.assignment_id,
        scheduled_time,
        actual_time,
        status,
        notes: row
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        reminder_id: None,
    })
}

/// Import dose logs from CSV with the header
/// `assignment_id,scheduled_time,actual_time,status,notes`.
///
/// Every row goes through [`Tracker::log_dose`] as `actor`, so access rules,
/// slot matching and duplicate detection apply. Bad rows are collected in
/// the summary instead of aborting the import.
pub fn import_logs<R: Read>(
    tracker: &Tracker,
    actor: &Actor,
    rdr: R,
    now: NaiveDateTime,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rdr);
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<LogRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let entry = match result {
            Ok(row) => row_to_entry(&row),
            Err(e) => Err(format!("malformed row: {e}")),
        };
        let outcome = entry.and_then(|entry| {
            tracker
                .log_dose(actor, &entry, now)
                .map_err(|e| e.to_string())
        });
        match outcome {
            Ok(_) => summary.imported += 1,
            Err(reason) => {
                warn!("skipping import line {}: {}", line, reason);
                summary.rejected.push((line, reason));
            }
        }
    }
    Ok(summary)
}

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    assignment_id: AssignmentId,
    medication: &'a str,
    scheduled_time: String,
    actual_time: String,
    outcome: &'static str,
}

/// Write one CSV row per dose record. Returns the number of rows written.
pub fn export_report<W: Write>(
    writer: W,
    records: &[DoseRecord],
    medications: &HashMap<AssignmentId, String>,
) -> anyhow::Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        let medication = medications
            .get(&record.slot.assignment_id)
            .map(String::as_str)
            .unwrap_or("");
        wtr.serialize(ReportRow {
            assignment_id: record.slot.assignment_id,
            medication,
            scheduled_time: format_datetime(&record.slot.scheduled_time),
            actual_time: record
                .log
                .as_ref()
                .and_then(|log| log.actual_time)
                .map(|t| format_datetime(&t))
                .unwrap_or_default(),
            outcome: record.outcome.as_str(),
        })
        .context("failed to write report row")?;
    }
    wtr.flush().context("failed to flush report")?;
    Ok(records.len())
}
