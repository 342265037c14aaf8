//! Attendance Synchronizer: writes a presence marker for each confirmed
//! name into today's date column, exactly once.

use crate::retry::{RateLimitedWriter, RetryError, Sleeper};
use crate::sheet::{CellRef, Sheet, SheetError, HEADER_ROW, NAME_COLUMN};
use chrono::NaiveDate;
use std::fmt::Write;
use thiserror::Error;

pub const DEFAULT_MARKER: &str = "x";
pub const DEFAULT_DATE_FORMAT: &str = "%B %-d, %Y";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sheet read failed: {0}")]
    Sheet(#[from] SheetError),
    #[error("sheet write failed: {0}")]
    Write(#[from] RetryError<SheetError>),
}

/// Result of marking one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked(CellRef),
    AlreadyMarked(CellRef),
    NameNotFound,
    DateNotFound,
}

/// Per-name outcomes of one synchronization, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub date_header: String,
    pub outcomes: Vec<(String, MarkOutcome)>,
}

impl SyncReport {
    pub fn marked(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, MarkOutcome::Marked(_)))
            .map(|(n, _)| n.as_str())
    }

    pub fn count(&self, pred: impl Fn(&MarkOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceSynchronizer {
    marker: String,
    date_format: String,
}

impl Default for AttendanceSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER, DEFAULT_DATE_FORMAT)
    }
}

impl AttendanceSynchronizer {
    pub fn new(marker: impl Into<String>, date_format: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            date_format: date_format.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Header text identifying `date` in row 1.
    pub fn date_header(&self, date: NaiveDate) -> String {
        let mut header = String::new();
        if write!(header, "{}", date.format(&self.date_format)).is_err() {
            tracing::warn!(format = %self.date_format, "invalid date format");
        }
        header
    }

    /// Mark a single name for `date`.
    pub fn mark<Sh, S>(
        &self,
        sheet: &mut Sh,
        writer: &RateLimitedWriter<S>,
        name: &str,
        date: NaiveDate,
    ) -> Result<MarkOutcome, SyncError>
    where
        Sh: Sheet + ?Sized,
        S: Sleeper,
    {
        let header = self.date_header(date);
        let date_col = locate_date(sheet, &header)?;
        self.mark_in_column(sheet, writer, name, date_col, &header)
    }

    /// Mark every name for `date`. Missing names or a missing date column
    /// are reported per name; a write that exhausts its retries aborts the
    /// whole call.
    pub fn sync<Sh, S, N>(
        &self,
        sheet: &mut Sh,
        writer: &RateLimitedWriter<S>,
        names: N,
        date: NaiveDate,
    ) -> Result<SyncReport, SyncError>
    where
        Sh: Sheet + ?Sized,
        S: Sleeper,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        let header = self.date_header(date);
        let date_col = locate_date(sheet, &header)?;

        let mut report = SyncReport {
            date_header: header.clone(),
            outcomes: Vec::new(),
        };
        for name in names {
            let name = name.as_ref();
            let outcome = self.mark_in_column(sheet, writer, name, date_col, &header)?;
            report.outcomes.push((name.to_string(), outcome));
        }

        tracing::info!(
            date = %header,
            marked = report.count(|o| matches!(o, MarkOutcome::Marked(_))),
            already = report.count(|o| matches!(o, MarkOutcome::AlreadyMarked(_))),
            skipped = report.count(|o| matches!(o, MarkOutcome::NameNotFound | MarkOutcome::DateNotFound)),
            "attendance synchronized"
        );
        Ok(report)
    }

    fn mark_in_column<Sh, S>(
        &self,
        sheet: &mut Sh,
        writer: &RateLimitedWriter<S>,
        name: &str,
        date_col: Option<u32>,
        header: &str,
    ) -> Result<MarkOutcome, SyncError>
    where
        Sh: Sheet + ?Sized,
        S: Sleeper,
    {
        let Some(col) = date_col else {
            tracing::warn!(name, date = header, "date not found in sheet");
            return Ok(MarkOutcome::DateNotFound);
        };

        let row = match locate_name(sheet, name)? {
            Some(row) => row,
            None => {
                tracing::warn!(name, "name not found in sheet");
                return Ok(MarkOutcome::NameNotFound);
            }
        };

        let cell = CellRef::new(row, col);
        if sheet.read_cell(cell)?.trim() == self.marker {
            tracing::info!(name, date = header, "already marked");
            return Ok(MarkOutcome::AlreadyMarked(cell));
        }

        writer.write_cell(sheet, cell, &self.marker)?;
        tracing::info!(name, date = header, row, col, "attendance marked");
        Ok(MarkOutcome::Marked(cell))
    }
}

fn locate_date<Sh: Sheet + ?Sized>(sheet: &Sh, header: &str) -> Result<Option<u32>, SheetError> {
    Ok(sheet.find_in_row(HEADER_ROW, header)?.map(|c| c.col))
}

fn locate_name<Sh: Sheet + ?Sized>(sheet: &Sh, name: &str) -> Result<Option<u32>, SheetError> {
    if name.trim().is_empty() {
        return Ok(None);
    }
    Ok(sheet
        .find_in_column(NAME_COLUMN, name.trim())?
        .map(|c| c.row)
        .filter(|&row| row > HEADER_ROW))
}
