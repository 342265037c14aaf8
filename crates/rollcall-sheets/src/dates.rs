//! Date headers for row 1: every weekend in a range, as Saturday, Sunday
//! and a blank separator column.

use crate::retry::{RateLimitedWriter, Sleeper};
use crate::sheet::{CellUpdate, Sheet, HEADER_ROW};
use crate::sync::SyncError;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::str::FromStr;
use thiserror::Error;

const INPUT_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("invalid date range {0:?}; expected YYYY-MM-DD to YYYY-MM-DD")]
    Format(String),
    #[error("start date {start} is after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }
}

impl FromStr for DateRange {
    type Err = DateRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_date_range(s)
    }
}

/// Parse `"YYYY-MM-DD to YYYY-MM-DD"`.
pub fn parse_date_range(input: &str) -> Result<DateRange, DateRangeError> {
    let bad = || DateRangeError::Format(input.to_string());
    let (start, end) = input.trim().split_once(" to ").ok_or_else(bad)?;
    let start = NaiveDate::parse_from_str(start.trim(), INPUT_FORMAT).map_err(|_| bad())?;
    let end = NaiveDate::parse_from_str(end.trim(), INPUT_FORMAT).map_err(|_| bad())?;
    DateRange::new(start, end)
}

/// The full row-1 contents for `range`: a blank for A1, then for every
/// Saturday in the range its Saturday, its Sunday and a blank.
///
/// A Saturday on the last day of the range still brings its Sunday along.
pub fn weekend_headers(range: DateRange, format: &str) -> Vec<String> {
    let mut row = vec![String::new()];
    let mut day = range.start;
    while day <= range.end {
        if day.weekday() == Weekday::Sat {
            let sunday = day + Duration::days(1);
            row.push(day.format(format).to_string());
            row.push(sunday.format(format).to_string());
            row.push(String::new());
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    row
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulateOutcome {
    /// Number of weekends written.
    Populated(usize),
    AlreadyPopulated,
}

/// Write the weekend headers into row 1 in one batch, but only when row 1
/// holds nothing yet.
pub fn populate_dates_if_empty<Sh, S>(
    sheet: &mut Sh,
    writer: &RateLimitedWriter<S>,
    range: DateRange,
    format: &str,
) -> Result<PopulateOutcome, SyncError>
where
    Sh: Sheet + ?Sized,
    S: Sleeper,
{
    if sheet.row_values(HEADER_ROW)?.iter().any(|v| !v.trim().is_empty()) {
        tracing::info!("dates already populated");
        return Ok(PopulateOutcome::AlreadyPopulated);
    }

    let headers = weekend_headers(range, format);
    let weekends = (headers.len() - 1) / 3;
    let updates: Vec<CellUpdate> = headers
        .into_iter()
        .enumerate()
        .map(|(i, v)| CellUpdate::new(HEADER_ROW, i as u32 + 1, v))
        .collect();
    writer.write_batch(sheet, &updates)?;

    tracing::info!(start = %range.start, end = %range.end, weekends, "date headers populated");
    Ok(PopulateOutcome::Populated(weekends))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::testing::writer;
    use crate::sheet::MemorySheet;
    use crate::sync::{AttendanceSynchronizer, DEFAULT_DATE_FORMAT};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_date_range() {
        let range = parse_date_range("2026-10-01 to 2026-10-31").unwrap();
        assert_eq!(range.start, d(2026, 10, 1));
        assert_eq!(range.end, d(2026, 10, 31));
        assert_eq!("2026-10-01 to 2026-10-01".parse::<DateRange>().unwrap().end, d(2026, 10, 1));
    }

    #[test]
    fn test_parse_date_range_errors() {
        assert!(matches!(parse_date_range("2026-10-01"), Err(DateRangeError::Format(_))));
        assert!(matches!(parse_date_range("10/01/2026 to 10/31/2026"), Err(DateRangeError::Format(_))));
        assert_eq!(
            parse_date_range("2026-10-31 to 2026-10-01"),
            Err(DateRangeError::Inverted { start: d(2026, 10, 31), end: d(2026, 10, 1) })
        );
    }

    #[test]
    fn test_weekend_headers() {
        // 2026-10-17 is a Saturday.
        let range = DateRange::new(d(2026, 10, 15), d(2026, 10, 24)).unwrap();
        assert_eq!(
            weekend_headers(range, DEFAULT_DATE_FORMAT),
            vec![
                "",
                "October 17, 2026",
                "October 18, 2026",
                "",
                "October 24, 2026",
                "October 25, 2026",
                "",
            ]
        );

        let weekdays = DateRange::new(d(2026, 10, 19), d(2026, 10, 23)).unwrap();
        assert_eq!(weekend_headers(weekdays, DEFAULT_DATE_FORMAT), vec![""]);
    }

    #[test]
    fn test_populate_only_when_row_empty() {
        let writer = writer();
        let mut sheet = MemorySheet::from_rows(vec![vec![""], vec!["Alice"]]);
        let range = parse_date_range("2026-10-17 to 2026-10-18").unwrap();

        let outcome = populate_dates_if_empty(&mut sheet, &writer, range, DEFAULT_DATE_FORMAT).unwrap();
        assert_eq!(outcome, PopulateOutcome::Populated(1));
        assert_eq!(sheet.row_values(1).unwrap(), vec!["", "October 17, 2026", "October 18, 2026"]);

        let again = populate_dates_if_empty(&mut sheet, &writer, range, DEFAULT_DATE_FORMAT).unwrap();
        assert_eq!(again, PopulateOutcome::AlreadyPopulated);
        assert_eq!(sheet.write_requests, 1);
    }

    #[test]
    fn test_populated_headers_are_found_by_synchronizer() {
        let writer = writer();
        let mut sheet = MemorySheet::from_rows(vec![vec![""], vec!["Alice"]]);
        let range = parse_date_range("2026-10-12 to 2026-10-18").unwrap();
        populate_dates_if_empty(&mut sheet, &writer, range, DEFAULT_DATE_FORMAT).unwrap();

        let sync = AttendanceSynchronizer::default();
        let outcome = sync.mark(&mut sheet, &writer, "Alice", d(2026, 10, 18)).unwrap();
        assert!(matches!(outcome, crate::sync::MarkOutcome::Marked(_)));
        assert_eq!(sheet.get(2, 3), "x");
    }
}
