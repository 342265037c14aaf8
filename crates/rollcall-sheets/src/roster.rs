//! Roster Reconciler: makes sure every enrolled name has a row before
//! marking starts. Only the name column is ever rewritten.

use crate::retry::{RateLimitedWriter, Sleeper};
use crate::sheet::{CellUpdate, Sheet, HEADER_ROW, NAME_COLUMN};
use crate::sync::SyncError;
use std::collections::{BTreeSet, HashMap};

const FIRST_NAME_ROW: u32 = HEADER_ROW + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterOutcome {
    /// The sheet had no names; all enrolled names were written.
    Populated(Vec<String>),
    /// Missing names were merged into the sorted roster.
    Extended(Vec<String>),
    AllPresent,
}

/// Names in the name column below the header row, trimmed, blanks dropped.
pub fn roster_names<Sh: Sheet + ?Sized>(sheet: &Sh) -> Result<Vec<String>, SyncError> {
    Ok(sheet
        .col_values(NAME_COLUMN)?
        .into_iter()
        .skip(HEADER_ROW as usize)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

/// Add every enrolled name that is missing from the sheet, rewriting the
/// name column as the sorted union in a single batch.
pub fn reconcile_roster<Sh, S, N>(
    sheet: &mut Sh,
    writer: &RateLimitedWriter<S>,
    enrolled: N,
) -> Result<RosterOutcome, SyncError>
where
    Sh: Sheet + ?Sized,
    S: Sleeper,
    N: IntoIterator,
    N::Item: AsRef<str>,
{
    let enrolled: BTreeSet<String> = enrolled
        .into_iter()
        .map(|n| n.as_ref().trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();

    let raw_column = sheet.col_values(NAME_COLUMN)?;
    let existing = roster_names(sheet)?;

    if existing.is_empty() {
        let names: Vec<String> = enrolled.into_iter().collect();
        if names.is_empty() {
            return Ok(RosterOutcome::AllPresent);
        }
        writer.write_batch(sheet, &column_updates(&names, 0))?;
        tracing::info!(count = names.len(), "roster populated");
        return Ok(RosterOutcome::Populated(names));
    }

    let present: BTreeSet<String> = existing.iter().cloned().collect();
    let missing: Vec<String> = enrolled.difference(&present).cloned().collect();
    if missing.is_empty() {
        tracing::info!("all enrolled names present in sheet");
        return Ok(RosterOutcome::AllPresent);
    }

    let union: Vec<String> = present.union(&enrolled).cloned().collect();

    let old_rows: HashMap<&str, u32> = raw_column
        .iter()
        .enumerate()
        .skip(HEADER_ROW as usize)
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(i, v)| (v.trim(), i as u32 + 1))
        .collect();
    for (i, name) in union.iter().enumerate() {
        let new_row = FIRST_NAME_ROW + i as u32;
        if let Some(&old_row) = old_rows.get(name.as_str()) {
            if old_row != new_row {
                tracing::warn!(
                    name = %name,
                    old_row,
                    new_row,
                    "name moved rows; existing date cells stay on the old row"
                );
            }
        }
    }

    // Blank out any rows the old column occupied beyond the new roster.
    let old_len = raw_column.len().saturating_sub(HEADER_ROW as usize);
    let updates = column_updates(&union, old_len.saturating_sub(union.len()));
    writer.write_batch(sheet, &updates)?;

    tracing::info!(added = missing.len(), total = union.len(), "roster extended");
    Ok(RosterOutcome::Extended(missing))
}

fn column_updates(names: &[String], trailing_blanks: usize) -> Vec<CellUpdate> {
    names
        .iter()
        .map(String::as_str)
        .chain(std::iter::repeat("").take(trailing_blanks))
        .enumerate()
        .map(|(i, name)| CellUpdate::new(FIRST_NAME_ROW + i as u32, NAME_COLUMN, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::testing::writer;
    use crate::sheet::MemorySheet;

    #[test]
    fn test_missing_names_merged_sorted_without_touching_dates() {
        let writer = writer();
        let mut sheet = MemorySheet::from_rows(vec![
            vec!["", "October 17, 2026", "October 18, 2026"],
            vec!["Bob", "x", ""],
        ]);

        let outcome = reconcile_roster(&mut sheet, &writer, ["Alice", "Bob", "Carol"]).unwrap();

        assert_eq!(outcome, RosterOutcome::Extended(vec!["Alice".into(), "Carol".into()]));
        assert_eq!(sheet.col_values(1).unwrap(), vec!["", "Alice", "Bob", "Carol"]);
        assert_eq!(sheet.row_values(1).unwrap(), vec!["", "October 17, 2026", "October 18, 2026"]);
        assert_eq!(sheet.get(2, 2), "x");
        assert_eq!(sheet.write_requests, 1);
    }

    #[test]
    fn test_empty_roster_is_populated() {
        let writer = writer();
        let mut sheet = MemorySheet::from_rows(vec![vec!["", "October 17, 2026"]]);

        let outcome = reconcile_roster(&mut sheet, &writer, ["Carol", "Alice"]).unwrap();

        assert_eq!(outcome, RosterOutcome::Populated(vec!["Alice".into(), "Carol".into()]));
        assert_eq!(roster_names(&sheet).unwrap(), vec!["Alice", "Carol"]);
    }

    #[test]
    fn test_all_present_makes_no_write() {
        let writer = writer();
        let mut sheet = MemorySheet::from_rows(vec![vec![""], vec!["Alice"], vec!["Bob"]]);

        let outcome = reconcile_roster(&mut sheet, &writer, ["Bob"]).unwrap();

        assert_eq!(outcome, RosterOutcome::AllPresent);
        assert_eq!(sheet.write_requests, 0);
    }

    #[test]
    fn test_gaps_and_duplicates_compacted() {
        let writer = writer();
        let mut sheet = MemorySheet::from_rows(vec![
            vec![""],
            vec!["Dave"],
            vec![""],
            vec!["Bob"],
            vec!["Bob"],
        ]);

        reconcile_roster(&mut sheet, &writer, ["Alice"]).unwrap();

        assert_eq!(sheet.col_values(1).unwrap(), vec!["", "Alice", "Bob", "Dave"]);
    }
}
