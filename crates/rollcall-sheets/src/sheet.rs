//! The attendance sheet as a 1-based row/column grid of text cells.

use std::collections::BTreeMap;
use thiserror::Error;

/// Row holding the date headers.
pub const HEADER_ROW: u32 = 1;
/// Column holding the roster of names.
pub const NAME_COLUMN: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SheetError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("sheet API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid cell reference (row {row}, col {col}); rows and columns start at 1")]
    InvalidCell { row: u32, col: u32 },
}

impl SheetError {
    /// True for the "too many requests" signal that callers should back off on.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SheetError::RateLimited(_))
    }
}

/// 1-based cell address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub(crate) fn check(self) -> Result<Self, SheetError> {
        if self.row == 0 || self.col == 0 {
            Err(SheetError::InvalidCell { row: self.row, col: self.col })
        } else {
            Ok(self)
        }
    }
}

/// One cell write in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub cell: CellRef,
    pub value: String,
}

impl CellUpdate {
    pub fn new(row: u32, col: u32, value: impl Into<String>) -> Self {
        Self { cell: CellRef::new(row, col), value: value.into() }
    }
}

/// A remote or local grid of text cells.
///
/// `row_values`/`col_values` return the cells from column/row 1 up to the
/// last non-empty cell; gaps come back as empty strings.
pub trait Sheet {
    fn row_values(&self, row: u32) -> Result<Vec<String>, SheetError>;

    fn col_values(&self, col: u32) -> Result<Vec<String>, SheetError>;

    fn read_cell(&self, cell: CellRef) -> Result<String, SheetError>;

    fn write_cell(&mut self, cell: CellRef, value: &str) -> Result<(), SheetError>;

    /// Apply every update in one request.
    fn write_batch(&mut self, updates: &[CellUpdate]) -> Result<(), SheetError>;

    /// First cell in `row` whose trimmed text equals `text`.
    fn find_in_row(&self, row: u32, text: &str) -> Result<Option<CellRef>, SheetError> {
        Ok(self
            .row_values(row)?
            .iter()
            .position(|v| v.trim() == text)
            .map(|i| CellRef::new(row, i as u32 + 1)))
    }

    /// First cell in `col` whose trimmed text equals `text`.
    fn find_in_column(&self, col: u32, text: &str) -> Result<Option<CellRef>, SheetError> {
        Ok(self
            .col_values(col)?
            .iter()
            .position(|v| v.trim() == text)
            .map(|i| CellRef::new(i as u32 + 1, col)))
    }
}

/// In-process sheet. Used for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    cells: BTreeMap<CellRef, String>,
    /// Number of write requests (single or batch) received.
    pub write_requests: usize,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sheet from rows of text, starting at A1.
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let mut sheet = Self::new();
        for (r, row) in rows.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                sheet.set(CellRef::new(r as u32 + 1, c as u32 + 1), value.into());
            }
        }
        sheet
    }

    pub fn get(&self, row: u32, col: u32) -> &str {
        self.cells.get(&CellRef::new(row, col)).map_or("", String::as_str)
    }

    fn set(&mut self, cell: CellRef, value: String) {
        if value.is_empty() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, value);
        }
    }

    fn collect_line(&self, mut pick: impl FnMut(&CellRef) -> Option<u32>) -> Vec<String> {
        let line: Vec<(u32, &String)> = self
            .cells
            .iter()
            .filter_map(|(cell, v)| pick(cell).map(|i| (i, v)))
            .collect();
        let len = line.iter().map(|(i, _)| *i).max().unwrap_or(0) as usize;
        let mut out = vec![String::new(); len];
        for (i, v) in line {
            out[i as usize - 1] = v.clone();
        }
        out
    }
}

impl Sheet for MemorySheet {
    fn row_values(&self, row: u32) -> Result<Vec<String>, SheetError> {
        Ok(self.collect_line(|c| (c.row == row).then_some(c.col)))
    }

    fn col_values(&self, col: u32) -> Result<Vec<String>, SheetError> {
        Ok(self.collect_line(|c| (c.col == col).then_some(c.row)))
    }

    fn read_cell(&self, cell: CellRef) -> Result<String, SheetError> {
        let cell = cell.check()?;
        Ok(self.get(cell.row, cell.col).to_string())
    }

    fn write_cell(&mut self, cell: CellRef, value: &str) -> Result<(), SheetError> {
        let cell = cell.check()?;
        self.write_requests += 1;
        self.set(cell, value.to_string());
        Ok(())
    }

    fn write_batch(&mut self, updates: &[CellUpdate]) -> Result<(), SheetError> {
        for u in updates {
            u.cell.check()?;
        }
        self.write_requests += 1;
        for u in updates {
            self.set(u.cell, u.value.clone());
        }
        Ok(())
    }
}
