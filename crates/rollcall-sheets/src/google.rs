//! Google Sheets v4 REST backend.
//!
//! Blocking `ureq` calls authorized with a bearer access token. Values are
//! written `RAW` so date headers stay text and are matched verbatim.

use crate::sheet::{CellRef, CellUpdate, Sheet, SheetError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets/";
const TIMEOUT: Duration = Duration::from_secs(30);

pub struct GoogleSheet {
    agent: ureq::Agent,
    base: Url,
    spreadsheet_id: String,
    worksheet: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: Vec<Vec<&'a str>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateBody<'a> {
    value_input_option: &'static str,
    data: Vec<UpdateBody<'a>>,
}

#[derive(Debug, Clone, Copy)]
enum Dimension {
    Rows,
    Columns,
}

impl Dimension {
    fn as_str(self) -> &'static str {
        match self {
            Dimension::Rows => "ROWS",
            Dimension::Columns => "COLUMNS",
        }
    }
}

impl GoogleSheet {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, SheetError> {
        let base = Url::parse(API_BASE).map_err(|e| SheetError::Malformed(format!("api base url: {e}")))?;
        let agent = ureq::AgentBuilder::new().timeout(TIMEOUT).build();
        Ok(Self {
            agent,
            base,
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
            access_token: access_token.into(),
        })
    }

    fn endpoint(&self, tail: &str) -> Result<Url, SheetError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SheetError::Malformed("api base url cannot hold a path".into()))?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .extend(tail.split('/'));
        Ok(url)
    }

    fn values_url(&self, range: &str) -> Result<Url, SheetError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SheetError::Malformed("api base url cannot hold a path".into()))?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .push("values")
            .push(range);
        Ok(url)
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn get_values(&self, range: &str, dimension: Dimension) -> Result<Vec<Vec<String>>, SheetError> {
        let mut url = self.values_url(range)?;
        url.query_pairs_mut().append_pair("majorDimension", dimension.as_str());

        tracing::debug!(range, "sheets values.get");
        let response = self
            .agent
            .get(url.as_str())
            .set("Authorization", &self.authorization())
            .call()
            .map_err(map_error)?;
        let body: ValueRange = response
            .into_json()
            .map_err(|e| SheetError::Malformed(format!("values.get {range}: {e}")))?;

        Ok(body
            .values
            .into_iter()
            .map(|line| line.into_iter().map(cell_text).collect())
            .collect())
    }

    fn first_line(&self, range: &str, dimension: Dimension) -> Result<Vec<String>, SheetError> {
        let mut lines = self.get_values(range, dimension)?;
        let mut line = if lines.is_empty() { Vec::new() } else { lines.swap_remove(0) };
        while line.last().is_some_and(|v| v.is_empty()) {
            line.pop();
        }
        Ok(line)
    }
}

impl Sheet for GoogleSheet {
    fn row_values(&self, row: u32) -> Result<Vec<String>, SheetError> {
        CellRef::new(row, 1).check()?;
        self.first_line(&row_range(&self.worksheet, row), Dimension::Rows)
    }

    fn col_values(&self, col: u32) -> Result<Vec<String>, SheetError> {
        CellRef::new(1, col).check()?;
        self.first_line(&col_range(&self.worksheet, col), Dimension::Columns)
    }

    fn read_cell(&self, cell: CellRef) -> Result<String, SheetError> {
        cell.check()?;
        Ok(self
            .first_line(&cell_range(&self.worksheet, cell), Dimension::Rows)?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    fn write_cell(&mut self, cell: CellRef, value: &str) -> Result<(), SheetError> {
        cell.check()?;
        let range = cell_range(&self.worksheet, cell);
        let mut url = self.values_url(&range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        tracing::debug!(range = %range, "sheets values.update");
        self.agent
            .put(url.as_str())
            .set("Authorization", &self.authorization())
            .send_json(UpdateBody {
                range: &range,
                major_dimension: Dimension::Rows.as_str(),
                values: vec![vec![value]],
            })
            .map_err(map_error)?;
        Ok(())
    }

    fn write_batch(&mut self, updates: &[CellUpdate]) -> Result<(), SheetError> {
        if updates.is_empty() {
            return Ok(());
        }
        let ranges = updates
            .iter()
            .map(|u| u.cell.check().map(|c| cell_range(&self.worksheet, c)))
            .collect::<Result<Vec<_>, _>>()?;
        let body = BatchUpdateBody {
            value_input_option: "RAW",
            data: ranges
                .iter()
                .zip(updates)
                .map(|(range, u)| UpdateBody {
                    range,
                    major_dimension: Dimension::Rows.as_str(),
                    values: vec![vec![u.value.as_str()]],
                })
                .collect(),
        };

        tracing::debug!(cells = updates.len(), "sheets values.batchUpdate");
        self.agent
            .post(self.endpoint("values:batchUpdate")?.as_str())
            .set("Authorization", &self.authorization())
            .send_json(body)
            .map_err(map_error)?;
        Ok(())
    }
}

fn map_error(err: ureq::Error) -> SheetError {
    match err {
        ureq::Error::Status(status, response) => {
            let status_text = response.status_text().to_string();
            let body = response.into_string().unwrap_or_default();
            let message = api_error_message(&body).unwrap_or(status_text);
            if status == 429 {
                SheetError::RateLimited(message)
            } else {
                SheetError::Api { status, message }
            }
        }
        ureq::Error::Transport(t) => SheetError::Transport(t.to_string()),
    }
}

/// `error.message` from a Google API error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 1 -> A, 26 -> Z, 27 -> AA.
pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn quoted(worksheet: &str) -> String {
    format!("'{}'", worksheet.replace('\'', "''"))
}

fn cell_range(worksheet: &str, cell: CellRef) -> String {
    format!("{}!{}{}", quoted(worksheet), column_letters(cell.col), cell.row)
}

fn row_range(worksheet: &str, row: u32) -> String {
    format!("{}!{row}:{row}", quoted(worksheet))
}

fn col_range(worksheet: &str, col: u32) -> String {
    let letters = column_letters(col);
    format!("{}!{letters}:{letters}", quoted(worksheet))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(52), "AZ");
        assert_eq!(column_letters(703), "AAA");
    }

    #[test]
    fn test_ranges_quote_worksheet() {
        assert_eq!(cell_range("Sheet1", CellRef::new(3, 2)), "'Sheet1'!B3");
        assert_eq!(row_range("Sheet1", 1), "'Sheet1'!1:1");
        assert_eq!(col_range("Bob's list", 1), "'Bob''s list'!A:A");
    }

    #[test]
    fn test_values_url_encodes_range() {
        let sheet = GoogleSheet::new("abc123", "Sheet 1", "token").unwrap();
        let url = sheet.values_url(&cell_range("Sheet 1", CellRef::new(2, 3))).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/'Sheet%201'!C2"
        );
        let batch = sheet.endpoint("values:batchUpdate").unwrap();
        assert_eq!(
            batch.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values:batchUpdate"
        );
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(api_error_message(body).as_deref(), Some("Quota exceeded"));
        assert_eq!(api_error_message("<html>"), None);
    }

    #[test]
    fn test_value_range_parsing() {
        let body: ValueRange =
            serde_json::from_str(r#"{"range":"'Sheet1'!A1:C1","majorDimension":"ROWS","values":[["", "x", 3]]}"#)
                .unwrap();
        let line: Vec<String> = body.values.into_iter().flatten().map(cell_text).collect();
        assert_eq!(line, vec!["", "x", "3"]);

        let empty: ValueRange = serde_json::from_str(r#"{"range":"'Sheet1'!A9"}"#).unwrap();
        assert!(empty.values.is_empty());
    }

    #[test]
    fn test_invalid_cell_rejected_before_request() {
        let sheet = GoogleSheet::new("abc123", "Sheet1", "token").unwrap();
        assert_eq!(
            sheet.read_cell(CellRef::new(0, 2)),
            Err(SheetError::InvalidCell { row: 0, col: 2 })
        );
    }

    fn status_error(status: u16, text: &str, body: &str) -> ureq::Error {
        ureq::Error::Status(status, ureq::Response::new(status, text, body).unwrap())
    }

    #[test]
    fn test_map_error_429_is_rate_limit() {
        let err = map_error(status_error(
            429,
            "Too Many Requests",
            r#"{"error":{"code":429,"message":"Quota exceeded"}}"#,
        ));
        assert!(err.is_rate_limit());
        assert!(matches!(err, SheetError::RateLimited(ref m) if m == "Quota exceeded"));
    }

    #[test]
    fn test_map_error_other_status_is_api_error() {
        let err = map_error(status_error(403, "Forbidden", r#"{"error":{"message":"The caller does not have permission"}}"#));
        assert!(!err.is_rate_limit());
        assert!(matches!(
            err,
            SheetError::Api { status: 403, ref message } if message == "The caller does not have permission"
        ));

        // A body that is not a Google error falls back to the status text.
        let err = map_error(status_error(500, "Internal Server Error", "<html>oops</html>"));
        assert!(matches!(err, SheetError::Api { status: 500, ref message } if message == "Internal Server Error"));
    }
}
