//! rollcall-sheets: the attendance sheet side of rollcall.
//!
//! A [`Sheet`] is a grid with dates across row 1 and names down column 1.
//! [`AttendanceSynchronizer`] marks confirmed names for a date exactly once.
//! All writes go through a [`RateLimitedWriter`].

pub mod dates;
pub mod google;
pub mod retry;
pub mod roster;
pub mod sheet;
pub mod sync;

pub use dates::{parse_date_range, populate_dates_if_empty, weekend_headers, DateRange, DateRangeError, PopulateOutcome};
pub use google::GoogleSheet;
pub use retry::{RateLimitedWriter, RetryError, RetryPolicy, Sleeper, ThreadSleeper};
pub use roster::{reconcile_roster, roster_names, RosterOutcome};
pub use sheet::{CellRef, CellUpdate, MemorySheet, Sheet, SheetError};
pub use sync::{AttendanceSynchronizer, MarkOutcome, SyncError, SyncReport};
