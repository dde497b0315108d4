use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ReportError;
use crate::locate::LocalTime;

/// MediaWiki database timestamp layout (`rev_timestamp`, `log_timestamp`).
pub const MW_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub const ACTIVITY_LOOKBACK_DAYS: i64 = 30;
pub const REGISTRATION_LOOKBACK_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UtcWindow {
    /// Interpret the section's wall-clock times on `date` in `tz`.
    ///
    /// A window whose end precedes its start is rejected rather than swapped.
    pub fn from_local(
        date: NaiveDate,
        start: LocalTime,
        end: LocalTime,
        tz: Tz,
    ) -> Result<Self, ReportError> {
        let start_utc = to_utc(date, start, tz)?;
        let end_utc = to_utc(date, end, tz)?;
        if end_utc < start_utc {
            return Err(ReportError::InvertedWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self {
            start: start_utc,
            end: end_utc,
        })
    }

    pub fn start_stamp(&self) -> String {
        self.start.format(MW_TIMESTAMP_FORMAT).to_string()
    }

    pub fn end_stamp(&self) -> String {
        self.end.format(MW_TIMESTAMP_FORMAT).to_string()
    }

    /// `(start - 30 days, start)`, the span that decides who counts as active.
    pub fn activity_span(&self) -> (String, String) {
        (
            lookback(self.start, ACTIVITY_LOOKBACK_DAYS),
            self.start_stamp(),
        )
    }

    /// `(end - 14 days, end)`, the span in which an account counts as new.
    pub fn registration_span(&self) -> (String, String) {
        (
            lookback(self.end, REGISTRATION_LOOKBACK_DAYS),
            self.end_stamp(),
        )
    }
}

fn lookback(bound: DateTime<Utc>, days: i64) -> String {
    (bound - Duration::days(days))
        .format(MW_TIMESTAMP_FORMAT)
        .to_string()
}

fn to_utc(date: NaiveDate, time: LocalTime, tz: Tz) -> Result<DateTime<Utc>, ReportError> {
    let naive = date
        .and_hms_opt(time.hour, time.minute, 0)
        .ok_or_else(|| ReportError::Format(format!("time `{time}`")))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            ReportError::Format(format!("local time {naive} (does not exist in {tz})"))
        })
}
