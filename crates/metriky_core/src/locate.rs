//! Finds the dated event section on a club page and pulls out what the
//! report needs from it: the date, the local start/end times, the mentioned
//! participants and the position right after the `Metriky` line.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};
use tracing::debug;

use crate::error::ReportError;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(20[0-9][0-9])-([0-1]?[0-9])-([0-3]?[0-9])").expect("valid date regex")
});
static SECTION_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(20[0-9][0-9])-([0-1]?[0-9])-([0-3]?[0-9])").expect("valid date regex")
});
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-2]?[0-9]):([0-5]?[0-9])").expect("valid time regex"));
static NEXT_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ *=").expect("valid heading regex"));
static USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{ *[Uu] *\| *([^}|]*[^}| ]) *[}|]").expect("valid user template regex")
});
static METRICS_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Mm]etriky[^\n]*").expect("valid marker regex"));

/// Wall-clock time as written in the section, e.g. `18:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalTime {
    pub hour: u32,
    pub minute: u32,
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub date: NaiveDate,
    /// `YYYYMMDD`, used in the edit summary.
    pub date_key: String,
    pub start: LocalTime,
    pub end: LocalTime,
    pub users: BTreeSet<String>,
    /// Byte offset where scanning for times, users and the marker begins.
    pub position: usize,
    pub section_end: usize,
    pub insertion_offset: usize,
}

/// Locate the section named by `section_ref`, or the last dated section when
/// no reference is given.
pub fn locate(text: &str, section_ref: Option<&str>) -> Result<Section, ReportError> {
    let (date, position) = match section_ref.map(str::trim).filter(|r| !r.is_empty()) {
        None => {
            let captures = DATE_RE
                .captures_iter(text)
                .last()
                .ok_or_else(|| ReportError::NotFound("dated section".to_string()))?;
            let date = date_from_captures(&captures)?;
            let end = captures.get(0).map_or(0, |m| m.end());
            (date, end)
        }
        Some(reference) => {
            let captures = SECTION_REF_RE
                .captures(reference)
                .ok_or_else(|| ReportError::Format(format!("section reference `{reference}`")))?;
            let date = date_from_captures(&captures)?;
            let position = text
                .find(reference)
                .ok_or_else(|| ReportError::NotFound(format!("section `{reference}`")))?;
            (date, position)
        }
    };
    debug!(%date, position, "resolved section position");

    let (start, end) = find_times(text, position)?;

    let section_end = NEXT_SECTION_RE
        .find_at(text, position)
        .map_or(text.len(), |m| m.start());
    let users = extract_users(&text[position..section_end]);

    let insertion_offset = METRICS_MARKER_RE
        .find_at(text, position)
        .map(|m| m.end())
        .ok_or_else(|| ReportError::NotFound("metrics marker line".to_string()))?;

    Ok(Section {
        date,
        date_key: date.format("%Y%m%d").to_string(),
        start,
        end,
        users,
        position,
        section_end,
        insertion_offset,
    })
}

/// Collect `{{U|name}}` mentions, normalised the way MediaWiki titles are:
/// first letter upper-cased, underscores as spaces.
pub fn extract_users(text: &str) -> BTreeSet<String> {
    USER_RE
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|name| normalize_username(name.as_str()))
        .collect()
}

pub fn normalize_username(name: &str) -> String {
    let mut chars = name.chars();
    let normalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    normalized.replace('_', " ")
}

fn find_times(text: &str, position: usize) -> Result<(LocalTime, LocalTime), ReportError> {
    let mut times = Vec::with_capacity(2);
    for captures in TIME_RE.captures_iter(&text[position..]).take(2) {
        let hour = capture_number(&captures, 1)?;
        let minute = capture_number(&captures, 2)?;
        if hour > 23 {
            return Err(ReportError::Format(format!(
                "time `{}`",
                captures.get(0).map_or("", |m| m.as_str())
            )));
        }
        times.push(LocalTime { hour, minute });
    }
    match times.as_slice() {
        [start, end] => Ok((*start, *end)),
        _ => Err(ReportError::MissingTimes { found: times.len() }),
    }
}

fn date_from_captures(captures: &Captures<'_>) -> Result<NaiveDate, ReportError> {
    let year = i32::try_from(capture_number(captures, 1)?)
        .map_err(|_| ReportError::Format("date year".to_string()))?;
    let month = capture_number(captures, 2)?;
    let day = capture_number(captures, 3)?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        ReportError::Format(format!(
            "date `{}`",
            captures.get(0).map_or("", |m| m.as_str())
        ))
    })
}

fn capture_number(captures: &Captures<'_>, index: usize) -> Result<u32, ReportError> {
    captures
        .get(index)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| ReportError::Format("number in date or time".to_string()))
}
