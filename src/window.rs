use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const REPORT_DATE_FORMAT: &str = "%Y%m%d";

/// Lookback window over which metrics are aggregated for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DateRange {
    Last7Days,
    Last14Days,
    Last30Days,
    Last90Days,
    LastYear,
    AllTime,
    Custom { start: NaiveDate, end: NaiveDate },
}

impl DateRange {
    pub fn all_time_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Resolves the window into explicit bounds. Windows the reporting
    /// service understands natively return `None`.
    pub fn resolve(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Self::Last7Days | Self::Last14Days | Self::Last30Days => None,
            Self::Last90Days => Some((today - Duration::days(90), today)),
            Self::LastYear => Some((one_year_before(today), today)),
            Self::AllTime => Some((Self::all_time_start(), today)),
            Self::Custom { start, end } => Some((*start, *end)),
        }
    }

    /// Encodes the window for a report query: named windows verbatim,
    /// everything else as `YYYYMMDD,YYYYMMDD`.
    pub fn during(&self, today: NaiveDate) -> String {
        match self.resolve(today) {
            Some((start, end)) => format!(
                "{},{}",
                start.format(REPORT_DATE_FORMAT),
                end.format(REPORT_DATE_FORMAT)
            ),
            None => self.to_string(),
        }
    }
}

fn one_year_before(today: NaiveDate) -> NaiveDate {
    let year = today.year() - 1;
    today
        .with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, today.month(), 28))
        .unwrap_or(today)
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Last7Days => write!(f, "LAST_7_DAYS"),
            Self::Last14Days => write!(f, "LAST_14_DAYS"),
            Self::Last30Days => write!(f, "LAST_30_DAYS"),
            Self::Last90Days => write!(f, "LAST_90_DAYS"),
            Self::LastYear => write!(f, "LAST_YEAR"),
            Self::AllTime => write!(f, "ALL_TIME"),
            Self::Custom { start, end } => write!(
                f,
                "{},{}",
                start.format(REPORT_DATE_FORMAT),
                end.format(REPORT_DATE_FORMAT)
            ),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DateRangeParseError {
    #[error("unknown date range: {0}")]
    Unknown(String),
    #[error("invalid date {0:?}, expected YYYYMMDD or YYYY-MM-DD")]
    InvalidDate(String),
    #[error("date range starts after it ends: {start} > {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

impl FromStr for DateRange {
    type Err = DateRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "LAST_7_DAYS" => return Ok(Self::Last7Days),
            "LAST_14_DAYS" => return Ok(Self::Last14Days),
            "LAST_30_DAYS" => return Ok(Self::Last30Days),
            "LAST_90_DAYS" => return Ok(Self::Last90Days),
            "LAST_YEAR" => return Ok(Self::LastYear),
            "ALL_TIME" => return Ok(Self::AllTime),
            _ => {}
        }

        let (start_raw, end_raw) = trimmed
            .split_once(',')
            .or_else(|| trimmed.split_once(".."))
            .ok_or_else(|| DateRangeParseError::Unknown(trimmed.to_string()))?;
        let start = parse_date(start_raw)?;
        let end = parse_date(end_raw)?;
        if start > end {
            return Err(DateRangeParseError::Inverted { start, end });
        }
        Ok(Self::Custom { start, end })
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, DateRangeParseError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, REPORT_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| DateRangeParseError::InvalidDate(raw.to_string()))
}

impl TryFrom<String> for DateRange {
    type Error = DateRangeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DateRange> for String {
    fn from(value: DateRange) -> Self {
        value.to_string()
    }
}

/// Ordered lookback windows evaluated in one run. Later windows catch
/// campaigns that lacked data in earlier ones.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowScheduler {
    windows: Vec<DateRange>,
}

impl WindowScheduler {
    pub fn new(windows: Vec<DateRange>) -> Self {
        Self { windows }
    }

    pub fn windows(&self) -> &[DateRange] {
        &self.windows
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }
}

impl Default for WindowScheduler {
    fn default() -> Self {
        Self::new(vec![DateRange::LastYear, DateRange::AllTime])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn named_windows_pass_through_verbatim() {
        let today = day(2024, 5, 17);
        assert_eq!(DateRange::Last7Days.during(today), "LAST_7_DAYS");
        assert_eq!(DateRange::Last30Days.during(today), "LAST_30_DAYS");
    }

    #[test]
    fn resolved_windows_encode_as_compact_pairs() {
        let today = day(2024, 5, 7);
        assert_eq!(DateRange::AllTime.during(today), "20000101,20240507");
        assert_eq!(DateRange::LastYear.during(today), "20230507,20240507");
        assert_eq!(DateRange::Last90Days.during(today), "20240207,20240507");
        let custom = DateRange::Custom {
            start: day(2023, 1, 2),
            end: day(2023, 3, 4),
        };
        assert_eq!(custom.during(today), "20230102,20230304");
    }

    #[test]
    fn last_year_from_leap_day_falls_back_to_feb_28() {
        let (start, end) = DateRange::LastYear
            .resolve(day(2024, 2, 29))
            .expect("resolved");
        assert_eq!(start, day(2023, 2, 28));
        assert_eq!(end, day(2024, 2, 29));
    }

    #[test]
    fn parses_names_and_explicit_ranges() {
        assert_eq!("all_time".parse::<DateRange>(), Ok(DateRange::AllTime));
        assert_eq!(" LAST_YEAR ".parse::<DateRange>(), Ok(DateRange::LastYear));
        assert_eq!(
            "20230101,20230201".parse::<DateRange>(),
            Ok(DateRange::Custom {
                start: day(2023, 1, 1),
                end: day(2023, 2, 1),
            })
        );
        assert_eq!(
            "2023-01-01..2023-02-01".parse::<DateRange>(),
            Ok(DateRange::Custom {
                start: day(2023, 1, 1),
                end: day(2023, 2, 1),
            })
        );
        assert!(matches!(
            "20230301,20230201".parse::<DateRange>(),
            Err(DateRangeParseError::Inverted { .. })
        ));
        assert!(matches!(
            "yesterday".parse::<DateRange>(),
            Err(DateRangeParseError::Unknown(_))
        ));
    }

    #[test]
    fn default_schedule_is_last_year_then_all_time() {
        let scheduler = WindowScheduler::default();
        assert_eq!(
            scheduler.windows(),
            &[DateRange::LastYear, DateRange::AllTime]
        );
    }
}
