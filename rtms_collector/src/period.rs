use std::fmt::Display;
use std::str::FromStr;

use chrono::{Datelike, Local, NaiveDate};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::PeriodError;

/// A reporting month as the API expects it in `DEAL_YMD`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct YearMonth {
    year: u16,
    month: u8,
}

impl YearMonth {
    pub fn new(year: u16, month: u8) -> Result<Self, PeriodError> {
        if year == 0 || year > 9999 || !(1..=12).contains(&month) {
            return Err(PeriodError::Invalid(format!("{year:04}{month:02}")));
        }
        Ok(YearMonth { year, month })
    }

    pub fn current() -> Self {
        Self::from_date(Local::now().date_naive())
    }

    pub fn from_date(date: NaiveDate) -> Self {
        YearMonth {
            year: date.year() as u16,
            month: date.month() as u8,
        }
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    /// The month before, or `None` below 0001-01.
    pub fn pred(self) -> Option<Self> {
        match self.month {
            1 => YearMonth::new(self.year.checked_sub(1)?, 12).ok(),
            m => Some(YearMonth {
                year: self.year,
                month: m - 1,
            }),
        }
    }

    /// The month after, or `None` past 9999-12.
    pub fn succ(self) -> Option<Self> {
        match self.month {
            12 => YearMonth::new(self.year + 1, 1).ok(),
            m => Some(YearMonth {
                year: self.year,
                month: m + 1,
            }),
        }
    }
}

impl Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = PeriodError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PeriodError::Invalid(s.to_string()));
        }
        let year = s[..4].parse().map_err(|_| PeriodError::Invalid(s.to_string()))?;
        let month = s[4..].parse().map_err(|_| PeriodError::Invalid(s.to_string()))?;
        YearMonth::new(year, month).map_err(|_| PeriodError::Invalid(s.to_string()))
    }
}

/// `count` months ending at `end` inclusive, oldest first. Shorter when the
/// window would reach before 0001-01.
pub fn trailing_months(end: YearMonth, count: usize) -> Vec<YearMonth> {
    let mut months: Vec<YearMonth> = std::iter::successors(Some(end), |m| m.pred())
        .take(count)
        .collect();
    months.reverse();
    months
}

/// The twelve months ending at the current local month.
pub fn default_window() -> Vec<YearMonth> {
    trailing_months(YearMonth::current(), 12)
}

/// Every month from `from` through `to` inclusive.
pub fn month_range(from: YearMonth, to: YearMonth) -> Result<Vec<YearMonth>, PeriodError> {
    if from > to {
        return Err(PeriodError::Inverted {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    Ok(std::iter::successors(Some(from), |m| m.succ())
        .take_while(|m| *m <= to)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_displays() {
        let m = ym("202401");
        assert_eq!((m.year(), m.month()), (2024, 1));
        assert_eq!(m.to_string(), "202401");
        assert_eq!(ym(" 199912 ").to_string(), "199912");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["2024", "2024-01", "202413", "202400", "20240a", "2024011", ""] {
            assert!(bad.parse::<YearMonth>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn trailing_window_crosses_year_boundary() {
        let months = trailing_months(ym("202403"), 5);
        let shown: Vec<String> = months.iter().map(ToString::to_string).collect();
        assert_eq!(shown, ["202311", "202312", "202401", "202402", "202403"]);
        assert!(trailing_months(ym("202403"), 0).is_empty());
    }

    #[test]
    fn window_stops_at_the_first_valid_month() {
        let months = trailing_months(ym("000102"), 4);
        let shown: Vec<String> = months.iter().map(ToString::to_string).collect();
        assert_eq!(shown, ["000101", "000102"]);
        for m in &months {
            assert_eq!(&m.to_string().parse::<YearMonth>().unwrap(), m);
        }
        assert_eq!(ym("000101").pred(), None);
        assert_eq!(ym("999912").succ(), None);
        assert_eq!(month_range(ym("999911"), ym("999912")).unwrap().len(), 2);
    }

    #[test]
    fn default_window_ends_at_current_month() {
        let window = default_window();
        assert_eq!(window.len(), 12);
        assert_eq!(*window.last().unwrap(), YearMonth::current());
    }

    #[test]
    fn month_range_is_inclusive() {
        let months = month_range(ym("202311"), ym("202402")).unwrap();
        assert_eq!(months.len(), 4);
        assert_eq!(months[0], ym("202311"));
        assert_eq!(months[3], ym("202402"));
        assert_eq!(month_range(ym("202402"), ym("202402")).unwrap().len(), 1);
        assert!(matches!(
            month_range(ym("202402"), ym("202311")),
            Err(PeriodError::Inverted { .. })
        ));
    }

    #[test]
    fn serde_uses_compact_form() {
        let json = serde_json::to_string(&ym("202405")).unwrap();
        assert_eq!(json, "\"202405\"");
        let back: YearMonth = serde_json::from_str("\"202405\"").unwrap();
        assert_eq!(back, ym("202405"));
    }
}
