use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};

use crate::ics::{DateValue, IcsError};

/// Hard stop on expansion so a pathological rule cannot spin forever.
const MAX_PERIODS: u32 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A BYDAY entry, e.g. `TU` or `-1FR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayNum {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

/// The subset of RRULE that calendar clients emit for meeting series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub freq: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    /// Inclusive bound.
    pub until: Option<DateTime<Utc>>,
    pub by_day: Vec<WeekdayNum>,
    pub by_month_day: Vec<i32>,
    pub by_month: Vec<u32>,
}

fn parse_weekday(raw: &str) -> Option<Weekday> {
    match raw {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

impl FromStr for WeekdayNum {
    type Err = IcsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim().to_ascii_uppercase();
        if !raw.is_ascii() || raw.len() < 2 {
            return Err(IcsError::InvalidRule(raw));
        }
        let split = raw.len().saturating_sub(2);
        let (ordinal, day) = raw.split_at(split);
        let weekday = parse_weekday(day).ok_or_else(|| IcsError::InvalidRule(raw.clone()))?;
        let ordinal = if ordinal.is_empty() {
            None
        } else {
            let n: i32 = ordinal
                .trim_start_matches('+')
                .parse()
                .map_err(|_| IcsError::InvalidRule(raw.clone()))?;
            if n == 0 || n.unsigned_abs() > 53 {
                return Err(IcsError::InvalidRule(raw.clone()));
            }
            Some(n)
        };
        Ok(WeekdayNum { ordinal, weekday })
    }
}

impl FromStr for RecurrenceRule {
    type Err = IcsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || IcsError::InvalidRule(raw.to_string());
        let mut freq = None;
        let mut rule = RecurrenceRule {
            freq: Frequency::Daily,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
        };

        for part in raw.trim().split(';').filter(|part| !part.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(invalid)?;
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        _ => return Err(invalid()),
                    })
                }
                "INTERVAL" => {
                    rule.interval = value.trim().parse().map_err(|_| invalid())?;
                    if rule.interval == 0 {
                        return Err(invalid());
                    }
                }
                "COUNT" => rule.count = Some(value.trim().parse().map_err(|_| invalid())?),
                "UNTIL" => {
                    let until = DateValue::parse(value, None, None)?;
                    rule.until = Some(match until {
                        // A DATE bound includes the whole day.
                        DateValue::Date(date) => date
                            .and_hms_opt(23, 59, 59)
                            .map(|end| end.and_utc())
                            .ok_or_else(invalid)?,
                        other => other.to_utc(),
                    });
                }
                "BYDAY" => {
                    rule.by_day = value
                        .split(',')
                        .map(str::parse::<WeekdayNum>)
                        .collect::<Result<_, _>>()?;
                }
                "BYMONTHDAY" => {
                    rule.by_month_day = value
                        .split(',')
                        .map(|day| day.trim().parse::<i32>().map_err(|_| invalid()))
                        .collect::<Result<_, _>>()?;
                }
                "BYMONTH" => {
                    rule.by_month = value
                        .split(',')
                        .map(|month| month.trim().parse::<u32>().map_err(|_| invalid()))
                        .collect::<Result<_, _>>()?;
                }
                "WKST" => {}
                _ => return Err(invalid()),
            }
        }

        rule.freq = freq.ok_or_else(invalid)?;
        let unsupported = match rule.freq {
            Frequency::Daily => {
                !rule.by_day.is_empty() || !rule.by_month_day.is_empty() || !rule.by_month.is_empty()
            }
            Frequency::Weekly => {
                rule.by_day.iter().any(|d| d.ordinal.is_some())
                    || !rule.by_month_day.is_empty()
                    || !rule.by_month.is_empty()
            }
            Frequency::Monthly => !rule.by_month.is_empty(),
            Frequency::Yearly => !rule.by_day.is_empty() || !rule.by_month_day.is_empty(),
        };
        if unsupported {
            return Err(invalid());
        }
        Ok(rule)
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    next.pred_opt().map(|last| last.day())
}

fn month_shift(start: NaiveDate, months: u32) -> Option<(i32, u32)> {
    let first = NaiveDate::from_ymd_opt(start.year(), start.month(), 1)?;
    let shifted = first.checked_add_months(Months::new(months))?;
    Some((shifted.year(), shifted.month()))
}

fn weekdays_in_month(year: i32, month: u32, weekday: Weekday) -> Vec<NaiveDate> {
    let Some(last) = last_day_of_month(year, month) else {
        return Vec::new();
    };
    (1..=last)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .filter(|date| date.weekday() == weekday)
        .collect()
}

impl RecurrenceRule {
    fn period_dates(&self, start: NaiveDate, period: u32) -> Vec<NaiveDate> {
        let step = period.saturating_mul(self.interval);
        let mut dates: Vec<NaiveDate> = match self.freq {
            Frequency::Daily => start
                .checked_add_days(Days::new(u64::from(step)))
                .into_iter()
                .collect(),
            Frequency::Weekly => {
                let offset = u64::from(start.weekday().num_days_from_monday());
                let week = start
                    .checked_sub_days(Days::new(offset))
                    .and_then(|monday| monday.checked_add_days(Days::new(u64::from(step) * 7)));
                match week {
                    None => Vec::new(),
                    Some(monday) if self.by_day.is_empty() => monday
                        .checked_add_days(Days::new(offset))
                        .into_iter()
                        .collect(),
                    Some(monday) => self
                        .by_day
                        .iter()
                        .filter_map(|d| {
                            monday.checked_add_days(Days::new(u64::from(
                                d.weekday.num_days_from_monday(),
                            )))
                        })
                        .collect(),
                }
            }
            Frequency::Monthly => match month_shift(start, step) {
                None => Vec::new(),
                Some((year, month)) => self.monthly_dates(start, year, month),
            },
            Frequency::Yearly => {
                let year = start.year() + i32::try_from(step).unwrap_or(i32::MAX / 2);
                let months = if self.by_month.is_empty() {
                    vec![start.month()]
                } else {
                    self.by_month.clone()
                };
                months
                    .into_iter()
                    .filter_map(|month| NaiveDate::from_ymd_opt(year, month, start.day()))
                    .collect()
            }
        };
        dates.sort();
        dates.dedup();
        dates
    }

    fn monthly_dates(&self, start: NaiveDate, year: i32, month: u32) -> Vec<NaiveDate> {
        if !self.by_day.is_empty() {
            let mut dates = Vec::new();
            for entry in &self.by_day {
                let candidates = weekdays_in_month(year, month, entry.weekday);
                match entry.ordinal {
                    None => dates.extend(candidates),
                    Some(n) if n > 0 => {
                        dates.extend(usize::try_from(n - 1).ok().and_then(|i| candidates.get(i)))
                    }
                    Some(n) => {
                        let from_end = n
                            .checked_neg()
                            .and_then(|m| usize::try_from(m).ok())
                            .unwrap_or(usize::MAX);
                        if from_end <= candidates.len() {
                            dates.push(candidates[candidates.len() - from_end]);
                        }
                    }
                }
            }
            return dates;
        }
        let Some(last) = last_day_of_month(year, month) else {
            return Vec::new();
        };
        let days: Vec<i32> = if self.by_month_day.is_empty() {
            vec![start.day() as i32]
        } else {
            self.by_month_day.clone()
        };
        days.into_iter()
            .filter_map(|day| {
                let resolved = if day < 0 { last as i32 + 1 + day } else { day };
                u32::try_from(resolved).ok()
            })
            .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
            .collect()
    }

    /// Occurrence starts of the series beginning at `start`, in order, up to
    /// and including `window_end`. COUNT is applied from the series start.
    pub fn occurrences(&self, start: DateValue, window_end: DateTime<Utc>) -> Vec<DateValue> {
        let series_start = start.local();
        let time = series_start.time();
        let mut out = Vec::new();
        let mut emitted = 0u32;

        for period in 0..MAX_PERIODS {
            let dates = self.period_dates(series_start.date(), period);
            for date in dates {
                let local = date.and_time(time);
                if local < series_start {
                    continue;
                }
                let occurrence = start.with_local(local);
                let instant = occurrence.to_utc();
                if self.until.is_some_and(|until| instant > until) || instant > window_end {
                    return out;
                }
                out.push(occurrence);
                emitted += 1;
                if self.count.is_some_and(|count| emitted >= count) {
                    return out;
                }
            }
        }
        out
    }
}
