use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::model::TimeRange;

/// Business-hours policy for slot computation: which weekdays are worked,
/// the daily working window, and the display-grid granularity.
///
/// This is an immutable value injected into each engine at construction.
/// Deployments may override it through the environment; nothing mutates it
/// at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCalendar {
    /// Indexed by days-from-Monday (0 = Monday .. 6 = Sunday).
    working_days: [bool; 7],
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub slot_minutes: u32,
}

impl WorkingCalendar {
    /// Monday–Friday, 09:00–17:00, 60-minute grid.
    pub fn standard() -> Self {
        Self {
            working_days: [true, true, true, true, true, false, false],
            day_start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            day_end: NaiveTime::from_hms_opt(17, 0, 0).expect("valid time"),
            slot_minutes: 60,
        }
    }

    pub fn new(
        working_days: [bool; 7],
        day_start: NaiveTime,
        day_end: NaiveTime,
        slot_minutes: u32,
    ) -> Self {
        debug_assert!(day_start < day_end, "working window must be non-empty");
        debug_assert!(slot_minutes > 0, "slot granularity must be positive");
        Self {
            working_days,
            day_start,
            day_end,
            slot_minutes,
        }
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.working_days[date.weekday().num_days_from_monday() as usize]
    }

    /// Absolute working window for `date`, `None` on non-working days.
    pub fn day_window(&self, date: NaiveDate) -> Option<TimeRange> {
        if !self.is_working_day(date) {
            return None;
        }
        Some(TimeRange::new(
            date.and_time(self.day_start),
            date.and_time(self.day_end),
        ))
    }

    /// Deployment override from `FORECOURT_WORK_DAYS` (comma-separated
    /// `mon,tue,...`), `FORECOURT_WORK_START` / `FORECOURT_WORK_END`
    /// (`HH:MM`), and `FORECOURT_SLOT_MINUTES`. Unset or unparsable
    /// variables keep the standard value.
    pub fn from_env() -> Self {
        let standard = Self::standard();

        let working_days = std::env::var("FORECOURT_WORK_DAYS")
            .ok()
            .and_then(|s| parse_days(&s))
            .unwrap_or(standard.working_days);
        let day_start = std::env::var("FORECOURT_WORK_START")
            .ok()
            .and_then(|s| parse_hhmm(&s))
            .unwrap_or(standard.day_start);
        let day_end = std::env::var("FORECOURT_WORK_END")
            .ok()
            .and_then(|s| parse_hhmm(&s))
            .unwrap_or(standard.day_end);
        let slot_minutes = std::env::var("FORECOURT_SLOT_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&m| m > 0)
            .unwrap_or(standard.slot_minutes);

        if day_start >= day_end {
            tracing::warn!("ignoring inverted working window from environment");
            return Self {
                working_days,
                slot_minutes,
                ..standard
            };
        }

        Self::new(working_days, day_start, day_end, slot_minutes)
    }
}

impl Default for WorkingCalendar {
    fn default() -> Self {
        Self::standard()
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

fn parse_days(s: &str) -> Option<[bool; 7]> {
    let mut days = [false; 7];
    for part in s.split(',') {
        let idx = match part.trim().to_lowercase().as_str() {
            "mon" => 0,
            "tue" => 1,
            "wed" => 2,
            "thu" => 3,
            "fri" => 4,
            "sat" => 5,
            "sun" => 6,
            _ => return None,
        };
        days[idx] = true;
    }
    days.contains(&true).then_some(days)
}
