use std::fmt;

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};

use crate::models::{Period, TimeUnit};

/// Field positions: seconds, minutes, hours, day-of-month, month, day-of-week.
pub const FIELD_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerField {
    /// Matches every value of the field.
    Every,
    /// Matches every n-th value of the field, counted from the start of its range.
    Step(u32),
}

impl fmt::Display for TriggerField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerField::Every => f.write_str("*"),
            TriggerField::Step(n) => write!(f, "*/{}", n),
        }
    }
}

/// A six-field recurrence with exactly one stepped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerExpression {
    fields: [TriggerField; FIELD_COUNT],
}

impl TriggerExpression {
    pub fn fields(&self) -> &[TriggerField; FIELD_COUNT] {
        &self.fields
    }

    fn stepped(&self) -> Option<(TimeUnit, u32)> {
        const UNITS: [TimeUnit; 5] = [
            TimeUnit::Seconds,
            TimeUnit::Minutes,
            TimeUnit::Hours,
            TimeUnit::Days,
            TimeUnit::Months,
        ];
        UNITS
            .iter()
            .zip(self.fields.iter())
            .find_map(|(unit, field)| match field {
                TriggerField::Step(n) => Some((*unit, *n)),
                TriggerField::Every => None,
            })
    }

    /// The first instant strictly after `after` at which the trigger fires.
    ///
    /// The stepped field must be a multiple of its step (seconds, minutes and
    /// hours count from 0, days and months from 1) and every finer field must
    /// sit at the start of its range.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (unit, step) = self.stepped()?;
        let step = step.max(1);

        let mut candidate = advance(truncate(after, unit)?, unit)?;
        for _ in 0..=range_len(unit) {
            if field_offset(candidate, unit) % step == 0 {
                return Some(candidate);
            }
            candidate = advance(candidate, unit)?;
        }
        None
    }
}

impl fmt::Display for TriggerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

/// Translate a cadence into the trigger that fires on it.
pub fn generate_trigger(cadence: &Period) -> TriggerExpression {
    let position = match cadence.unit {
        TimeUnit::Seconds => 0,
        TimeUnit::Minutes => 1,
        TimeUnit::Hours => 2,
        TimeUnit::Days => 3,
        TimeUnit::Months => 4,
    };
    let mut fields = [TriggerField::Every; FIELD_COUNT];
    fields[position] = TriggerField::Step(cadence.value);
    TriggerExpression { fields }
}

fn range_len(unit: TimeUnit) -> u32 {
    match unit {
        TimeUnit::Seconds | TimeUnit::Minutes => 60,
        TimeUnit::Hours => 24,
        TimeUnit::Days => 31,
        TimeUnit::Months => 12,
    }
}

fn field_offset(t: DateTime<Utc>, unit: TimeUnit) -> u32 {
    match unit {
        TimeUnit::Seconds => t.second(),
        TimeUnit::Minutes => t.minute(),
        TimeUnit::Hours => t.hour(),
        TimeUnit::Days => t.day0(),
        TimeUnit::Months => t.month0(),
    }
}

/// Zero every field finer than `unit`.
fn truncate(t: DateTime<Utc>, unit: TimeUnit) -> Option<DateTime<Utc>> {
    let (month, day, hour, minute, second) = match unit {
        TimeUnit::Seconds => (t.month(), t.day(), t.hour(), t.minute(), t.second()),
        TimeUnit::Minutes => (t.month(), t.day(), t.hour(), t.minute(), 0),
        TimeUnit::Hours => (t.month(), t.day(), t.hour(), 0, 0),
        TimeUnit::Days => (t.month(), t.day(), 0, 0, 0),
        TimeUnit::Months => (t.month(), 1, 0, 0, 0),
    };
    Utc.with_ymd_and_hms(t.year(), month, day, hour, minute, second)
        .single()
}

fn advance(t: DateTime<Utc>, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Seconds => t.checked_add_signed(Duration::seconds(1)),
        TimeUnit::Minutes => t.checked_add_signed(Duration::minutes(1)),
        TimeUnit::Hours => t.checked_add_signed(Duration::hours(1)),
        TimeUnit::Days => t.checked_add_signed(Duration::days(1)),
        TimeUnit::Months => t.checked_add_months(Months::new(1)),
    }
}
