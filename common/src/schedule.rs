// Schedule validation and fire time calculation
//
// A schedule fires at local midnight ("12am") of every matching day in the
// scheduler timezone: every day, one weekday, or one day of the month.

use crate::errors::ScheduleError;
use crate::models::{Interval, Schedule};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const DAILY_ON: &str = "12am";

pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Highest accepted day of month. Every month has a day 28.
pub const MAX_MONTH_DAY: u32 = 28;

// Longest gap between two fires of any schedule, with slack for DST shifts
const SEARCH_WINDOW_DAYS: i64 = 62;

/// ScheduleTrigger computes fire instants for a schedule in a timezone
pub trait ScheduleTrigger {
    /// Latest fire instant at or before `now`
    fn latest_fire_at_or_before(
        &self,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Result<DateTime<Utc>, ScheduleError>;

    /// Earliest fire instant strictly after `after`
    fn next_fire_after(&self, after: DateTime<Utc>, tz: Tz)
        -> Result<DateTime<Utc>, ScheduleError>;

    /// Whether a fire happened after `reference` and no later than `now`
    fn is_due(
        &self,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Result<bool, ScheduleError> {
        let latest = self.latest_fire_at_or_before(now, tz)?;
        Ok(latest > reference)
    }
}

impl FromStr for Interval {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))
    }
}

/// Accepted `on` values for an interval
pub fn valid_on_values(interval: Interval) -> Vec<String> {
    match interval {
        Interval::Daily => vec![DAILY_ON.to_string()],
        Interval::Weekly => WEEKDAYS.iter().map(|d| d.to_string()).collect(),
        Interval::Monthly => (1..=MAX_MONTH_DAY).map(|d| d.to_string()).collect(),
    }
}

/// The full `(interval, on)` table served to clients
pub fn interval_table() -> BTreeMap<Interval, Vec<String>> {
    Interval::ALL
        .into_iter()
        .map(|interval| (interval, valid_on_values(interval)))
        .collect()
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

fn weekday_from_on(on: &str) -> Option<Weekday> {
    const ORDER: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];
    WEEKDAYS
        .iter()
        .position(|d| *d == on)
        .map(|idx| ORDER[idx])
}

fn month_day_from_on(on: &str) -> Option<u32> {
    // Reject forms like "+5" or "05" that u32 parsing would accept
    if on.is_empty() || on.starts_with('0') || !on.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    on.parse::<u32>()
        .ok()
        .filter(|d| (1..=MAX_MONTH_DAY).contains(d))
}

impl Schedule {
    /// Validate an `(interval, on)` pair against the table
    pub fn new(interval: Interval, on: impl Into<String>) -> Result<Self, ScheduleError> {
        let on = on.into();
        let valid = match interval {
            Interval::Daily => on == DAILY_ON,
            Interval::Weekly => weekday_from_on(&on).is_some(),
            Interval::Monthly => month_day_from_on(&on).is_some(),
        };

        if !valid {
            return Err(ScheduleError::InvalidOn {
                interval: interval.to_string(),
                on,
            });
        }

        Ok(Self { interval, on })
    }

    /// Parse both parts from their wire form
    pub fn parse(interval: &str, on: &str) -> Result<Self, ScheduleError> {
        Self::new(interval.parse::<Interval>()?, on)
    }

    fn fires_on(&self, date: NaiveDate) -> bool {
        match self.interval {
            Interval::Daily => true,
            Interval::Weekly => weekday_from_on(&self.on) == Some(date.weekday()),
            Interval::Monthly => month_day_from_on(&self.on) == Some(date.day()),
        }
    }
}

/// Local midnight of `date` as a UTC instant. When midnight does not exist
/// locally (DST gap) the fire moves to 01:00.
fn fire_instant(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    [0, 1]
        .into_iter()
        .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
        .find_map(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            ScheduleError::CalculationFailed(format!("no local midnight on {} in {}", date, tz))
        })
}

impl ScheduleTrigger for Schedule {
    fn latest_fire_at_or_before(
        &self,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let today = now.with_timezone(&tz).date_naive();

        for back in 0..=SEARCH_WINDOW_DAYS {
            let date = today - Duration::days(back);
            if !self.fires_on(date) {
                continue;
            }
            let fire = fire_instant(date, tz)?;
            if fire <= now {
                return Ok(fire);
            }
        }

        Err(ScheduleError::CalculationFailed(format!(
            "no fire time for {} {} before {}",
            self.interval, self.on, now
        )))
    }

    fn next_fire_after(
        &self,
        after: DateTime<Utc>,
        tz: Tz,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let today = after.with_timezone(&tz).date_naive();

        for ahead in 0..=SEARCH_WINDOW_DAYS {
            let date = today + Duration::days(ahead);
            if !self.fires_on(date) {
                continue;
            }
            let fire = fire_instant(date, tz)?;
            if fire > after {
                return Ok(fire);
            }
        }

        Err(ScheduleError::CalculationFailed(format!(
            "no fire time for {} {} after {}",
            self.interval, self.on, after
        )))
    }
}

/// Timezone used when none is configured
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_monthly_rejects_29_30_31() {
        for on in ["29", "30", "31", "0", "05", "+5", ""] {
            assert!(Schedule::new(Interval::Monthly, on).is_err(), "{} accepted", on);
        }
        assert!(Schedule::new(Interval::Monthly, "28").is_ok());
        assert!(Schedule::new(Interval::Monthly, "1").is_ok());
    }

    #[test]
    fn test_daily_only_accepts_12am() {
        assert!(Schedule::new(Interval::Daily, "12am").is_ok());
        assert!(Schedule::new(Interval::Daily, "12AM").is_err());
        assert!(Schedule::new(Interval::Daily, "Monday").is_err());
    }

    #[test]
    fn test_weekly_is_case_sensitive() {
        assert!(Schedule::new(Interval::Weekly, "Friday").is_ok());
        assert!(Schedule::new(Interval::Weekly, "friday").is_err());
        assert!(Schedule::new(Interval::Weekly, "Fri").is_err());
    }

    #[test]
    fn test_parse_unknown_interval() {
        assert_eq!(
            Schedule::parse("hourly", "1"),
            Err(ScheduleError::InvalidInterval("hourly".into()))
        );
    }

    #[test]
    fn test_interval_table_shape() {
        let table = interval_table();
        assert_eq!(table[&Interval::Daily], vec!["12am".to_string()]);
        assert_eq!(table[&Interval::Weekly].len(), 7);
        assert_eq!(table[&Interval::Monthly].len(), 28);

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["weekly"][0], "Monday");
        assert_eq!(json["monthly"][27], "28");
    }

    #[test]
    fn test_weekly_latest_fire() {
        // 2024-03-13 is a Wednesday
        let schedule = Schedule::new(Interval::Weekly, "Friday").unwrap();
        let latest = schedule
            .latest_fire_at_or_before(utc(2024, 3, 13, 15, 0), chrono_tz::UTC)
            .unwrap();
        assert_eq!(latest, utc(2024, 3, 8, 0, 0));

        let next = schedule
            .next_fire_after(utc(2024, 3, 13, 15, 0), chrono_tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2024, 3, 15, 0, 0));
    }

    #[test]
    fn test_fire_exactly_at_midnight_counts() {
        let schedule = Schedule::new(Interval::Daily, "12am").unwrap();
        let midnight = utc(2024, 3, 13, 0, 0);
        assert_eq!(
            schedule.latest_fire_at_or_before(midnight, chrono_tz::UTC).unwrap(),
            midnight
        );
        assert_eq!(
            schedule.next_fire_after(midnight, chrono_tz::UTC).unwrap(),
            utc(2024, 3, 14, 0, 0)
        );
    }

    #[test]
    fn test_monthly_uses_timezone() {
        let schedule = Schedule::new(Interval::Monthly, "15").unwrap();
        let tz: Tz = "Asia/Ho_Chi_Minh".parse().unwrap();
        // Midnight of the 15th in UTC+7 is 17:00 UTC on the 14th
        let latest = schedule
            .latest_fire_at_or_before(utc(2024, 5, 20, 0, 0), tz)
            .unwrap();
        assert_eq!(latest, utc(2024, 5, 14, 17, 0));
    }

    #[test]
    fn test_is_due_against_reference() {
        let schedule = Schedule::new(Interval::Weekly, "Friday").unwrap();
        let now = utc(2024, 3, 15, 0, 5);

        // Created on Wednesday, Friday midnight has passed
        assert!(schedule.is_due(utc(2024, 3, 13, 9, 0), now, chrono_tz::UTC).unwrap());
        // Already ran after the fire
        assert!(!schedule.is_due(utc(2024, 3, 15, 0, 1), now, chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_dst_gap_moves_fire() {
        // Chile skips 00:00 local on the first Sunday of September
        let tz: Tz = "America/Santiago".parse().unwrap();
        let schedule = Schedule::new(Interval::Daily, "12am").unwrap();
        let fire = schedule
            .latest_fire_at_or_before(utc(2024, 9, 8, 12, 0), tz)
            .unwrap();
        assert!(fire <= utc(2024, 9, 8, 12, 0));
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(ScheduleError::InvalidTimezone(_))
        ));
        assert_eq!(default_timezone().to_string(), "UTC");
    }
}
