//! Recurring trigger times for jobs.
//!
//! Next-fire instants are plain values computed from the schedule and the
//! previous run; the scheduler stores them on each job and compares them
//! against the clock on every tick.

use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Smallest accepted interval for `every_minutes` schedules.
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// A wall-clock time of day, serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn time(self) -> NaiveTime {
        self.0
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{s}', expected HH:MM"))?;
        let hour: u32 = h.parse().map_err(|_| format!("invalid hour in '{s}'"))?;
        let minute: u32 = m.parse().map_err(|_| format!("invalid minute in '{s}'"))?;
        Self::new(hour, minute).ok_or_else(|| format!("time '{s}' out of range"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.0.format("%H:%M").to_string()
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// When a job fires: once a day at a local time, or at a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Daily(TimeOfDay),
    EveryMinutes(u32),
}

impl Schedule {
    /// First trigger strictly after `after`, with daily times read in `tz`.
    pub fn next_fire_after<Tz: TimeZone>(&self, after: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
        match *self {
            Self::EveryMinutes(minutes) => {
                after + Duration::minutes(i64::from(minutes.max(MIN_INTERVAL_MINUTES)))
            }
            Self::Daily(at) => {
                let local_date = after.with_timezone(tz).date_naive();
                let mut day = local_date;
                // Two iterations always suffice except across a DST gap at `at`.
                for _ in 0..3 {
                    if let Some(candidate) = local_instant(tz, day, at.time()) {
                        if candidate > after {
                            return candidate;
                        }
                    }
                    day = day.checked_add_days(Days::new(1)).unwrap_or(day);
                }
                after + Duration::days(1)
            }
        }
    }

    /// Initial next-fire for a job, given its last completed run if any.
    ///
    /// Interval jobs that are overdue become due immediately; daily jobs
    /// never fire retroactively for a missed day.
    pub fn initial_fire<Tz: TimeZone>(
        &self,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
        tz: &Tz,
    ) -> DateTime<Utc> {
        match (self, last_run) {
            (Self::EveryMinutes(_), Some(last)) => self.next_fire_after(last, tz).max(now),
            (Self::EveryMinutes(_), None) => now,
            (Self::Daily(_), _) => self.next_fire_after(now, tz),
        }
    }
}

fn local_instant<Tz: TimeZone>(
    tz: &Tz,
    day: chrono::NaiveDate,
    time: NaiveTime,
) -> Option<DateTime<Utc>> {
    let naive = day.and_time(time);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        // Skipped by a DST jump: fire an hour later instead of never.
        chrono::LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_time_of_day() {
        let t: TimeOfDay = "04:15".parse().unwrap();
        assert_eq!(t.to_string(), "04:15");
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("4".parse::<TimeOfDay>().is_err());
        assert!("aa:bb".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn schedule_json_shapes() {
        let daily: Schedule = serde_json::from_str(r#"{"daily":"05:30"}"#).unwrap();
        assert_eq!(daily, Schedule::Daily(TimeOfDay::new(5, 30).unwrap()));
        let every: Schedule = serde_json::from_str(r#"{"every_minutes":90}"#).unwrap();
        assert_eq!(every, Schedule::EveryMinutes(90));
        assert_eq!(serde_json::to_string(&daily).unwrap(), r#"{"daily":"05:30"}"#);
    }

    #[test]
    fn daily_fires_later_same_day() {
        let s = Schedule::Daily(TimeOfDay::new(4, 0).unwrap());
        let next = s.next_fire_after(utc("2024-03-10T01:00:00Z"), &Utc);
        assert_eq!(next, utc("2024-03-10T04:00:00Z"));
    }

    #[test]
    fn daily_rolls_to_next_day_once_passed() {
        let s = Schedule::Daily(TimeOfDay::new(4, 0).unwrap());
        assert_eq!(
            s.next_fire_after(utc("2024-03-10T04:00:00Z"), &Utc),
            utc("2024-03-11T04:00:00Z")
        );
        assert_eq!(
            s.next_fire_after(utc("2024-03-10T23:59:00Z"), &Utc),
            utc("2024-03-11T04:00:00Z")
        );
    }

    #[test]
    fn daily_respects_timezone() {
        let cet = FixedOffset::east_opt(3600).unwrap();
        let s = Schedule::Daily(TimeOfDay::new(4, 0).unwrap());
        // 04:00 at UTC+1 is 03:00Z.
        assert_eq!(
            s.next_fire_after(utc("2024-03-10T01:00:00Z"), &cet),
            utc("2024-03-10T03:00:00Z")
        );
    }

    #[test]
    fn interval_adds_minutes_with_floor() {
        let now = utc("2024-03-10T10:00:00Z");
        assert_eq!(
            Schedule::EveryMinutes(60).next_fire_after(now, &Utc),
            utc("2024-03-10T11:00:00Z")
        );
        assert_eq!(
            Schedule::EveryMinutes(1).next_fire_after(now, &Utc),
            utc("2024-03-10T10:05:00Z")
        );
    }

    #[test]
    fn initial_fire_for_overdue_interval_is_now() {
        let now = utc("2024-03-10T10:00:00Z");
        let s = Schedule::EveryMinutes(30);
        assert_eq!(s.initial_fire(now, Some(utc("2024-03-10T08:00:00Z")), &Utc), now);
        assert_eq!(
            s.initial_fire(now, Some(utc("2024-03-10T09:50:00Z")), &Utc),
            utc("2024-03-10T10:20:00Z")
        );
        assert_eq!(s.initial_fire(now, None, &Utc), now);
    }

    #[test]
    fn initial_fire_for_daily_never_backfills() {
        let now = utc("2024-03-10T10:00:00Z");
        let s = Schedule::Daily(TimeOfDay::new(4, 0).unwrap());
        assert_eq!(
            s.initial_fire(now, Some(utc("2024-03-08T04:00:00Z")), &Utc),
            utc("2024-03-11T04:00:00Z")
        );
    }
}
