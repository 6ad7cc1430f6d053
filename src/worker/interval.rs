//! Cadence expressions ("daily at 9am", "every Monday", "every 3 days").
//!
//! Parsing happens once at validation time; [`Interval::next_after`] is then
//! infallible except for cron expressions that have run out of fire times.
//! All times are UTC.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use regex::Regex;

/// Longest period accepted by "every N days".
pub const MAX_PERIOD_DAYS: u32 = 366;

/// Longest period accepted by "every N hours".
pub const MAX_PERIOD_HOURS: u32 = 24 * 366;

/// Time of day used when an expression does not name one (09:00).
pub fn default_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

static EVERY_N_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^every (\d+) days?$").expect("valid regex"));
static EVERY_N_HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^every (\d+) hours?$").expect("valid regex"));
static WEEKLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:every|each|on|weekly on|every week on) ([a-z]+)$").expect("valid regex")
});
static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?$").expect("valid regex")
});

/// A parsed cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interval {
    /// Once a day at a fixed time.
    Daily { at: NaiveTime },
    /// Once a week on a fixed day and time.
    Weekly { weekday: Weekday, at: NaiveTime },
    /// A fixed period of whole days, optionally pinned to a time of day.
    EveryDays { days: u32, at: Option<NaiveTime> },
    /// A fixed period of whole hours.
    EveryHours { hours: u32 },
    /// A cron expression (seconds field included).
    Cron(String),
}

impl Interval {
    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Interval::Daily { at } => {
                let candidate = after.date_naive().and_time(*at).and_utc();
                if candidate > after {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::days(1))
                }
            }
            Interval::Weekly { weekday, at } => {
                let today = after.weekday().num_days_from_monday();
                let target = weekday.num_days_from_monday();
                let days_ahead = (target + 7 - today) % 7;
                let candidate = (after.date_naive() + Duration::days(i64::from(days_ahead)))
                    .and_time(*at)
                    .and_utc();
                if candidate > after {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::days(7))
                }
            }
            Interval::EveryDays { days, at: None } => {
                after.checked_add_signed(Duration::days(i64::from(*days)))
            }
            Interval::EveryDays { days, at: Some(at) } => after
                .date_naive()
                .checked_add_signed(Duration::days(i64::from(*days)))
                .map(|date| date.and_time(*at).and_utc()),
            Interval::EveryHours { hours } => {
                after.checked_add_signed(Duration::hours(i64::from(*hours)))
            }
            Interval::Cron(expression) => cron::Schedule::from_str(expression)
                .ok()?
                .after(&after)
                .next(),
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err("interval is empty".to_string());
        }

        let lowered = raw.to_ascii_lowercase();
        if lowered.starts_with("cron:") {
            // Slice the original text: cron field names are case-sensitive.
            let expression = normalize_cron(raw["cron:".len()..].trim());
            // Exhaustion depends on "now"; `next_after` reports it, parsing does not.
            cron::Schedule::from_str(&expression)
                .map_err(|e| format!("invalid cron expression '{expression}': {e}"))?;
            return Ok(Interval::Cron(expression));
        }

        let text = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
        let (head, time) = match text.rsplit_once(" at ") {
            Some((head, time)) => (head, Some(parse_time(time)?)),
            None => (text.as_str(), None),
        };

        match head {
            "daily" | "every day" | "each day" => Ok(Interval::Daily {
                at: time.unwrap_or_else(default_time),
            }),
            "every other day" => Ok(Interval::EveryDays { days: 2, at: time }),
            "weekly" | "every week" => Ok(Interval::EveryDays { days: 7, at: time }),
            "hourly" | "every hour" if time.is_none() => Ok(Interval::EveryHours { hours: 1 }),
            _ => {
                if let Some(caps) = EVERY_N_DAYS.captures(head) {
                    let days = parse_count(&caps[1], "days", MAX_PERIOD_DAYS)?;
                    return Ok(Interval::EveryDays { days, at: time });
                }
                if let Some(caps) = EVERY_N_HOURS.captures(head) {
                    if time.is_some() {
                        return Err("an hourly interval cannot have a time of day".to_string());
                    }
                    let hours = parse_count(&caps[1], "hours", MAX_PERIOD_HOURS)?;
                    return Ok(Interval::EveryHours { hours });
                }
                if let Some(caps) = WEEKLY.captures(head)
                    && let Some(weekday) = parse_weekday(&caps[1])
                {
                    return Ok(Interval::Weekly {
                        weekday,
                        at: time.unwrap_or_else(default_time),
                    });
                }
                Err(format!("unrecognized interval '{raw}'"))
            }
        }
    }
}

/// cron wants a seconds field; accept the classic five-field form too.
fn normalize_cron(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

fn parse_count(digits: &str, unit: &str, max: u32) -> Result<u32, String> {
    match digits.parse::<u32>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n),
        _ => Err(format!("'every N {unit}' needs N between 1 and {max}")),
    }
}

fn parse_time(text: &str) -> Result<NaiveTime, String> {
    let text = text.trim();
    match text {
        "noon" | "midday" => return Ok(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default()),
        "midnight" => return Ok(NaiveTime::MIN),
        _ => {}
    }

    let caps = CLOCK
        .captures(text)
        .ok_or_else(|| format!("unrecognized time of day '{text}'"))?;
    let hour: u32 = caps[1].parse().map_err(|_| format!("bad hour in '{text}'"))?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().map_err(|_| format!("bad minute in '{text}'"))?,
        None => 0,
    };

    let hour = match caps.get(3).map(|m| m.as_str().replace('.', "")) {
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return Err(format!("hour out of range in '{text}'"));
            }
            match (meridiem.as_str(), hour) {
                ("am", 12) => 0,
                ("am", h) => h,
                ("pm", 12) => 12,
                (_, h) => h + 12,
            }
        }
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| format!("time out of range in '{text}'"))
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    // "mondays" reads the same as "monday"
    let word = word
        .strip_suffix('s')
        .filter(|w| w.ends_with("day"))
        .unwrap_or(word);
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}
