//! Execution-rule engine: normalizes raw scheduling input into a canonical
//! rule, builds the storage expression, and computes next execution times.
//!
//! All computation happens in UTC; DST never enters the picture.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Default forward-scan bound for cron matching: 4 years covers every
/// leap-day combination that can legitimately match.
pub const DEFAULT_HORIZON_DAYS: u32 = 1461;

/// Raw, user-facing scheduling input as it arrives from a form or API call.
///
/// `rule_type` is `interval-<unit>` (unit ∈ minutes, hours, days, months,
/// years) or `custom`. Only the fields matching the rule type are retained
/// by [`normalize`]; everything else is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRules {
    #[serde(rename = "rule-type")]
    pub rule_type: String,
    #[serde(rename = "interval-minutes", default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u32>,
    #[serde(rename = "interval-hours", default, skip_serializing_if = "Option::is_none")]
    pub interval_hours: Option<u32>,
    #[serde(rename = "interval-days", default, skip_serializing_if = "Option::is_none")]
    pub interval_days: Option<u32>,
    #[serde(rename = "interval-months", default, skip_serializing_if = "Option::is_none")]
    pub interval_months: Option<u32>,
    #[serde(rename = "interval-years", default, skip_serializing_if = "Option::is_none")]
    pub interval_years: Option<u32>,
    /// Basis day of month (1-31) anchoring the first execution.
    #[serde(rename = "exec-day", default, skip_serializing_if = "Option::is_none")]
    pub exec_day: Option<u32>,
    /// Basis time of day, "HH:MM".
    #[serde(rename = "exec-time", default, skip_serializing_if = "Option::is_none")]
    pub exec_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomSets>,
}

/// The five per-field value sets of a `custom` rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomSets {
    pub minutes: Vec<u32>,
    pub hours: Vec<u32>,
    pub days_month: Vec<u32>,
    pub months: Vec<u32>,
    pub days_week: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl IntervalUnit {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "minutes" => Some(IntervalUnit::Minutes),
            "hours" => Some(IntervalUnit::Hours),
            "days" => Some(IntervalUnit::Days),
            "months" => Some(IntervalUnit::Months),
            "years" => Some(IntervalUnit::Years),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Days => "days",
            IntervalUnit::Months => "months",
            IntervalUnit::Years => "years",
        }
    }

    /// ISO-8601-style duration expression: time designator for sub-day
    /// units, date designator for the rest.
    fn expression(self, count: u32) -> String {
        match self {
            IntervalUnit::Minutes => format!("PT{count}M"),
            IntervalUnit::Hours => format!("PT{count}H"),
            IntervalUnit::Days => format!("P{count}D"),
            IntervalUnit::Months => format!("P{count}M"),
            IntervalUnit::Years => format!("P{count}Y"),
        }
    }
}

/// Normalized scheduling rules — the retained, validated form of
/// [`RawRules`]. This is what the `execution_rules` column stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionRules {
    Interval {
        unit: IntervalUnit,
        count: u32,
        exec_day: u32,
        exec_hour: u32,
        exec_minute: u32,
    },
    Custom {
        sets: CustomSets,
        exec_day: u32,
        exec_hour: u32,
        exec_minute: u32,
    },
}

impl ExecutionRules {
    /// Anchor instant for a task that has never run: the basis day/time
    /// within the current UTC month (day clamped to the month's length).
    pub fn anchor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let (day, hour, minute) = match self {
            ExecutionRules::Interval {
                exec_day,
                exec_hour,
                exec_minute,
                ..
            }
            | ExecutionRules::Custom {
                exec_day,
                exec_hour,
                exec_minute,
                ..
            } => (*exec_day, *exec_hour, *exec_minute),
        };

        let mut day = day.min(31).max(1);
        loop {
            if let Some(anchor) = Utc
                .with_ymd_and_hms(now.year(), now.month(), day, hour, minute, 0)
                .single()
            {
                return anchor;
            }
            // Day doesn't exist in this month (e.g. 31 in April) — clamp down.
            day -= 1;
        }
    }

    /// Re-expand into the raw form. Normalizing the result yields `self`
    /// again — used by callers that round-trip rules through forms.
    pub fn to_raw(&self) -> RawRules {
        match self {
            ExecutionRules::Interval {
                unit,
                count,
                exec_day,
                exec_hour,
                exec_minute,
            } => {
                let mut raw = RawRules {
                    rule_type: format!("interval-{}", unit.name()),
                    exec_day: Some(*exec_day),
                    exec_time: Some(format!("{exec_hour:02}:{exec_minute:02}")),
                    ..RawRules::default()
                };
                let slot = match unit {
                    IntervalUnit::Minutes => &mut raw.interval_minutes,
                    IntervalUnit::Hours => &mut raw.interval_hours,
                    IntervalUnit::Days => &mut raw.interval_days,
                    IntervalUnit::Months => &mut raw.interval_months,
                    IntervalUnit::Years => &mut raw.interval_years,
                };
                *slot = Some(*count);
                raw
            }
            ExecutionRules::Custom {
                sets,
                exec_day,
                exec_hour,
                exec_minute,
            } => RawRules {
                rule_type: "custom".to_string(),
                exec_day: Some(*exec_day),
                exec_time: Some(format!("{exec_hour:02}:{exec_minute:02}")),
                custom: Some(sets.clone()),
                ..RawRules::default()
            },
        }
    }
}

/// Canonical, storage-ready rule: discriminator plus expression string.
/// Always derived from [`ExecutionRules`] via [`build`], never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronRules {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// `PT15M`-style duration for intervals, five space-separated fields
    /// for cron.
    pub expression: String,
    /// Carried for compatibility with stored rows; not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visits: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Interval,
    Cron,
}

/// Clean up and standardize raw scheduling input.
///
/// Retains only the keys relevant to `rule_type`, defaults a missing basis
/// day/time to the current UTC date/time components, and sorts each custom
/// value-set ascending so later comparisons against reference ranges are
/// deterministic.
pub fn normalize(raw: &RawRules) -> Result<ExecutionRules> {
    let now = Utc::now();
    let exec_day = match raw.exec_day {
        Some(d) if (1..=31).contains(&d) => d,
        Some(d) => {
            return Err(SchedulerError::InvalidRules(format!(
                "basis day {d} out of range 1-31"
            )))
        }
        None => now.day(),
    };
    let (exec_hour, exec_minute) = match raw.exec_time.as_deref() {
        Some(t) => parse_exec_time(t)?,
        None => (now.hour(), now.minute()),
    };

    if raw.rule_type == "custom" {
        let mut sets = raw
            .custom
            .clone()
            .ok_or_else(|| SchedulerError::InvalidRules("custom rule without value sets".into()))?;
        validate_set(&sets.minutes, 0, 59, "minutes")?;
        validate_set(&sets.hours, 0, 23, "hours")?;
        validate_set(&sets.days_month, 1, 31, "days_month")?;
        validate_set(&sets.months, 1, 12, "months")?;
        validate_set(&sets.days_week, 0, 6, "days_week")?;
        sets.minutes.sort_unstable();
        sets.hours.sort_unstable();
        sets.days_month.sort_unstable();
        sets.months.sort_unstable();
        sets.days_week.sort_unstable();
        return Ok(ExecutionRules::Custom {
            sets,
            exec_day,
            exec_hour,
            exec_minute,
        });
    }

    let unit = raw
        .rule_type
        .strip_prefix("interval-")
        .and_then(IntervalUnit::from_name)
        .ok_or_else(|| {
            SchedulerError::InvalidRules(format!("unknown rule type '{}'", raw.rule_type))
        })?;
    let count = match unit {
        IntervalUnit::Minutes => raw.interval_minutes,
        IntervalUnit::Hours => raw.interval_hours,
        IntervalUnit::Days => raw.interval_days,
        IntervalUnit::Months => raw.interval_months,
        IntervalUnit::Years => raw.interval_years,
    }
    .ok_or_else(|| {
        SchedulerError::InvalidRules(format!("missing interval count for '{}'", raw.rule_type))
    })?;
    if count == 0 {
        return Err(SchedulerError::InvalidRules(
            "interval count must be positive".into(),
        ));
    }

    Ok(ExecutionRules::Interval {
        unit,
        count,
        exec_day,
        exec_hour,
        exec_minute,
    })
}

/// Build the canonical rule from normalized input.
pub fn build(rules: &ExecutionRules) -> CronRules {
    match rules {
        ExecutionRules::Interval { unit, count, .. } => CronRules {
            kind: RuleKind::Interval,
            expression: unit.expression(*count),
            visits: None,
        },
        ExecutionRules::Custom { sets, .. } => {
            let expression = [
                wildcard_if_match(&sets.minutes, 0, 59),
                wildcard_if_match(&sets.hours, 0, 23),
                wildcard_if_match(&sets.days_month, 1, 31),
                wildcard_if_match(&sets.months, 1, 12),
                wildcard_if_match(&sets.days_week, 0, 6),
            ]
            .join(" ");
            CronRules {
                kind: RuleKind::Cron,
                expression,
                visits: None,
            }
        }
    }
}

/// Compute the next execution instant for `rules` starting from `basis`.
///
/// `now` is the caller's clock (injected for testability). With `skip`,
/// the result is guaranteed strictly after both `basis` and `now`, so a
/// just-completed run can never immediately re-trigger.
///
/// Cron rules scan forward at minute granularity from the start instant
/// and fail with [`SchedulerError::NoMatchingTime`] past `horizon`.
pub fn next_execution(
    rules: &CronRules,
    basis: DateTime<Utc>,
    now: DateTime<Utc>,
    skip: bool,
    horizon: Duration,
) -> Result<DateTime<Utc>> {
    match rules.kind {
        RuleKind::Interval => {
            let (unit, count) = parse_interval(&rules.expression)?;
            let mut next = add_interval(basis, unit, count)?;
            if skip {
                // Catch up past schedules without re-triggering in a loop.
                while next <= now {
                    next = add_interval(next, unit, count)?;
                }
            }
            Ok(next)
        }
        RuleKind::Cron => {
            let expr = parse_cron(&rules.expression)?;
            let mut t = floor_minute(basis);
            if t < basis || skip {
                t += Duration::minutes(1);
            }
            if skip && t <= now {
                // Matching depends only on wall time, so catching up is a
                // jump rather than a minute-by-minute walk.
                t = floor_minute(now) + Duration::minutes(1);
            }
            let deadline = t + horizon;
            while t <= deadline {
                if expr.matches(t) {
                    return Ok(t);
                }
                t += Duration::minutes(1);
            }
            Err(SchedulerError::NoMatchingTime {
                expression: rules.expression.clone(),
            })
        }
    }
}

struct CronExpr {
    minutes: CronField,
    hours: CronField,
    days_month: CronField,
    months: CronField,
    days_week: CronField,
}

enum CronField {
    Any,
    List(Vec<u32>),
}

impl CronField {
    fn contains(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::List(values) => values.contains(&value),
        }
    }
}

impl CronExpr {
    fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minutes.contains(t.minute())
            && self.hours.contains(t.hour())
            && self.days_month.contains(t.day())
            && self.months.contains(t.month())
            && self.days_week.contains(t.weekday().num_days_from_sunday())
    }
}

fn parse_cron(expression: &str) -> Result<CronExpr> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::InvalidRules(format!(
            "cron expression '{expression}' must have 5 fields"
        )));
    }
    let mut parsed = fields.iter().map(|f| parse_cron_field(f, expression));
    Ok(CronExpr {
        minutes: parsed.next().unwrap()?,
        hours: parsed.next().unwrap()?,
        days_month: parsed.next().unwrap()?,
        months: parsed.next().unwrap()?,
        days_week: parsed.next().unwrap()?,
    })
}

fn parse_cron_field(field: &str, expression: &str) -> Result<CronField> {
    if field == "*" {
        return Ok(CronField::Any);
    }
    let values = field
        .split(',')
        .map(|v| v.parse::<u32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            SchedulerError::InvalidRules(format!("bad field '{field}' in cron '{expression}'"))
        })?;
    if values.is_empty() {
        return Err(SchedulerError::InvalidRules(format!(
            "empty field in cron '{expression}'"
        )));
    }
    Ok(CronField::List(values))
}

fn parse_interval(expression: &str) -> Result<(IntervalUnit, u32)> {
    let bad = || SchedulerError::InvalidRules(format!("bad interval expression '{expression}'"));

    let (body, time_designator) = if let Some(rest) = expression.strip_prefix("PT") {
        (rest, true)
    } else if let Some(rest) = expression.strip_prefix('P') {
        (rest, false)
    } else {
        return Err(bad());
    };

    let unit_char = body.chars().last().ok_or_else(bad)?;
    let count: u32 = body[..body.len() - 1].parse().map_err(|_| bad())?;
    if count == 0 {
        return Err(bad());
    }

    let unit = match (time_designator, unit_char) {
        (true, 'M') => IntervalUnit::Minutes,
        (true, 'H') => IntervalUnit::Hours,
        (false, 'D') => IntervalUnit::Days,
        (false, 'M') => IntervalUnit::Months,
        (false, 'Y') => IntervalUnit::Years,
        _ => return Err(bad()),
    };
    Ok((unit, count))
}

fn add_interval(t: DateTime<Utc>, unit: IntervalUnit, count: u32) -> Result<DateTime<Utc>> {
    let overflow =
        || SchedulerError::InvalidRules(format!("interval overflow adding {count} {}", unit.name()));
    match unit {
        IntervalUnit::Minutes => t
            .checked_add_signed(Duration::minutes(i64::from(count)))
            .ok_or_else(overflow),
        IntervalUnit::Hours => t
            .checked_add_signed(Duration::hours(i64::from(count)))
            .ok_or_else(overflow),
        IntervalUnit::Days => t
            .checked_add_signed(Duration::days(i64::from(count)))
            .ok_or_else(overflow),
        IntervalUnit::Months => t.checked_add_months(Months::new(count)).ok_or_else(overflow),
        IntervalUnit::Years => t
            .checked_add_months(Months::new(count.saturating_mul(12)))
            .ok_or_else(overflow),
    }
}

fn floor_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

fn parse_exec_time(time: &str) -> Result<(u32, u32)> {
    let bad = || SchedulerError::InvalidRules(format!("bad exec-time '{time}', expected HH:MM"));
    let (h, m) = time.split_once(':').ok_or_else(bad)?;
    let hour: u32 = h.parse().map_err(|_| bad())?;
    let minute: u32 = m.parse().map_err(|_| bad())?;
    if hour > 23 || minute > 59 {
        return Err(bad());
    }
    Ok((hour, minute))
}

fn validate_set(values: &[u32], min: u32, max: u32, name: &str) -> Result<()> {
    if values.is_empty() {
        return Err(SchedulerError::InvalidRules(format!(
            "custom set '{name}' is empty"
        )));
    }
    if let Some(v) = values.iter().find(|v| **v < min || **v > max) {
        return Err(SchedulerError::InvalidRules(format!(
            "value {v} out of range {min}-{max} in custom set '{name}'"
        )));
    }
    Ok(())
}

/// `*` when the supplied set covers the complete reference range, else the
/// comma-joined values. Equality is a set check, not ordering-sensitive.
fn wildcard_if_match(values: &[u32], min: u32, max: u32) -> String {
    let full = (min..=max).all(|r| values.contains(&r));
    if full {
        "*".to_string()
    } else {
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn horizon() -> Duration {
        Duration::days(i64::from(DEFAULT_HORIZON_DAYS))
    }

    fn interval_raw(unit: &str, count: u32) -> RawRules {
        let mut raw = RawRules {
            rule_type: format!("interval-{unit}"),
            exec_day: Some(1),
            exec_time: Some("00:00".into()),
            ..RawRules::default()
        };
        match unit {
            "minutes" => raw.interval_minutes = Some(count),
            "hours" => raw.interval_hours = Some(count),
            "days" => raw.interval_days = Some(count),
            "months" => raw.interval_months = Some(count),
            "years" => raw.interval_years = Some(count),
            _ => unreachable!(),
        }
        raw
    }

    #[test]
    fn normalize_drops_unmatched_interval_fields() {
        let mut raw = interval_raw("hours", 3);
        // A stray field from a previously selected rule type.
        raw.interval_minutes = Some(10);
        let rules = normalize(&raw).unwrap();
        assert_eq!(
            rules,
            ExecutionRules::Interval {
                unit: IntervalUnit::Hours,
                count: 3,
                exec_day: 1,
                exec_hour: 0,
                exec_minute: 0,
            }
        );
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(normalize(&RawRules {
            rule_type: "interval-fortnights".into(),
            ..RawRules::default()
        })
        .is_err());
        assert!(normalize(&interval_raw("minutes", 0)).is_err());
        assert!(normalize(&RawRules {
            rule_type: "custom".into(),
            ..RawRules::default()
        })
        .is_err());
    }

    #[test]
    fn normalize_sorts_custom_sets() {
        let raw = RawRules {
            rule_type: "custom".into(),
            exec_day: Some(1),
            exec_time: Some("00:00".into()),
            custom: Some(CustomSets {
                minutes: vec![30, 0, 15],
                hours: vec![9],
                days_month: (1..=31).collect(),
                months: (1..=12).collect(),
                days_week: vec![5, 1],
            }),
            ..RawRules::default()
        };
        match normalize(&raw).unwrap() {
            ExecutionRules::Custom { sets, .. } => {
                assert_eq!(sets.minutes, vec![0, 15, 30]);
                assert_eq!(sets.days_week, vec![1, 5]);
            }
            other => panic!("expected custom rules, got {other:?}"),
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let rules = normalize(&interval_raw("days", 2)).unwrap();
        assert_eq!(normalize(&rules.to_raw()).unwrap(), rules);

        let raw = RawRules {
            rule_type: "custom".into(),
            exec_day: Some(12),
            exec_time: Some("06:30".into()),
            custom: Some(CustomSets {
                minutes: vec![0],
                hours: vec![9, 17],
                days_month: (1..=31).collect(),
                months: (1..=12).collect(),
                days_week: vec![1, 2, 3, 4, 5],
            }),
            ..RawRules::default()
        };
        let rules = normalize(&raw).unwrap();
        assert_eq!(normalize(&rules.to_raw()).unwrap(), rules);
    }

    #[test]
    fn build_interval_expressions() {
        let cases = [
            ("minutes", 15, "PT15M"),
            ("hours", 3, "PT3H"),
            ("days", 1, "P1D"),
            ("months", 6, "P6M"),
            ("years", 1, "P1Y"),
        ];
        for (unit, count, expected) in cases {
            let rules = normalize(&interval_raw(unit, count)).unwrap();
            let cron = build(&rules);
            assert_eq!(cron.kind, RuleKind::Interval);
            assert_eq!(cron.expression, expected);
        }
    }

    #[test]
    fn build_cron_wildcards_full_ranges() {
        // Full ranges supplied out of order still collapse to wildcards.
        let mut days: Vec<u32> = (1..=31).rev().collect();
        days.rotate_left(7);
        let raw = RawRules {
            rule_type: "custom".into(),
            exec_day: Some(1),
            exec_time: Some("00:00".into()),
            custom: Some(CustomSets {
                minutes: (0..=59).collect(),
                hours: vec![9],
                days_month: days,
                months: (1..=12).collect(),
                days_week: vec![1, 2, 3, 4, 5],
            }),
            ..RawRules::default()
        };
        let cron = build(&normalize(&raw).unwrap());
        assert_eq!(cron.kind, RuleKind::Cron);
        assert_eq!(cron.expression, "* 9 * * 1,2,3,4,5");
    }

    #[test]
    fn interval_delta_is_exact() {
        let basis = utc(2023, 1, 1, 0, 0, 0);
        let cron = build(&normalize(&interval_raw("hours", 3)).unwrap());
        let next = next_execution(&cron, basis, basis, false, horizon()).unwrap();
        assert_eq!(next - basis, Duration::hours(3));
    }

    #[test]
    fn interval_fifteen_minutes_scenario() {
        let last_run = utc(2023, 1, 1, 0, 0, 0);
        let cron = build(&normalize(&interval_raw("minutes", 15)).unwrap());
        let next = next_execution(&cron, last_run, last_run, false, horizon()).unwrap();
        assert_eq!(next, utc(2023, 1, 1, 0, 15, 0));
    }

    #[test]
    fn interval_skip_catches_up_past_now() {
        let basis = utc(2023, 1, 1, 0, 0, 0);
        let now = utc(2023, 1, 1, 3, 7, 0);
        let cron = build(&normalize(&interval_raw("minutes", 15)).unwrap());
        let next = next_execution(&cron, basis, now, true, horizon()).unwrap();
        assert_eq!(next, utc(2023, 1, 1, 3, 15, 0));
        assert!(next > now);
    }

    #[test]
    fn interval_month_addition_clamps() {
        let basis = utc(2023, 1, 31, 10, 0, 0);
        let cron = CronRules {
            kind: RuleKind::Interval,
            expression: "P1M".into(),
            visits: None,
        };
        let next = next_execution(&cron, basis, basis, false, horizon()).unwrap();
        assert_eq!(next, utc(2023, 2, 28, 10, 0, 0));
    }

    #[test]
    fn cron_weekday_morning_scenario() {
        // Every minute of 9am, weekdays only; basis is a Monday 8am.
        let cron = CronRules {
            kind: RuleKind::Cron,
            expression: "* 9 * * 1,2,3,4,5".into(),
            visits: None,
        };
        let basis = utc(2023, 1, 2, 8, 0, 0);
        let next = next_execution(&cron, basis, basis, false, horizon()).unwrap();
        assert_eq!(next, utc(2023, 1, 2, 9, 0, 0));
    }

    #[test]
    fn cron_skips_weekend_days() {
        let cron = CronRules {
            kind: RuleKind::Cron,
            expression: "0 9 * * 1,2,3,4,5".into(),
            visits: None,
        };
        // Friday 2023-01-06 09:30 — next match is Monday.
        let basis = utc(2023, 1, 6, 9, 30, 0);
        let next = next_execution(&cron, basis, basis, false, horizon()).unwrap();
        assert_eq!(next, utc(2023, 1, 9, 9, 0, 0));
    }

    #[test]
    fn cron_result_is_minimal_and_satisfies_fields() {
        let cron = CronRules {
            kind: RuleKind::Cron,
            expression: "30 6 * * *".into(),
            visits: None,
        };
        let basis = utc(2023, 3, 10, 6, 31, 0);
        let next = next_execution(&cron, basis, basis, false, horizon()).unwrap();
        assert_eq!(next, utc(2023, 3, 11, 6, 30, 0));
        // No earlier minute >= basis matches.
        let expr = parse_cron(&cron.expression).unwrap();
        let mut t = basis;
        while t < next {
            assert!(!expr.matches(t));
            t += Duration::minutes(1);
        }
    }

    #[test]
    fn cron_matching_is_inclusive_without_skip_exclusive_with() {
        let cron = CronRules {
            kind: RuleKind::Cron,
            expression: "0 9 * * *".into(),
            visits: None,
        };
        let basis = utc(2023, 1, 2, 9, 0, 0);
        let inclusive = next_execution(&cron, basis, basis, false, horizon()).unwrap();
        assert_eq!(inclusive, basis);
        let exclusive = next_execution(&cron, basis, basis, true, horizon()).unwrap();
        assert_eq!(exclusive, utc(2023, 1, 3, 9, 0, 0));
    }

    #[test]
    fn cron_impossible_combination_fails_fast() {
        // February 31st never exists.
        let cron = CronRules {
            kind: RuleKind::Cron,
            expression: "0 0 31 2 *".into(),
            visits: None,
        };
        let basis = utc(2023, 1, 1, 0, 0, 0);
        let err = next_execution(&cron, basis, basis, false, horizon()).unwrap_err();
        assert!(matches!(err, SchedulerError::NoMatchingTime { .. }));
    }

    #[test]
    fn anchor_clamps_missing_day() {
        let rules = ExecutionRules::Interval {
            unit: IntervalUnit::Days,
            count: 1,
            exec_day: 31,
            exec_hour: 8,
            exec_minute: 30,
        };
        let now = utc(2023, 4, 10, 12, 0, 0);
        assert_eq!(rules.anchor(now), utc(2023, 4, 30, 8, 30, 0));
    }
}
