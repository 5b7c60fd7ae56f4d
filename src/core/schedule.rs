use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde_json::{Value, json};

use super::config::EnvConfig;

/// First day of the month `months` ahead. Billing schedules anchor on day 1
/// so month-length drift never shifts them.
fn add_months(dt: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let month0 = dt.month0() + months;
    let year = dt.year() + (month0 / 12) as i32;
    let month = month0 % 12 + 1;
    dt.with_day(1)
        .and_then(|d| d.with_year(year))
        .and_then(|d| d.with_month(month))
        .unwrap_or(dt)
}

fn truncate_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

pub fn compute_next_run(frequency: &str, now: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let anchor = truncate_to_hour(now.unwrap_or_else(Utc::now));
    match frequency {
        "weekly" => anchor + Duration::days(7),
        "monthly" => add_months(anchor, 1),
        "quarterly" => add_months(anchor, 3),
        "annual" => add_months(anchor, 12),
        _ => anchor,
    }
}

pub fn cron_for_frequency(frequency: &str) -> Option<&'static str> {
    match frequency {
        "weekly" => Some("0 9 * * 1"),
        "monthly" => Some("0 9 1 * *"),
        "quarterly" => Some("0 9 1 */3 *"),
        "annual" => Some("0 9 1 1 *"),
        _ => None,
    }
}

/// Cadences to materialize for a requested period. Monthly invoices also
/// prime the adjacent cadences for the learning/orchestration loop.
pub fn frequencies_for_period(period: &str) -> Vec<&'static str> {
    match period.trim().to_lowercase().as_str() {
        "monthly" => vec!["weekly", "monthly", "quarterly", "annual"],
        "weekly" => vec!["weekly"],
        "quarterly" => vec!["quarterly"],
        "annual" => vec!["annual"],
        _ => Vec::new(),
    }
}

/// Write one recurring-job file for an external schedule runner to pick up.
pub fn save_recurring_job(
    cfg: &EnvConfig,
    skill_id: &str,
    prompt: &str,
    slots: &Value,
    frequency: &str,
) -> Result<PathBuf> {
    let now = Utc::now();
    let next_run = compute_next_run(frequency, Some(now));
    let job = json!({
        "skill_id": skill_id,
        "prompt": prompt,
        "frequency": frequency,
        "slots": slots,
        "next_run_at": next_run.to_rfc3339(),
        "cron_utc": cron_for_frequency(frequency),
        "created_at": now.to_rfc3339(),
    });

    let jobs_dir = cfg.schedules_dir();
    std::fs::create_dir_all(&jobs_dir)?;

    let file_name = format!(
        "{}_{}_{}.json",
        now.format("%Y%m%dT%H%M%S%fZ"),
        skill_id.replace('.', "_"),
        frequency.to_lowercase(),
    );
    let path = jobs_dir.join(file_name);
    std::fs::write(&path, serde_json::to_string_pretty(&job)?)?;
    Ok(path)
}

/// Most recent schedule files, newest first.
pub fn recent_schedule_files(cfg: &EnvConfig, limit: usize) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cfg.schedules_dir()) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    files.reverse();
    files.truncate(limit);
    files
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 30).unwrap()
    }

    #[test]
    fn weekly_advances_seven_days_from_hour_anchor() {
        let next = compute_next_run("weekly", Some(at(2026, 3, 10, 14, 45)));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 17, 14, 0, 0).unwrap());
    }

    #[test]
    fn monthly_lands_on_first_of_next_month() {
        let next = compute_next_run("monthly", Some(at(2026, 1, 31, 9, 5)));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn annual_rolls_the_year() {
        let next = compute_next_run("annual", Some(at(2026, 7, 15, 8, 0)));
        assert_eq!(next, Utc.with_ymd_and_hms(2027, 7, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn unknown_frequency_returns_the_anchor() {
        let next = compute_next_run("sometimes", Some(at(2026, 5, 2, 11, 59)));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 5, 2, 11, 0, 0).unwrap());
    }

    #[test]
    fn cron_expressions_cover_known_frequencies() {
        assert_eq!(cron_for_frequency("weekly"), Some("0 9 * * 1"));
        assert_eq!(cron_for_frequency("quarterly"), Some("0 9 1 */3 *"));
        assert_eq!(cron_for_frequency("daily"), None);
    }

    #[test]
    fn monthly_period_fans_out_to_adjacent_cadences() {
        assert_eq!(
            frequencies_for_period("Monthly"),
            vec!["weekly", "monthly", "quarterly", "annual"]
        );
        assert_eq!(frequencies_for_period("weekly"), vec!["weekly"]);
        assert!(frequencies_for_period("sometimes").is_empty());
    }
}
