use crate::schema::Period;
use chrono::{Datelike, Days, NaiveDate};

/// Signed number of months from `start` to `end`.
pub fn months_between(start: Period, end: Period) -> i32 {
    let year_diff = end.year - start.year;
    let month_diff = end.month as i32 - start.month as i32;
    year_diff * 12 + month_diff
}

/// Converts an Excel serial day number (1900 date system) to a date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    // Day 0 is 1899-12-30 once the phantom 1900-02-29 is accounted for.
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.trunc() as u64))
}

pub fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim().trim_end_matches('.').to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    const MONTHS: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    MONTHS
        .iter()
        .position(|m| m.starts_with(&lower))
        .map(|idx| idx as u32 + 1)
}

/// Parses the period spellings operators use in their sheets:
/// `2024-01`, `2024/01`, `01/2024`, `Jan 2024`, `January-2024`, or a full date.
pub fn parse_period_text(raw: &str) -> Option<Period> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(Period::from_date(date));
        }
    }

    let tokens: Vec<&str> = trimmed
        .split(|c: char| c == '-' || c == '/' || c == '.' || c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.len() != 2 {
        return None;
    }

    let is_year = |t: &str| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit());
    let (year_token, month_token) = if is_year(tokens[0]) {
        (tokens[0], tokens[1])
    } else if is_year(tokens[1]) {
        (tokens[1], tokens[0])
    } else {
        return None;
    };

    let year: i32 = year_token.parse().ok()?;
    let month = match month_token.parse::<u32>() {
        Ok(m) => m,
        Err(_) => month_from_name(month_token)?,
    };

    Period::new(year, month)
}

/// Period for a numeric cell: an Excel date serial.
pub fn period_from_serial(serial: f64) -> Option<Period> {
    excel_serial_to_date(serial).and_then(|d| Period::new(d.year(), d.month()))
}
