//! Date coercion for raw cell text.
//!
//! Patterns are tried in priority order; the first one whose shape matches
//! and yields a valid calendar date wins.

use std::sync::OnceLock;

use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;

/// Recognised patterns, highest priority first.
pub const DATE_PATTERNS: &[&str] = &[
    "yyyy/MM/dd",
    "yyyy/M/d",
    "yyyy-MM-dd",
    "yyyy-M-d",
    "yyyy.MM.dd",
    "yyyy.M.d",
    "yyyyMMdd",
    "M/d/yy",
    "M/d",
    "M-d",
    "M.d",
    "yyyy年M月d日",
    "M月d日",
];

#[derive(Clone, Copy)]
enum YearField {
    Full,
    TwoDigit,
    Current,
}

struct DatePattern {
    matcher: Regex,
    year: YearField,
}

fn compiled_patterns() -> &'static [DatePattern] {
    static PATTERNS: OnceLock<Vec<DatePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DATE_PATTERNS
            .iter()
            .map(|pattern| {
                let (source, year) = pattern_regex(pattern);
                DatePattern {
                    matcher: Regex::new(&source).expect("date pattern regex must compile"),
                    year,
                }
            })
            .collect()
    })
}

/// Translate a `yyyy/M/d` style pattern into an anchored regex with named
/// `y`, `m` and `d` groups.
fn pattern_regex(pattern: &str) -> (String, YearField) {
    let mut source = String::from("^");
    let mut year = YearField::Current;
    let mut rest = pattern;
    while !rest.is_empty() {
        let (token, group) = if let Some(r) = rest.strip_prefix("yyyy") {
            year = YearField::Full;
            (r, r"(?P<y>\d{4})")
        } else if let Some(r) = rest.strip_prefix("yy") {
            year = YearField::TwoDigit;
            (r, r"(?P<y>\d{2})")
        } else if let Some(r) = rest.strip_prefix("MM") {
            (r, r"(?P<m>\d{2})")
        } else if let Some(r) = rest.strip_prefix('M') {
            (r, r"(?P<m>\d{1,2})")
        } else if let Some(r) = rest.strip_prefix("dd") {
            (r, r"(?P<d>\d{2})")
        } else if let Some(r) = rest.strip_prefix('d') {
            (r, r"(?P<d>\d{1,2})")
        } else {
            let c = rest.chars().next().unwrap_or_default();
            source.push_str(&regex::escape(&c.to_string()));
            rest = &rest[c.len_utf8()..];
            continue;
        };
        source.push_str(group);
        rest = token;
    }
    source.push('$');
    (source, year)
}

/// Parse `raw` against the known patterns, resolving year-less patterns
/// against the current local year.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_date_on(raw, Local::now().date_naive())
}

pub(crate) fn parse_date_on(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for pattern in compiled_patterns() {
        let Some(caps) = pattern.matcher.captures(raw) else {
            continue;
        };
        let field = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<i32>().ok());
        let year = match pattern.year {
            YearField::Full => field("y"),
            YearField::TwoDigit => field("y").map(|y| if y < 69 { 2000 + y } else { 1900 + y }),
            YearField::Current => Some(today.year()),
        };
        let (Some(year), Some(month), Some(day)) = (year, field("m"), field("d")) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month as u32, day as u32) {
            return Some(date);
        }
    }
    None
}

/// Canonical display form, `yyyy/MM/dd`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

/// Whole years elapsed from `from` to `to`; negative when `from` is later.
pub(crate) fn years_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let mut years = (to.year() - from.year()) as i64;
    if years > 0 && (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    } else if years < 0 && (to.month(), to.day()) > (from.month(), from.day()) {
        years += 1;
    }
    years
}
