//! Temporal Resolution
//!
//! Turns Spanish time expressions into a monthly [`TimeRange`]. Relative
//! phrases resolve against the anchor captured at parse time, never against
//! the database clock, so one invocation instant always yields one range.

use crate::query_spec::{month_start, shift_months, TimeRange};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Months covered when the query carries no temporal cue
pub const DEFAULT_TRAILING_MONTHS: u32 = 12;

const MONTHS: &str = "enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|setiembre|octubre|noviembre|diciembre";
const YEAR: &str = r"((?:19|20)\d{2})";

lazy_static! {
    static ref YEAR_RANGE_RE: Regex = Regex::new(&format!(
        r"\b{}\s+(?:y|a|al|hasta)\s+(?:el\s+)?{}\b",
        YEAR, YEAR
    ))
    .expect("valid year range pattern");
    static ref QUARTER_WORD_RE: Regex = Regex::new(&format!(
        r"\b(primer|primero|1er|segundo|2do|tercer|tercero|3er|cuarto|4to)\s+trimestre\s+(?:de\s+|del\s+)?{}\b",
        YEAR
    ))
    .expect("valid quarter pattern");
    static ref QUARTER_PREFIX_RE: Regex =
        Regex::new(&format!(r"\b(?:q|t)([1-4])\s*(?:de\s+|del\s+)?{}\b", YEAR)).expect("valid quarter pattern");
    static ref QUARTER_SUFFIX_RE: Regex =
        Regex::new(&format!(r"\b{}\s*q([1-4])\b", YEAR)).expect("valid quarter pattern");
    /// "2T 2024", the usual Mexican reporting notation
    static ref QUARTER_NUMBER_T_RE: Regex =
        Regex::new(&format!(r"\b([1-4])\s*t\s+(?:de\s+|del\s+)?{}\b", YEAR)).expect("valid quarter pattern");
    static ref MONTH_YEAR_RE: Regex = Regex::new(&format!(
        r"\b({})\s+(?:de\s+|del\s+)?{}\b",
        MONTHS, YEAR
    ))
    .expect("valid month pattern");
    static ref SINCE_RE: Regex = Regex::new(&format!(
        r"\bdesde\s+(?:el\s+)?(?:({})\s+(?:de\s+|del\s+)?)?{}\b",
        MONTHS, YEAR
    ))
    .expect("valid since pattern");
    static ref LAST_N_RE: Regex = Regex::new(
        r"\bultim[oa]s\s+(\d{1,3}|dos|tres|cuatro|cinco|seis|siete|ocho|nueve|diez|once|doce|veinticuatro)\s+(meses|mes|anos|ano|trimestres|trimestre)\b"
    )
    .expect("valid relative pattern");
    static ref LAST_ONE_RE: Regex =
        Regex::new(r"\bultim[oa]\s+(mes|ano|trimestre)\b").expect("valid relative pattern");
    static ref THIS_YEAR_RE: Regex =
        Regex::new(r"\b(?:este\s+ano|ano\s+en\s+curso|en\s+lo\s+que\s+va\s+del\s+ano)\b").expect("valid ytd pattern");
    static ref BARE_YEAR_RE: Regex = Regex::new(&format!(r"\b{}\b", YEAR)).expect("valid year pattern");
}

/// Reference instant for relative expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalAnchor {
    pub today: NaiveDate,
    /// Most recent period with published data (first of month)
    pub latest_period: NaiveDate,
}

impl TemporalAnchor {
    /// Without a known latest period, the last closed month before `today` is used
    pub fn new(today: NaiveDate, latest_period: Option<NaiveDate>) -> Self {
        let current_month = month_start(today);
        let latest = latest_period
            .map(month_start)
            .unwrap_or_else(|| shift_months(current_month, -1))
            .min(current_month);
        Self {
            today,
            latest_period: latest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalResolution {
    pub range: TimeRange,
    /// False when the trailing-12-months default was applied
    pub explicit: bool,
    /// Which grammar rule fired, for debug logging
    pub rule: &'static str,
}

pub fn resolve(normalized: &str, anchor: &TemporalAnchor) -> TemporalResolution {
    let rules: [(&'static str, fn(&str, &TemporalAnchor) -> Option<TimeRange>); 9] = [
        ("year_range", year_range),
        ("quarter", quarter_word),
        ("quarter_short", quarter_short),
        ("month", month_year),
        ("since", since),
        ("last_n", last_n),
        ("last_one", last_one),
        ("year_to_date", year_to_date),
        ("years", bare_years),
    ];

    for (rule, apply) in rules {
        if let Some(range) = apply(normalized, anchor) {
            return TemporalResolution {
                range,
                explicit: true,
                rule,
            };
        }
    }

    TemporalResolution {
        range: TimeRange::trailing(anchor.latest_period, DEFAULT_TRAILING_MONTHS),
        explicit: false,
        rule: "default_trailing",
    }
}

fn year_at(caps: &Captures, idx: usize) -> Option<i32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn month_number(name: &str) -> Option<u32> {
    let idx = match name {
        "enero" => 1,
        "febrero" => 2,
        "marzo" => 3,
        "abril" => 4,
        "mayo" => 5,
        "junio" => 6,
        "julio" => 7,
        "agosto" => 8,
        "septiembre" | "setiembre" => 9,
        "octubre" => 10,
        "noviembre" => 11,
        "diciembre" => 12,
        _ => return None,
    };
    Some(idx)
}

fn number_word(word: &str) -> Option<u32> {
    if let Ok(n) = word.parse::<u32>() {
        return Some(n);
    }
    let n = match word {
        "dos" => 2,
        "tres" => 3,
        "cuatro" => 4,
        "cinco" => 5,
        "seis" => 6,
        "siete" => 7,
        "ocho" => 8,
        "nueve" => 9,
        "diez" => 10,
        "once" => 11,
        "doce" => 12,
        "veinticuatro" => 24,
        _ => return None,
    };
    Some(n)
}

fn year_range(text: &str, _anchor: &TemporalAnchor) -> Option<TimeRange> {
    let caps = YEAR_RANGE_RE.captures(text)?;
    TimeRange::years(year_at(&caps, 1)?, year_at(&caps, 2)?)
}

fn quarter_word(text: &str, _anchor: &TemporalAnchor) -> Option<TimeRange> {
    let caps = QUARTER_WORD_RE.captures(text)?;
    let quarter = match caps.get(1)?.as_str() {
        "primer" | "primero" | "1er" => 1,
        "segundo" | "2do" => 2,
        "tercer" | "tercero" | "3er" => 3,
        _ => 4,
    };
    TimeRange::quarter(year_at(&caps, 2)?, quarter)
}

fn quarter_short(text: &str, _anchor: &TemporalAnchor) -> Option<TimeRange> {
    if let Some(caps) = QUARTER_PREFIX_RE.captures(text) {
        let quarter: u32 = caps.get(1)?.as_str().parse().ok()?;
        return TimeRange::quarter(year_at(&caps, 2)?, quarter);
    }
    if let Some(caps) = QUARTER_NUMBER_T_RE.captures(text) {
        let quarter: u32 = caps.get(1)?.as_str().parse().ok()?;
        return TimeRange::quarter(year_at(&caps, 2)?, quarter);
    }
    let caps = QUARTER_SUFFIX_RE.captures(text)?;
    let quarter: u32 = caps.get(2)?.as_str().parse().ok()?;
    TimeRange::quarter(year_at(&caps, 1)?, quarter)
}

fn month_year(text: &str, _anchor: &TemporalAnchor) -> Option<TimeRange> {
    // "desde marzo 2023" is an open range, handled by `since`
    if SINCE_RE.is_match(text) {
        return None;
    }
    let caps = MONTH_YEAR_RE.captures(text)?;
    TimeRange::month(year_at(&caps, 2)?, month_number(caps.get(1)?.as_str())?)
}

fn since(text: &str, anchor: &TemporalAnchor) -> Option<TimeRange> {
    let caps = SINCE_RE.captures(text)?;
    let month = match caps.get(1) {
        Some(m) => month_number(m.as_str())?,
        None => 1,
    };
    let start = NaiveDate::from_ymd_opt(year_at(&caps, 2)?, month, 1)?;
    Some(TimeRange::new(start, anchor.latest_period.max(start)))
}

fn last_n(text: &str, anchor: &TemporalAnchor) -> Option<TimeRange> {
    let caps = LAST_N_RE.captures(text)?;
    let n = number_word(caps.get(1)?.as_str())?.max(1);
    let months = match caps.get(2)?.as_str() {
        "mes" | "meses" => n,
        "trimestre" | "trimestres" => n * 3,
        _ => n * 12,
    };
    Some(TimeRange::trailing(anchor.latest_period, months))
}

fn last_one(text: &str, anchor: &TemporalAnchor) -> Option<TimeRange> {
    let caps = LAST_ONE_RE.captures(text)?;
    let months = match caps.get(1)?.as_str() {
        "mes" => 1,
        "trimestre" => 3,
        _ => 12,
    };
    Some(TimeRange::trailing(anchor.latest_period, months))
}

fn year_to_date(text: &str, anchor: &TemporalAnchor) -> Option<TimeRange> {
    if !THIS_YEAR_RE.is_match(text) {
        return None;
    }
    let start = NaiveDate::from_ymd_opt(chrono::Datelike::year(&anchor.latest_period), 1, 1)?;
    Some(TimeRange::new(start, anchor.latest_period))
}

/// One or more bare years; several years span from the earliest to the latest
fn bare_years(text: &str, _anchor: &TemporalAnchor) -> Option<TimeRange> {
    let years: Vec<i32> = BARE_YEAR_RE
        .captures_iter(text)
        .filter_map(|caps| year_at(&caps, 1))
        .collect();
    let first = *years.iter().min()?;
    let last = *years.iter().max()?;
    TimeRange::years(first, last)
}
