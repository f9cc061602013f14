//! Free-form leave date parsing.
//!
//! Input is reduced to a numeric `year/month/day` string (Chinese numerals and
//! the `年`/`月`/`日` unit markers are rewritten first), then tried against a
//! fixed list of layouts. Anything that survives none of them goes through a
//! locale-unaware fallback that also accepts RFC 3339 timestamps and English
//! month names; the fallback may accept strings a reader would not expect.

use chrono::{DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DateRejection;

pub const ISO_FORMAT: &str = "%Y-%m-%d";
pub const DISPLAY_FORMAT: &str = "%Y年%m月%d日";

const TAIPEI_OFFSET_SECS: i32 = 8 * 3600;

const FALLBACK_FORMATS: [&str; 6] =
    ["%B %d %Y", "%B %d, %Y", "%d %B %Y", "%b %d %Y", "%b %d, %Y", "%d %b %Y"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLeaveDate {
    pub date: NaiveDate,
    pub iso: String,
    pub display: String,
}

impl ParsedLeaveDate {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, iso: iso_date(date), display: display_date(date) }
    }
}

pub type LeaveDateParseResult = Result<ParsedLeaveDate, DateRejection>;

pub fn iso_date(date: NaiveDate) -> String {
    date.format(ISO_FORMAT).to_string()
}

pub fn display_date(date: NaiveDate) -> String {
    date.format(DISPLAY_FORMAT).to_string()
}

/// Parses leave dates relative to "today" in one fixed civil time zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateParser {
    zone: FixedOffset,
    max_advance_months: u32,
}

impl Default for DateParser {
    fn default() -> Self {
        Self::taipei()
    }
}

impl DateParser {
    pub fn new(zone: FixedOffset, max_advance_months: u32) -> Self {
        Self { zone, max_advance_months }
    }

    pub fn taipei() -> Self {
        let zone = FixedOffset::east_opt(TAIPEI_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
        Self::new(zone, 1)
    }

    /// Builds a parser from a minute offset; out-of-range offsets fall back to UTC.
    pub fn from_offset_minutes(offset_minutes: i32, max_advance_months: u32) -> Self {
        let zone = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self::new(zone, max_advance_months)
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    pub fn max_advance_months(&self) -> u32 {
        self.max_advance_months
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.zone).date_naive()
    }

    pub fn parse(&self, text: &str, now: DateTime<Utc>) -> LeaveDateParseResult {
        let today = self.today(now);
        let input = text.trim().to_lowercase();

        let parsed = match input.as_str() {
            "今天" | "today" => Some(today),
            "明天" | "tomorrow" => today.checked_add_days(Days::new(1)),
            _ => parse_free_form(&input, today.year()),
        };

        let Some(date) = parsed else {
            return Err(DateRejection::InvalidFormat);
        };
        if date < today {
            return Err(DateRejection::PastDate);
        }
        let latest =
            today.checked_add_months(Months::new(self.max_advance_months)).unwrap_or(NaiveDate::MAX);
        if date > latest {
            return Err(DateRejection::RangeExceeded { max_months: self.max_advance_months });
        }

        Ok(ParsedLeaveDate::new(date))
    }
}

fn parse_free_form(input: &str, reference_year: i32) -> Option<NaiveDate> {
    let reduced = reduce_to_numeric(input);
    let candidate = match month_day_separator(&reduced) {
        Some(separator) => format!("{reference_year}{separator}{reduced}"),
        None => reduced,
    };

    LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(&candidate, reference_year))
        .or_else(|| parse_fallback(&candidate))
}

/// Rewrites numerals and unit markers so `六月二十日` becomes `6/20`.
fn reduce_to_numeric(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if is_chinese_numeral(ch) {
            let mut run = String::from(ch);
            while let Some(&next) = chars.peek() {
                if !is_chinese_numeral(next) {
                    break;
                }
                run.push(next);
                chars.next();
            }
            match chinese_number(&run) {
                Some(value) => output.push_str(&value.to_string()),
                None => output.push_str(&run),
            }
            continue;
        }

        match ch {
            '年' | '月' | '／' => output.push('/'),
            '日' | '號' | '号' => {}
            '－' => output.push('-'),
            '０'..='９' => {
                let offset = u32::from(ch) - u32::from('０');
                output.extend(char::from_digit(offset, 10));
            }
            other => output.push(other),
        }
    }

    let trimmed = output.trim().trim_end_matches(['/', '-']).to_owned();
    if trimmed.chars().all(|ch| ch.is_ascii_digit() || matches!(ch, '/' | '-' | '.' | ' ')) {
        trimmed.chars().filter(|ch| *ch != ' ').collect()
    } else {
        trimmed
    }
}

fn chinese_digit(ch: char) -> Option<u32> {
    match ch {
        '〇' | '零' => Some(0),
        '一' => Some(1),
        '二' | '兩' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

fn is_chinese_numeral(ch: char) -> bool {
    ch == '十' || chinese_digit(ch).is_some()
}

/// `十` → 10, `二十` → 20, `二十五` → 25, `十一` → 11; digit runs such as
/// `二〇二六` are read positionally.
fn chinese_number(run: &str) -> Option<u32> {
    let Some((tens, units)) = run.split_once('十') else {
        return run
            .chars()
            .try_fold(0_u32, |acc, ch| acc.checked_mul(10)?.checked_add(chinese_digit(ch)?));
    };

    let tens = match tens.chars().collect::<Vec<_>>().as_slice() {
        [] => 1,
        [digit] => chinese_digit(*digit)?,
        _ => return None,
    };
    let units = match units.chars().collect::<Vec<_>>().as_slice() {
        [] => 0,
        [digit] => chinese_digit(*digit)?,
        _ => return None,
    };

    Some(tens * 10 + units)
}

/// Separator of a bare `month/day` or `month-day` input, if it is one.
fn month_day_separator(input: &str) -> Option<char> {
    let separator = input.chars().find(|ch| matches!(ch, '/' | '-'))?;
    let (month, day) = input.split_once(separator)?;
    (is_short_number(month) && is_short_number(day)).then_some(separator)
}

fn is_short_number(part: &str) -> bool {
    (1..=2).contains(&part.len()) && part.bytes().all(|byte| byte.is_ascii_digit())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DateLayout {
    PaddedSlash,
    PaddedDash,
    Unpadded,
    MonthDay,
    Compact,
}

const LAYOUTS: [DateLayout; 5] = [
    DateLayout::PaddedSlash,
    DateLayout::PaddedDash,
    DateLayout::Unpadded,
    DateLayout::MonthDay,
    DateLayout::Compact,
];

impl DateLayout {
    fn parse(self, input: &str, reference_year: i32) -> Option<NaiveDate> {
        match self {
            Self::PaddedSlash => parse_padded(input, '/'),
            Self::PaddedDash => parse_padded(input, '-'),
            Self::Unpadded => {
                let parts = split_numeric(input)?;
                match parts.as_slice() {
                    [year, month, day]
                        if year.len() == 4 && is_short_number(month) && is_short_number(day) =>
                    {
                        ymd(year, month, day)
                    }
                    _ => None,
                }
            }
            Self::MonthDay => {
                let parts = split_numeric(input)?;
                match parts.as_slice() {
                    [month, day] if is_short_number(month) && is_short_number(day) => {
                        NaiveDate::from_ymd_opt(reference_year, month.parse().ok()?, day.parse().ok()?)
                    }
                    _ => None,
                }
            }
            Self::Compact => {
                if input.len() != 8 || !input.bytes().all(|byte| byte.is_ascii_digit()) {
                    return None;
                }
                ymd(&input[..4], &input[4..6], &input[6..])
            }
        }
    }
}

fn parse_padded(input: &str, separator: char) -> Option<NaiveDate> {
    let parts = input.split(separator).collect::<Vec<_>>();
    match parts.as_slice() {
        [year, month, day]
            if year.len() == 4
                && month.len() == 2
                && day.len() == 2
                && parts.iter().all(|part| part.bytes().all(|byte| byte.is_ascii_digit())) =>
        {
            ymd(year, month, day)
        }
        _ => None,
    }
}

/// Splits on a single separator kind; mixed separators are refused.
fn split_numeric(input: &str) -> Option<Vec<&str>> {
    let separator = input.chars().find(|ch| matches!(ch, '/' | '-' | '.'))?;
    let parts = input.split(separator).collect::<Vec<_>>();
    let well_formed = parts
        .iter()
        .all(|part| !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit()));
    well_formed.then_some(parts)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn parse_fallback(input: &str) -> Option<NaiveDate> {
    // Input arrives lowercased; RFC 3339 wants `T` and `Z`.
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&input.to_uppercase()) {
        return Some(timestamp.date_naive());
    }

    FALLBACK_FORMATS.iter().find_map(|format| NaiveDate::parse_from_str(input, format).ok())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};

    use super::{chinese_number, reduce_to_numeric, DateParser};
    use crate::errors::DateRejection;

    fn reference_now() -> DateTime<Utc> {
        // 2026-10-16 12:00 in Taipei.
        Utc.with_ymd_and_hms(2026, 10, 16, 4, 0, 0).single().expect("valid instant")
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn keywords_resolve_to_today_and_tomorrow() {
        let parser = DateParser::taipei();

        let today = parser.parse("今天", reference_now()).expect("today");
        let tomorrow = parser.parse("明天", reference_now()).expect("tomorrow");
        let english = parser.parse("  Tomorrow ", reference_now()).expect("english tomorrow");

        assert_eq!(today.date, date(2026, 10, 16));
        assert_eq!(tomorrow.date, date(2026, 10, 17));
        assert_eq!(english.date, tomorrow.date);
        assert_eq!(today.iso, "2026-10-16");
        assert_eq!(today.display, "2026年10月16日");
    }

    #[test]
    fn today_is_anchored_to_the_reference_zone_not_utc() {
        let parser = DateParser::taipei();
        // 17:30 UTC on the 15th is already the 16th in Taipei.
        let late_utc = Utc.with_ymd_and_hms(2026, 10, 15, 17, 30, 0).single().expect("instant");

        let today = parser.parse("today", late_utc).expect("today");

        assert_eq!(today.date, date(2026, 10, 16));
        assert_eq!(parser.parse("2026-10-15", late_utc), Err(DateRejection::PastDate));
    }

    #[test]
    fn month_day_forms_take_the_reference_year() {
        let parser = DateParser::taipei();

        for input in ["10/20", "10-20", "10月20日", "十月二十日", "10月20號", "１０／２０", "１０－２０"] {
            let parsed = parser.parse(input, reference_now()).expect(input);
            assert_eq!(parsed.date, date(2026, 10, 20), "input {input}");
        }
        let unpadded = parser.parse("11-2", reference_now()).expect("unpadded dash");
        assert_eq!(unpadded.date, date(2026, 11, 2));
    }

    #[test]
    fn full_and_compact_layouts_are_accepted() {
        let parser = DateParser::taipei();

        for input in ["2026/11/02", "2026-11-02", "2026/11/2", "2026-11-2", "20261102", "2026年11月2日"]
        {
            let parsed = parser.parse(input, reference_now()).expect(input);
            assert_eq!(parsed.date, date(2026, 11, 2), "input {input}");
        }
    }

    #[test]
    fn canonical_iso_form_parses_back_to_itself() {
        let parser = DateParser::taipei();
        let today = parser.today(reference_now());

        for offset in 0..=30 {
            let day = today.checked_add_days(Days::new(offset)).expect("in range");
            let parsed = parser.parse(&super::iso_date(day), reference_now()).expect("iso");
            assert_eq!(parsed.date, day);
            assert_eq!(parsed.iso, super::iso_date(day));
        }
    }

    #[test]
    fn display_form_parses_back_to_itself() {
        let parser = DateParser::taipei();
        let parsed = parser.parse("2026年10月20日", reference_now()).expect("display form");

        assert_eq!(parser.parse(&parsed.display, reference_now()), Ok(parsed));
    }

    #[test]
    fn dates_before_today_are_past_dates() {
        let parser = DateParser::taipei();
        let today = parser.today(reference_now());

        for offset in [1, 2, 30, 365] {
            let day = today.checked_sub_days(Days::new(offset)).expect("in range");
            assert_eq!(
                parser.parse(&super::iso_date(day), reference_now()),
                Err(DateRejection::PastDate),
                "{day}"
            );
        }
        assert_eq!(parser.parse("10/15", reference_now()), Err(DateRejection::PastDate));
    }

    #[test]
    fn dates_beyond_one_month_exceed_the_range() {
        let parser = DateParser::taipei();

        assert!(parser.parse("2026-11-16", reference_now()).is_ok());
        for input in ["2026-11-17", "2026-12-01", "2027-10-16"] {
            assert_eq!(
                parser.parse(input, reference_now()),
                Err(DateRejection::RangeExceeded { max_months: 1 }),
                "{input}"
            );
        }
    }

    #[test]
    fn garbage_and_impossible_dates_are_invalid_format() {
        let parser = DateParser::taipei();

        for input in ["", "someday", "2026/13/01", "2/30", "2026/10-20", "請假"] {
            assert_eq!(
                parser.parse(input, reference_now()),
                Err(DateRejection::InvalidFormat),
                "{input:?}"
            );
        }
    }

    #[test]
    fn fallback_accepts_english_month_names() {
        let parser = DateParser::taipei();

        let parsed = parser.parse("October 30 2026", reference_now()).expect("month name");
        let short = parser.parse("30 Oct 2026", reference_now()).expect("short month name");

        assert_eq!(parsed.date, date(2026, 10, 30));
        assert_eq!(short.date, parsed.date);
    }

    #[test]
    fn fallback_accepts_rfc3339_timestamps() {
        let parser = DateParser::taipei();

        let offset = parser.parse("2026-10-20T09:00:00+08:00", reference_now()).expect("offset");
        let utc = parser.parse("2026-10-21T01:00:00Z", reference_now()).expect("utc");

        assert_eq!(offset.date, date(2026, 10, 20));
        assert_eq!(utc.date, date(2026, 10, 21));
    }

    #[test]
    fn parsing_is_deterministic_for_a_fixed_reference() {
        let parser = DateParser::taipei();
        let first = parser.parse("十一月一日", reference_now());
        let second = parser.parse("十一月一日", reference_now());

        assert_eq!(first, second);
        assert_eq!(first.map(|parsed| parsed.date), Ok(date(2026, 11, 1)));
    }

    #[test]
    fn chinese_numerals_are_read_as_whole_numbers() {
        assert_eq!(chinese_number("十"), Some(10));
        assert_eq!(chinese_number("十一"), Some(11));
        assert_eq!(chinese_number("二十"), Some(20));
        assert_eq!(chinese_number("三十一"), Some(31));
        assert_eq!(chinese_number("二〇二六"), Some(2026));
        assert_eq!(chinese_number("十十"), None);
        assert_eq!(reduce_to_numeric("六月二十日"), "6/20");
        assert_eq!(reduce_to_numeric("十二月三日"), "12/3");
    }

    #[test]
    fn configured_window_and_offset_are_honoured() {
        let parser = DateParser::from_offset_minutes(0, 2);

        assert_eq!(parser.max_advance_months(), 2);
        assert_eq!(parser.zone().local_minus_utc(), 0);
        assert!(parser.parse("2026-12-10", reference_now()).is_ok());
    }
}
