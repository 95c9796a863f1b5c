//! Pattern-based field extraction
//!
//! Regex rules for the fields that have a recognizable surface form:
//! incident dates, times, reporter names, and locations. Within a
//! category the patterns are tried in priority order and the first one
//! that matches wins; there is no scoring across patterns.

use chrono::NaiveDate;
use regex::Regex;

use irx_core::{fields, FieldMap, FieldName};

const MONTHS: &str =
    "January|February|March|April|May|June|July|August|September|October|November|December";

/// Layouts accepted when normalizing a matched date, in priority order.
/// Numeric dates are read month-first and fall back to day-first.
const DATE_LAYOUTS: &[&str] = &["%m/%d/%Y", "%d/%m/%Y", "%d %B %Y", "%B %d %Y"];

/// Output layout for `incident_date`
pub const DATE_OUTPUT_FORMAT: &str = "%d/%m/%Y";

/// Rule-based extractor for dates, times, names, and locations
pub struct PatternExtractor {
    date_patterns: Vec<Regex>,
    time_patterns: Vec<Regex>,
    /// Capture group 1 holds the name
    name_patterns: Vec<Regex>,
    /// Capture group 1 holds the location
    location_patterns: Vec<Regex>,
}

impl PatternExtractor {
    /// Create a new extractor with the default incident-report rules
    pub fn new() -> Self {
        let mut extractor = Self {
            date_patterns: Vec::new(),
            time_patterns: Vec::new(),
            name_patterns: Vec::new(),
            location_patterns: Vec::new(),
        };

        extractor.init_patterns();
        extractor
    }

    fn init_patterns(&mut self) {
        // Dates
        add_pattern(&mut self.date_patterns, r"\b\d{1,2}[/-]\d{1,2}[/-]\d{4}\b");
        add_pattern(
            &mut self.date_patterns,
            &format!(r"(?i)\b\d{{1,2}}\s+(?:{MONTHS})\s+\d{{4}}\b"),
        );
        add_pattern(
            &mut self.date_patterns,
            &format!(r"(?i)\b(?:{MONTHS})\s+\d{{1,2}},?\s+\d{{4}}\b"),
        );

        // Times
        add_pattern(
            &mut self.time_patterns,
            r"(?i)\b\d{1,2}:\d{2}(?::\d{2})?\s*(?:AM|PM)?\b",
        );
        add_pattern(&mut self.time_patterns, r"(?i)\bat\s+\d{1,2}:\d{2}\b");

        // Reporter names (the name itself must be capitalized)
        add_pattern(
            &mut self.name_patterns,
            r"(?i:reported by)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)",
        );
        add_pattern(
            &mut self.name_patterns,
            r"\b([A-Z][a-z]+\s+[A-Z][a-z]+)\s+(?i:from|reported|involved)\b",
        );

        // Locations: named facilities first, then any capitalized place
        add_pattern(
            &mut self.location_patterns,
            r"\b((?i:warehouse)\s+[A-Z])\b",
        );
        add_pattern(&mut self.location_patterns, r"\b((?i:dry dock)\s+\d+)\b");
        add_pattern(&mut self.location_patterns, r"\b((?i:building)\s+\d+)\b");
        add_pattern(
            &mut self.location_patterns,
            r"\b(?i:at|in|near)\s+([A-Z][A-Za-z]*(?:\s+[A-Z][A-Za-z]*)*(?:\s+\d+)?)",
        );
    }

    /// Extract every field the rules can recognize
    pub fn extract(&self, text: &str) -> FieldMap {
        let mut extracted = FieldMap::new();

        if let Some(date) = self.extract_date(text) {
            extracted.insert(FieldName::new(fields::INCIDENT_DATE), date);
        }
        if let Some(time) = self.extract_time(text) {
            extracted.insert(FieldName::new(fields::INCIDENT_TIME), time);
        }
        if let Some(name) = first_capture(&self.name_patterns, text) {
            extracted.insert(FieldName::new(fields::REPORTER_NAME), name);
        }
        if let Some(location) = first_capture(&self.location_patterns, text) {
            extracted.insert(FieldName::new(fields::LOCATION), location);
        }

        extracted
    }

    /// First date match that parses, as `DD/MM/YYYY`
    fn extract_date(&self, text: &str) -> Option<String> {
        self.date_patterns.iter().find_map(|regex| {
            let found = regex.find(text)?;
            normalize_date(found.as_str())
        })
    }

    fn extract_time(&self, text: &str) -> Option<String> {
        self.time_patterns.iter().find_map(|regex| {
            let found = regex.find(text)?.as_str().trim();
            let time = strip_at_prefix(found).trim();
            (!time.is_empty()).then(|| time.to_string())
        })
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Add a regex pattern; invalid patterns are skipped
fn add_pattern(patterns: &mut Vec<Regex>, pattern: &str) {
    if let Ok(regex) = Regex::new(pattern) {
        patterns.push(regex);
    }
}

/// Group 1 of the first pattern that matches
fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|regex| {
        let value = regex.captures(text)?.get(1)?.as_str().trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn strip_at_prefix(time: &str) -> &str {
    match time.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("at ") => &time[3..],
        _ => time,
    }
}

/// Parse a date in any accepted layout and render it as `DD/MM/YYYY`
pub fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = raw
        .replace('-', "/")
        .replace(',', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    DATE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDate::parse_from_str(&cleaned, layout).ok())
        .map(|date| date.format(DATE_OUTPUT_FORMAT).to_string())
}

// ============================================================================
// Tests
// ============================================================================
