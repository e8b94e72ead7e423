//! Date references found in a user query.
//!
//! Used twice: more than one reference marks a query as analytical, and a
//! tool result only validates when every reference shows up in it.

use regex_lite::Regex;
use std::sync::LazyLock;

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid ISO date pattern"));

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("valid year pattern"));

// "May" is only a month when capitalized; lowercase it is usually the verb.
static MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?i:january|february|march|april|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b|\bMay\b",
    )
    .expect("valid month pattern")
});

static LETTER_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]+").expect("valid letter-run pattern"));

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

/// One date mentioned in a query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateReference {
    Year(String),
    IsoDate(String),
    /// 1-based month number
    Month(u8),
}

impl DateReference {
    /// Whether this reference appears in lowercased result text.
    pub fn appears_in(&self, haystack: &str) -> bool {
        match self {
            Self::Year(year) => haystack.contains(year.as_str()),
            Self::IsoDate(date) => haystack.contains(date.as_str()),
            Self::Month(month) => {
                let name = MONTHS[usize::from(*month - 1)];
                let numeric = format!("-{month:02}");
                LETTER_RUN
                    .find_iter(haystack)
                    .any(|word| names_month(word.as_str(), name))
                    || haystack.contains(&format!("{numeric}-"))
                    || haystack.contains(&format!("{numeric}\""))
            }
        }
    }
}

/// A whole word naming the month, in full or abbreviated.
fn names_month(word: &str, name: &str) -> bool {
    word == name || word == &name[..3] || (name == "september" && word == "sept")
}

/// Every distinct date reference in `text`, sorted.
pub fn extract(text: &str) -> Vec<DateReference> {
    let mut refs = Vec::new();

    for caps in ISO_DATE.captures_iter(text) {
        refs.push(DateReference::IsoDate(caps[0].to_string()));
    }

    for caps in YEAR.captures_iter(text) {
        refs.push(DateReference::Year(caps[1].to_string()));
    }

    for m in MONTH.find_iter(text) {
        let word = m.as_str().to_lowercase();
        if let Some(index) = MONTHS.iter().position(|name| name.starts_with(&word[..3])) {
            refs.push(DateReference::Month(index as u8 + 1));
        }
    }

    refs.sort();
    refs.dedup();
    refs
}
