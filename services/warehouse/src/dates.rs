//! Date Dimension Builder
//!
//! One pass over the intermediate stream collects every distinct date text.
//! Each parseable date becomes one dimension row keyed by `YYYYMMDD`;
//! unparseable dates are left out, and fact rows using them are dropped
//! later when their key fails to resolve.

use crate::error::Result;
use crate::model::DateRow;
use crate::store::IntermediateStore;
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

pub const RATING_DATE_FORMAT: &str = "%Y-%m-%d";

/// Years that fit the eight-digit `YYYYMMDD` key
const KEYABLE_YEARS: std::ops::RangeInclusive<i32> = 1000..=9999;

/// Observed date text -> surrogate date key, read-only once built
#[derive(Debug, Clone, Default)]
pub struct DateKeyMap {
    keys: HashMap<String, i32>,
}

impl DateKeyMap {
    pub fn resolve(&self, date_text: &str) -> Option<i32> {
        self.keys.get(date_text).copied()
    }
}

#[derive(Debug, Clone)]
pub struct DateDimension {
    /// Sorted by `full_date` ascending
    pub rows: Vec<DateRow>,
    pub keys: DateKeyMap,
    /// Distinct date texts that did not parse
    pub unparseable: usize,
}

/// `YYYYMMDD` key of a date returned by `parse_rating_date`
pub fn date_key_of(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

/// Parse a rating date; years outside 1000..=9999 count as unparseable
pub fn parse_rating_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), RATING_DATE_FORMAT)
        .ok()
        .filter(|date| KEYABLE_YEARS.contains(&date.year()))
}

impl DateRow {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            date_key: date_key_of(date),
            full_date: date,
            year: date.year(),
            quarter: 1 + (date.month() - 1) / 3,
            month: date.month(),
            day: date.day(),
            week_of_year: date.iso_week().week(),
        }
    }
}

/// Build the dimension from a set of distinct observed date texts
pub fn dimension_from_texts<I>(texts: I) -> DateDimension
where
    I: IntoIterator<Item = String>,
{
    let mut by_date: BTreeMap<NaiveDate, DateRow> = BTreeMap::new();
    let mut keys = HashMap::new();
    let mut unparseable = 0usize;

    for text in texts {
        match parse_rating_date(&text) {
            Some(date) => {
                let row = by_date.entry(date).or_insert_with(|| DateRow::from_date(date));
                keys.insert(text, row.date_key);
            }
            None => unparseable += 1,
        }
    }

    DateDimension {
        rows: by_date.into_values().collect(),
        keys: DateKeyMap { keys },
        unparseable,
    }
}

pub fn build_date_dimension(store: &IntermediateStore) -> Result<DateDimension> {
    let mut texts: BTreeSet<String> = BTreeSet::new();
    for record in store.scan()? {
        texts.insert(record?.date);
    }

    let dimension = dimension_from_texts(texts);
    if dimension.unparseable > 0 {
        warn!(
            unparseable = dimension.unparseable,
            "Distinct rating dates could not be parsed and are excluded"
        );
    }
    info!(dates = dimension.rows.len(), "Date dimension built");
    Ok(dimension)
}
