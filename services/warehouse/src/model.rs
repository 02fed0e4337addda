//! Warehouse row types
//!
//! Column order of every table is the field order of its struct, and the
//! same order is used for the header row written by the warehouse writer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Year used when the title file has no usable release year
pub const UNKNOWN_RELEASE_YEAR: i32 = 1800;

/// A single rating as parsed from the ratings source.
/// `date` is kept as the raw text seen in the source; it is only
/// interpreted by the date dimension builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRatingRecord {
    pub movie_id: i64,
    pub customer_id: i64,
    pub rating: u8,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieRow {
    pub movie_id: i64,
    pub year_of_release: i32,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserRow {
    pub customer_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRow {
    pub date_key: i32,
    pub full_date: NaiveDate,
    pub year: i32,
    pub quarter: u32,
    pub month: u32,
    pub day: u32,
    pub week_of_year: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRow {
    pub customer_id: i64,
    pub movie_id: i64,
    pub date_key: i32,
    pub rating_value: u8,
}

/// A warehouse table: its artifact name and header row
pub trait Table: Serialize {
    const NAME: &'static str;
    const HEADER: &'static [&'static str];

    fn file_name() -> String {
        format!("{}.csv", Self::NAME)
    }
}

impl Table for MovieRow {
    const NAME: &'static str = "dim_movie";
    const HEADER: &'static [&'static str] = &["movie_id", "year_of_release", "title"];
}

impl Table for UserRow {
    const NAME: &'static str = "dim_user";
    const HEADER: &'static [&'static str] = &["customer_id"];
}

impl Table for DateRow {
    const NAME: &'static str = "dim_date";
    const HEADER: &'static [&'static str] = &[
        "date_key",
        "full_date",
        "year",
        "quarter",
        "month",
        "day",
        "week_of_year",
    ];
}

impl Table for FactRow {
    const NAME: &'static str = "fact_rating";
    const HEADER: &'static [&'static str] = &["customer_id", "movie_id", "date_key", "rating_value"];
}
