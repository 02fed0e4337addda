//! Title Reader - builds the movie dimension from the title reference file
//!
//! Lines are `movie_id,year_of_release,title`. Titles may contain commas,
//! so only the first two commas separate fields. A movie id seen twice
//! keeps its first line.

use crate::error::Result;
use crate::model::{MovieRow, UNKNOWN_RELEASE_YEAR};
use crate::text::LineReader;
use encoding_rs::Encoding;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Parse one title line; `None` for lines that are not movie rows
pub fn parse_title_line(line: &str) -> Option<MovieRow> {
    let mut fields = line.splitn(3, ',');
    let movie_id = fields.next()?.trim().parse::<i64>().ok()?;
    let year = fields.next()?;
    let title = fields.next()?;

    Some(MovieRow {
        movie_id,
        year_of_release: parse_release_year(year).unwrap_or(UNKNOWN_RELEASE_YEAR),
        title: title.trim().to_string(),
    })
}

/// Accepts "1999" and integer-valued decimals like "1999.0"
pub fn parse_release_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(year) = raw.parse::<i32>() {
        return (year >= 0).then_some(year);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}

pub fn read_titles(path: &Path, encoding: &'static Encoding) -> Result<Vec<MovieRow>> {
    let mut reader = LineReader::open(path, encoding)?;
    let mut movies = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;
    let mut duplicates = 0usize;

    while let Some((line_no, text)) = reader.next_line()? {
        match parse_title_line(&text) {
            Some(movie) if !seen.insert(movie.movie_id) => {
                warn!(
                    line = line_no,
                    movie_id = movie.movie_id,
                    "Duplicate movie id in title file, keeping first"
                );
                duplicates += 1;
            }
            Some(movie) => movies.push(movie),
            None => {
                if !text.trim().is_empty() {
                    debug!(line = line_no, "Skipping non-movie title line");
                }
                skipped += 1;
            }
        }
    }

    info!(
        file = %path.display(),
        movies = movies.len(),
        skipped,
        duplicates,
        "Title reference read"
    );
    Ok(movies)
}
