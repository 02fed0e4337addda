//! Rating Stream Parser
//!
//! Source format: a `<movie_id>:` header line, followed by one
//! `customer_id,rating,date` line per rating of that movie. Headers and
//! ratings repeat until end of file, across any number of files.
//!
//! Records are buffered up to the chunk size and appended to the
//! intermediate store, so peak memory is bounded by the chunk size and
//! not by the source size. The row cap limits fact rows, so only records
//! whose date parses are charged against it; records with unusable dates
//! are still stored and later dropped by the fact assembler. The parser
//! stops reading as soon as the cap is filled, and the final flush writes
//! only the prefix of the buffer that ends on the record filling it.
//!
//! Malformed lines are fatal: the run aborts with the file and line.

use crate::budget::{RowBudget, StreamState};
use crate::dates::parse_rating_date;
use crate::error::{EtlError, Result};
use crate::model::RawRatingRecord;
use crate::store::{IntermediateStore, StoreAppender};
use crate::text::LineReader;
use encoding_rs::Encoding;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PROGRESS_EVERY_LINES: u64 = 1_000_000;

/// One classified source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLine {
    Blank,
    MovieHeader(i64),
    Rating {
        customer_id: i64,
        rating: u8,
        date: String,
    },
}

/// Classify a ratings source line. Errors carry a human-readable reason.
pub fn parse_source_line(text: &str) -> std::result::Result<SourceLine, String> {
    let line = text.trim();
    if line.is_empty() {
        return Ok(SourceLine::Blank);
    }

    if let Some(prefix) = line.strip_suffix(':') {
        let movie_id = prefix
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid movie header '{}'", line))?;
        return Ok(SourceLine::MovieHeader(movie_id));
    }

    let mut fields = line.split(',');
    let (Some(customer), Some(rating), Some(date), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(format!(
            "expected 3 comma-separated fields, found {}",
            line.split(',').count()
        ));
    };

    let customer_id = customer
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("invalid customer id '{}'", customer.trim()))?;
    let rating = rating
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|r| (1..=5).contains(r))
        .ok_or_else(|| format!("rating '{}' is not an integer from 1 to 5", rating.trim()))?;

    Ok(SourceLine::Rating {
        customer_id,
        rating,
        date: date.trim().to_string(),
    })
}

/// Result of the extraction stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub records_emitted: u64,
    pub files_read: usize,
    pub lines_read: u64,
    pub state: StreamState,
}

impl ParseOutcome {
    pub fn cap_reached(&self) -> bool {
        self.state == StreamState::CapReached
    }
}

struct RatingStreamParser {
    appender: StoreAppender,
    buffer: Vec<RawRatingRecord>,
    /// Buffered records whose date parses
    buffered_resolvable: usize,
    records_stored: u64,
    chunk_size: usize,
    budget: RowBudget,
    state: StreamState,
    encoding: &'static Encoding,
    files_read: usize,
    lines_read: u64,
}

impl RatingStreamParser {
    fn consume_file(&mut self, path: &Path) -> Result<()> {
        let mut reader = LineReader::open(path, self.encoding)?;
        self.files_read += 1;
        info!(file = %path.display(), "Reading ratings source");

        let mut current_movie: Option<i64> = None;
        while let Some((line_no, text)) = reader.next_line()? {
            self.lines_read += 1;
            if self.lines_read % PROGRESS_EVERY_LINES == 0 {
                info!(
                    lines = self.lines_read,
                    records = self.records_stored + self.buffer.len() as u64,
                    "Ratings progress"
                );
            }

            let malformed = |reason: String| EtlError::MalformedRating {
                path: path.to_path_buf(),
                line: line_no,
                reason,
            };

            match parse_source_line(&text).map_err(malformed)? {
                SourceLine::Blank => {}
                SourceLine::MovieHeader(movie_id) => current_movie = Some(movie_id),
                SourceLine::Rating {
                    customer_id,
                    rating,
                    date,
                } => {
                    let movie_id = current_movie.ok_or_else(|| {
                        malformed("rating line before any movie header".to_string())
                    })?;
                    if parse_rating_date(&date).is_some() {
                        self.buffered_resolvable += 1;
                    }
                    self.buffer.push(RawRatingRecord {
                        movie_id,
                        customer_id,
                        rating,
                        date,
                    });

                    if self.buffer.len() >= self.chunk_size
                        || self.budget.would_fill(self.buffered_resolvable)
                    {
                        self.flush()?;
                        if self.state == StreamState::CapReached {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let admitted = self.budget.admit(self.buffered_resolvable);
        let take = if self.budget.would_fill(self.buffered_resolvable) {
            self.cut_after_resolvable(admitted)
        } else {
            self.buffer.len()
        };
        self.appender.append(&self.buffer[..take])?;
        self.budget.consume(admitted);
        self.records_stored += take as u64;

        let discarded = self.buffer.len() - take;
        debug!(
            flushed = take,
            discarded,
            total = self.records_stored,
            "Flushed rating buffer"
        );
        self.buffer.clear();
        self.buffered_resolvable = 0;

        if self.budget.is_exhausted() {
            self.state = StreamState::CapReached;
        }
        Ok(())
    }

    /// Length of the buffer prefix that ends on the `n`th resolvable record
    fn cut_after_resolvable(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let mut seen = 0;
        self.buffer
            .iter()
            .position(|record| {
                if parse_rating_date(&record.date).is_some() {
                    seen += 1;
                }
                seen == n
            })
            .map_or(self.buffer.len(), |i| i + 1)
    }
}

/// Parse `sources` in order into `store`, stopping once `cap` records
/// with a usable date have been stored.
pub fn extract_ratings(
    sources: &[PathBuf],
    store: &IntermediateStore,
    cap: Option<u64>,
    chunk_size: usize,
    encoding: &'static Encoding,
) -> Result<ParseOutcome> {
    let budget = RowBudget::new(cap);
    let mut parser = RatingStreamParser {
        appender: store.appender()?,
        buffer: Vec::with_capacity(chunk_size.min(1 << 20)),
        buffered_resolvable: 0,
        records_stored: 0,
        chunk_size: chunk_size.max(1),
        state: if budget.is_exhausted() {
            StreamState::CapReached
        } else {
            StreamState::Streaming
        },
        budget,
        encoding,
        files_read: 0,
        lines_read: 0,
    };

    for path in sources {
        if parser.state != StreamState::Streaming {
            break;
        }
        parser.consume_file(path)?;
    }

    if parser.state == StreamState::Streaming {
        parser.flush()?;
        if parser.state == StreamState::Streaming {
            parser.state = StreamState::Done;
        }
    }

    let outcome = ParseOutcome {
        records_emitted: parser.records_stored,
        files_read: parser.files_read,
        lines_read: parser.lines_read,
        state: parser.state,
    };
    parser.appender.finish()?;

    info!(
        records = outcome.records_emitted,
        files = outcome.files_read,
        lines = outcome.lines_read,
        state = %outcome.state,
        "Ratings extracted"
    );
    Ok(outcome)
}
