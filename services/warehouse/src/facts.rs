//! Fact Assembler
//!
//! Re-scans the intermediate stream, resolves each record's date key and
//! writes `fact_rating` in stream order. Records whose date does not
//! resolve are dropped. The row cap is enforced again here: a chunk that
//! would overflow the remaining budget is truncated and the scan stops.

use crate::budget::{RowBudget, StreamState};
use crate::dates::DateKeyMap;
use crate::error::Result;
use crate::model::{FactRow, RawRatingRecord};
use crate::store::IntermediateStore;
use crate::writer::{TableArtifact, TableWriter};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

const PROGRESS_EVERY_ROWS: u64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct FactOutcome {
    pub artifact: TableArtifact,
    pub rows_written: u64,
    /// Records dropped because their date did not resolve
    pub dropped_unresolved: u64,
    /// Rows kept whose movie id is missing from the movie dimension
    pub orphan_movies: u64,
    pub state: StreamState,
}

impl FactOutcome {
    pub fn cap_reached(&self) -> bool {
        self.state == StreamState::CapReached
    }
}

pub struct FactAssembler<'a> {
    keys: &'a DateKeyMap,
    known_movies: Option<&'a HashSet<i64>>,
    chunk: Vec<FactRow>,
    chunk_size: usize,
    budget: RowBudget,
    state: StreamState,
    dropped_unresolved: u64,
    orphan_movies: u64,
}

impl<'a> FactAssembler<'a> {
    pub fn new(keys: &'a DateKeyMap, cap: Option<u64>, chunk_size: usize) -> Self {
        let budget = RowBudget::new(cap);
        Self {
            keys,
            known_movies: None,
            chunk: Vec::with_capacity(chunk_size.min(1 << 20)),
            chunk_size: chunk_size.max(1),
            state: if budget.is_exhausted() {
                StreamState::CapReached
            } else {
                StreamState::Streaming
            },
            budget,
            dropped_unresolved: 0,
            orphan_movies: 0,
        }
    }

    /// Count fact rows referencing movies outside this set
    pub fn with_known_movies(mut self, movies: &'a HashSet<i64>) -> Self {
        self.known_movies = Some(movies);
        self
    }

    /// Resolve one record into a fact row, or `None` if its date is unknown
    pub fn resolve(&self, record: &RawRatingRecord) -> Option<FactRow> {
        let date_key = self.keys.resolve(&record.date)?;
        Some(FactRow {
            customer_id: record.customer_id,
            movie_id: record.movie_id,
            date_key,
            rating_value: record.rating,
        })
    }

    pub fn assemble(
        mut self,
        store: &IntermediateStore,
        out_dir: &Path,
    ) -> Result<FactOutcome> {
        let mut writer = TableWriter::<FactRow>::create(out_dir)?;

        for record in store.scan()? {
            if self.state != StreamState::Streaming {
                break;
            }
            let record = record?;
            let Some(fact) = self.resolve(&record) else {
                self.dropped_unresolved += 1;
                continue;
            };
            self.chunk.push(fact);

            if self.chunk.len() >= self.chunk_size || self.budget.would_fill(self.chunk.len()) {
                self.flush(&mut writer)?;
            }
        }

        if self.state == StreamState::Streaming {
            self.flush(&mut writer)?;
            if self.state == StreamState::Streaming {
                self.state = StreamState::Done;
            }
        }

        let artifact = writer.finish()?;
        if self.dropped_unresolved > 0 {
            warn!(
                dropped = self.dropped_unresolved,
                "Ratings dropped because their date is not in the date dimension"
            );
        }
        if self.orphan_movies > 0 {
            warn!(
                orphans = self.orphan_movies,
                "Fact rows reference movies missing from the movie dimension"
            );
        }
        info!(
            rows = artifact.rows,
            state = %self.state,
            "Fact table assembled"
        );

        Ok(FactOutcome {
            rows_written: artifact.rows,
            artifact,
            dropped_unresolved: self.dropped_unresolved,
            orphan_movies: self.orphan_movies,
            state: self.state,
        })
    }

    fn flush(&mut self, writer: &mut TableWriter<FactRow>) -> Result<()> {
        let before = self.budget.emitted();
        let take = self.budget.admit(self.chunk.len());
        let written = &self.chunk[..take];
        writer.write_all(written)?;
        if let Some(movies) = self.known_movies {
            self.orphan_movies += written
                .iter()
                .filter(|f| !movies.contains(&f.movie_id))
                .count() as u64;
        }
        self.budget.consume(take);
        debug!(
            written = take,
            truncated = self.chunk.len() - take,
            "Flushed fact chunk"
        );
        self.chunk.clear();

        if before / PROGRESS_EVERY_ROWS != self.budget.emitted() / PROGRESS_EVERY_ROWS {
            info!(rows = self.budget.emitted(), "Fact progress");
        }
        if self.budget.is_exhausted() {
            self.state = StreamState::CapReached;
        }
        Ok(())
    }
}
