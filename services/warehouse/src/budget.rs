//! Row-cap accounting shared by the streaming stages

use std::fmt;

/// Lifecycle of a streaming stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    /// The row cap was hit; no further input is read
    CapReached,
    /// All input was consumed below the cap
    Done,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Streaming => "streaming",
            StreamState::CapReached => "cap reached",
            StreamState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Running total of emitted rows against an optional cap
#[derive(Debug, Clone, Copy)]
pub struct RowBudget {
    cap: Option<u64>,
    emitted: u64,
}

impl RowBudget {
    pub fn new(cap: Option<u64>) -> Self {
        Self { cap, emitted: 0 }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn remaining(&self) -> Option<u64> {
        self.cap.map(|cap| cap.saturating_sub(self.emitted))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// How many of `pending` rows may still be emitted
    pub fn admit(&self, pending: usize) -> usize {
        match self.remaining() {
            Some(left) => pending.min(usize::try_from(left).unwrap_or(usize::MAX)),
            None => pending,
        }
    }

    /// True once `emitted + pending` rows would reach the cap
    pub fn would_fill(&self, pending: usize) -> bool {
        match self.remaining() {
            Some(left) => pending as u64 >= left,
            None => false,
        }
    }

    pub fn consume(&mut self, rows: usize) {
        self.emitted += rows as u64;
    }
}
