//! Intermediate rating store
//!
//! A run-scoped, append-only CSV file holding the normalized rating stream.
//! Every later stage reads it with its own sequential pass, so the raw
//! source files are parsed exactly once.

use crate::error::{EtlError, Result};
use crate::model::RawRatingRecord;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const STORE_FILE: &str = "ratings.intermediate.csv";

#[derive(Debug)]
pub struct IntermediateStore {
    path: PathBuf,
}

impl IntermediateStore {
    /// Create an empty store in `dir`, truncating leftovers of an aborted run
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| EtlError::io(dir, e))?;
        let path = dir.join(STORE_FILE);
        File::create(&path).map_err(|e| EtlError::io(&path, e))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appender(&self) -> Result<StoreAppender> {
        let file = fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| EtlError::io(&self.path, e))?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(BufWriter::new(file));
        Ok(StoreAppender {
            writer,
            path: self.path.clone(),
        })
    }

    /// Start an independent sequential read pass over the stream
    pub fn scan(&self) -> Result<StoreScan> {
        let file = File::open(&self.path).map_err(|source| EtlError::Open {
            path: self.path.clone(),
            source,
        })?;
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(BufReader::new(file));
        Ok(StoreScan {
            records: reader.into_deserialize(),
            path: self.path.clone(),
        })
    }

    pub fn discard(self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EtlError::io(&self.path, e)),
        }
    }
}

pub struct StoreAppender {
    writer: csv::Writer<BufWriter<File>>,
    path: PathBuf,
}

impl StoreAppender {
    pub fn append(&mut self, records: &[RawRatingRecord]) -> Result<()> {
        for record in records {
            self.writer
                .serialize(record)
                .map_err(|e| EtlError::csv(&self.path, e))?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(|e| EtlError::io(&self.path, e))
    }
}

pub struct StoreScan {
    records: csv::DeserializeRecordsIntoIter<BufReader<File>, RawRatingRecord>,
    path: PathBuf,
}

impl Iterator for StoreScan {
    type Item = Result<RawRatingRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = &self.path;
        self.records
            .next()
            .map(|r| r.map_err(|e| EtlError::csv(path, e)))
    }
}
