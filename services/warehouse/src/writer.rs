//! Warehouse Writer
//!
//! Every table goes to `<name>.csv.partial` first and is renamed over
//! `<name>.csv` only after it is flushed and synced, so a rerun replaces
//! earlier output instead of appending to it. Encoding is fixed: UTF-8,
//! comma delimiter, `\n` terminator, quotes only where a field needs them.
//! The SHA-256 of each file is computed while it is written. A table that
//! is abandoned before `finish` leaves no `.partial` file behind.

use crate::error::{EtlError, Result};
use crate::model::Table;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "manifest.json";
const PARTIAL_SUFFIX: &str = ".partial";

/// One finished output table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableArtifact {
    pub name: String,
    pub file: String,
    pub rows: u64,
    pub sha256: String,
}

/// Index of a run's outputs. Contains no timestamps so that identical
/// inputs give an identical manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub tables: Vec<TableArtifact>,
    pub row_cap: Option<u64>,
    pub cap_reached: bool,
}

impl Manifest {
    pub fn table(&self, name: &str) -> Option<&TableArtifact> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| EtlError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        replace_file(&path, content.as_bytes())?;
        Ok(path)
    }
}

/// Removes a `.partial` file on drop unless it was renamed into place
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn commit(mut self, final_path: &Path) -> Result<()> {
        fs::rename(&self.path, final_path).map_err(|e| EtlError::io(final_path, e))?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(file = %self.path.display(), "Removed abandoned partial file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %self.path.display(), error = %e, "Could not remove partial file"),
        }
    }
}

/// Passes bytes through to `inner` while hashing them
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// `writer` is declared first so the file is closed before `partial` drops
pub struct TableWriter<T: Table> {
    writer: csv::Writer<HashingWriter<BufWriter<File>>>,
    partial: PartialFile,
    final_path: PathBuf,
    rows: u64,
    _table: PhantomData<T>,
}

impl<T: Table> TableWriter<T> {
    /// Open a fresh table in `dir` and write its header row
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| EtlError::io(dir, e))?;
        let final_path = dir.join(T::file_name());
        let partial_path = dir.join(format!("{}{}", T::file_name(), PARTIAL_SUFFIX));
        let file = File::create(&partial_path).map_err(|e| EtlError::io(&partial_path, e))?;
        let partial = PartialFile::new(partial_path);

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .delimiter(b',')
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(HashingWriter {
                inner: BufWriter::new(file),
                hasher: Sha256::new(),
            });
        writer
            .write_record(T::HEADER)
            .map_err(|e| EtlError::csv(&partial.path, e))?;

        Ok(Self {
            writer,
            partial,
            final_path,
            rows: 0,
            _table: PhantomData,
        })
    }

    pub fn write(&mut self, row: &T) -> Result<()> {
        self.writer
            .serialize(row)
            .map_err(|e| EtlError::csv(&self.partial.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_all<'a, I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        for row in rows {
            self.write(row)?;
        }
        Ok(())
    }

    /// Flush, sync and move the table into place
    pub fn finish(mut self) -> Result<TableArtifact> {
        let partial = self.partial;
        let partial_path = partial.path.clone();
        self.writer
            .flush()
            .map_err(|e| EtlError::io(&partial_path, e))?;
        let hashing = self
            .writer
            .into_inner()
            .map_err(|e| EtlError::io(&partial_path, io::Error::new(e.error().kind(), e.error().to_string())))?;
        let sha256 = format!("sha256:{:x}", hashing.hasher.finalize());
        let file = hashing
            .inner
            .into_inner()
            .map_err(|e| EtlError::io(&partial_path, e.into_error()))?;
        file.sync_all().map_err(|e| EtlError::io(&partial_path, e))?;
        drop(file);
        partial.commit(&self.final_path)?;

        info!(table = T::NAME, rows = self.rows, "Table written");
        Ok(TableArtifact {
            name: T::NAME.to_string(),
            file: T::file_name(),
            rows: self.rows,
            sha256,
        })
    }
}

/// Write a whole in-memory table
pub fn write_table<T: Table>(dir: &Path, rows: &[T]) -> Result<TableArtifact> {
    let mut writer = TableWriter::<T>::create(dir)?;
    writer.write_all(rows)?;
    writer.finish()
}

fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let partial = path.with_file_name(format!(
        "{}{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or(MANIFEST_FILE),
        PARTIAL_SUFFIX
    ));
    let mut file = File::create(&partial).map_err(|e| EtlError::io(&partial, e))?;
    let guard = PartialFile::new(partial.clone());
    file.write_all(bytes).map_err(|e| EtlError::io(&partial, e))?;
    file.sync_all().map_err(|e| EtlError::io(&partial, e))?;
    drop(file);
    guard.commit(path)
}

/// SHA-256 of a file on disk, in the same form as `TableArtifact::sha256`
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|source| EtlError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| EtlError::io(path, e))?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DateRow, MovieRow, UserRow};
    use chrono::NaiveDate;

    #[test]
    fn test_header_written_for_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_table::<UserRow>(dir.path(), &[]).unwrap();
        assert_eq!(artifact.rows, 0);
        let content = fs::read_to_string(dir.path().join("dim_user.csv")).unwrap();
        assert_eq!(content, "customer_id\n");
    }

    #[test]
    fn test_title_with_comma_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            MovieRow {
                movie_id: 700,
                year_of_release: 1999,
                title: "My, Title, With Commas".to_string(),
            },
            MovieRow {
                movie_id: 701,
                year_of_release: 1800,
                title: "Say \"Hi\"".to_string(),
            },
        ];
        write_table(dir.path(), &rows).unwrap();
        let content = fs::read_to_string(dir.path().join("dim_movie.csv")).unwrap();
        assert_eq!(
            content,
            "movie_id,year_of_release,title\n700,1999,\"My, Title, With Commas\"\n701,1800,\"Say \"\"Hi\"\"\"\n"
        );
    }

    #[test]
    fn test_date_row_layout() {
        let dir = tempfile::tempdir().unwrap();
        let row = DateRow::from_date(NaiveDate::from_ymd_opt(2004, 1, 1).unwrap());
        write_table(dir.path(), &[row]).unwrap();
        let content = fs::read_to_string(dir.path().join("dim_date.csv")).unwrap();
        assert_eq!(
            content,
            "date_key,full_date,year,quarter,month,day,week_of_year\n20040101,2004-01-01,2004,1,1,1,1\n"
        );
    }

    #[test]
    fn test_rewrite_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), &[UserRow { customer_id: 1 }, UserRow { customer_id: 2 }]).unwrap();
        write_table(dir.path(), &[UserRow { customer_id: 3 }]).unwrap();
        let content = fs::read_to_string(dir.path().join("dim_user.csv")).unwrap();
        assert_eq!(content, "customer_id\n3\n");
        assert!(!dir.path().join("dim_user.csv.partial").exists());
    }

    #[test]
    fn test_abandoned_writer_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), &[UserRow { customer_id: 1 }]).unwrap();
        {
            let mut writer = TableWriter::<UserRow>::create(dir.path()).unwrap();
            writer.write(&UserRow { customer_id: 2 }).unwrap();
            assert!(dir.path().join("dim_user.csv.partial").exists());
        }
        assert!(!dir.path().join("dim_user.csv.partial").exists());
        let content = fs::read_to_string(dir.path().join("dim_user.csv")).unwrap();
        assert_eq!(content, "customer_id\n1\n");
    }

    #[test]
    fn test_hash_matches_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_table(dir.path(), &[UserRow { customer_id: 42 }]).unwrap();
        let on_disk = file_sha256(&dir.path().join(&artifact.file)).unwrap();
        assert_eq!(artifact.sha256, on_disk);
        assert!(artifact.sha256.starts_with("sha256:"));
    }

    #[test]
    fn test_manifest_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_table(dir.path(), &[UserRow { customer_id: 7 }]).unwrap();
        let manifest = Manifest {
            tables: vec![artifact],
            row_cap: Some(10),
            cap_reached: false,
        };
        let path = manifest.write(dir.path()).unwrap();
        let back = Manifest::read(&path).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.table("dim_user").unwrap().rows, 1);
        assert!(back.table("fact_rating").is_none());
    }
}
