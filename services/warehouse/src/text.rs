//! Line-oriented reading of source files
//!
//! Lines are decoded as UTF-8 when valid and with a legacy single-byte
//! encoding otherwise, so a file mixing both still reads cleanly.

use crate::error::{EtlError, Result};
use encoding_rs::Encoding;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const READ_BUFFER_BYTES: usize = 1 << 20;

pub struct LineReader<R> {
    inner: R,
    path: PathBuf,
    encoding: &'static Encoding,
    buf: Vec<u8>,
    line_no: u64,
}

impl LineReader<BufReader<File>> {
    pub fn open(path: &Path, encoding: &'static Encoding) -> Result<Self> {
        let file = File::open(path).map_err(|source| EtlError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(
            BufReader::with_capacity(READ_BUFFER_BYTES, file),
            path,
            encoding,
        ))
    }
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, path: &Path, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            path: path.to_path_buf(),
            encoding,
            buf: Vec::with_capacity(256),
            line_no: 0,
        }
    }

    /// Next line without its terminator, with its 1-based line number
    pub fn next_line(&mut self) -> Result<Option<(u64, Cow<'_, str>)>> {
        self.buf.clear();
        let read = self
            .inner
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| EtlError::io(&self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        self.line_no += 1;

        let mut bytes: &[u8] = &self.buf;
        if self.line_no == 1 {
            bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        }
        if let Some(rest) = bytes.strip_suffix(b"\n") {
            bytes = rest;
        }
        if let Some(rest) = bytes.strip_suffix(b"\r") {
            bytes = rest;
        }

        Ok(Some((self.line_no, decode(bytes, self.encoding))))
    }
}

pub fn decode<'a>(bytes: &'a [u8], fallback: &'static Encoding) -> Cow<'a, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => fallback.decode_without_bom_handling(bytes).0,
    }
}
