use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{AmpliconError, Result};

/// One FASTQ record. `qual` keeps the raw ASCII-encoded scores; use
/// [`FastqRecord::phred`] to decode them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    /// Header line without the leading '@'.
    pub header: String,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl FastqRecord {
    /// The read id: first whitespace-delimited token of the header.
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }

    /// Read id without a trailing `/1` or `/2` mate marker.
    pub fn pair_id(&self) -> &str {
        let id = self.id();
        id.strip_suffix("/1")
            .or_else(|| id.strip_suffix("/2"))
            .unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Decoded Phred score at position `i`.
    #[inline]
    pub fn phred(&self, i: usize, offset: u8) -> u8 {
        self.qual[i].saturating_sub(offset)
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

/// Open a text file for buffered reading, decompressing if it ends in ".gz".
pub(crate) fn open_text(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let f = File::open(path).map_err(|source| AmpliconError::InputRead {
        path: path.to_path_buf(),
        source,
    })?;

    let reader: Box<dyn BufRead + Send> = if is_gz(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// Streaming FASTQ reader that also supports .gz (including concatenated
/// gzip members).
pub struct FastqReader {
    reader: Box<dyn BufRead + Send>,
    path: PathBuf,
    line: String,
    line_no: u64,
    records: u64,
}

impl FastqReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = open_text(&path)?;
        Ok(Self::from_reader(reader, path))
    }

    /// Wrap an already-open reader. `path` is only used in error messages.
    pub fn from_reader(reader: Box<dyn BufRead + Send>, path: PathBuf) -> Self {
        Self {
            reader,
            path,
            line: String::new(),
            line_no: 0,
            records: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records successfully read so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    fn next_line(&mut self) -> Result<bool> {
        self.line.clear();
        let n = self
            .reader
            .read_line(&mut self.line)
            .map_err(|source| AmpliconError::InputRead {
                path: self.path.clone(),
                source,
            })?;
        if n > 0 {
            self.line_no += 1;
        }
        Ok(n > 0)
    }

    fn malformed(&self, reason: &str) -> AmpliconError {
        AmpliconError::MalformedRecord {
            path: self.path.clone(),
            line: self.line_no,
            reason: reason.to_string(),
        }
    }

    fn read_record(&mut self) -> Result<Option<FastqRecord>> {
        // 1) header, skipping blank lines between records
        loop {
            if !self.next_line()? {
                return Ok(None);
            }
            if !self.line.trim_end().is_empty() {
                break;
            }
        }
        let header_line = self.line.trim_end();
        let header = match header_line.strip_prefix('@') {
            Some(h) => h.to_string(),
            None => return Err(self.malformed("header does not start with '@'")),
        };

        // 2) sequence
        if !self.next_line()? {
            return Err(self.malformed("record ends after header"));
        }
        let seq = self.line.trim_end().as_bytes().to_vec();

        // 3) plus line
        if !self.next_line()? {
            return Err(self.malformed("record ends after sequence"));
        }
        if !self.line.starts_with('+') {
            return Err(self.malformed("missing '+' separator"));
        }

        // 4) quality; a missing line counts as zero scores
        let qual = if self.next_line()? {
            self.line.trim_end().as_bytes().to_vec()
        } else {
            Vec::new()
        };

        self.records += 1;
        if seq.len() != qual.len() {
            return Err(AmpliconError::TruncatedRead {
                path: self.path.clone(),
                record: self.records,
                bases: seq.len(),
                quals: qual.len(),
            });
        }

        Ok(Some(FastqRecord { header, seq, qual }))
    }
}

impl Iterator for FastqReader {
    type Item = Result<FastqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

fn write_fastq<W: Write>(w: &mut W, header: &str, seq: &[u8], qual: &[u8]) -> io::Result<()> {
    w.write_all(b"@")?;
    w.write_all(header.as_bytes())?;
    w.write_all(b"\n")?;
    w.write_all(seq)?;
    w.write_all(b"\n+\n")?;
    w.write_all(qual)?;
    w.write_all(b"\n")
}

/// Gzip FASTQ writer.
///
/// The gzip header carries no timestamp or file name, so identical records
/// always produce identical bytes.
pub struct FastqWriter {
    inner: GzEncoder<BufWriter<File>>,
    path: PathBuf,
}

impl FastqWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let f = File::create(&path).map_err(|source| AmpliconError::PathUnwritable {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            inner: GzEncoder::new(BufWriter::new(f), Compression::default()),
            path,
        })
    }

    fn unwritable(&self, source: io::Error) -> AmpliconError {
        AmpliconError::PathUnwritable {
            path: self.path.clone(),
            source,
        }
    }

    pub fn write_record(&mut self, header: &str, seq: &[u8], qual: &[u8]) -> Result<()> {
        write_fastq(&mut self.inner, header, seq, qual).map_err(|e| self.unwritable(e))
    }

    /// Flush the gzip trailer and the underlying file.
    pub fn finish(self) -> Result<()> {
        let path = self.path;
        let unwritable = |source| AmpliconError::PathUnwritable {
            path: path.clone(),
            source,
        };
        let mut buf = self.inner.finish().map_err(unwritable)?;
        buf.flush().map_err(unwritable)?;
        Ok(())
    }
}
