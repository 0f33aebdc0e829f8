// src/error.rs

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the pipeline can report.
///
/// Per-read rejections are *not* errors; they are tallied in
/// [`crate::types::FilterResult`]. Use [`AmpliconError::is_sample_local`] to
/// decide whether a failure should abort the whole run or only the sample it
/// came from.
#[derive(Debug, Error)]
pub enum AmpliconError {
    /// Invalid configuration, reported before any processing begins.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no files in {dir} match '{forward_pattern}' or '{reverse_pattern}'")]
    EmptyDirectory {
        dir: PathBuf,
        forward_pattern: String,
        reverse_pattern: String,
    },

    #[error("forward and reverse files do not pair up: {0}")]
    MissingMate(String),

    #[error("sample id '{0}' is derived from more than one file pair")]
    DuplicateSampleId(String),

    #[error("read file {0} is empty")]
    EmptyReadFile(PathBuf),

    #[error("record {record} in {path}: {bases} bases but {quals} quality scores")]
    TruncatedRead {
        path: PathBuf,
        record: u64,
        bases: usize,
        quals: usize,
    },

    #[error("malformed FASTQ at line {line} of {path}: {reason}")]
    MalformedRecord {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("sample {sample_id}: {forward_reads} forward reads but reverse stream ended after {reverse_reads}")]
    MateCountMismatch {
        sample_id: String,
        forward_reads: u64,
        reverse_reads: u64,
    },

    #[error("sample {sample_id}: pair {pair} has mismatched ids '{forward_id}' / '{reverse_id}'")]
    MateIdMismatch {
        sample_id: String,
        pair: u64,
        forward_id: String,
        reverse_id: String,
    },

    #[error("cannot read {path}: {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {path}: {source}")]
    PathUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sample {0} has no input reads; retention ratio is undefined")]
    DivisionUndefined(String),

    #[error("no filter results to analyze")]
    EmptyCohort,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AmpliconError {
    /// True for input problems confined to one sample (malformed or missing
    /// read data). Everything else is systemic and aborts the run.
    pub fn is_sample_local(&self) -> bool {
        matches!(
            self,
            AmpliconError::TruncatedRead { .. }
                | AmpliconError::MalformedRecord { .. }
                | AmpliconError::MateCountMismatch { .. }
                | AmpliconError::MateIdMismatch { .. }
                | AmpliconError::InputRead { .. }
                | AmpliconError::EmptyReadFile(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AmpliconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_locality() {
        let local = AmpliconError::TruncatedRead {
            path: PathBuf::from("a.fastq"),
            record: 3,
            bases: 10,
            quals: 9,
        };
        assert!(local.is_sample_local());

        let systemic = AmpliconError::PathUnwritable {
            path: PathBuf::from("/out"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!systemic.is_sample_local());
        assert!(!AmpliconError::InvalidConfig("x".into()).is_sample_local());
    }

    #[test]
    fn test_error_messages_name_the_cause() {
        let e = AmpliconError::MateCountMismatch {
            sample_id: "S1".into(),
            forward_reads: 10,
            reverse_reads: 9,
        };
        let msg = e.to_string();
        assert!(msg.contains("S1"));
        assert!(msg.contains("10"));
    }
}
