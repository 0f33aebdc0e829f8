//src/types.rs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AmpliconError, Result};

/// Which read of a paired-end fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mate {
    Forward,
    Reverse,
}

impl fmt::Display for Mate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mate::Forward => write!(f, "forward"),
            Mate::Reverse => write!(f, "reverse"),
        }
    }
}

/// One value per mate, e.g. `truncLen=(240,160)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatePair<T> {
    pub forward: T,
    pub reverse: T,
}

impl<T: Copy> MatePair<T> {
    pub fn new(forward: T, reverse: T) -> Self {
        Self { forward, reverse }
    }

    /// Same value for both mates.
    pub fn both(value: T) -> Self {
        Self {
            forward: value,
            reverse: value,
        }
    }

    pub fn get(&self, mate: Mate) -> T {
        match mate {
            Mate::Forward => self.forward,
            Mate::Reverse => self.reverse,
        }
    }
}

/// Parses `"F,R"`, or a single value applied to both mates.
impl<T> FromStr for MatePair<T>
where
    T: FromStr + Copy,
    T::Err: fmt::Display,
{
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<T>()
                .map_err(|e| AmpliconError::InvalidConfig(format!("bad value '{part}': {e}")))
        };
        let parts: Vec<&str> = s.split(',').collect();
        match parts.as_slice() {
            [one] => Ok(MatePair::both(parse(*one)?)),
            [f, r] => Ok(MatePair::new(parse(*f)?, parse(*r)?)),
            _ => Err(AmpliconError::InvalidConfig(format!(
                "expected 'F,R' but got '{s}'"
            ))),
        }
    }
}

/// A forward/reverse read file pair belonging to one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePair {
    pub sample_id: String,
    pub forward_path: PathBuf,
    pub reverse_path: PathBuf,
}

/// Input/output pair counts for one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResult {
    pub reads_in: u64,
    pub reads_out: u64,
}

impl FilterResult {
    /// Fraction of pairs retained, in `[0, 1]`.
    ///
    /// Fails with [`AmpliconError::DivisionUndefined`] when the sample had no
    /// input; callers that handle that case should use
    /// [`FilterResult::retention_ratio_acknowledged`].
    pub fn retention_ratio(&self, sample_id: &str) -> Result<f64> {
        self.retention_ratio_acknowledged()
            .ok_or_else(|| AmpliconError::DivisionUndefined(sample_id.to_string()))
    }

    /// `None` when `reads_in == 0`.
    pub fn retention_ratio_acknowledged(&self) -> Option<f64> {
        if self.reads_in == 0 {
            None
        } else {
            Some(self.reads_out as f64 / self.reads_in as f64)
        }
    }
}

/// Why a pair was dropped. Only the first failing check is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TooLong,
    ShorterThanTrimLeft,
    ShorterThanTruncLen,
    BelowMinLen,
    TooManyN,
    BelowMinQ,
    ExpectedErrors,
    Contaminant,
}

/// Per-reason tally of rejected pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub too_long: u64,
    pub shorter_than_trim_left: u64,
    pub shorter_than_trunc_len: u64,
    pub below_min_len: u64,
    pub too_many_n: u64,
    pub below_min_q: u64,
    pub expected_errors: u64,
    pub contaminant: u64,
}

impl RejectionCounts {
    pub fn record(&mut self, reason: RejectReason) {
        let slot = match reason {
            RejectReason::TooLong => &mut self.too_long,
            RejectReason::ShorterThanTrimLeft => &mut self.shorter_than_trim_left,
            RejectReason::ShorterThanTruncLen => &mut self.shorter_than_trunc_len,
            RejectReason::BelowMinLen => &mut self.below_min_len,
            RejectReason::TooManyN => &mut self.too_many_n,
            RejectReason::BelowMinQ => &mut self.below_min_q,
            RejectReason::ExpectedErrors => &mut self.expected_errors,
            RejectReason::Contaminant => &mut self.contaminant,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u64 {
        self.too_long
            + self.shorter_than_trim_left
            + self.shorter_than_trunc_len
            + self.below_min_len
            + self.too_many_n
            + self.below_min_q
            + self.expected_errors
            + self.contaminant
    }
}

/// Everything the engine reports for one successfully filtered sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFilterResult {
    pub sample_id: String,
    pub result: FilterResult,
    pub rejections: RejectionCounts,
    pub forward_output: PathBuf,
    pub reverse_output: PathBuf,
}

/// Cohort-level retention summary.
///
/// Count medians cover every sample; ratio statistics only cover samples with
/// `reads_in > 0` and are `None` when there are none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionStats {
    pub median_reads_in: f64,
    pub median_reads_out: f64,
    pub median_percent_retained: Option<f64>,
    pub max_percent_retained: Option<f64>,
    pub min_percent_retained: Option<f64>,
}

/// Summary of quality scores observed at one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: usize,
    /// Reads long enough to reach this cycle.
    pub count: u64,
    pub mean: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub min: u8,
    pub max: u8,
}

/// Per-cycle quality distribution of one read set (or a pooled set of them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// Sample id, file name, or `"aggregate"`.
    pub label: String,
    pub mate: Mate,
    pub reads: u64,
    pub cycles: Vec<CycleSummary>,
}
