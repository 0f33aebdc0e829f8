//src/profile.rs

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::{AmpliconError, Result};
use crate::fastq::FastqReader;
use crate::types::{CycleSummary, Mate, QualityProfile, SamplePair};

/// Highest Phred score tracked; anything above is counted here.
pub const MAX_SCORE: usize = 93;

/// Emit one profile per read set, or one pooled profile for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMode {
    PerSample,
    Aggregate,
}

#[derive(Debug, Clone, Copy)]
pub struct ProfileOptions {
    pub phred_offset: u8,
    /// Only look at the first `n` reads of each file. Profiles built this way
    /// are approximate and meant for plotting only.
    pub max_reads: Option<u64>,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            phred_offset: 33,
            max_reads: None,
        }
    }
}

/// Exact per-cycle score histograms.
///
/// Pooling two accumulators adds their histograms, so an aggregate summary is
/// computed over the union of observations rather than over per-set summaries.
#[derive(Debug, Clone, Default)]
pub struct QualityAccumulator {
    histograms: Vec<[u64; MAX_SCORE + 1]>,
    reads: u64,
}

impl QualityAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add decoded Phred scores of one read.
    pub fn add_scores(&mut self, scores: impl IntoIterator<Item = u8>) {
        for (i, q) in scores.into_iter().enumerate() {
            if i >= self.histograms.len() {
                self.histograms.push([0; MAX_SCORE + 1]);
            }
            self.histograms[i][(q as usize).min(MAX_SCORE)] += 1;
        }
        self.reads += 1;
    }

    pub fn merge(mut self, other: QualityAccumulator) -> QualityAccumulator {
        if other.histograms.len() > self.histograms.len() {
            self.histograms.resize(other.histograms.len(), [0; MAX_SCORE + 1]);
        }
        for (mine, theirs) in self.histograms.iter_mut().zip(other.histograms.iter()) {
            for (a, b) in mine.iter_mut().zip(theirs.iter()) {
                *a += *b;
            }
        }
        self.reads += other.reads;
        self
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn summarize(&self, label: &str, mate: Mate) -> QualityProfile {
        let cycles = self
            .histograms
            .iter()
            .enumerate()
            .filter_map(|(cycle, hist)| summarize_histogram(cycle, hist))
            .collect();

        QualityProfile {
            label: label.to_string(),
            mate,
            reads: self.reads,
            cycles,
        }
    }
}

/// The k-th smallest observation (0-based) in a histogram.
fn order_statistic(hist: &[u64], k: u64) -> usize {
    let mut seen = 0u64;
    for (score, &n) in hist.iter().enumerate() {
        seen += n;
        if seen > k {
            return score;
        }
    }
    hist.len() - 1
}

/// Sample quantile with linear interpolation between order statistics
/// (Hyndman & Fan type 7).
fn quantile(hist: &[u64], total: u64, p: f64) -> f64 {
    let h = (total - 1) as f64 * p;
    let lo = h.floor();
    let lo_val = order_statistic(hist, lo as u64) as f64;
    let hi_val = order_statistic(hist, h.ceil() as u64) as f64;
    lo_val + (h - lo) * (hi_val - lo_val)
}

fn summarize_histogram(cycle: usize, hist: &[u64; MAX_SCORE + 1]) -> Option<CycleSummary> {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return None;
    }
    let weighted: u64 = hist
        .iter()
        .enumerate()
        .map(|(score, &n)| score as u64 * n)
        .sum();
    let min = hist.iter().position(|&n| n > 0)? as u8;
    let max = hist.iter().rposition(|&n| n > 0)? as u8;

    Some(CycleSummary {
        cycle,
        count: total,
        mean: weighted as f64 / total as f64,
        q25: quantile(hist, total, 0.25),
        median: quantile(hist, total, 0.5),
        q75: quantile(hist, total, 0.75),
        min,
        max,
    })
}

/// Stream one read file into an accumulator.
pub fn accumulate_file(path: &Path, opts: &ProfileOptions) -> Result<QualityAccumulator> {
    let mut acc = QualityAccumulator::new();
    let offset = opts.phred_offset;
    for record in FastqReader::open(path)? {
        if opts.max_reads.is_some_and(|max| acc.reads() >= max) {
            break;
        }
        let record = record?;
        acc.add_scores(record.qual.iter().map(|&q| q.saturating_sub(offset)));
    }
    log::debug!("Profiled {} reads from {}", acc.reads(), path.display());
    Ok(acc)
}

/// Profile a list of read files for one mate.
///
/// Labels are the file names in per-sample mode and `"aggregate"` otherwise.
pub fn profile_read_sets(
    paths: &[PathBuf],
    mate: Mate,
    mode: ProfileMode,
    opts: &ProfileOptions,
) -> Result<Vec<QualityProfile>> {
    let labels: Vec<String> = paths
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect();
    profile_labelled(paths, &labels, mate, mode, opts)
}

/// Like [`profile_read_sets`], but labels per-sample profiles by sample id.
pub fn profile_samples(
    samples: &[SamplePair],
    mate: Mate,
    mode: ProfileMode,
    opts: &ProfileOptions,
) -> Result<Vec<QualityProfile>> {
    let paths: Vec<PathBuf> = samples
        .iter()
        .map(|s| match mate {
            Mate::Forward => s.forward_path.clone(),
            Mate::Reverse => s.reverse_path.clone(),
        })
        .collect();
    let labels: Vec<String> = samples.iter().map(|s| s.sample_id.clone()).collect();
    profile_labelled(&paths, &labels, mate, mode, opts)
}

fn profile_labelled(
    paths: &[PathBuf],
    labels: &[String],
    mate: Mate,
    mode: ProfileMode,
    opts: &ProfileOptions,
) -> Result<Vec<QualityProfile>> {
    if paths.is_empty() {
        return Err(AmpliconError::InvalidConfig(
            "quality profiling needs at least one read file".to_string(),
        ));
    }

    match mode {
        ProfileMode::PerSample => paths
            .par_iter()
            .zip(labels.par_iter())
            .map(|(path, label)| -> Result<QualityProfile> {
                Ok(accumulate_file(path, opts)?.summarize(label, mate))
            })
            .collect(),
        ProfileMode::Aggregate => {
            let pooled = paths
                .par_iter()
                .map(|path| accumulate_file(path, opts))
                .try_reduce(QualityAccumulator::new, |a, b| Ok(a.merge(b)))?;
            Ok(vec![pooled.summarize("aggregate", mate)])
        }
    }
}
