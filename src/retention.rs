//src/retention.rs

use serde::{Deserialize, Serialize};

use crate::error::{AmpliconError, Result};
use crate::types::{RetentionStats, SampleFilterResult};

/// Retention ratio of one sample; `None` when it had no input pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRetention {
    pub sample_id: String,
    pub reads_in: u64,
    pub reads_out: u64,
    pub ratio: Option<f64>,
}

/// Cohort statistics plus the per-sample series they were computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub stats: RetentionStats,
    pub per_sample: Vec<SampleRetention>,
    /// Samples with `reads_in == 0`, left out of the ratio statistics.
    pub undefined_samples: Vec<String>,
}

/// Median of a series; the mean of the two middle values when its length is
/// even. `None` for an empty series.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Summarise retention across a cohort.
///
/// Count medians run over every sample's raw counts; ratio median/max/min run
/// over the per-sample ratio series of samples that had input. Must only be
/// called once all samples have been filtered.
pub fn analyze_retention(results: &[SampleFilterResult]) -> Result<RetentionReport> {
    if results.is_empty() {
        return Err(AmpliconError::EmptyCohort);
    }

    let mut per_sample = Vec::with_capacity(results.len());
    let mut undefined_samples = Vec::new();
    let mut ratios = Vec::with_capacity(results.len());

    for r in results {
        let ratio = r.result.retention_ratio_acknowledged();
        match ratio {
            Some(x) => ratios.push(x),
            None => {
                log::warn!("{}: no input pairs, retention is undefined", r.sample_id);
                undefined_samples.push(r.sample_id.clone());
            }
        }
        per_sample.push(SampleRetention {
            sample_id: r.sample_id.clone(),
            reads_in: r.result.reads_in,
            reads_out: r.result.reads_out,
            ratio,
        });
    }

    let reads_in: Vec<f64> = results.iter().map(|r| r.result.reads_in as f64).collect();
    let reads_out: Vec<f64> = results.iter().map(|r| r.result.reads_out as f64).collect();

    let stats = RetentionStats {
        median_reads_in: median(&reads_in).unwrap_or(0.0),
        median_reads_out: median(&reads_out).unwrap_or(0.0),
        median_percent_retained: median(&ratios),
        max_percent_retained: ratios.iter().copied().reduce(f64::max),
        min_percent_retained: ratios.iter().copied().reduce(f64::min),
    };

    Ok(RetentionReport {
        stats,
        per_sample,
        undefined_samples,
    })
}
