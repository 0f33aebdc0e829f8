// src/lib.rs
pub mod types;
pub mod error;
pub mod fastq;
pub mod discovery;
pub mod profile;
pub mod phix;
pub mod filter;
pub mod retention;
pub mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::discovery::{discover_samples, DiscoveryPattern};
use crate::error::{AmpliconError, Result};
use crate::filter::{FilterConfig, FilterEngine};
use crate::profile::{profile_read_sets, profile_samples, ProfileMode, ProfileOptions};
use crate::retention::{analyze_retention, RetentionReport};
use crate::types::{Mate, QualityProfile, SampleFilterResult, SamplePair};

/// Everything needed for one run. Loaded from JSON and/or built from CLI
/// flags, then passed down read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub forward_pattern: String,
    pub reverse_pattern: String,
    pub delimiter: char,
    /// Samples filtered concurrently; 0 uses every core.
    pub threads: usize,
    pub filter: FilterConfig,
    /// Build pre- and post-filter quality profiles.
    pub profile: bool,
    /// Cap reads per file when profiling (approximate, plotting only).
    pub profile_max_reads: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("filtered"),
            forward_pattern: "*_1.fastq.gz".to_string(),
            reverse_pattern: "*_2.fastq.gz".to_string(),
            delimiter: '_',
            threads: 0,
            filter: FilterConfig::default(),
            profile: false,
            profile_max_reads: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AmpliconError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            AmpliconError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
        })
    }
}

/// Cooperative cancellation, checked before each sample starts. Only library
/// callers trip it; the CLI binary runs to completion or is killed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFailure {
    pub sample_id: String,
    pub cause: String,
}

/// Attempted / succeeded / failed counts for a run, with each failure's cause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Never started because the run was cancelled.
    pub skipped: usize,
    pub failures: Vec<SampleFailure>,
}

/// Result of filtering a batch of samples, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<SampleFilterResult>,
    pub summary: RunSummary,
}

enum SampleOutcome {
    Done(SampleFilterResult),
    Failed(SampleFailure),
    Skipped,
}

/// Filter samples concurrently on a pool of `threads` workers.
///
/// A sample with bad input is recorded as a failure and the rest carry on.
/// Any other error stops new samples from starting and is returned once the
/// in-flight ones finish.
pub fn filter_samples(
    engine: &FilterEngine,
    samples: &[SamplePair],
    out_dir: &Path,
    threads: usize,
    cancel: &CancellationToken,
    progress: Option<&(dyn Fn(&str) + Sync)>,
) -> Result<BatchOutcome> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| AmpliconError::InvalidConfig(format!("cannot start worker pool: {e}")))?;

    let stop = AtomicBool::new(false);
    let fatal: Mutex<Option<AmpliconError>> = Mutex::new(None);
    let outcomes: Mutex<Vec<(usize, SampleOutcome)>> = Mutex::new(Vec::with_capacity(samples.len()));

    pool.install(|| {
        samples.par_iter().enumerate().for_each(|(idx, sample)| {
            if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
                outcomes.lock().push((idx, SampleOutcome::Skipped));
                return;
            }

            let outcome = match engine.filter_sample(sample, out_dir) {
                Ok(result) => SampleOutcome::Done(result),
                Err(e) if e.is_sample_local() => {
                    log::warn!("{}: sample failed: {e}", sample.sample_id);
                    SampleOutcome::Failed(SampleFailure {
                        sample_id: sample.sample_id.clone(),
                        cause: e.to_string(),
                    })
                }
                Err(e) => {
                    log::error!("{}: aborting run: {e}", sample.sample_id);
                    stop.store(true, Ordering::SeqCst);
                    fatal.lock().get_or_insert(e);
                    return;
                }
            };
            outcomes.lock().push((idx, outcome));

            if let Some(tick) = progress {
                tick(&sample.sample_id);
            }
        });
    });

    if let Some(e) = fatal.into_inner() {
        return Err(e);
    }

    let mut outcomes = outcomes.into_inner();
    outcomes.sort_by_key(|(idx, _)| *idx);

    let mut batch = BatchOutcome::default();
    for (_, outcome) in outcomes {
        match outcome {
            SampleOutcome::Done(r) => {
                batch.summary.attempted += 1;
                batch.summary.succeeded += 1;
                batch.results.push(r);
            }
            SampleOutcome::Failed(f) => {
                batch.summary.attempted += 1;
                batch.summary.failed += 1;
                batch.summary.failures.push(f);
            }
            SampleOutcome::Skipped => batch.summary.skipped += 1,
        }
    }

    if batch.summary.skipped > 0 {
        log::warn!("Run cancelled; {} sample(s) not started", batch.summary.skipped);
    }
    Ok(batch)
}

/// Pre- and post-filter quality profiles, per sample and pooled, for both mates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSet {
    pub pre_filter: Vec<QualityProfile>,
    pub post_filter: Vec<QualityProfile>,
}

/// Profile the inputs and outputs of the samples that filtered successfully.
pub fn build_profiles(
    samples: &[SamplePair],
    results: &[SampleFilterResult],
    opts: &ProfileOptions,
) -> Result<ProfileSet> {
    let mut set = ProfileSet::default();
    if results.is_empty() {
        return Ok(set);
    }

    let done: Vec<SamplePair> = samples
        .iter()
        .filter(|s| results.iter().any(|r| r.sample_id == s.sample_id))
        .cloned()
        .collect();

    for mate in [Mate::Forward, Mate::Reverse] {
        for mode in [ProfileMode::PerSample, ProfileMode::Aggregate] {
            set.pre_filter.extend(profile_samples(&done, mate, mode, opts)?);

            let outputs: Vec<PathBuf> = results
                .iter()
                .map(|r| match mate {
                    Mate::Forward => r.forward_output.clone(),
                    Mate::Reverse => r.reverse_output.clone(),
                })
                .collect();
            let mut post = profile_read_sets(&outputs, mate, mode, opts)?;
            if mode == ProfileMode::PerSample {
                for (p, r) in post.iter_mut().zip(results) {
                    p.label = r.sample_id.clone();
                }
            }
            set.post_filter.extend(post);
        }
    }
    Ok(set)
}

/// Everything a run produces, ready for a reporting front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub config: PipelineConfig,
    pub samples: Vec<SamplePair>,
    pub results: Vec<SampleFilterResult>,
    pub retention: Option<RetentionReport>,
    pub profiles: Option<ProfileSet>,
    pub summary: RunSummary,
}

/// Unified entry point: discover samples, filter them, then profile and
/// summarise retention.
///
/// Configuration errors are reported before any file is touched. Retention is
/// only computed after every sample has finished.
pub fn run_pipeline(
    config: &PipelineConfig,
    cancel: &CancellationToken,
    progress: Option<&(dyn Fn(&str) + Sync)>,
) -> Result<RunOutput> {
    // 1. Validate config and set up the engine
    let engine = FilterEngine::new(config.filter.clone())?;

    // 2. Find sample pairs
    let pattern = DiscoveryPattern {
        forward: &config.forward_pattern,
        reverse: &config.reverse_pattern,
        delimiter: config.delimiter,
    };
    let samples = discover_samples(&config.input_dir, &pattern)?;

    fs::create_dir_all(&config.output_dir).map_err(|source| AmpliconError::PathUnwritable {
        path: config.output_dir.clone(),
        source,
    })?;

    // 3. Filter every sample
    let batch = filter_samples(
        &engine,
        &samples,
        &config.output_dir,
        config.threads,
        cancel,
        progress,
    )?;

    // 4. Quality profiles, if asked for
    let profiles = if config.profile {
        let opts = ProfileOptions {
            phred_offset: config.filter.phred_offset,
            max_reads: config.profile_max_reads,
        };
        Some(build_profiles(&samples, &batch.results, &opts)?)
    } else {
        None
    };

    // 5. Retention across the cohort
    let retention = if batch.results.is_empty() {
        None
    } else {
        Some(analyze_retention(&batch.results)?)
    };

    log::info!(
        "Run finished: {} attempted, {} succeeded, {} failed",
        batch.summary.attempted,
        batch.summary.succeeded,
        batch.summary.failed
    );

    Ok(RunOutput {
        config: config.clone(),
        samples,
        results: batch.results,
        retention,
        profiles,
        summary: batch.summary,
    })
}
