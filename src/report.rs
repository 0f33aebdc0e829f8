//src/report.rs

use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{AmpliconError, Result};
use crate::types::SampleFilterResult;
use crate::RunSummary;

/// Tab-separated per-sample table: `sample reads.in reads.out pct.retained`.
/// Samples without input show `NA` for the percentage.
pub fn render_filter_table(results: &[SampleFilterResult]) -> String {
    let mut output = String::new();
    output.push_str("sample\treads.in\treads.out\tpct.retained\n");
    for r in results {
        let pct = r
            .result
            .retention_ratio_acknowledged()
            .map(|x| format!("{:.2}", 100.0 * x))
            .unwrap_or_else(|| "NA".to_string());
        writeln!(
            output,
            "{}\t{}\t{}\t{}",
            r.sample_id, r.result.reads_in, r.result.reads_out, pct
        )
        .unwrap();
    }
    output
}

/// Human-readable run summary: counts plus one line per failed sample.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut output = String::new();
    writeln!(
        output,
        "samples attempted: {}, succeeded: {}, failed: {}, skipped: {}",
        summary.attempted, summary.succeeded, summary.failed, summary.skipped
    )
    .unwrap();
    for f in &summary.failures {
        writeln!(output, "  {}: {}", f.sample_id, f.cause).unwrap();
    }
    output
}

/// Pretty-printed JSON of any run artefact.
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(|source| AmpliconError::PathUnwritable {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_text(text: &str, path: &Path) -> Result<()> {
    fs::write(path, text).map_err(|source| AmpliconError::PathUnwritable {
        path: path.to_path_buf(),
        source,
    })
}

/// Pick up to `n` sample ids for plotting, reproducibly for a given seed.
/// The selection keeps the input order.
pub fn select_plot_samples(ids: &[String], n: usize, seed: u64) -> Vec<String> {
    if n >= ids.len() {
        return ids.to_vec();
    }
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut idx: Vec<usize> = (0..ids.len()).collect();
    rng.shuffle(&mut idx);
    let mut chosen: Vec<usize> = idx.into_iter().take(n).collect();
    chosen.sort_unstable();
    chosen.into_iter().map(|i| ids[i].clone()).collect()
}
