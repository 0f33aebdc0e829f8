//src/discovery.rs

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::error::{AmpliconError, Result};
use crate::types::SamplePair;

/// How paired read files are recognised inside a directory.
#[derive(Debug, Clone)]
pub struct DiscoveryPattern<'a> {
    /// e.g. `*_1.fastq.gz`
    pub forward: &'a str,
    /// e.g. `*_2.fastq.gz`
    pub reverse: &'a str,
    /// The sample id is the basename's first token when split on this.
    pub delimiter: char,
}

impl Default for DiscoveryPattern<'_> {
    fn default() -> Self {
        Self {
            forward: "*_1.fastq.gz",
            reverse: "*_2.fastq.gz",
            delimiter: '_',
        }
    }
}

/// Patterns are filename suffixes; a leading `*` is accepted and ignored.
fn matches_pattern(file_name: &str, pattern: &str) -> bool {
    let suffix = pattern.trim_start_matches('*');
    file_name.len() > suffix.len() && file_name.ends_with(suffix)
}

/// Derive a sample id from a file path: basename, split on `delimiter`,
/// first token.
pub fn sample_id_from_path(path: &Path, delimiter: char) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = name.split(delimiter).next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Scan `dir` for forward/reverse read files and pair them up by sorted file
/// name. Read-only.
pub fn discover_samples(dir: &Path, pattern: &DiscoveryPattern<'_>) -> Result<Vec<SamplePair>> {
    let mut forward: Vec<PathBuf> = Vec::new();
    let mut reverse: Vec<PathBuf> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // A file could match both patterns if one suffix ends the other;
        // forward wins.
        if matches_pattern(name, pattern.forward) {
            forward.push(path);
        } else if matches_pattern(name, pattern.reverse) {
            reverse.push(path);
        }
    }

    if forward.is_empty() && reverse.is_empty() {
        return Err(AmpliconError::EmptyDirectory {
            dir: dir.to_path_buf(),
            forward_pattern: pattern.forward.to_string(),
            reverse_pattern: pattern.reverse.to_string(),
        });
    }
    if forward.len() != reverse.len() {
        return Err(AmpliconError::MissingMate(format!(
            "{} forward files but {} reverse files in {}",
            forward.len(),
            reverse.len(),
            dir.display()
        )));
    }

    forward.sort();
    reverse.sort();

    let mut seen = AHashSet::new();
    let mut pairs = Vec::with_capacity(forward.len());
    for (f, r) in forward.into_iter().zip(reverse) {
        let fid = sample_id_from_path(&f, pattern.delimiter)
            .ok_or_else(|| AmpliconError::MissingMate(format!("no sample id in {}", f.display())))?;
        let rid = sample_id_from_path(&r, pattern.delimiter)
            .ok_or_else(|| AmpliconError::MissingMate(format!("no sample id in {}", r.display())))?;
        if fid != rid {
            return Err(AmpliconError::MissingMate(format!(
                "{} pairs with {} but their sample ids differ ('{fid}' vs '{rid}')",
                f.display(),
                r.display()
            )));
        }
        if !seen.insert(fid.clone()) {
            return Err(AmpliconError::DuplicateSampleId(fid));
        }
        pairs.push(SamplePair {
            sample_id: fid,
            forward_path: f,
            reverse_path: r,
        });
    }

    log::info!("Discovered {} sample pair(s) in {}", pairs.len(), dir.display());
    Ok(pairs)
}
