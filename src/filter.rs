//src/filter.rs

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AmpliconError, Result};
use crate::fastq::{FastqReader, FastqRecord, FastqWriter};
use crate::phix::ContaminantScreen;
use crate::types::{
    FilterResult, Mate, MatePair, RejectReason, RejectionCounts, SampleFilterResult, SamplePair,
};

/// Immutable trimming and filtering policy, shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Bases removed unconditionally from the 5' end.
    pub trim_left: MatePair<usize>,
    /// Exact output length; shorter reads are rejected. 0 disables.
    pub trunc_len: MatePair<usize>,
    /// Most `N` bases tolerated in a mate.
    pub max_n: usize,
    /// Expected-error ceiling per mate. Infinite disables; serialised as null.
    #[serde(serialize_with = "serialize_limits", deserialize_with = "deserialize_limits")]
    pub max_ee: MatePair<f64>,
    /// Truncate at the first base whose score is at or below this.
    pub trunc_q: u8,
    /// Drop pairs where either mate hits the contaminant reference.
    pub remove_phix: bool,
    /// FASTA used instead of the built-in phiX174 fragments.
    pub phix_reference: Option<PathBuf>,
    /// Minimum final mate length.
    pub min_len: usize,
    /// Reject mates longer than this before any trimming.
    pub max_len: Option<usize>,
    /// Reject pairs with any surviving score below this.
    pub min_q: u8,
    /// Require forward and reverse read ids to agree.
    pub match_ids: bool,
    pub phred_offset: u8,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            trim_left: MatePair::both(0),
            trunc_len: MatePair::both(0),
            max_n: 0,
            max_ee: MatePair::both(f64::INFINITY),
            trunc_q: 2,
            remove_phix: true,
            phix_reference: None,
            min_len: 20,
            max_len: None,
            min_q: 0,
            match_ids: false,
            phred_offset: 33,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Limits {
    forward: Option<f64>,
    reverse: Option<f64>,
}

fn serialize_limits<S: Serializer>(v: &MatePair<f64>, s: S) -> std::result::Result<S::Ok, S::Error> {
    let finite = |x: f64| if x.is_finite() { Some(x) } else { None };
    Limits {
        forward: finite(v.forward),
        reverse: finite(v.reverse),
    }
    .serialize(s)
}

fn deserialize_limits<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<MatePair<f64>, D::Error> {
    let l = Limits::deserialize(d)?;
    Ok(MatePair::new(
        l.forward.unwrap_or(f64::INFINITY),
        l.reverse.unwrap_or(f64::INFINITY),
    ))
}

impl FilterConfig {
    /// Reject settings that are contradictory or would discard every read.
    pub fn validate(&self) -> Result<()> {
        for mate in [Mate::Forward, Mate::Reverse] {
            let trim_left = self.trim_left.get(mate);
            let trunc_len = self.trunc_len.get(mate);
            let max_ee = self.max_ee.get(mate);

            if trunc_len > 0 && trim_left >= trunc_len {
                return Err(AmpliconError::InvalidConfig(format!(
                    "{mate} trim_left ({trim_left}) must be smaller than trunc_len ({trunc_len})"
                )));
            }
            if max_ee.is_nan() || max_ee < 0.0 {
                return Err(AmpliconError::InvalidConfig(format!(
                    "{mate} max_ee must be non-negative, got {max_ee}"
                )));
            }
            if let Some(max_len) = self.max_len {
                if trim_left + trunc_len > max_len {
                    return Err(AmpliconError::InvalidConfig(format!(
                        "max_len ({max_len}) is below {mate} trim_left + trunc_len ({})",
                        trim_left + trunc_len
                    )));
                }
            }
        }
        if self.phred_offset != 33 && self.phred_offset != 64 {
            return Err(AmpliconError::InvalidConfig(format!(
                "phred_offset must be 33 or 64, got {}",
                self.phred_offset
            )));
        }
        Ok(())
    }
}

/// A surviving mate: a window into the original record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimmedRead<'a> {
    pub header: &'a str,
    pub seq: &'a [u8],
    pub qual: &'a [u8],
}

impl<'a> TrimmedRead<'a> {
    fn window(rec: &'a FastqRecord, start: usize, end: usize) -> Self {
        Self {
            header: &rec.header,
            seq: &rec.seq[start..end],
            qual: &rec.qual[start..end],
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

pub type PairOutcome<'a> = std::result::Result<(TrimmedRead<'a>, TrimmedRead<'a>), RejectReason>;

/// Applies a [`FilterConfig`] to read pairs and whole samples.
pub struct FilterEngine {
    config: FilterConfig,
    screen: Option<ContaminantScreen>,
    /// Error probability indexed by raw quality byte.
    error_prob: [f64; 256],
}

impl FilterEngine {
    /// Validate `config` and load the contaminant reference if it is needed.
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;

        let screen = if config.remove_phix {
            let screen = match &config.phix_reference {
                Some(path) => ContaminantScreen::from_fasta(path)?,
                None => ContaminantScreen::phix()?,
            };
            log::info!("Contaminant screen ready ({} words)", screen.word_count());
            Some(screen)
        } else {
            None
        };

        let mut error_prob = [0f64; 256];
        for (byte, p) in error_prob.iter_mut().enumerate() {
            let q = (byte as u8).saturating_sub(config.phred_offset);
            *p = 10f64.powf(-(q as f64) / 10.0);
        }

        Ok(Self {
            config,
            screen,
            error_prob,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Sum of per-base error probabilities for raw quality bytes.
    pub fn expected_errors(&self, qual: &[u8]) -> f64 {
        qual.iter().map(|&b| self.error_prob[b as usize]).sum()
    }

    /// Length rules for one mate: max length, left trim, quality truncation,
    /// then the trunc_len floor/ceiling and minimum length.
    fn trim_mate<'a>(
        &self,
        rec: &'a FastqRecord,
        mate: Mate,
    ) -> std::result::Result<TrimmedRead<'a>, RejectReason> {
        let cfg = &self.config;

        if cfg.max_len.is_some_and(|max| rec.len() > max) {
            return Err(RejectReason::TooLong);
        }

        let start = cfg.trim_left.get(mate);
        if rec.len() < start {
            return Err(RejectReason::ShorterThanTrimLeft);
        }

        let mut end = (start..rec.len())
            .find(|&i| rec.phred(i, cfg.phred_offset) <= cfg.trunc_q)
            .unwrap_or(rec.len());

        // A set trunc_len fixes the output length, so min_len never exceeds it.
        let trunc_len = cfg.trunc_len.get(mate);
        let mut min_len = cfg.min_len;
        if trunc_len > 0 {
            if end - start < trunc_len {
                return Err(RejectReason::ShorterThanTruncLen);
            }
            end = start + trunc_len;
            min_len = min_len.min(trunc_len);
        }

        if end - start < min_len.max(1) {
            return Err(RejectReason::BelowMinLen);
        }

        Ok(TrimmedRead::window(rec, start, end))
    }

    fn mate_checks(&self, read: &TrimmedRead<'_>, mate: Mate) -> std::result::Result<(), RejectReason> {
        let cfg = &self.config;
        let n_count = read.seq.iter().filter(|&&b| b == b'N' || b == b'n').count();
        if n_count > cfg.max_n {
            return Err(RejectReason::TooManyN);
        }
        if cfg.min_q > 0
            && read
                .qual
                .iter()
                .any(|&b| b.saturating_sub(cfg.phred_offset) < cfg.min_q)
        {
            return Err(RejectReason::BelowMinQ);
        }
        if self.expected_errors(read.qual) > cfg.max_ee.get(mate) {
            return Err(RejectReason::ExpectedErrors);
        }
        Ok(())
    }

    /// Decide the fate of one read pair. Rejection reports the first failing
    /// rule; the contaminant screen runs last.
    pub fn filter_pair<'a>(&self, fwd: &'a FastqRecord, rev: &'a FastqRecord) -> PairOutcome<'a> {
        let f = self.trim_mate(fwd, Mate::Forward)?;
        let r = self.trim_mate(rev, Mate::Reverse)?;

        self.mate_checks(&f, Mate::Forward)?;
        self.mate_checks(&r, Mate::Reverse)?;

        if let Some(screen) = &self.screen {
            if screen.is_contaminant(f.seq) || screen.is_contaminant(r.seq) {
                return Err(RejectReason::Contaminant);
            }
        }

        Ok((f, r))
    }

    /// Filter one sample's read pair in lock-step into `out_dir`.
    ///
    /// Outputs are written under a `.partial` name and renamed once complete;
    /// on any error the partial files are removed.
    pub fn filter_sample(&self, sample: &SamplePair, out_dir: &Path) -> Result<SampleFilterResult> {
        let (forward_output, reverse_output) = output_paths(out_dir, &sample.sample_id);
        let forward_partial = partial_path(&forward_output);
        let reverse_partial = partial_path(&reverse_output);

        fs::create_dir_all(out_dir).map_err(|source| AmpliconError::PathUnwritable {
            path: out_dir.to_path_buf(),
            source,
        })?;

        let outcome = self.stream_pairs(sample, &forward_partial, &reverse_partial);
        let (result, rejections) = match outcome {
            Ok(counts) => counts,
            Err(e) => {
                // Nothing partial survives a failed sample.
                let _ = fs::remove_file(&forward_partial);
                let _ = fs::remove_file(&reverse_partial);
                return Err(e);
            }
        };

        if let Err(source) = fs::rename(&forward_partial, &forward_output) {
            let _ = fs::remove_file(&forward_partial);
            let _ = fs::remove_file(&reverse_partial);
            return Err(AmpliconError::PathUnwritable {
                path: forward_output,
                source,
            });
        }
        if let Err(source) = fs::rename(&reverse_partial, &reverse_output) {
            // never leave a forward output without its mate
            let _ = fs::remove_file(&forward_output);
            let _ = fs::remove_file(&reverse_partial);
            return Err(AmpliconError::PathUnwritable {
                path: reverse_output,
                source,
            });
        }

        log::info!(
            "{}: {} of {} pairs retained",
            sample.sample_id,
            result.reads_out,
            result.reads_in
        );

        Ok(SampleFilterResult {
            sample_id: sample.sample_id.clone(),
            result,
            rejections,
            forward_output,
            reverse_output,
        })
    }

    fn stream_pairs(
        &self,
        sample: &SamplePair,
        forward_out: &Path,
        reverse_out: &Path,
    ) -> Result<(FilterResult, RejectionCounts)> {
        for path in [&sample.forward_path, &sample.reverse_path] {
            let meta = fs::metadata(path).map_err(|source| AmpliconError::InputRead {
                path: path.clone(),
                source,
            })?;
            if meta.len() == 0 {
                return Err(AmpliconError::EmptyReadFile(path.clone()));
            }
        }

        let mut fwd_reader = FastqReader::open(&sample.forward_path)?;
        let mut rev_reader = FastqReader::open(&sample.reverse_path)?;
        let mut fwd_writer = FastqWriter::create(forward_out)?;
        let mut rev_writer = FastqWriter::create(reverse_out)?;

        let mut result = FilterResult::default();
        let mut rejections = RejectionCounts::default();

        loop {
            let (fwd, rev) = match (fwd_reader.next(), rev_reader.next()) {
                (None, None) => break,
                (Some(f), Some(r)) => (f?, r?),
                (Some(f), None) => {
                    f?;
                    return Err(self.mate_count_mismatch(sample, &fwd_reader, &rev_reader));
                }
                (None, Some(r)) => {
                    r?;
                    return Err(self.mate_count_mismatch(sample, &fwd_reader, &rev_reader));
                }
            };

            result.reads_in += 1;

            if self.config.match_ids && fwd.pair_id() != rev.pair_id() {
                return Err(AmpliconError::MateIdMismatch {
                    sample_id: sample.sample_id.clone(),
                    pair: result.reads_in,
                    forward_id: fwd.id().to_string(),
                    reverse_id: rev.id().to_string(),
                });
            }

            match self.filter_pair(&fwd, &rev) {
                Ok((f, r)) => {
                    fwd_writer.write_record(f.header, f.seq, f.qual)?;
                    rev_writer.write_record(r.header, r.seq, r.qual)?;
                    result.reads_out += 1;
                }
                Err(reason) => rejections.record(reason),
            }
        }

        fwd_writer.finish()?;
        rev_writer.finish()?;

        Ok((result, rejections))
    }

    fn mate_count_mismatch(
        &self,
        sample: &SamplePair,
        fwd: &FastqReader,
        rev: &FastqReader,
    ) -> AmpliconError {
        AmpliconError::MateCountMismatch {
            sample_id: sample.sample_id.clone(),
            forward_reads: fwd.records_read(),
            reverse_reads: rev.records_read(),
        }
    }
}

/// Deterministic filtered-output names for a sample.
pub fn output_paths(out_dir: &Path, sample_id: &str) -> (PathBuf, PathBuf) {
    (
        out_dir.join(format!("{sample_id}_F_filt.fastq.gz")),
        out_dir.join(format!("{sample_id}_R_filt.fastq.gz")),
    )
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn q(score: u8) -> u8 {
        score + 33
    }

    fn record(id: &str, seq: &str, score: u8) -> FastqRecord {
        FastqRecord {
            header: id.to_string(),
            seq: seq.as_bytes().to_vec(),
            qual: vec![q(score); seq.len()],
        }
    }

    fn base_config() -> FilterConfig {
        FilterConfig {
            remove_phix: false,
            min_len: 1,
            ..FilterConfig::default()
        }
    }

    fn engine(cfg: FilterConfig) -> FilterEngine {
        FilterEngine::new(cfg).unwrap()
    }

    #[test]
    fn test_validate_rejects_trim_left_at_or_above_trunc_len() {
        let cfg = FilterConfig {
            trim_left: MatePair::new(10, 0),
            trunc_len: MatePair::new(10, 0),
            ..base_config()
        };
        assert!(matches!(cfg.validate(), Err(AmpliconError::InvalidConfig(_))));

        let ok = FilterConfig {
            trim_left: MatePair::new(9, 0),
            trunc_len: MatePair::new(10, 0),
            ..base_config()
        };
        assert!(ok.validate().is_ok());
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_max_ee() {
        let cfg = FilterConfig {
            max_ee: MatePair::new(2.0, -1.0),
            ..base_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_scenario_a_trim_then_cap() {
        let cfg = FilterConfig {
            trim_left: MatePair::new(17, 0),
            trunc_len: MatePair::new(249, 0),
            ..base_config()
        };
        let e = engine(cfg);
        let seq: String = "ACGT".repeat(75);
        let f = record("r1", &seq, 38);
        let r = record("r1", &seq, 38);
        let (tf, tr) = e.filter_pair(&f, &r).unwrap();
        assert_eq!(tf.len(), 249);
        assert_eq!(tf.seq, &f.seq[17..266]);
        assert_eq!(tr.len(), 300);
    }

    #[test]
    fn test_trunc_len_boundary() {
        let cfg = FilterConfig {
            trim_left: MatePair::both(5),
            trunc_len: MatePair::both(20),
            ..base_config()
        };
        let e = engine(cfg);

        // exactly trunc_len after the left trim
        let exact = record("r", &"A".repeat(25), 38);
        assert!(e.filter_pair(&exact, &exact).is_ok());

        let short = record("r", &"A".repeat(24), 38);
        assert_eq!(
            e.filter_pair(&short, &exact).unwrap_err(),
            RejectReason::ShorterThanTruncLen
        );
    }

    #[test]
    fn test_short_trunc_len_with_default_min_len() {
        let cfg = FilterConfig {
            trunc_len: MatePair::both(10),
            remove_phix: false,
            ..FilterConfig::default()
        };
        assert!(cfg.validate().is_ok());
        let e = engine(cfg);

        let f = record("r", "ACGTACGTACGT", 38);
        let (tf, tr) = e.filter_pair(&f, &f).unwrap();
        assert_eq!(tf.len(), 10);
        assert_eq!(tr.len(), 10);

        // without a cap the default floor of 20 still applies
        let uncapped = engine(FilterConfig {
            remove_phix: false,
            ..FilterConfig::default()
        });
        assert_eq!(uncapped.filter_pair(&f, &f).unwrap_err(), RejectReason::BelowMinLen);
    }

    #[test]
    fn test_shorter_than_trim_left() {
        let cfg = FilterConfig {
            trim_left: MatePair::new(0, 10),
            ..base_config()
        };
        let e = engine(cfg);
        let f = record("r", "ACGTACGTACGT", 38);
        let r = record("r", "ACGTACG", 38);
        assert_eq!(e.filter_pair(&f, &r).unwrap_err(), RejectReason::ShorterThanTrimLeft);
    }

    #[test]
    fn test_quality_truncation_happens_before_trunc_len() {
        let cfg = FilterConfig {
            trunc_len: MatePair::both(8),
            trunc_q: 2,
            ..base_config()
        };
        let e = engine(cfg);
        let mut f = record("r", "ACGTACGTACGT", 38);
        let r = record("r", "ACGTACGTACGT", 38);

        // a Q2 base at position 9 leaves 9 bases, enough for the cap
        f.qual[9] = q(2);
        let (tf, _) = e.filter_pair(&f, &r).unwrap();
        assert_eq!(tf.len(), 8);

        // a Q2 base at position 6 leaves only 6 bases
        f.qual[6] = q(2);
        assert_eq!(e.filter_pair(&f, &r).unwrap_err(), RejectReason::ShorterThanTruncLen);
    }

    #[test]
    fn test_quality_truncation_without_cap() {
        let e = engine(base_config());
        let mut f = record("r", "ACGTACGTAC", 38);
        f.qual[4] = q(1);
        let r = record("r", "ACGTACGTAC", 38);
        let (tf, tr) = e.filter_pair(&f, &r).unwrap();
        assert_eq!(tf.seq, b"ACGT");
        assert_eq!(tr.len(), 10);
    }

    #[test]
    fn test_scenario_b_single_n_with_max_n_zero() {
        let e = engine(base_config());
        let f = record("r", "ACGTNACGT", 38);
        let r = record("r", "ACGTACGTA", 38);
        assert_eq!(e.filter_pair(&f, &r).unwrap_err(), RejectReason::TooManyN);

        let lenient = engine(FilterConfig {
            max_n: 1,
            ..base_config()
        });
        assert!(lenient.filter_pair(&f, &r).is_ok());
    }

    #[test]
    fn test_expected_error_boundary() {
        let mut f = record("r", "ACGTACGTAC", 20);
        f.qual[3] = q(11);
        f.qual[7] = q(7);
        let r = record("r", "ACGTACGTAC", 38);

        let probe = engine(base_config());
        let ee = probe.expected_errors(&f.qual);

        let at_limit = engine(FilterConfig {
            max_ee: MatePair::new(ee, f64::INFINITY),
            ..base_config()
        });
        assert!(at_limit.filter_pair(&f, &r).is_ok());

        let below = engine(FilterConfig {
            max_ee: MatePair::new(ee - 1e-9, f64::INFINITY),
            ..base_config()
        });
        assert_eq!(below.filter_pair(&f, &r).unwrap_err(), RejectReason::ExpectedErrors);
    }

    #[test]
    fn test_expected_errors_are_per_mate() {
        // each mate has EE = 10 * 0.1 = 1.0; a summed check would exceed 1.5
        let f = record("r", "ACGTACGTAC", 10);
        let r = record("r", "ACGTACGTAC", 10);
        let e = engine(FilterConfig {
            max_ee: MatePair::both(1.5),
            ..base_config()
        });
        assert!(e.filter_pair(&f, &r).is_ok());

        let strict_reverse = engine(FilterConfig {
            max_ee: MatePair::new(1.5, 0.5),
            ..base_config()
        });
        assert_eq!(
            strict_reverse.filter_pair(&f, &r).unwrap_err(),
            RejectReason::ExpectedErrors
        );
    }

    #[test]
    fn test_min_q_and_max_len() {
        let mut f = record("r", "ACGTACGTAC", 38);
        f.qual[2] = q(15);
        let r = record("r", "ACGTACGTAC", 38);

        let e = engine(FilterConfig {
            min_q: 20,
            ..base_config()
        });
        assert_eq!(e.filter_pair(&f, &r).unwrap_err(), RejectReason::BelowMinQ);

        let e = engine(FilterConfig {
            max_len: Some(9),
            ..base_config()
        });
        assert_eq!(e.filter_pair(&f, &r).unwrap_err(), RejectReason::TooLong);
    }

    #[test]
    fn test_min_len_after_truncation() {
        let e = engine(FilterConfig {
            min_len: 5,
            ..base_config()
        });
        let mut f = record("r", "ACGTACGTAC", 38);
        f.qual[4] = q(0);
        let r = record("r", "ACGTACGTAC", 38);
        assert_eq!(e.filter_pair(&f, &r).unwrap_err(), RejectReason::BelowMinLen);
    }

    #[test]
    fn test_contaminant_screen_runs_when_enabled() {
        let phix = "TGGCTTAATATGCTTGGCACGTTCGTCAAGG";
        let f = record("r", phix, 38);
        let r = record("r", "TACGGAGGGTGCAAGCGTTAATCGGAATTAC", 38);

        let on = engine(FilterConfig {
            remove_phix: true,
            ..base_config()
        });
        assert_eq!(on.filter_pair(&f, &r).unwrap_err(), RejectReason::Contaminant);

        let off = engine(base_config());
        assert!(off.filter_pair(&f, &r).is_ok());
    }

    #[test]
    fn test_max_ee_serde_handles_infinity() {
        let cfg = FilterConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"max_ee\":{\"forward\":null,\"reverse\":null}"));
        let back: FilterConfig = serde_json::from_str(&json).unwrap();
        assert!(back.max_ee.forward.is_infinite());

        let partial: FilterConfig =
            serde_json::from_str(r#"{"max_ee": {"forward": 2.0, "reverse": null}, "trunc_q": 11}"#)
                .unwrap();
        assert_eq!(partial.max_ee.forward, 2.0);
        assert!(partial.max_ee.reverse.is_infinite());
        assert_eq!(partial.trunc_q, 11);
        assert_eq!(partial.min_len, 20);
    }

    fn write_pairs(dir: &Path, id: &str, pairs: &[(FastqRecord, FastqRecord)]) -> SamplePair {
        let fp = dir.join(format!("{id}_1.fastq.gz"));
        let rp = dir.join(format!("{id}_2.fastq.gz"));
        let mut fw = FastqWriter::create(&fp).unwrap();
        let mut rw = FastqWriter::create(&rp).unwrap();
        for (f, r) in pairs {
            fw.write_record(&f.header, &f.seq, &f.qual).unwrap();
            rw.write_record(&r.header, &r.seq, &r.qual).unwrap();
        }
        fw.finish().unwrap();
        rw.finish().unwrap();
        SamplePair {
            sample_id: id.to_string(),
            forward_path: fp,
            reverse_path: rp,
        }
    }

    fn read_ids(path: &Path) -> Vec<String> {
        FastqReader::open(path)
            .unwrap()
            .map(|r| r.unwrap().header)
            .collect()
    }

    /// Pairs tagged by sequence number; every third forward read has an N.
    fn tagged_pairs(n: usize) -> Vec<(FastqRecord, FastqRecord)> {
        (0..n)
            .map(|i| {
                let fseq = if i % 3 == 0 { "ACGTNACGTA" } else { "ACGTACGTAC" };
                (
                    record(&format!("read{i:04}"), fseq, 35),
                    record(&format!("read{i:04}"), "TTGCATTGCA", 35),
                )
            })
            .collect()
    }

    #[test]
    fn test_filter_sample_preserves_order_and_counts() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let sample = write_pairs(input.path(), "S1", &tagged_pairs(30));

        let e = engine(base_config());
        let res = e.filter_sample(&sample, out.path()).unwrap();
        assert_eq!(res.result.reads_in, 30);
        assert_eq!(res.result.reads_out, 20);
        assert_eq!(res.rejections.too_many_n, 10);

        let fwd_ids = read_ids(&res.forward_output);
        let rev_ids = read_ids(&res.reverse_output);
        assert_eq!(fwd_ids, rev_ids);
        let expected: Vec<String> = (0..30)
            .filter(|i| i % 3 != 0)
            .map(|i| format!("read{i:04}"))
            .collect();
        assert_eq!(fwd_ids, expected);
        assert!(!partial_path(&res.forward_output).exists());
    }

    #[test]
    fn test_filter_sample_is_idempotent() {
        let input = tempfile::tempdir().unwrap();
        let out_a = tempfile::tempdir().unwrap();
        let out_b = tempfile::tempdir().unwrap();
        let sample = write_pairs(input.path(), "S1", &tagged_pairs(50));

        let e = engine(base_config());
        let a = e.filter_sample(&sample, out_a.path()).unwrap();
        let b = e.filter_sample(&sample, out_b.path()).unwrap();
        assert_eq!(a.result, b.result);
        assert_eq!(
            fs::read(&a.forward_output).unwrap(),
            fs::read(&b.forward_output).unwrap()
        );
        assert_eq!(
            fs::read(&a.reverse_output).unwrap(),
            fs::read(&b.reverse_output).unwrap()
        );
    }

    #[test]
    fn test_mate_count_mismatch_discards_partial_output() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let sample = write_pairs(input.path(), "S1", &tagged_pairs(5));
        // rewrite the reverse file with one read fewer
        let mut rw = FastqWriter::create(&sample.reverse_path).unwrap();
        for (_, r) in tagged_pairs(4) {
            rw.write_record(&r.header, &r.seq, &r.qual).unwrap();
        }
        rw.finish().unwrap();

        let err = engine(base_config())
            .filter_sample(&sample, out.path())
            .unwrap_err();
        assert!(matches!(
            err,
            AmpliconError::MateCountMismatch { forward_reads: 5, reverse_reads: 4, .. }
        ));
        assert!(err.is_sample_local());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_read_file_fails_only_the_sample() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let sample = write_pairs(input.path(), "S1", &tagged_pairs(3));
        fs::write(&sample.reverse_path, b"").unwrap();

        let err = engine(base_config())
            .filter_sample(&sample, out.path())
            .unwrap_err();
        assert!(matches!(err, AmpliconError::EmptyReadFile(ref p) if p == &sample.reverse_path));
        assert!(err.is_sample_local());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_reverse_rename_removes_forward_output() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let sample = write_pairs(input.path(), "S1", &tagged_pairs(3));
        let (forward_output, reverse_output) = output_paths(out.path(), "S1");
        // a non-empty directory in the way makes the reverse rename fail
        fs::create_dir_all(&reverse_output).unwrap();
        fs::write(reverse_output.join("blocker"), b"x").unwrap();

        let err = engine(base_config())
            .filter_sample(&sample, out.path())
            .unwrap_err();
        assert!(matches!(err, AmpliconError::PathUnwritable { ref path, .. } if path == &reverse_output));
        assert!(!forward_output.exists());
        assert!(!partial_path(&forward_output).exists());
        assert!(!partial_path(&reverse_output).exists());
    }

    #[test]
    fn test_match_ids() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let pairs = vec![
            (record("a/1", "ACGTACGT", 35), record("a/2", "ACGTACGT", 35)),
            (record("b/1", "ACGTACGT", 35), record("c/2", "ACGTACGT", 35)),
        ];
        let sample = write_pairs(input.path(), "S1", &pairs);

        let checked = engine(FilterConfig {
            match_ids: true,
            ..base_config()
        });
        let err = checked.filter_sample(&sample, out.path()).unwrap_err();
        assert!(matches!(err, AmpliconError::MateIdMismatch { pair: 2, .. }));

        let unchecked = engine(base_config());
        assert_eq!(
            unchecked.filter_sample(&sample, out.path()).unwrap().result.reads_out,
            2
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_reads_out_never_exceeds_reads_in(
            lens in proptest::collection::vec(0usize..40, 1..30),
            score in 0u8..41,
            trunc in 0usize..30,
        ) {
            let input = tempfile::tempdir().unwrap();
            let out = tempfile::tempdir().unwrap();
            let pairs: Vec<_> = lens
                .iter()
                .enumerate()
                .map(|(i, &len)| {
                    let seq = "ACGT".repeat(10)[..len].to_string();
                    (record(&format!("r{i}"), &seq, score), record(&format!("r{i}"), &seq, 38))
                })
                .collect();
            let sample = write_pairs(input.path(), "P", &pairs);
            let e = engine(FilterConfig {
                trunc_len: MatePair::both(trunc),
                ..base_config()
            });
            let res = e.filter_sample(&sample, out.path()).unwrap();
            prop_assert_eq!(res.result.reads_in, lens.len() as u64);
            prop_assert!(res.result.reads_out <= res.result.reads_in);
            prop_assert_eq!(
                res.result.reads_in - res.result.reads_out,
                res.rejections.total()
            );
        }
    }
}
