//src/phix.rs

use std::io::BufRead;
use std::path::Path;

use ahash::AHashSet;

use crate::error::{AmpliconError, Result};
use crate::fastq::open_text;

/// Word size used to index the contaminant reference.
pub const DEFAULT_WORD_SIZE: usize = 16;

/// Distinct shared words needed before a read is called a contaminant.
pub const DEFAULT_MIN_MATCHES: usize = 2;

/// Built-in phiX174 reference (NC_001422.1), used when no reference file is
/// supplied. Covers genome positions 1-1320 only.
const PHIX_REFERENCE: &str = include_str!("../data/phix174.fasta");

#[inline]
fn encode_base(b: u8) -> Option<u64> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Two-bit encoded words of `seq`, skipping any window containing a base
/// other than A/C/G/T.
fn words(seq: &[u8], k: usize) -> impl Iterator<Item = u64> + '_ {
    let mask: u64 = if k >= 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
    let mut word = 0u64;
    let mut valid = 0usize;
    seq.iter().filter_map(move |&b| match encode_base(b) {
        Some(code) => {
            word = ((word << 2) | code) & mask;
            valid += 1;
            (valid >= k).then_some(word)
        }
        None => {
            valid = 0;
            word = 0;
            None
        }
    })
}

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'T' => b'A',
            b'C' => b'G',
            b'G' => b'C',
            b'a' => b't',
            b't' => b'a',
            b'c' => b'g',
            b'g' => b'c',
            other => other,
        })
        .collect()
}

/// Sequences of every FASTA record in `reader`; lines before the first header
/// are ignored.
fn parse_fasta<R: BufRead>(reader: R, path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut sequences: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<Vec<u8>> = None;

    for line in reader.lines() {
        let line = line.map_err(|source| AmpliconError::InputRead {
            path: path.to_path_buf(),
            source,
        })?;
        let line = line.trim_end();
        if line.starts_with('>') {
            if let Some(seq) = current.take() {
                sequences.push(seq);
            }
            current = Some(Vec::new());
        } else if let Some(seq) = current.as_mut() {
            seq.extend_from_slice(line.as_bytes());
        }
    }
    if let Some(seq) = current {
        sequences.push(seq);
    }
    Ok(sequences)
}

/// Word-matching screen against a contaminant reference.
///
/// Both strands of the reference are indexed, so reads from either strand are
/// caught. A read is flagged when it shares at least `min_matches` distinct
/// words with the reference.
#[derive(Debug, Clone)]
pub struct ContaminantScreen {
    word_size: usize,
    min_matches: usize,
    words: AHashSet<u64>,
}

impl ContaminantScreen {
    pub fn from_sequences<S: AsRef<[u8]>>(
        sequences: &[S],
        word_size: usize,
        min_matches: usize,
    ) -> Result<Self> {
        if word_size == 0 || word_size > 32 {
            return Err(AmpliconError::InvalidConfig(format!(
                "contaminant word size must be in 1..=32, got {word_size}"
            )));
        }
        if min_matches == 0 {
            return Err(AmpliconError::InvalidConfig(
                "contaminant min_matches must be at least 1".to_string(),
            ));
        }

        let mut index = AHashSet::new();
        for seq in sequences {
            let seq = seq.as_ref();
            index.extend(words(seq, word_size));
            index.extend(words(&reverse_complement(seq), word_size));
        }
        if index.is_empty() {
            return Err(AmpliconError::InvalidConfig(
                "contaminant reference contains no usable words".to_string(),
            ));
        }

        Ok(Self {
            word_size,
            min_matches,
            words: index,
        })
    }

    /// The built-in phiX174 reference.
    pub fn phix() -> Result<Self> {
        let sequences = parse_fasta(PHIX_REFERENCE.as_bytes(), Path::new("<built-in phiX174>"))?;
        log::warn!(
            "Built-in phiX174 reference covers positions 1-1320 of 5386; \
             pass a full NC_001422.1 FASTA as the phiX reference for complete screening"
        );
        Self::from_sequences(&sequences, DEFAULT_WORD_SIZE, DEFAULT_MIN_MATCHES)
    }

    /// Load every record of a (optionally gzipped) FASTA file as reference.
    pub fn from_fasta(path: &Path) -> Result<Self> {
        let sequences = parse_fasta(open_text(path)?, path)?;
        log::info!(
            "Loaded {} contaminant reference sequence(s) from {}",
            sequences.len(),
            path.display()
        );
        Self::from_sequences(&sequences, DEFAULT_WORD_SIZE, DEFAULT_MIN_MATCHES)
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// True if `seq` shares at least `min_matches` distinct words with the
    /// reference.
    pub fn is_contaminant(&self, seq: &[u8]) -> bool {
        let mut hits = AHashSet::new();
        for w in words(seq, self.word_size) {
            if self.words.contains(&w) && hits.insert(w) && hits.len() >= self.min_matches {
                return true;
            }
        }
        false
    }
}
