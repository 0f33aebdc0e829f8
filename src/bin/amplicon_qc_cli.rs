use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use amplicon_qc_rs::error::AmpliconError;
use amplicon_qc_rs::report::{render_filter_table, render_summary, write_json, write_text};
use amplicon_qc_rs::types::MatePair;
use amplicon_qc_rs::{run_pipeline, CancellationToken, PipelineConfig};

/// Quality-profile, trim and filter paired-end amplicon reads.
#[derive(Parser, Debug)]
#[command(name = "amplicon-qc-rs", version, about)]
struct Cli {
    /// Directory holding the raw paired FASTQ files
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory for filtered reads and run reports
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATTERN")]
    forward_pattern: Option<String>,

    #[arg(long, value_name = "PATTERN")]
    reverse_pattern: Option<String>,

    /// Sample id is the file name's first token split on this
    #[arg(long)]
    delimiter: Option<char>,

    /// Hard 3' length per mate, e.g. 240,160 (0 disables)
    #[arg(long, value_name = "F,R")]
    trunc_len: Option<MatePair<usize>>,

    /// Bases removed from the 5' end per mate, e.g. 17,21
    #[arg(long, value_name = "F,R")]
    trim_left: Option<MatePair<usize>>,

    #[arg(long)]
    max_n: Option<usize>,

    /// Expected-error limit per mate, e.g. 2,2 or inf
    #[arg(long, value_name = "F,R")]
    max_ee: Option<MatePair<f64>>,

    #[arg(long)]
    trunc_q: Option<u8>,

    /// Enable (true) or disable (false) the phiX screen
    #[arg(long, value_name = "BOOL")]
    rm_phix: Option<bool>,

    /// FASTA contaminant reference replacing the built-in phiX fragments
    #[arg(long)]
    phix_reference: Option<PathBuf>,

    #[arg(long)]
    min_len: Option<usize>,

    #[arg(long)]
    max_len: Option<usize>,

    #[arg(long)]
    min_q: Option<u8>,

    /// Fail a sample whose mates carry different read ids
    #[arg(long)]
    match_ids: bool,

    #[arg(long)]
    phred_offset: Option<u8>,

    /// Samples processed in parallel (0 = all cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Also compute pre/post-filter quality profiles
    #[arg(long)]
    profile: bool,

    /// Reads per file used for profiles (approximate, plotting only)
    #[arg(long)]
    profile_max_reads: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<PipelineConfig, AmpliconError> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(v) = self.input {
            cfg.input_dir = v;
        }
        if let Some(v) = self.output {
            cfg.output_dir = v;
        }
        if let Some(v) = self.forward_pattern {
            cfg.forward_pattern = v;
        }
        if let Some(v) = self.reverse_pattern {
            cfg.reverse_pattern = v;
        }
        if let Some(v) = self.delimiter {
            cfg.delimiter = v;
        }
        if let Some(v) = self.threads {
            cfg.threads = v;
        }
        if self.profile {
            cfg.profile = true;
        }
        if self.profile_max_reads.is_some() {
            cfg.profile_max_reads = self.profile_max_reads;
        }

        let f = &mut cfg.filter;
        if let Some(v) = self.trunc_len {
            f.trunc_len = v;
        }
        if let Some(v) = self.trim_left {
            f.trim_left = v;
        }
        if let Some(v) = self.max_n {
            f.max_n = v;
        }
        if let Some(v) = self.max_ee {
            f.max_ee = v;
        }
        if let Some(v) = self.trunc_q {
            f.trunc_q = v;
        }
        if let Some(v) = self.rm_phix {
            f.remove_phix = v;
        }
        if self.phix_reference.is_some() {
            f.phix_reference = self.phix_reference;
        }
        if let Some(v) = self.min_len {
            f.min_len = v;
        }
        if self.max_len.is_some() {
            f.max_len = self.max_len;
        }
        if let Some(v) = self.min_q {
            f.min_q = v;
        }
        if self.match_ids {
            f.match_ids = true;
        }
        if let Some(v) = self.phred_offset {
            f.phred_offset = v;
        }

        Ok(cfg)
    }
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))
            .expect("Invalid spinner template"),
    );
    spinner.set_message(msg.to_string());
    spinner
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            log::error!("{e}");
            process::exit(2);
        }
    }
}

/// Returns `Ok(false)` when the run finished but some samples failed.
fn run() -> Result<bool, Box<dyn Error>> {
    let config = Cli::parse().into_config()?;

    // 1. Filter
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} sample(s) filtered {msg}")
            .expect("Invalid progress template"),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(120));

    // Never tripped here; cooperative cancellation is a library-caller feature.
    let cancel = CancellationToken::new();
    let tick_bar = bar.clone();
    let tick = move |sample_id: &str| {
        tick_bar.inc(1);
        tick_bar.set_message(sample_id.to_string());
    };

    let output = run_pipeline(&config, &cancel, Some(&tick))?;
    bar.finish_with_message("done.");

    // 2. Write reports
    let writer = spinner("yellow", "Writing run reports...");
    let table = render_filter_table(&output.results);
    write_text(&table, &config.output_dir.join("filter_results.tsv"))?;
    write_json(&output, &config.output_dir.join("run_report.json"))?;
    writer.finish_with_message("Reports written.");

    print!("{table}");
    if let Some(retention) = &output.retention {
        let s = &retention.stats;
        let pct = |x: Option<f64>| {
            x.map(|v| format!("{:.1}%", 100.0 * v))
                .unwrap_or_else(|| "NA".to_string())
        };
        println!(
            "median reads in/out: {}/{}; retained median {} (min {}, max {})",
            s.median_reads_in,
            s.median_reads_out,
            pct(s.median_percent_retained),
            pct(s.min_percent_retained),
            pct(s.max_percent_retained)
        );
    }
    print!("{}", render_summary(&output.summary));

    Ok(output.summary.failed == 0)
}
