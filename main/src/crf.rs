use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::config::AppConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sequence_pipeline::analyzer::{add_default_pos_functions, default_pos_analyzer};
use sequence_pipeline::crf::tagger::{evaluate, Tagger};
use sequence_pipeline::crf::CrfParameters;
use sequence_pipeline::io::read_tagged_file;
use sequence_pipeline::{Crf, Sequence, SequenceAnalyzer};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and apply conditional random fields", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a model on the configured training file
    Train {
        /// Path to the configuration file
        config: PathBuf,
    },
    /// Report token accuracy on the configured test file
    Test {
        /// Path to the configuration file
        config: PathBuf,
    },
    /// Interactively tag whitespace-separated sentences from stdin
    Tag {
        /// Path to the configuration file
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Command::Train { config } => train(&config),
        Command::Test { config } => test(&config),
        Command::Tag { config } => tag(&config),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let path = path.to_str().context("config path must be valid utf-8")?;
    Ok(common::config::get_config(path)?)
}

fn fresh_analyzer(method: &str) -> Result<SequenceAnalyzer> {
    match method {
        "default-pos" => Ok(default_pos_analyzer()),
        other => bail!("unknown sequence analyzer method '{other}'"),
    }
}

fn load_analyzer(method: &str, prefix: &Path) -> Result<SequenceAnalyzer> {
    let mut analyzer = SequenceAnalyzer::load(prefix)
        .with_context(|| format!("loading analyzer mappings from {}", prefix.display()))?;
    match method {
        "default-pos" => add_default_pos_functions(&mut analyzer),
        other => bail!("unknown sequence analyzer method '{other}'"),
    }
    Ok(analyzer)
}

fn parameters(config: &AppConfig) -> CrfParameters {
    CrfParameters {
        c2: config.crf.c2,
        max_iters: config.crf.max_iters,
        period: config.crf.period,
        delta: config.crf.delta,
        calibration_samples: config.crf.calibration_samples,
        calibration_trials: config.crf.calibration_trials,
        calibration_eta: config.crf.calibration_eta,
        calibration_rate: config.crf.calibration_rate,
        ..CrfParameters::default()
    }
}

fn train(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let train_path = config
        .crf
        .train
        .as_deref()
        .context("[crf] train file is required for training")?;
    let prefix = Path::new(&config.crf.prefix);

    let mut sequences = read_tagged_file(Path::new(train_path))
        .with_context(|| format!("reading training data from {train_path}"))?;
    info!(sequences = sequences.len(), file = train_path, "Read training data");

    let mut analyzer = fresh_analyzer(&config.sequence.method)?;
    for seq in &mut sequences {
        analyzer.analyze(seq);
    }
    analyzer.save(prefix)?;

    let mut crf = Crf::new();
    let mut rng = StdRng::seed_from_u64(config.crf.seed);
    let loss = crf.train(parameters(&config), &sequences, &mut rng)?;
    crf.save(prefix)?;

    println!("final loss: {loss:.6}");
    println!("model saved to {}", prefix.display());
    Ok(())
}

fn test(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let test_path = config
        .crf
        .test
        .as_deref()
        .context("[crf] test file is required for evaluation")?;
    let prefix = Path::new(&config.crf.prefix);

    let analyzer = load_analyzer(&config.sequence.method, prefix)?;
    let crf = Crf::load(prefix)?;

    let mut sequences = read_tagged_file(Path::new(test_path))
        .with_context(|| format!("reading test data from {test_path}"))?;
    for seq in &mut sequences {
        analyzer.analyze_const(seq);
    }

    let eval = evaluate(&crf, &sequences);
    println!(
        "token accuracy: {:.2}% ({}/{})",
        eval.token_accuracy() * 100.0,
        eval.correct_tokens,
        eval.total_tokens
    );
    println!(
        "sequence accuracy: {:.2}% ({}/{})",
        eval.sequence_accuracy() * 100.0,
        eval.correct_sequences,
        eval.total_sequences
    );
    Ok(())
}

fn tag(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let prefix = Path::new(&config.crf.prefix);

    let analyzer = load_analyzer(&config.sequence.method, prefix)?;
    let crf = Crf::load(prefix)?;
    let mut tagger = Tagger::new(&crf);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let symbols: Vec<&str> = line.split_whitespace().collect();
        if !symbols.is_empty() {
            let mut seq = Sequence::from_symbols(symbols);
            analyzer.analyze_const(&mut seq);
            tagger.tag(&mut seq);

            let tagged: Vec<String> = seq
                .iter()
                .map(|obs| {
                    let tag = obs
                        .label()
                        .and_then(|label| analyzer.tag(label))
                        .unwrap_or("?");
                    format!("{}/{tag}", obs.symbol())
                })
                .collect();
            println!("{}", tagged.join(" "));
        }
        print!("> ");
        stdout.flush()?;
    }
    Ok(())
}
