use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::config::AppConfig;
use index_pipeline::corpus::{Tokenizer, WhitespaceTokenizer};
use index_pipeline::disk_index;
use retrieval_pipeline::{rank, Query, RankerSpec};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Build and query on-disk indexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the inverted and forward indexes from the configured corpus
    Build {
        /// Path to the configuration file
        config: PathBuf,
    },
    /// Interactively query the inverted index
    Query {
        /// Path to the configuration file
        config: PathBuf,
    },
    /// Export the forward index as libsvm-formatted lines
    Export {
        /// Path to the configuration file
        config: PathBuf,
        /// Destination file for the libsvm output
        output: PathBuf,
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
        Command::Build { config } => build(&config),
        Command::Query { config } => query(&config),
        Command::Export { config, output } => export(&config, &output),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let path = path.to_str().context("config path must be valid utf-8")?;
    Ok(common::config::get_config(path)?)
}

fn ranker_spec(path: &Path) -> Result<RankerSpec> {
    let path = path.to_str().context("config path must be valid utf-8")?;
    let raw = common::config::load_raw(path)?;
    Ok(common::config::get_section::<RankerSpec>(&raw, "ranker")?.unwrap_or_default())
}

fn build(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let (inverted, _forward) = disk_index::build(&config.index, config_path)
        .with_context(|| format!("building index from corpus {}", config.index.corpus))?;
    println!(
        "indexed {} documents, {} unique terms",
        inverted.inner().num_docs(),
        inverted.num_terms()
    );
    Ok(())
}

/// Writes one `label term:count ...` line per document, terms in id order.
/// Documents without a class label get label 0; labeled documents get
/// dense 1-based ids in first-seen order.
fn export(config_path: &Path, output: &Path) -> Result<()> {
    use std::collections::HashMap;
    use std::fs::File;
    use std::io::{BufWriter, Write as _};

    let config = load_config(config_path)?;
    let forward = disk_index::open_forward(&config.index)
        .with_context(|| format!("opening forward index {}", config.index.forward_path))?;

    let mut label_ids: HashMap<String, u64> = HashMap::new();
    let mut writer = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    for doc in forward.inner().docs() {
        let label = match forward.inner().doc_label(doc) {
            Some(label) => {
                let next = label_ids.len() as u64 + 1;
                *label_ids.entry(label.to_owned()).or_insert(next)
            }
            None => 0,
        };
        write!(writer, "{label}")?;
        for &(term, count) in forward.postings(doc)?.counts() {
            write!(writer, " {}:{count}", term.0)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    println!(
        "exported {} documents to {}",
        forward.inner().num_docs(),
        output.display()
    );
    Ok(())
}

fn query(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let spec = ranker_spec(config_path)?;

    let inverted = disk_index::open_inverted(&config.index)
        .with_context(|| format!("opening inverted index {}", config.index.inverted_path))?;
    let forward = match &spec {
        RankerSpec::KlDivergencePrf { .. } => Some(
            disk_index::open_forward(&config.index)
                .with_context(|| format!("opening forward index {}", config.index.forward_path))?,
        ),
        _ => None,
    };

    let tokenizer = WhitespaceTokenizer;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let tokens = tokenizer.tokenize(&line);
        if !tokens.is_empty() {
            let query = Query::from_tokens(&inverted, &tokens);
            let results = rank(&spec, &inverted, forward.as_ref(), &query, config.rank.k)?;
            if results.is_empty() {
                println!("no matching documents");
            }
            for (position, result) in results.iter().enumerate() {
                let name = inverted.inner().doc_name(result.id).unwrap_or("<unknown>");
                match inverted.inner().doc_label(result.id) {
                    Some(label) => println!(
                        "{:2}. {name} ({label})  {:.4}",
                        position + 1,
                        result.score
                    ),
                    None => println!("{:2}. {name}  {:.4}", position + 1, result.score),
                }
            }
        }
        print!("> ");
        stdout.flush()?;
    }
    Ok(())
}
