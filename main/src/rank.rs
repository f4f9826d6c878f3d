use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use common::config::AppConfig;
use index_pipeline::corpus::{Tokenizer, WhitespaceTokenizer};
use index_pipeline::disk_index;
use retrieval_pipeline::{rank, Query, RankerSpec};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run the configured ranker over a file of queries and print the top-k
/// results per query, optionally writing a JSON report.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    config: PathBuf,

    /// Score every document against every other instead of reading queries
    #[arg(long)]
    all_pairs: bool,
}

fn main() -> Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    if cli.all_pairs {
        run_all_pairs(&cli.config)
    } else {
        run(&cli.config)
    }
}

fn run_all_pairs(config_path: &Path) -> Result<()> {
    let path = config_path
        .to_str()
        .context("config path must be valid utf-8")?;
    let config: AppConfig = common::config::get_config(path)?;
    let raw = common::config::load_raw(path)?;
    let spec =
        common::config::get_section::<RankerSpec>(&raw, "ranker")?.unwrap_or_default();
    let ranker = spec.build()?;

    let inverted = disk_index::open_inverted(&config.index)
        .with_context(|| format!("opening inverted index {}", config.index.inverted_path))?;
    let forward = disk_index::open_forward(&config.index)
        .with_context(|| format!("opening forward index {}", config.index.forward_path))?;

    let pairs =
        retrieval_pipeline::similarity::all_pairs(ranker.as_ref(), &inverted, &forward, config.rank.k)?;
    for (doc, neighbors) in pairs {
        let name = inverted.inner().doc_name(doc).unwrap_or("<unknown>");
        println!("{name}:");
        for neighbor in neighbors {
            let neighbor_name = inverted.inner().doc_name(neighbor.id).unwrap_or("<unknown>");
            println!("  {neighbor_name}  {:.4}", neighbor.score);
        }
    }
    Ok(())
}

fn run(config_path: &Path) -> Result<()> {
    let path = config_path
        .to_str()
        .context("config path must be valid utf-8")?;
    let config: AppConfig = common::config::get_config(path)?;
    let raw = common::config::load_raw(path)?;
    let spec =
        common::config::get_section::<RankerSpec>(&raw, "ranker")?.unwrap_or_default();

    let inverted = disk_index::open_inverted(&config.index)
        .with_context(|| format!("opening inverted index {}", config.index.inverted_path))?;
    let forward = match &spec {
        RankerSpec::KlDivergencePrf { .. } => Some(
            disk_index::open_forward(&config.index)
                .with_context(|| format!("opening forward index {}", config.index.forward_path))?,
        ),
        _ => None,
    };

    let queries_path = Path::new(&config.rank.queries);
    let reader = BufReader::new(
        File::open(queries_path)
            .with_context(|| format!("opening query file {}", queries_path.display()))?,
    );

    let qrels = match &config.rank.qrels {
        Some(path) => Some(
            read_qrels(Path::new(path))
                .with_context(|| format!("reading relevance judgments from {path}"))?,
        ),
        None => None,
    };

    let tokenizer = WhitespaceTokenizer;
    let mut report = Vec::new();
    let mut precision_sum = 0.0;
    let mut judged_queries = 0usize;
    let mut query_number = 0usize;
    for line in reader.lines() {
        let line = line?;
        let tokens = tokenizer.tokenize(&line);
        if tokens.is_empty() {
            continue;
        }
        query_number += 1;
        let query = Query::from_tokens(&inverted, &tokens);
        let results = rank(&spec, &inverted, forward.as_ref(), &query, config.rank.k)?;

        println!("query: {line}");
        let mut entries = Vec::with_capacity(results.len());
        for (position, result) in results.iter().enumerate() {
            let name = inverted.inner().doc_name(result.id).unwrap_or("<unknown>");
            println!("  {:2}. {name}  {:.4}", position + 1, result.score);
            entries.push(serde_json::json!({
                "doc_id": result.id.0,
                "name": name,
                "label": inverted.inner().doc_label(result.id),
                "score": result.score,
            }));
        }

        let precision = qrels
            .as_ref()
            .and_then(|judgments| judgments.get(&query_number))
            .map(|relevant| {
                let hits = results
                    .iter()
                    .filter(|r| {
                        inverted
                            .inner()
                            .doc_name(r.id)
                            .is_some_and(|name| relevant.contains(name))
                    })
                    .count();
                hits as f64 / config.rank.k as f64
            });
        if let Some(precision) = precision {
            println!("  p@{} = {precision:.3}", config.rank.k);
            precision_sum += precision;
            judged_queries += 1;
        }

        report.push(serde_json::json!({
            "query": line,
            "results": entries,
            "precision_at_k": precision,
        }));
    }

    if judged_queries > 0 {
        println!(
            "mean p@{} = {:.3} over {judged_queries} judged queries",
            config.rank.k,
            precision_sum / judged_queries as f64
        );
    }

    if let Some(report_path) = &config.rank.report {
        let writer = BufWriter::new(
            File::create(report_path)
                .with_context(|| format!("creating report file {report_path}"))?,
        );
        serde_json::to_writer_pretty(writer, &report)?;
        info!(report = %report_path, queries = report.len(), "Wrote ranking report");
    }
    Ok(())
}

/// Reads `query_number<TAB>doc_name` judgment lines; query numbers are
/// 1-based positions within the query file.
fn read_qrels(path: &Path) -> Result<HashMap<usize, HashSet<String>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut qrels: HashMap<usize, HashSet<String>> = HashMap::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = line
            .split_once('\t')
            .and_then(|(number, name)| Some((number.parse::<usize>().ok()?, name)));
        let Some((number, name)) = parsed else {
            anyhow::bail!(
                "{}:{}: expected 'query_number<TAB>doc_name'",
                path.display(),
                line_no + 1
            );
        };
        qrels.entry(number).or_default().insert(name.to_owned());
    }
    Ok(qrels)
}
