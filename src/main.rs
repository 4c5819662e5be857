use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use quarry_core::Config;
use quarry_core::bootstrap::{Engine, build_engine};
use quarry_embed::Embedder;
use quarry_index::{CancellationToken, IndexReport, SearchHit};

#[derive(Debug, Parser)]
#[command(name = "quarry", version, about = "Incremental semantic code index")]
struct Cli {
    /// Config file (falls back to `QUARRY_CONFIG`, then `config/default.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Project root; relative store paths and indexed file paths are resolved against it.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index the whole project, or only the given files.
    Index { paths: Vec<PathBuf> },
    /// Search the index with a natural-language question.
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// List chunks that mention a symbol.
    Refs {
        symbol: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show store statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let root = std::fs::canonicalize(&cli.root)
        .with_context(|| format!("project root {} not found", cli.root.display()))?;

    let engine = build_engine(&config, &root).await?;
    engine.initialize().await;

    let result = match cli.command {
        Command::Index { paths } => run_index(&engine, &root, &paths, cli.json).await,
        Command::Ask { question, top_k } => {
            let question = question.join(" ");
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            let hits = engine.retriever.search(&question, top_k).await;
            print_hits(&hits, cli.json)
        }
        Command::Refs { symbol, limit } => {
            let hits = engine.retriever.find_references(&symbol, limit).await;
            print_hits(&hits, cli.json)
        }
        Command::Stats => run_stats(&engine, cli.json).await,
    };

    engine.shutdown().await;
    result
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("QUARRY_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received ctrl-c, stopping after the current file");
        child.cancel();
    });
    token
}

async fn run_index<P: Embedder>(
    engine: &Engine<P>,
    root: &Path,
    paths: &[PathBuf],
    json: bool,
) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrl_c();
    let report = if paths.is_empty() {
        engine.indexer.index_project(root, &cancel).await?
    } else {
        let absolute: Vec<PathBuf> = paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { root.join(p) })
            .collect();
        engine.indexer.index_paths(root, &absolute, &cancel).await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &IndexReport) {
    println!(
        "indexed {} of {} files in {} ms ({} skipped, {} removed)",
        report.files_indexed,
        report.files_scanned,
        report.duration_ms,
        report.files_skipped,
        report.files_removed,
    );
    println!(
        "chunks: {} written, {} unchanged, {} removed, {} without vector",
        report.chunks_written,
        report.chunks_unchanged,
        report.chunks_removed,
        report.chunks_without_vector,
    );
    for error in &report.errors {
        println!("error: {error}");
    }
    if report.cancelled {
        println!("cancelled before all files were processed");
    }
}

fn print_hits(hits: &[SearchHit], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for hit in hits {
        let chunk = &hit.chunk;
        println!(
            "{}:{}-{} [{}] {} {:.3}",
            chunk.file_path,
            chunk.span.start.row + 1,
            chunk.span.end.row + 1,
            chunk.kind,
            hit.source,
            hit.score,
        );
        for line in chunk.text.lines().take(6) {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}

async fn run_stats<P: Embedder>(engine: &Engine<P>, json: bool) -> anyhow::Result<()> {
    let store = &engine.store;
    let files = store.indexed_files().await?;
    let chunks = store.count().await?;
    let with_vector = store.count_with_vector().await?;
    let schema_version = store.schema_version().await?;
    let provider = engine.orchestrator.provider();

    if json {
        let value = serde_json::json!({
            "files": files.len(),
            "chunks": chunks,
            "chunks_with_vector": with_vector,
            "schema_version": schema_version,
            "provider": provider.name(),
            "dimension": provider.dimension(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("files:              {}", files.len());
        println!("chunks:             {chunks}");
        println!("chunks with vector: {with_vector}");
        println!("schema version:     {schema_version}");
        println!(
            "provider:           {} ({} dims)",
            provider.name(),
            provider.dimension()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_with_multiple_words() {
        let cli = Cli::try_parse_from(["quarry", "ask", "how", "do", "I", "add", "--top-k", "3"])
            .unwrap();
        match cli.command {
            Command::Ask { question, top_k } => {
                assert_eq!(question.join(" "), "how do I add");
                assert_eq!(top_k, Some(3));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["quarry", "stats", "--json", "--root", "/tmp"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.root, PathBuf::from("/tmp"));
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn index_without_paths_means_whole_project() {
        let cli = Cli::try_parse_from(["quarry", "index"]).unwrap();
        assert!(matches!(cli.command, Command::Index { ref paths } if paths.is_empty()));
    }

    #[test]
    fn ask_requires_a_question() {
        assert!(Cli::try_parse_from(["quarry", "ask"]).is_err());
    }

    #[test]
    fn explicit_config_flag_wins() {
        let path = resolve_config_path(Some(Path::new("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }
}
