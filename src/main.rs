use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use viberag::daemon::{run_daemon, DaemonOptions};
use viberag::engine::{Engine, EngineOptions};
use viberag::error::Error;
use viberag::eval::{run_eval, EvalOptions};
use viberag::events::EventSink;
use viberag::indexer::IndexOptions;
use viberag::progress::{drain, ProgressMode};
use viberag::search::intent::Intent;
use viberag::search::scope::Scope;
use viberag::search::SearchRequest;

#[derive(Parser)]
#[command(
    name = "viberag",
    about = "viberag — local code intelligence: incremental indexing and hybrid retrieval for AI agents",
    version
)]
struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the index
    Index {
        /// Rebuild everything from scratch
        #[arg(long)]
        force: bool,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Intent: auto, definition, usage, concept, exact_text, similar_code
        #[arg(long, default_value = "auto")]
        intent: String,

        /// Maximum results
        #[arg(long, default_value_t = 10)]
        k: usize,

        /// Restrict to paths with this prefix (repeatable)
        #[arg(long)]
        path_prefix: Vec<String>,

        /// Restrict to these extensions (repeatable)
        #[arg(long)]
        extension: Vec<String>,

        /// Include per-hit scoring explanations
        #[arg(long)]
        explain: bool,
    },

    /// Show one symbol by id
    Symbol {
        /// Symbol id
        id: String,
    },

    /// Find usages of a symbol
    Usages {
        /// Resolve by symbol id
        #[arg(long)]
        id: Option<String>,

        /// Resolve by symbol name
        #[arg(long)]
        name: Option<String>,

        /// Maximum results
        #[arg(long, default_value_t = 20)]
        k: usize,
    },

    /// Show neighbors of a symbol, chunk, or file
    Expand {
        /// Entity table: symbols, chunks, or files
        #[arg(long)]
        table: String,

        /// Entity id
        #[arg(long)]
        id: String,

        /// Per-list bound
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Report repository and index status
    Status,

    /// Run the daemon for this repository
    Daemon {
        /// Watch the filesystem and index incrementally
        #[arg(long)]
        watch: bool,

        /// Skip eager embedding-provider initialization
        #[arg(long)]
        no_warmup: bool,
    },

    /// Evaluate retrieval quality with self-generated queries
    Eval {
        /// Results per query
        #[arg(long, default_value_t = 10)]
        k: usize,

        /// Number of generated queries
        #[arg(long, default_value_t = 50)]
        max_queries: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VIBERAG_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error[{}]: {}", e.wire_code(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> viberag::Result<()> {
    match cli.command {
        Commands::Index { force } => {
            let engine = Engine::open(&cli.repo, EngineOptions::default()).await?;
            let mode = if cli.json {
                ProgressMode::Json
            } else {
                ProgressMode::default_for_tty()
            };
            let (sink, rx) = EventSink::channel();
            let reporter = tokio::spawn(drain(mode, rx));

            let stats = engine
                .index(IndexOptions { force }, sink, CancellationToken::new())
                .await;
            let _ = reporter.await;
            let stats = stats?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "indexed {} files ({} new, {} modified, {} deleted)",
                    stats.file_count, stats.files_new, stats.files_modified, stats.files_deleted
                );
                println!(
                    "  embeddings: {} computed, {} cached",
                    stats.embeddings_computed, stats.embeddings_cached
                );
                println!("  took {}ms", stats.duration_ms);
            }
            engine.close().await;
            Ok(())
        }

        Commands::Search {
            query,
            intent,
            k,
            path_prefix,
            extension,
            explain,
        } => {
            let parsed = Intent::parse(&intent)
                .ok_or_else(|| Error::InvalidParams(format!("unknown intent: {}", intent)))?;
            let engine = Engine::open(&cli.repo, EngineOptions::default()).await?;
            let response = engine
                .search(&SearchRequest {
                    query,
                    intent: parsed,
                    scope: Scope {
                        path_prefix,
                        extension,
                        ..Default::default()
                    },
                    k,
                    explain,
                })
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_search_response(&response);
            }
            engine.close().await;
            Ok(())
        }

        Commands::Symbol { id } => {
            let engine = Engine::open(&cli.repo, EngineOptions::default()).await?;
            match engine.get_symbol(&id).await? {
                Some(symbol) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&symbol)?)
                }
                Some(symbol) => {
                    println!("{} ({})", symbol.qualname, symbol.symbol_kind.as_str());
                    println!("  {}:{}-{}", symbol.file_path, symbol.start_line, symbol.end_line);
                    if let Some(sig) = &symbol.signature {
                        println!("  {}", sig);
                    }
                    if let Some(doc) = &symbol.docstring {
                        println!("  {}", doc.lines().next().unwrap_or(""));
                    }
                }
                None => println!("no symbol with id {}", id),
            }
            engine.close().await;
            Ok(())
        }

        Commands::Usages { id, name, k } => {
            let engine = Engine::open(&cli.repo, EngineOptions::default()).await?;
            let response = engine
                .find_usages(id.as_deref(), name.as_deref(), &Scope::default(), k)
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!(
                    "{} usages of {} across {} files",
                    response.total_refs,
                    response.symbol_name,
                    response.by_file.len()
                );
                for group in &response.by_file {
                    println!("  {}", group.file_path);
                    for r in &group.refs {
                        println!("    {}: [{}] {}", r.start_line, r.ref_kind.as_str(), r.context_snippet);
                    }
                }
            }
            engine.close().await;
            Ok(())
        }

        Commands::Expand { table, id, limit } => {
            let engine = Engine::open(&cli.repo, EngineOptions::default()).await?;
            let response = engine.expand_context(&table, &id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            engine.close().await;
            Ok(())
        }

        Commands::Status => {
            let engine = Engine::open(&cli.repo, EngineOptions::default()).await?;
            let report = engine.status().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("repo: {}", report.repo_id);
                println!("indexed: {}", report.indexed);
                if let Some(rev) = &report.revision {
                    println!("revision: {}", rev);
                }
                println!(
                    "rows: {} files, {} symbols, {} chunks, {} refs",
                    report.files, report.symbols, report.chunks, report.refs
                );
                println!("provider: {} ({} dims)", report.provider, report.dims);
                if let Some(instruction) = &report.instruction {
                    println!("note: {}", instruction);
                }
            }
            engine.close().await;
            Ok(())
        }

        Commands::Daemon { watch, no_warmup } => {
            run_daemon(
                &cli.repo,
                DaemonOptions {
                    warmup: !no_warmup,
                    watch,
                    ..Default::default()
                },
            )
            .await
        }

        Commands::Eval { k, max_queries } => {
            let engine = Engine::open(&cli.repo, EngineOptions::default()).await?;
            let report = run_eval(&engine, EvalOptions { k, max_queries }).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("eval over {} queries", report.queries);
                println!("  mrr:       {:.3}", report.mrr);
                println!("  recall@k:  {:.3}", report.recall_at_k);
                println!("  hit@1:     {:.3}", report.hit_at_1);
                println!("  latency:   p50 {}ms, p95 {}ms", report.p50_ms, report.p95_ms);
            }
            engine.close().await;
            Ok(())
        }
    }
}

fn print_search_response(response: &viberag::model::SearchResponse) {
    println!("intent: {}", response.intent_used);

    let sections: [(&str, &Vec<viberag::model::SearchHit>); 4] = [
        ("definitions", &response.groups.definitions),
        ("usages", &response.groups.usages),
        ("files", &response.groups.files),
        ("blocks", &response.groups.blocks),
    ];

    for (label, hits) in sections {
        if hits.is_empty() {
            continue;
        }
        println!("{}:", label);
        for (i, hit) in hits.iter().enumerate() {
            println!(
                "  {}. [{:.4}] {}  {}:{}",
                i + 1,
                hit.score,
                hit.title,
                hit.file_path,
                hit.start_line
            );
            let snippet = hit.snippet.replace('\n', " ");
            let snippet: String = snippet.chars().take(120).collect();
            println!("     {}", snippet.trim());
            if let Some(why) = &hit.why {
                for channel in &why.channels {
                    println!(
                        "     via {} {} (rank {}, raw {:.3})",
                        channel.channel, channel.source, channel.rank, channel.raw_score
                    );
                }
                for prior in &why.priors {
                    println!("     prior {} x{:.2} ({})", prior.name, prior.value, prior.note);
                }
            }
        }
    }

    if !response.filters_applied.is_empty() {
        println!("filters: {}", response.filters_applied.join(", "));
    }
    if !response.suggested_next_actions.is_empty() {
        println!("next:");
        for action in &response.suggested_next_actions {
            println!("  {} {}", action.tool, action.args);
        }
    }
}
