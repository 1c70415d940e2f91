use std::{path::Path, sync::Arc};

use clap::Parser;
use docsift::{
    Error,
    IndexCoordinator,
    IndexWorker,
    Result,
    SearchQuery,
    Settings,
    Snapshot,
    search,
    worker::{IndexRequest, IndexResponse, Payload},
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    Cli,
    Command,
    InteractiveArgs,
    RankingArgs,
    SearchArgs,
    SnapshotArgs,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let settings = Settings::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        match cli.command {
            Command::Search(args) => cmd_search(&settings, &args).await,
            Command::Interactive(args) => {
                cmd_interactive(&settings, &args).await
            }
            Command::Snapshot(args) => cmd_snapshot(&settings, &args).await,
            Command::Completions(_) => Ok(()),
        }
    })
}

fn read_dataset(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read dataset {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn build_query(
    settings: &Settings,
    ranking: &RankingArgs,
    text: &str,
) -> Result<SearchQuery> {
    SearchQuery::new(
        text,
        ranking.count.unwrap_or(settings.coordinator.default_top_n),
        ranking
            .min_quality
            .unwrap_or(settings.coordinator.default_min_quality),
    )
}

fn print_result(result: &docsift::SearchResult, json: bool) -> Result<()> {
    if json {
        search::format_json(result)
    } else {
        search::format_human(result);
        Ok(())
    }
}

async fn cmd_search(settings: &Settings, args: &SearchArgs) -> Result<()> {
    let query = build_query(settings, &args.ranking, &args.query)?;

    let result = if args.snapshot {
        let snapshot = Snapshot::read_from(&args.dataset)?;
        let mut engine = settings.engine.build_engine()?;
        engine.load(&snapshot)?;
        info!(entities = engine.entity_count(), "loaded snapshot");
        engine.get_matches(&query)
    } else {
        let dataset = read_dataset(&args.dataset)?;
        let coordinator = IndexCoordinator::from_settings(settings)?;
        // Queued until the index lands.
        let search = coordinator.search(query);
        coordinator.index_value(dataset).await?;
        search.await?
    };

    print_result(&result, args.json)
}

async fn cmd_interactive(
    settings: &Settings,
    args: &InteractiveArgs,
) -> Result<()> {
    let dataset = read_dataset(&args.dataset)?;
    let coordinator = IndexCoordinator::from_settings(settings)?;

    let indexing = coordinator.index_value(dataset);
    tokio::spawn(async move {
        match indexing.await {
            Ok(meta) => info!(
                entities = meta.entity_count,
                ms = meta.duration.as_millis() as u64,
                "ready for queries"
            ),
            Err(error) => warn!(%error, "indexing failed"),
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.chars().count() < args.min_query_len {
            continue;
        }

        let query = match build_query(settings, &args.ranking, text) {
            Ok(query) => query,
            Err(error) => {
                eprintln!("{error}");
                continue;
            }
        };
        match coordinator.search(query).await {
            Ok(result) => print_result(&result, args.json)?,
            Err(error) => eprintln!("search failed: {error}"),
        }
    }

    Ok(())
}

async fn cmd_snapshot(settings: &Settings, args: &SnapshotArgs) -> Result<()> {
    let dataset = read_dataset(&args.dataset)?;
    let mut worker = IndexWorker::spawn(Arc::new(settings.engine.clone()))?;
    worker.send(IndexRequest {
        round: 1,
        payload: Payload::Raw(dataset),
    })?;

    match worker.recv().await.ok_or(Error::WorkerGone)? {
        IndexResponse::Indexed { snapshot, meta, .. } => {
            snapshot.write_to(&args.out)?;
            println!(
                "Wrote {} entities ({} terms, {} bytes) to {}",
                meta.entity_count,
                meta.term_count,
                meta.snapshot_bytes,
                args.out.display()
            );
            Ok(())
        }
        IndexResponse::Failed { error, .. } => Err(error),
    }
}
