use anyhow::Context;
use lectern::cli::{ChatInput, Cli, Commands, ConfigAction, FilterArgs};
use lectern::config::Config;
use lectern::embedding::{EmbeddingVectorSource, FastEmbedProvider};
use lectern::engine::{TurnOutcome, TutorEngine};
use lectern::error::{LecternError, Result};
use lectern::retrieval::{Document, FastEmbedReranker, HybridRanker, InMemoryCorpus, RetrieveOptions};
use lectern::router::{Query, RouterDecision};
use lectern::session::RouteOverride;
use lectern::text::truncate_chars;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const EMBED_BATCH_SIZE: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    if let Commands::Config { action } = &cli.command {
        return cmd_config(cli.config.clone(), cli.profile.as_deref(), action);
    }

    let config = load_config(cli.config.clone(), cli.profile.as_deref())?;

    match &cli.command {
        Commands::Decide {
            query,
            rewritten,
            filters,
        } => {
            cmd_decide(&cli, &config, query, rewritten.as_deref(), filters).await?;
        }
        Commands::Retrieve {
            query,
            limit,
            no_rerank,
            filters,
        } => {
            cmd_retrieve(&cli, &config, query, *limit, *no_rerank, filters).await?;
        }
        Commands::Chat { chat_id, filters } => {
            cmd_chat(&cli, &config, chat_id.clone(), filters).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("lectern=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lectern=info"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config_path: Option<PathBuf>, profile: Option<&str>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'lectern config init' to create one."
        );
        let mut config = Config::default();
        if let Some(profile) = profile {
            config.apply_profile(profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, profile),
        None => Config::load(&path),
    }
}

/// Corpus, lexical source and the optional model-backed stages
async fn build_ranker(cli: &Cli, config: &Config) -> Result<Arc<HybridRanker>> {
    let corpus_path = cli.corpus.as_deref().ok_or_else(|| {
        LecternError::Config("No corpus given; pass --corpus <FILE>".to_string())
    })?;
    let corpus = Arc::new(InMemoryCorpus::from_json_file(corpus_path)?);
    tracing::info!("Loaded {} documents from {}", corpus.len(), corpus_path.display());

    let mut ranker =
        HybridRanker::new(corpus.clone(), config.fusion.clone())?.with_lexical(corpus.clone());

    if let Some(model) = cli.vectors.clone() {
        let documents: Vec<Document> = corpus.documents().to_vec();
        let source = tokio::task::spawn_blocking(move || {
            let provider = FastEmbedProvider::new(&model)?;
            EmbeddingVectorSource::build(Arc::new(provider), documents, EMBED_BATCH_SIZE)
        })
        .await
        .context("Embedding task panicked")?
        .context("Failed to build vector source")?;
        ranker = ranker.with_vector(Arc::new(source));
    }

    if let Some(model) = cli.rerank.as_deref() {
        let reranker = FastEmbedReranker::new(model).context("Failed to load reranker")?;
        ranker = ranker.with_reranker(Arc::new(reranker));
    }

    Ok(Arc::new(ranker))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| LecternError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn print_decision(decision: &RouterDecision) {
    println!(
        "{} (confidence {:.3}, task {})",
        decision.decision, decision.confidence, decision.task
    );
    println!("  Reason: {}", decision.reason);
    let signals = &decision.passport.signals;
    println!(
        "  Signals: hits={} sim={:.3} struct={:.2} kw={:.0} pin={:.3} weak={}",
        signals.hits,
        signals.similarity,
        signals.struct_bonus,
        signals.keyword_signal,
        signals.pin_signal,
        signals.weak
    );
}

fn print_documents(documents: &[Document]) {
    for (rank, doc) in documents.iter().enumerate() {
        let meta: Vec<String> = doc
            .metadata
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!(
            "{:>2}. [{:.4}] {} {{{}}}",
            rank + 1,
            doc.score.unwrap_or_default(),
            doc.id.as_deref().unwrap_or("-"),
            meta.join(", ")
        );
        println!("    {}", truncate_chars(&doc.content, 160));
    }
}

async fn cmd_decide(
    cli: &Cli,
    config: &Config,
    query: &str,
    rewritten: Option<&str>,
    filters: &FilterArgs,
) -> Result<()> {
    let ranker = build_ranker(cli, config).await?;
    let router = lectern::router::Router::new(config, Arc::clone(&ranker))?;

    let mut query = Query::new(query);
    if let Some(rewritten) = rewritten {
        query = query.with_rewritten(rewritten);
    }

    let explicit = ranker.sanitize_filters(&filters.to_filters()).await;
    let decision = router.decide(&query, None, Some(&explicit)).await;

    if cli.json {
        print_json(&decision)
    } else {
        print_decision(&decision);
        Ok(())
    }
}

async fn cmd_retrieve(
    cli: &Cli,
    config: &Config,
    query: &str,
    limit: usize,
    no_rerank: bool,
    filters: &FilterArgs,
) -> Result<()> {
    let ranker = build_ranker(cli, config).await?;
    let filters = ranker.sanitize_filters(&filters.to_filters()).await;
    let options = if no_rerank {
        RetrieveOptions::PROBE
    } else {
        RetrieveOptions::FULL
    };

    let documents = ranker.retrieve_with(query, &filters, limit, options).await;

    if cli.json {
        print_json(&documents)
    } else {
        if documents.is_empty() {
            println!("No passages found");
        }
        print_documents(&documents);
        Ok(())
    }
}

fn print_turn(outcome: &TurnOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    print_decision(&outcome.decision);
    if outcome.relaxed {
        println!("  (no block-level match, widened to chapter)");
    }
    print_documents(&outcome.documents);
    Ok(())
}

async fn cmd_chat(
    cli: &Cli,
    config: &Config,
    chat_id: Option<String>,
    filters: &FilterArgs,
) -> Result<()> {
    let ranker = build_ranker(cli, config).await?;
    let engine = TutorEngine::new(config, ranker)?;
    let chat_id = chat_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = engine.sessions().get_or_create(&chat_id).await;
    let explicit = filters.to_filters();

    println!("Chat {} (type /quit to leave)", chat_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = lines.next_line().await.map_err(|e| LecternError::Io {
            source: e,
            context: "Failed to read from stdin".to_string(),
        })?;
        let Some(line) = line else {
            break;
        };
        let Some(input) = ChatInput::parse(&line) else {
            continue;
        };

        match input {
            ChatInput::Question(question) => {
                let outcome = engine
                    .handle_turn(&chat_id, Query::new(question.clone()), Some(explicit.clone()))
                    .await;
                print_turn(&outcome, cli.json)?;

                // Generation happens downstream; the top passage stands in for the answer
                let answer = outcome
                    .documents
                    .first()
                    .map(|d| truncate_chars(&d.content, 500).to_string())
                    .unwrap_or_default();
                engine.record_answer(&chat_id, &question, &answer).await?;
            }
            ChatInput::Pin => match session.lock().await.pin() {
                Some(pinned) => println!("Pinned {:?}", pinned),
                None => println!("Nothing to pin yet"),
            },
            ChatInput::Unpin => {
                session.lock().await.unpin();
                println!("Unpinned");
            }
            ChatInput::Reset { full } => {
                session.lock().await.reset(full);
                println!("{}", if full { "Session cleared" } else { "History cleared (pin kept)" });
            }
            ChatInput::Forget => {
                session.lock().await.forget_links();
                println!("Previous turn forgotten");
            }
            ChatInput::Mode(None) => {
                session.lock().await.set_route_override(None);
                println!("Routing is automatic");
            }
            ChatInput::Mode(Some(mode)) => match RouteOverride::parse(&mode) {
                Some(mode) => {
                    session.lock().await.set_route_override(Some(mode));
                    println!("Routing forced: {}", mode);
                }
                None => println!("Unknown mode '{}': use retrieve, generate, hybrid or auto", mode),
            },
            ChatInput::Quit => break,
            ChatInput::Unknown(command) => println!("Unknown command /{}", command),
        }
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<&str>,
    action: &ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| LecternError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            match section {
                Some(section) => match value.get(section) {
                    Some(part) => print_json(part)?,
                    None => {
                        return Err(LecternError::Config(format!(
                            "Unknown config section: {}",
                            section
                        )))
                    }
                },
                None => print_json(&value)?,
            }
        }
        ConfigAction::Validate { file } => {
            let path = match file.clone().or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            init_config(&path, *force)?;
        }
    }

    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to create config directory: {:?}", parent),
        })?;
    }

    Config::default().save(path)?;
    println!("✓ Configuration initialized at: {}", path.display());
    Ok(())
}
