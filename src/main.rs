use docsift::cli::{Cli, Commands, ConfigAction};
use docsift::config::Config;
use docsift::error::{Result, SiftError};
use docsift::pipeline::{AnswerStatus, RetrievalPipeline};
use docsift::storage::{CacheStats, CacheStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "docsift=debug" } else { "docsift=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one command; `Ok(false)` means it completed without results
fn run(cli: Cli) -> Result<bool> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let profile = cli.profile.as_deref();
    let root = cli.root;
    let setup = |root: Option<PathBuf>| -> Result<(PathBuf, Config)> {
        Ok((resolve_root(root)?, load_config(&config_path, profile)?))
    };

    match cli.command {
        Commands::Build => {
            let (root, config) = setup(root)?;
            cmd_build(&root, config)
        }
        Commands::Search { query, top_k, json } => {
            let (root, config) = setup(root)?;
            cmd_search(&root, config, &query, top_k, json)
        }
        Commands::Ask { question } => {
            let (root, config) = setup(root)?;
            cmd_ask(&root, config, &question)
        }
        Commands::Status => {
            let (root, config) = setup(root)?;
            cmd_status(&root, &config)
        }
        Commands::Config { action } => cmd_config(&config_path, profile, action),
    }
}

fn load_config(path: &Path, profile: Option<&str>) -> Result<Config> {
    match profile {
        Some(profile) => Config::load_with_profile(path, profile),
        None => Config::load_or_default(path),
    }
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir()
            .map_err(|e| SiftError::io(e, "Failed to determine current directory")),
    }
}

fn cmd_build(root: &Path, config: Config) -> Result<bool> {
    let mut pipeline = RetrievalPipeline::new(root, config)?;
    let report = pipeline.build_index()?;

    println!("✓ Indexed {}", root.display());
    println!("  {}", report);
    if report.stale_entries_removed > 0 {
        println!("  Removed {} stale cache entries", report.stale_entries_removed);
    }
    Ok(true)
}

fn cmd_search(
    root: &Path,
    config: Config,
    query: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<bool> {
    let top_k = top_k.unwrap_or(config.retrieval.default_top_k);
    let mut pipeline = RetrievalPipeline::new(root, config)?;
    let results = pipeline.search(query, top_k)?;

    if json {
        let out = serde_json::to_string_pretty(&results)
            .map_err(|e| SiftError::json(e, "Failed to serialize search results"))?;
        println!("{}", out);
        return Ok(!results.is_empty());
    }

    if results.is_empty() {
        println!("No matching documents for: {}", query);
        return Ok(false);
    }

    for (rank, result) in results.iter().enumerate() {
        println!("{}. {} (score {:.3})", rank + 1, result.chunk.label(), result.score);
        println!("{}", result.chunk.content);
        println!();
    }
    Ok(true)
}

fn cmd_ask(root: &Path, config: Config, question: &str) -> Result<bool> {
    if !config.llm.enabled {
        return Err(SiftError::Config(
            "ask requires llm.enabled = true in the configuration".to_string(),
        ));
    }

    let mut pipeline = RetrievalPipeline::new(root, config)?;
    let answer = pipeline.ask(question)?;

    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {}", source);
        }
    }
    Ok(answer.status == AnswerStatus::Answered)
}

/// Reads the cache directly so no model has to be loaded
fn cmd_status(root: &Path, config: &Config) -> Result<bool> {
    let data_dir = config.data_dir_for(root);
    if !data_dir.exists() {
        println!("{} has not been indexed yet. Run 'docsift build'.", root.display());
        return Ok(false);
    }

    let stats = CacheStore::open(&data_dir)?.stats()?;
    println!("docsift status");
    println!("==============");
    println!("Root:               {}", root.display());
    println!("Data directory:     {}", data_dir.display());
    println!("Indexed files:      {}", stats.files);
    println!("Indexed chunks:     {}", stats.chunks);
    println!("Cached embeddings:  {}", stats.cached_embeddings);
    println!("Disk usage:         {}", CacheStats::format_size(stats.disk_bytes));
    println!("Embedding model:    {}", config.embedding.model);
    println!(
        "Reranker:           {}",
        if config.reranking.enabled {
            config.reranking.model.as_str()
        } else {
            "disabled"
        }
    );
    Ok(true)
}

fn cmd_config(path: &Path, profile: Option<&str>, action: ConfigAction) -> Result<bool> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(true);
            }
            Config::default().save(path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config(path, profile)?;
            let out = toml::to_string_pretty(&config)?;
            println!("{}", out);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }
    Ok(true)
}
