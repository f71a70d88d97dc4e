//! folio: encrypted page delivery client
//!
//! Commands:
//!   fetch <book_id>         - look up metadata, then download every page
//!   metadata <book_id>      - print descriptive metadata
//!   cache-status <book_id>  - show what the local content cache holds
//!   config show             - display the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use folio_core::config::FolioConfig;
use folio_core::{BookMetadata, UnitIndex};
use folio_session::{fetch_metadata, ContentCache, Credentials, FetchOrchestrator};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "folio",
    version,
    about = "Encrypted page delivery client",
    long_about = "folio: fetch paginated content over the delivery websocket, with a resumable local cache"
)]
struct Cli {
    /// Path to folio.toml configuration file
    #[arg(long, short = 'c', env = "FOLIO_CONFIG", default_value = "folio.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "FOLIO_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "FOLIO_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Bearer token (overrides [client] auth_token)
    #[arg(long, env = "FOLIO_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Verification token sent with `initialise` (overrides [client] recaptcha_token)
    #[arg(long, env = "FOLIO_RECAPTCHA_TOKEN", hide_env_values = true)]
    recaptcha_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download every page of a book into a directory
    Fetch {
        book_id: u64,
        /// Output directory (default: ./<book_id>)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Print descriptive metadata for a book
    Metadata { book_id: u64 },

    /// Show the local content cache of a book
    #[command(name = "cache-status")]
    CacheStatus { book_id: u64 },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = FolioConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| log_format_from_config(&config.log.format));
    init_logging(level, &format);

    match &cli.command {
        Commands::Fetch { book_id, out, yes } => {
            cmd_fetch(&cli, &config, *book_id, out.as_deref(), *yes).await
        }
        Commands::Metadata { book_id } => cmd_metadata(&config, *book_id).await,
        Commands::CacheStatus { book_id } => cmd_cache_status(&config, *book_id),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn log_format_from_config(value: &str) -> LogFormat {
    if value.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

/// Resolve one token: CLI flag / env var > config file > interactive prompt
fn resolve_secret(
    flag: Option<&str>,
    configured: Option<&secrecy::SecretString>,
    prompt: &str,
) -> Result<String> {
    if let Some(value) = flag.filter(|v| !v.is_empty()) {
        return Ok(value.to_owned());
    }
    if let Some(secret) = configured {
        return Ok(secret.expose_secret().to_owned());
    }
    let value = rpassword::prompt_password(prompt).context("reading token from terminal")?;
    let value = value.trim().to_owned();
    if value.is_empty() {
        anyhow::bail!("no value entered for {}", prompt.trim_end_matches([':', ' ']));
    }
    Ok(value)
}

fn resolve_credentials(cli: &Cli, config: &FolioConfig) -> Result<Credentials> {
    let auth_token = resolve_secret(
        cli.auth_token.as_deref(),
        config.client.auth_token.as_ref(),
        "auth token: ",
    )?;
    let recaptcha_token = resolve_secret(
        cli.recaptcha_token.as_deref(),
        config.client.recaptcha_token.as_ref(),
        "recaptcha token: ",
    )?;
    Ok(Credentials::new(auth_token, recaptcha_token))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("building progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn make_spinner(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .context("building spinner template")?,
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

// ── `folio fetch` ─────────────────────────────────────────────────────────────

async fn cmd_fetch(
    cli: &Cli,
    config: &FolioConfig,
    book_id: u64,
    out: Option<&Path>,
    yes: bool,
) -> Result<()> {
    let meta = lookup(config, book_id).await?;
    print_metadata(&meta);
    println!();

    if !yes && !confirm("Download this book?")? {
        println!("aborted");
        return Ok(());
    }

    let credentials = resolve_credentials(cli, config)?;
    let orchestrator = FetchOrchestrator::from_config(config, credentials);
    let out_dir = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(book_id.to_string()));
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("creating output directory: {}", out_dir.display()))?;

    let spinner = make_spinner("connect")?;
    spinner.set_message(config.endpoints.provider_url.clone());
    let fetch = orchestrator.fetch(book_id).await;
    spinner.finish_and_clear();
    let mut fetch = fetch.with_context(|| format!("starting session for book {book_id}"))?;

    let pb = make_progress_bar(fetch.total_units() as u64, "fetch")?;
    let mut from_cache = 0usize;
    while let Some(unit) = fetch.next_unit().await {
        let unit = unit.with_context(|| format!("fetching book {book_id}"))?;
        let path = out_dir.join(unit_file_name(unit.index));
        tokio::fs::write(&path, &unit.content)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        if unit.from_cache {
            from_cache += 1;
        }
        pb.set_message(format!("unit {}", unit.index));
        pb.inc(1);
    }
    pb.finish_with_message("done");

    info!(book_id, from_cache, out = %out_dir.display(), "fetch finished");
    println!(
        "{} units written to {} ({from_cache} from cache)",
        fetch.total_units(),
        out_dir.display()
    );
    Ok(())
}

fn unit_file_name(index: UnitIndex) -> String {
    format!("{index:05}.html")
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush().context("flushing stdout")?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

// ── `folio metadata` ──────────────────────────────────────────────────────────

async fn lookup(config: &FolioConfig, book_id: u64) -> Result<BookMetadata> {
    let client = reqwest::Client::new();
    fetch_metadata(&client, &config.endpoints.metadata_url, book_id)
        .await
        .with_context(|| format!("looking up metadata for book {book_id}"))
}

async fn cmd_metadata(config: &FolioConfig, book_id: u64) -> Result<()> {
    let meta = lookup(config, book_id).await?;
    print_metadata(&meta);
    Ok(())
}

fn print_metadata(meta: &BookMetadata) {
    println!("title:    {}", meta.title);
    if let Some(ref subtitle) = meta.subtitle {
        println!("subtitle: {subtitle}");
    }
    println!("author:   {}", meta.author);
    if let Some(pages) = meta.num_pages {
        println!("pages:    {pages}");
    }
    if let Some(ref isbn) = meta.isbn13 {
        println!("isbn13:   {isbn}");
    }
    if let Some(ref format) = meta.format {
        println!("format:   {format}");
    }
}

// ── `folio cache-status` ──────────────────────────────────────────────────────

fn cmd_cache_status(config: &FolioConfig, book_id: u64) -> Result<()> {
    let path = config.cache.book_cache_path(book_id);
    let cache = ContentCache::open(&path)
        .with_context(|| format!("reading content cache: {}", path.display()))?;

    println!("cache:  {}", path.display());
    println!("units:  {}", cache.len());
    if let (Some(first), Some(last)) = (cache.indices().next(), cache.indices().last()) {
        println!("range:  {first}..={last}");
    }
    Ok(())
}

// ── `folio config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &FolioConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!(
        "# auth_token: {}",
        if config.client.auth_token.is_some() { "[REDACTED]" } else { "unset" }
    );
    println!(
        "# recaptcha_token: {}",
        if config.client.recaptcha_token.is_some() { "[REDACTED]" } else { "unset" }
    );
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
