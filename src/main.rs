//! # tm CLI
//!
//! The `tm` binary drives the matching engine over TMX files: it streams
//! units out of a file, loads them into an in-memory store, and runs
//! queries, exports and maintenance scans against that store.
//!
//! ## Usage
//!
//! ```bash
//! tm --config ./config/tm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tm parse <file>` | Stream units as JSON lines |
//! | `tm pairs <file>` | List language pairs present |
//! | `tm query <file> <text>` | Best match (or concordance) for a text |
//! | `tm export <file>` | Re-export units as zipped TMX |
//! | `tm dedup <file>` | Report duplicate units |
//! | `tm check <file>` | Run the content check over one domain |
//! | `tm tags <text>` | Show how inline markup is normalized |
//!
//! Logs go to stderr (`RUST_LOG`, default `tm_engine=info`); results go to
//! stdout.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tm_engine::config::{self, Config};
use tm_engine::export::{ExportRequest, TmExport};
use tm_engine::import::run_import;
use tm_engine::maintenance::{find_duplicates, run_content_check, PiiChecker};
use tm_engine::markup;
use tm_engine::models::LangPair;
use tm_engine::progress::{ProgressMode, ProgressReporter};
use tm_engine::query::{render, OutputFormat, QueryOrchestrator, QueryParams};
use tm_engine::store::{InMemoryStore, SearchFilters};
use tm_engine::tmx::{ParseOptions, TmxReader};
use tm_engine::tokenizer::TokenizerRegistry;

/// Translation-memory matching over TMX files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "tm",
    about = "Translation-memory matching, import/export and maintenance over TMX files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tm.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human output on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Moses,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the units of a TMX file (or zip of TMX files) as JSON lines.
    Parse {
        file: PathBuf,

        /// Tag stored on every unit.
        #[arg(long)]
        domain: Option<String>,

        /// Only yield these pairs (`en-es`). Repeatable.
        #[arg(long = "pair", value_parser = parse_pair)]
        pairs: Vec<LangPair>,

        #[arg(long)]
        username: Option<String>,
    },

    /// List the language pairs present in a file.
    Pairs { file: PathBuf },

    /// Load a file and find the best match for a text.
    Query {
        file: PathBuf,

        text: String,

        #[arg(long, value_parser = parse_pair)]
        pair: LangPair,

        /// Domain tag stored on every loaded unit.
        #[arg(long)]
        load_domain: Option<String>,

        /// Restrict retrieval to these domains. Repeatable.
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// Penalize, but keep, candidates outside this domain.
        #[arg(long)]
        preferred_domain: Option<String>,

        #[arg(long)]
        min_match: Option<f64>,

        /// Return several differing matches instead of the best one.
        #[arg(long)]
        concordance: bool,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value = "json")]
        format: FormatArg,
    },

    /// Load a file and export it again as zipped TMX.
    Export {
        file: PathBuf,

        #[arg(long, value_parser = parse_pair)]
        pair: LangPair,

        /// Domain tag stored on every loaded unit.
        #[arg(long)]
        load_domain: Option<String>,

        /// Domains to export; several go into one combined member.
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// Export root. Defaults to `[export] path`.
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        duplicates_only: bool,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value = "cli")]
        username: String,
    },

    /// Load a file and report duplicate units.
    Dedup {
        file: PathBuf,

        #[arg(long, value_parser = parse_pair)]
        pair: LangPair,
    },

    /// Load a file and check one domain's units for personal data.
    Check {
        file: PathBuf,

        #[arg(long, value_parser = parse_pair)]
        pair: LangPair,

        #[arg(long)]
        domain: String,
    },

    /// Show how inline markup in a text is normalized.
    Tags { text: String },
}

fn parse_pair(s: &str) -> Result<LangPair, String> {
    LangPair::parse(s).ok_or_else(|| format!("invalid language pair '{}', expected e.g. en-es", s))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tm_engine=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Import `file` into a fresh in-memory store.
async fn load_store(
    cfg: &Config,
    file: &Path,
    domain: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<Arc<InMemoryStore>> {
    let store = Arc::new(InMemoryStore::new());
    let options = ParseOptions {
        domain: domain.map(str::to_string),
        ..Default::default()
    };
    run_import(
        store.as_ref(),
        file,
        options,
        cfg.maintenance.chunk_size,
        progress,
    )
    .await?;
    Ok(store)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config_or_default(&cli.config)?;
    let progress = match cli.progress {
        Some(ProgressArg::Off) => ProgressMode::Off,
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        None => ProgressMode::default_for_tty(),
    }
    .reporter();

    match cli.command {
        Commands::Parse {
            file,
            domain,
            pairs,
            username,
        } => {
            let options = ParseOptions {
                domain,
                lang_pairs: pairs,
                username,
            };
            let mut units = TmxReader::new(&file)
                .with_options(options)
                .parse()
                .with_context(|| format!("Failed to open TMX input: {}", file.display()))?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for unit in units.by_ref() {
                writeln!(out, "{}", serde_json::to_string(&unit)?)?;
            }
            out.flush()?;
            let report = units.report();
            eprintln!(
                "parsed {} units from {} document(s), skipped {} records",
                report.units, report.documents, report.skipped_records
            );
            if !report.is_clean() {
                anyhow::bail!(
                    "could not read: {}",
                    report.failed_documents.join(", ")
                );
            }
        }
        Commands::Pairs { file } => {
            let pairs = TmxReader::new(&file)
                .language_pairs()
                .with_context(|| format!("Failed to open TMX input: {}", file.display()))?;
            for pair in pairs {
                println!("{}", pair);
            }
        }
        Commands::Query {
            file,
            text,
            pair,
            load_domain,
            domains,
            preferred_domain,
            min_match,
            concordance,
            limit,
            format,
        } => {
            let store =
                load_store(&cfg, &file, load_domain.as_deref(), progress.as_ref()).await?;
            let orchestrator =
                QueryOrchestrator::new(store, cfg.query.clone(), cfg.scoring())
                    .with_tag_transfer(Arc::new(TokenizerRegistry::with_default()));

            let mut params = QueryParams::single(&text, pair)
                .with_domains(domains)
                .with_min_match(min_match.unwrap_or(cfg.query.min_match))
                .with_limit(limit.unwrap_or(cfg.query.concordance_limit))
                .with_concordance(concordance)
                .with_output(match format {
                    FormatArg::Json => OutputFormat::Json,
                    FormatArg::Moses => OutputFormat::Moses,
                });
            if let Some(domain) = preferred_domain {
                params = params.with_preferred_domain(domain);
            }

            let results = orchestrator.run(&params).await?;
            println!("{}", render(params.output, &params.queries, &results));
        }
        Commands::Export {
            file,
            pair,
            load_domain,
            domains,
            out,
            duplicates_only,
            limit,
            username,
        } => {
            let store =
                load_store(&cfg, &file, load_domain.as_deref(), progress.as_ref()).await?;
            let mut export_cfg = cfg.clone();
            if let Some(out) = out {
                export_cfg.export.path = out;
            }
            let export = TmExport::new(store, &export_cfg);
            let mut request = ExportRequest::new(pair, username);
            request.domains = domains;
            request.duplicates_only = duplicates_only;
            request.limit = limit;
            let record = export.run(&request, progress.as_ref())?;
            print_json(&record)?;
        }
        Commands::Dedup { file, pair } => {
            let store = load_store(&cfg, &file, None, progress.as_ref()).await?;
            let groups = find_duplicates(
                store.as_ref(),
                &pair,
                &SearchFilters::default(),
                progress.as_ref(),
            )?;
            print_json(&groups)?;
        }
        Commands::Check { file, pair, domain } => {
            let store = load_store(&cfg, &file, Some(&domain), progress.as_ref()).await?;
            let summary = run_content_check(
                store.as_ref(),
                &pair,
                &domain,
                &PiiChecker::new(),
                cfg.maintenance.chunk_size,
                progress.as_ref(),
            )?;
            print_json(&summary)?;
        }
        Commands::Tags { text } => {
            let (fixed, stripped) = markup::fix_tags(&text);
            print_json(&serde_json::json!({
                "stripped": markup::strip_tags(&text),
                "fixed": fixed,
                "fixed_stripped": stripped,
                "simplified": markup::simplify_tags(&text),
                "renamed": markup::rename_tags(&text),
                "normalized": markup::normalize_markup(&text),
                "text": text,
            }))?;
        }
    }

    Ok(())
}
