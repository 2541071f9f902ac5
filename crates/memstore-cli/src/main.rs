//! `memstore` – command line front end for the memory store.
//!
//! Each invocation resolves its configuration (defaults, `~/.memstore/config.toml`,
//! `MEMSTORE_*` variables, then flags), runs exactly one engine operation, and
//! exits. Command output goes to stdout; logs and errors go to stderr.

mod config;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use memstore_core::{EngineConfig, MemError, MemoryEngine, Record, SearchHit};
use memstore_types::DEFAULT_KIND;

/// Characters of record text shown per line in human output.
const SNIPPET_CHARS: usize = 80;

#[derive(Parser, Debug)]
#[command(name = "memstore", version, about = "Local persistent memory store with similarity search")]
struct Cli {
    /// Store file (overrides config and MEMSTORE_PATH)
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Vector dimension (overrides config and MEMSTORE_VECTOR_DIM)
    #[arg(long, global = true)]
    dim: Option<usize>,

    /// Config file (defaults to ~/.memstore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a new memory
    Add {
        #[arg(long)]
        text: String,
        #[arg(long, default_value = DEFAULT_KIND)]
        kind: String,
        #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
        weight: f32,
    },
    /// Rank memories against a query
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i64>,
    },
    /// List the newest memories
    Recent {
        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i64>,
    },
    /// Keep only the newest memories
    Compact {
        #[arg(long, allow_hyphen_values = true)]
        keep: Option<i64>,
    },
    /// Write the store as text
    Export {
        /// Destination file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Merge a text dump or legacy log into the store
    Import {
        #[arg(long)]
        from: PathBuf,
    },
    /// Summarise the store
    Stats,
    /// Recompute stored vectors with the current encoder
    Reembed,
    /// Show the effective configuration
    Config {
        /// Write it to the config file (fails if the file exists)
        #[arg(long, default_value_t = false)]
        init: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Add { .. } => "add",
            Command::Search { .. } => "search",
            Command::Recent { .. } => "recent",
            Command::Compact { .. } => "compact",
            Command::Export { .. } => "export",
            Command::Import { .. } => "import",
            Command::Stats => "stats",
            Command::Reembed => "reembed",
            Command::Config { .. } => "config",
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let op = cli.command.name();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {op} failed: {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// RUST_LOG filters (default `warn`); MEMSTORE_LOG_FORMAT=json switches to
/// newline-delimited JSON. Always written to stderr.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    if std::env::var("MEMSTORE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .init();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

fn run(cli: Cli) -> Result<(), MemError> {
    let config_file = cli.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = config::resolve(&config_file)?;
    if let Some(path) = cli.path {
        cfg.store_path = path;
    }
    if let Some(dim) = cli.dim {
        cfg.vector_dim = dim;
    }
    debug!(config = %config_file.display(), ?cfg, "configuration resolved");

    if let Command::Config { init } = cli.command {
        if init {
            config::init_at(&cfg, &config_file)?;
            println!("wrote {}", config_file.display().to_string().bold());
        } else if cli.json {
            print_json(&cfg)?;
        } else {
            print!("{}", config::render(&cfg)?);
        }
        return Ok(());
    }

    let engine = MemoryEngine::new(
        EngineConfig::new(&cfg.store_path)
            .with_vector_dim(cfg.vector_dim)
            .with_strict_writes(cfg.strict_writes),
    );
    let json = cli.json;

    match cli.command {
        Command::Add { text, kind, weight } => {
            let rec = engine.add(&text, &kind, weight)?;
            if json {
                print_json(&RecordView::from(&rec))?;
            } else {
                println!("{}", rec.id);
            }
        }
        Command::Search { query, limit } => {
            let limit = to_count(limit, cfg.search_limit, "limit")?;
            let hits = engine.search(&query, limit)?;
            if json {
                let view: Vec<HitView<'_>> = hits.iter().map(HitView::from).collect();
                print_json(&view)?;
            } else {
                for hit in &hits {
                    print_hit(hit);
                }
            }
        }
        Command::Recent { limit } => {
            let limit = to_count(limit, cfg.recent_limit, "limit")?;
            let records = engine.recent(limit)?;
            if json {
                let view: Vec<RecordView<'_>> = records.iter().map(RecordView::from).collect();
                print_json(&view)?;
            } else {
                for rec in &records {
                    println!(
                        "{}\t{}\t{}\t{}",
                        rec.kind.cyan(),
                        rec.id,
                        format_ts(rec.ts).dimmed(),
                        snippet(&rec.text)
                    );
                }
            }
        }
        Command::Compact { keep } => {
            let keep = to_keep(keep, cfg.compact_keep)?;
            let report = engine.compact(keep)?;
            if json {
                print_json(&report)?;
            } else {
                println!("removed {} (kept {})", report.removed, report.kept);
            }
        }
        Command::Export { out } => {
            let dump = engine.export_text()?;
            match out {
                Some(path) => fs::write(&path, dump).map_err(|e| MemError::io("write", &path, e))?,
                None => print!("{dump}"),
            }
        }
        Command::Import { from } => {
            let input = fs::read_to_string(&from).map_err(|e| MemError::io("read", &from, e))?;
            let report = engine.import_text(&input)?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "imported {}, skipped {} (re-embedded {})",
                    report.imported, report.skipped, report.reembedded
                );
            }
        }
        Command::Config { .. } => {}
        Command::Reembed => {
            let report = engine.reembed()?;
            if json {
                print_json(&report)?;
            } else {
                println!("updated {} of {} records", report.updated, report.checked);
            }
        }
        Command::Stats => {
            let stats = engine.stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("path     {}", stats.path.display().to_string().bold());
                println!("exists   {}", stats.exists);
                println!("version  {}", stats.version);
                println!("dim      {}", stats.vector_dim);
                println!("records  {}", stats.records);
                if let (Some(oldest), Some(newest)) = (stats.oldest_ts, stats.newest_ts) {
                    println!("oldest   {}", format_ts(oldest));
                    println!("newest   {}", format_ts(newest));
                }
                for (kind, count) in &stats.kinds {
                    println!("  {:<12} {count}", kind.cyan());
                }
            }
        }
    }
    Ok(())
}

/// Flag value, or the configured default, as a positive count.
fn to_count(flag: Option<i64>, default: usize, what: &str) -> Result<usize, MemError> {
    match flag {
        None => Ok(default),
        Some(n) if n > 0 => usize::try_from(n)
            .map_err(|_| MemError::Validation(format!("{what} is too large: {n}"))),
        Some(n) => Err(MemError::Validation(format!("{what} must be at least 1, got {n}"))),
    }
}

fn to_keep(flag: Option<i64>, default: usize) -> Result<usize, MemError> {
    match flag {
        None => Ok(default),
        Some(n) => usize::try_from(n)
            .map_err(|_| MemError::Validation(format!("keep must not be negative, got {n}"))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// A record without its vector.
#[derive(Serialize)]
struct RecordView<'a> {
    id: u128,
    ts: i64,
    kind: &'a str,
    weight: f32,
    text: &'a str,
}

impl<'a> From<&'a Record> for RecordView<'a> {
    fn from(rec: &'a Record) -> Self {
        Self {
            id: rec.id,
            ts: rec.ts,
            kind: &rec.kind,
            weight: rec.weight,
            text: &rec.text,
        }
    }
}

#[derive(Serialize)]
struct HitView<'a> {
    score: f32,
    similarity: f32,
    age_days: f32,
    #[serde(flatten)]
    record: RecordView<'a>,
}

impl<'a> From<&'a SearchHit> for HitView<'a> {
    fn from(hit: &'a SearchHit) -> Self {
        Self {
            score: hit.score,
            similarity: hit.similarity,
            age_days: hit.age_days,
            record: RecordView::from(&hit.record),
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), MemError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| MemError::Validation(format!("cannot encode output: {e}")))?;
    println!("{out}");
    Ok(())
}

fn print_hit(hit: &SearchHit) {
    println!(
        "{}\t{}\t{}\tw={}\t{:.1}d\t{}",
        format!("{:.3}", hit.score).green().bold(),
        hit.record.kind.cyan(),
        hit.record.id,
        hit.record.weight,
        hit.age_days,
        snippet(&hit.record.text)
    );
}

/// First line-safe characters of `text`, with line breaks flattened.
fn snippet(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= SNIPPET_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(SNIPPET_CHARS - 1).collect();
    cut.push('…');
    cut
}

fn format_ts(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\nb\r\nc"), "a b  c");
        let long = "x".repeat(200);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), SNIPPET_CHARS);
        assert!(s.ends_with('…'));
    }

    #[test]
    fn counts_must_be_positive() {
        assert_eq!(to_count(None, 3, "limit").unwrap(), 3);
        assert_eq!(to_count(Some(7), 3, "limit").unwrap(), 7);
        assert!(matches!(to_count(Some(0), 3, "limit"), Err(MemError::Validation(_))));
        assert!(matches!(to_count(Some(-2), 3, "limit"), Err(MemError::Validation(_))));
    }

    #[test]
    fn keep_may_be_zero_but_not_negative() {
        assert_eq!(to_keep(Some(0), 5000).unwrap(), 0);
        assert_eq!(to_keep(None, 5000).unwrap(), 5000);
        assert!(matches!(to_keep(Some(-1), 5000), Err(MemError::Validation(_))));
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "memstore", "search", "--query", "theme", "--limit", "2", "--path", "/tmp/m.hnsw", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.path, Some(PathBuf::from("/tmp/m.hnsw")));
        assert!(matches!(cli.command, Command::Search { limit: Some(2), .. }));
    }

    #[test]
    fn add_defaults_kind_and_weight() {
        let cli = Cli::try_parse_from(["memstore", "add", "--text", "hello"]).unwrap();
        match cli.command {
            Command::Add { kind, weight, .. } => {
                assert_eq!(kind, "summary");
                assert_eq!(weight, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn config_subcommand_takes_init_flag() {
        let cli = Cli::try_parse_from(["memstore", "config", "--init", "--config", "/tmp/c.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Config { init: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }

    #[test]
    fn negative_keep_reaches_validation() {
        let cli = Cli::try_parse_from(["memstore", "compact", "--keep", "-1"]).unwrap();
        assert!(matches!(cli.command, Command::Compact { keep: Some(-1) }));
    }

    #[test]
    fn hit_json_omits_vector() {
        let rec = Record {
            id: 42,
            ts: 0,
            kind: "profile".into(),
            weight: 3.0,
            text: "t".into(),
            vector: vec![1.0; 4],
        };
        let hit = SearchHit::new(rec, 0.5, 0);
        let json = serde_json::to_value(HitView::from(&hit)).unwrap();
        assert_eq!(json["kind"], "profile");
        assert!(json.get("vector").is_none());
        assert!((json["score"].as_f64().unwrap() - 3.0).abs() < 1e-6);
    }
}
