mod db;
mod error;
mod outline;
mod parser;
mod settings;
mod source;
mod tables;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::parser::{BlockKind, CalloutClose, NoisePolicy, ParsedDocument};
use crate::settings::Settings;
use crate::source::Document;

#[derive(Parser)]
#[command(name = "ctd_lines", about = "Section paths and special blocks for extracted CTD Module 2 text")]
struct Cli {
    /// Settings file (default: ./ctd.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    parser: ParserArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the settings file and environment.
#[derive(Args)]
struct ParserArgs {
    /// Heading number prefix (e.g. 2.3.P)
    #[arg(long, global = true)]
    root_prefix: Option<String>,
    /// Accept headings followed by a title on the same line
    #[arg(long, global = true)]
    loose: bool,
    /// Treat a repeated heading as the already open section
    #[arg(long, global = true)]
    equality_ancestor: bool,
    /// Leave sentinel lines and first table rows outside their block
    #[arg(long, global = true)]
    marker_outside_block: bool,
    /// Close concern/example blocks at the next blank line
    #[arg(long, global = true)]
    close_on_blank: bool,
    /// Drop page numbers, running headers and TOC lines from the output
    #[arg(long, global = true)]
    skip_noise: bool,
}

impl ParserArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(prefix) = &self.root_prefix {
            settings.root_prefix = prefix.clone();
        }
        if self.loose {
            settings.strict_heading_match = false;
        }
        if self.equality_ancestor {
            settings.equality_counts_as_ancestor = true;
        }
        if self.marker_outside_block {
            settings.marker_line_belongs_to_block = false;
        }
        if self.close_on_blank {
            settings.callout_close = CalloutClose::BlankLine;
        }
        if self.skip_noise {
            settings.noise_policy = NoisePolicy::Skip;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Tag every line with its section path and block
    Parse {
        /// Extracted text dump or per-page JSON dump
        input: PathBuf,
        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Summarize root sections with titles, page ranges and attached tables
    Outline {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse a document and store its lines in SQLite
    Load {
        input: PathBuf,
        /// Database file (default from settings)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the stored lines of one block
    Block {
        /// e.g. concern_2_3_P_1_1
        id: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the stored lines of one section and everything nested in it
    Section {
        /// e.g. 2.3.P.2.1
        id: String,
        /// Match any section id starting with ID (2.3.P.1 also selects 2.3.P.12)
        #[arg(long)]
        prefix: bool,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List stored blocks
    Blocks {
        /// Only one kind (concern, example, table)
        #[arg(short, long)]
        kind: Option<String>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.parser.apply(&mut settings);
    let db_path = |flag: Option<PathBuf>| flag.unwrap_or_else(|| PathBuf::from(&settings.db_path));

    match cli.command {
        Commands::Parse { input, output } => {
            let (_, parsed) = parse_input(&input, &settings)?;
            let json = parser::to_json(&parsed.records)?;
            write_output(output.as_deref(), &json)?;
        }
        Commands::Outline { input, output } => {
            let (doc, parsed) = parse_input(&input, &settings)?;
            let mut sections = outline::build(&parsed, &settings.root_prefix)
                .with_context(|| format!("invalid root prefix {:?}", settings.root_prefix))?;
            tables::attach(&mut sections, &doc.tables);
            info!("Outlined {} sections", sections.len());
            let json = serde_json::to_string_pretty(&sections)?;
            write_output(output.as_deref(), &json)?;
        }
        Commands::Load { input, db } => {
            let (_, parsed) = parse_input(&input, &settings)?;
            let conn = db::connect(&db_path(db))?;
            db::init_schema(&conn)?;
            let saved = db::save_lines(&conn, &parsed.records)?;
            let s = db::get_stats(&conn)?;
            println!(
                "Stored {} lines ({} sections, {} blocks).",
                saved, s.sections, s.blocks
            );
        }
        Commands::Block { id, db } => {
            let conn = db::connect(&db_path(db))?;
            db::init_schema(&conn)?;
            let lines = db::fetch_block(&conn, &id)?;
            if lines.is_empty() {
                println!("No lines for block {}. Run 'load' first?", id);
                return Ok(());
            }
            println!("{}", parser::to_json(&lines)?);
        }
        Commands::Section { id, prefix, db } => {
            let conn = db::connect(&db_path(db))?;
            db::init_schema(&conn)?;
            let lines = if prefix {
                db::fetch_section_prefix(&conn, &id)?
            } else {
                db::fetch_section(&conn, &id)?
            };
            if lines.is_empty() {
                println!("No lines under {}. Run 'load' first?", id);
                return Ok(());
            }
            println!("{}", parser::to_json(&lines)?);
        }
        Commands::Blocks { kind, db } => {
            let kind = kind
                .map(|k| BlockKind::parse(&k).with_context(|| format!("unknown block kind {:?}", k)))
                .transpose()?;
            let conn = db::connect(&db_path(db))?;
            db::init_schema(&conn)?;
            let rows = db::fetch_blocks(&conn, kind)?;
            if rows.is_empty() {
                println!("No blocks stored.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<36} | {:<7} | {:<24} | {:>6} | {:>5}",
                "#", "Block", "Kind", "Section", "Line", "Lines"
            );
            println!("{}", "-".repeat(98));
            for (i, r) in rows.iter().enumerate() {
                let section = r.section.as_deref().unwrap_or("-");
                println!(
                    "{:>4} | {:<36} | {:<7} | {:<24} | {:>6} | {:>5}",
                    i + 1,
                    truncate(&r.block_id, 36),
                    r.kind.as_str(),
                    truncate(section, 24),
                    r.first_line,
                    r.lines
                );
            }
            println!("\n{} blocks", rows.len());
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }
    Ok(())
}

fn parse_input(input: &Path, settings: &Settings) -> anyhow::Result<(Document, ParsedDocument)> {
    let doc = source::load(input).with_context(|| format!("loading {}", input.display()))?;
    let parsed = parser::parse_document(&doc, &settings.parser_config())
        .with_context(|| format!("invalid root prefix {:?}", settings.root_prefix))?;
    Ok((doc, parsed))
}

fn write_output(output: Option<&Path>, json: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
