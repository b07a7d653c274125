//! CLI binary for validating, repairing, and refining flow documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use flowmend_dialect::{
    parse_document, split_header, CommandContracts, Entry, Record, ReservedLayout,
};
use flowmend_engine::{sanitize_document, validate, validate_segment, RefineSession, RefineStatus, Scope};
use flowmend_remote::{HttpFlowRepairer, HttpLearningStore, HttpSemanticValidator};

#[derive(Parser)]
#[command(name = "flowmend", version, about = "Validator and repair engine for generated flow documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Structurally validate a flow document
    Validate {
        /// Path to the flow document
        file: PathBuf,

        /// Treat the document as one flow segment (no system-node checks)
        #[arg(long)]
        segment: bool,
    },

    /// Apply deterministic repair and id allocation
    Repair {
        /// Path to the flow document
        file: PathBuf,

        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat the document as flow segment N
        #[arg(long)]
        segment: Option<usize>,
    },

    /// Run the full refinement loop against the configured services
    Refine {
        /// Path to the flow document
        file: PathBuf,

        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat the document as flow segment N
        #[arg(long)]
        segment: Option<usize>,

        /// Skip the generative repairer even if configured
        #[arg(long)]
        no_repairer: bool,
    },

    /// Show node, edge, and band usage for a document
    Info {
        /// Path to the flow document
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Validate { file, segment } => cmd_validate(&file, segment)?,
        Commands::Repair { file, output, segment } => {
            cmd_repair(&file, output.as_deref(), segment)?
        }
        Commands::Refine { file, output, segment, no_repairer } => {
            cmd_refine(&file, output.as_deref(), segment, no_repairer).await?
        }
        Commands::Info { file } => cmd_info(&file)?,
    }

    Ok(())
}

fn scope_for(segment: Option<usize>) -> Scope {
    match segment {
        Some(index) => Scope::Segment(index),
        None => Scope::Document,
    }
}

fn cmd_validate(path: &Path, segment: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let (rows, _) = split_header(parse_document(&text));
    let contracts = CommandContracts::builtin();
    let layout = ReservedLayout::default();
    let output = if segment {
        validate_segment(&rows, &contracts, &layout)
    } else {
        validate(&rows, &contracts, &layout)
    };

    if output.diagnostics.is_empty() {
        println!("Document is structurally valid ({} nodes)", output.entries.len());
        return Ok(());
    }
    for diag in &output.diagnostics {
        println!("[{}] {}", diag.kind.name(), diag.message);
    }
    println!("{} findings", output.diagnostics.len());
    std::process::exit(1);
}

fn cmd_repair(path: &Path, output: Option<&Path>, segment: Option<usize>) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let contracts = CommandContracts::builtin();
    let layout = ReservedLayout::default();
    let (fixed, fix_log) = sanitize_document(&text, &contracts, &layout, scope_for(segment));

    for line in &fix_log {
        eprintln!("fix: {line}");
    }
    eprintln!("{} fixes applied", fix_log.len());
    write_result(output, &fixed)?;
    Ok(())
}

async fn cmd_refine(
    path: &Path,
    output: Option<&Path>,
    segment: Option<usize>,
    no_repairer: bool,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;

    let validator = HttpSemanticValidator::from_env()?;
    let mut session = RefineSession::new(Arc::new(validator));
    if !no_repairer {
        match HttpFlowRepairer::from_env() {
            Ok(repairer) => session = session.with_repairer(Arc::new(repairer)),
            Err(e) => eprintln!("repairer not configured ({e}); deterministic fixes only"),
        }
    }
    if let (Ok(key), Ok(url)) = (
        std::env::var("FLOWMEND_LEARNING_KEY"),
        std::env::var("FLOWMEND_LEARNING_URL"),
    ) {
        session = session.with_learning(Arc::new(HttpLearningStore::new(key, url)));
    }

    let result = session.run(&text, scope_for(segment)).await?;

    for line in &result.fix_log {
        eprintln!("fix: {line}");
    }
    eprintln!(
        "status: {:?} after {} iteration(s)",
        result.status, result.iterations
    );
    for error in &result.remaining_errors {
        eprintln!(
            "remaining: node {} {}: {}",
            error.node_id, error.field, error.message
        );
    }
    write_result(output, &result.csv)?;

    if result.status != RefineStatus::Accepted {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let (rows, _) = split_header(parse_document(&text));
    let layout = ReservedLayout::default();
    let output = validate_segment(&rows, &CommandContracts::builtin(), &layout);

    let records: Vec<&Record> = output.entries.iter().filter_map(Entry::as_record).collect();
    let decisions = records.iter().filter(|r| matches!(r, Record::Decision(_))).count();
    let actions = records.len() - decisions;
    let edges: usize = records.iter().map(|r| r.references().len()).sum();
    let malformed = output.entries.len() - records.len();

    println!("Nodes: {} ({decisions} decision, {actions} action)", records.len());
    println!("Edges: {edges}");
    if malformed > 0 {
        println!("Untyped rows: {malformed}");
    }

    println!("\nBand usage:");
    let mut reserved = [0usize; 3]; // startup, menu, system
    let mut flows: std::collections::BTreeMap<i64, usize> = Default::default();
    for record in &records {
        let id = record.id();
        if layout.startup_band.contains(&id) {
            reserved[0] += 1;
        } else if layout.menu_band.contains(&id) {
            reserved[1] += 1;
        } else if layout.system_band.contains(&id) {
            reserved[2] += 1;
        } else {
            let band_start =
                (id - layout.flow_band_start).div_euclid(layout.flow_band_size)
                    * layout.flow_band_size
                    + layout.flow_band_start;
            *flows.entry(band_start).or_default() += 1;
        }
    }
    println!(
        "  startup {:>4}  menu {:>4}  system {:>4}",
        reserved[0], reserved[1], reserved[2]
    );
    for (start, count) in flows {
        println!(
            "  {start}..={}: {count} node(s)",
            start + layout.flow_band_size - 1
        );
    }
    Ok(())
}

fn write_result(output: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}
