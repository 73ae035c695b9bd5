//! Rowsheet - CSV tables with formulas, from the command line

mod config;
mod logging;
mod render;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use rowsheet_core::{
    AutoSaver, CancellationToken, Document, FileStore, HistoryOptions, MemoryStore, StoreLookup,
    TableStore, TableUpdate, UserId,
};
use rowsheet_engine::{evaluate, is_formula};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::render::{CellText, write_table};

#[derive(Debug, Parser)]
#[command(name = "rowsheet", version, about = "CSV tables with formulas")]
struct Cli {
    /// CSV file to open
    file: Option<PathBuf>,

    /// Filter/sort spec, e.g. '"Done":"yes" "Due":ASC'
    #[arg(short, long, allow_hyphen_values = true)]
    query: Option<String>,

    /// Write the table's CSV text to this file instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Evaluate a formula and print the result (exit code 1 on error)
    #[arg(short = 'c', long = "command")]
    command: Option<String>,

    /// Settings file (default: the per-user config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print raw cell text instead of evaluated values
    #[arg(long)]
    raw: bool,

    /// Open a stored table by id; query changes are saved back
    #[arg(long, conflicts_with = "file")]
    table: Option<String>,

    /// Store FILE as a new table with this name
    #[arg(long, requires = "file")]
    save_as: Option<String>,

    /// List stored tables, newest first
    #[arg(long)]
    list: bool,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}

fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn TableStore>> {
    match &settings.data_dir {
        Some(dir) => {
            let store = FileStore::open(dir)
                .with_context(|| format!("opening table store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let (settings, warnings) = config::load_settings(cli.config.as_deref());
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }
    tracing::debug!(?settings, "loaded settings");
    let owner = UserId::new(settings.user.clone());
    let history = HistoryOptions {
        max_undo: settings.max_undo,
    };

    if cli.list {
        let store = open_store(&settings)?;
        for summary in store.list(&owner)? {
            println!(
                "{}\t{}\t{}",
                summary.id,
                summary.name,
                summary.updated_at.to_rfc3339()
            );
        }
        return Ok(0);
    }

    let doc = if let Some(id) = &cli.table {
        let store = open_store(&settings)?;
        let saver = Arc::new(AutoSaver::new(store.clone(), settings.autosave));
        let mut doc = Document::open_with_autosave(store.as_ref(), saver, &owner, id, history)
            .with_context(|| format!("opening table {}", id))?;
        doc.set_lookup(Some(Arc::new(StoreLookup::new(store, owner.clone()))));
        Some(doc)
    } else if let Some(path) = &cli.file {
        let doc = Document::import_csv(path, history)
            .with_context(|| format!("reading {}", path.display()))?;
        if let Some(name) = &cli.save_as {
            let store = open_store(&settings)?;
            let record = store.create(&owner, Some(name))?;
            let update = TableUpdate {
                csv: Some(doc.text().to_string()),
                ..TableUpdate::default()
            };
            store.save(&owner, &record.id, &update, &CancellationToken::new())?;
            println!("Saved as {}", record.id);
        }
        Some(doc)
    } else {
        None
    };

    if let Some(expr) = &cli.command {
        return Ok(run_command(expr, doc.as_ref()));
    }

    let Some(mut doc) = doc else {
        Cli::command().print_help()?;
        return Ok(0);
    };

    if let Some(spec) = &cli.query {
        doc.set_query_spec(spec.clone());
    }

    if let Some(output) = &cli.output {
        doc.export_csv(output)
            .with_context(|| format!("writing {}", output.display()))?;
        println!("Exported to {}", output.display());
        return Ok(0);
    }

    let mode = if cli.raw { CellText::Raw } else { CellText::Display };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_table(&mut out, &doc.render(), mode)?;
    out.flush()?;
    Ok(0)
}

/// Evaluate `expr` (the `%` prefix is optional) against the open table, if any.
fn run_command(expr: &str, doc: Option<&Document>) -> i32 {
    let text = if is_formula(expr) {
        expr.to_string()
    } else {
        format!("% {}", expr)
    };
    let ctx = doc.map(Document::formula_context).unwrap_or_default();
    let evaluation = evaluate(&text, &ctx);
    println!("{}", evaluation.display());
    if evaluation.error.is_some() { 1 } else { 0 }
}
