//! Command-line interface.

use clap::{Parser, Subcommand};

use crate::errors::AppError;
use crate::ops::{OperationEvent, OperationHandle, OperationKind, Operations};

#[derive(Parser, Debug)]
#[command(name = "sde-mirror")]
#[command(about = "Local mirror of the EVE Online static data export")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
    /// Subcommand to execute (defaults to `serve`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API
    Serve,
    /// Bring the snapshot up to date and write the change log
    Sync,
    /// Rebuild the search index from the snapshot
    RebuildIndex,
    /// Search records by keyword
    Search {
        /// Keywords; every one must match
        #[arg(required = true)]
        keyword: Vec<String>,
        /// Maximum number of results
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
}

/// Run one operation in the foreground, printing its events.
pub async fn run(ops: &Operations, command: Command) -> Result<(), AppError> {
    match command {
        Command::Serve => Ok(()),
        Command::Sync => {
            let report = follow(ops.start_sync()?).await?;
            println!(
                "Build {} ({}): added {}, changed {}, removed {}",
                report.build_number,
                report.release_date,
                report.counts.added,
                report.counts.changed,
                report.counts.removed
            );
            println!("Change log: {}", report.changelog_path.display());
            if !report.missing_tables.is_empty() {
                println!("Missing tables: {}", report.missing_tables.join(", "));
            }
            Ok(())
        }
        Command::RebuildIndex => {
            let report = follow(ops.start_rebuild()?).await?;
            println!(
                "Indexed {} rows from {} files ({} lines skipped)",
                report.rows, report.files, report.skipped_lines
            );
            Ok(())
        }
        Command::Search { keyword, limit } => {
            let handle = ops.start_search(keyword.join(" "), limit).await;
            let outcome = follow(handle).await?;
            println!(
                "{} of {} matches ({:?} path{})",
                outcome.returned,
                outcome.total,
                outcome.path,
                if outcome.cancelled { ", cancelled" } else { "" }
            );
            Ok(())
        }
    }
}

/// Print the events of `handle` until it finishes. Ctrl-C cancels a search.
async fn follow<T>(mut handle: OperationHandle<T>) -> Result<T, AppError> {
    let cancellable = handle.kind == OperationKind::Search;

    loop {
        let event = if cancellable {
            tokio::select! {
                event = handle.events.recv() => event,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Cancelling search");
                    handle.cancel();
                    continue;
                }
            }
        } else {
            handle.events.recv().await
        };
        let Some(event) = event else {
            break;
        };

        match event {
            OperationEvent::Progress { message, percent } => match percent {
                Some(pct) => println!("[{:>3}%] {}", pct, message),
                None => println!("[ .. ] {}", message),
            },
            OperationEvent::Result { hit } => println!(
                "{}\t{}\t{}\t{}",
                hit.source_table,
                hit.id.as_deref().unwrap_or("-"),
                hit.name_zh,
                hit.name_en
            ),
            OperationEvent::Complete { .. } => {}
            OperationEvent::Error { kind, message } => eprintln!("{}: {}", kind, message),
        }
    }
    handle.wait().await
}
