use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use shm_segment::{Liveness, Namespace};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let ReapCommand { dir, prefix, action } = ReapCommand::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut ns = dir.map_or_else(Namespace::default, Namespace::new);
    if let Some(prefix) = prefix {
        ns = ns.with_prefix(prefix);
    }

    if !ns.dir().is_dir() {
        anyhow::bail!("{} is not a directory", ns.dir().display());
    }

    match action {
        Action::Cleanup => {
            let removed = ns.cleanup();
            println!("removed {removed} stale segment(s)");
        }
        Action::List => {
            for info in ns.list() {
                let owner = info.owner.map_or_else(|| "-".to_owned(), |pid| pid.to_string());
                let state = match info.liveness {
                    Some(Liveness::Alive) => "alive",
                    Some(Liveness::Dead) => "dead",
                    Some(Liveness::Indeterminate) => "unknown",
                    None => "unmarked",
                };

                println!("{}\t{}\t{owner}\t{state}", ns.name_for(info.id), info.size);
            }
        }
        Action::Remove { id } => {
            let id = u32::from_str_radix(id.trim_start_matches("0x"), 16)
                .with_context(|| format!("{id:?} is not a hexadecimal segment id"))?;
            let segment = ns
                .attach(id, false)
                .with_context(|| format!("can not inspect {}", ns.name_for(id)))?;
            segment.release()?;
            std::fs::remove_file(ns.path_for(id))
                .with_context(|| format!("failed to remove {}", ns.name_for(id)))?;
            println!("removed {}", ns.name_for(id));
        }
    }

    Ok(())
}

/// Inspect shared memory segments and remove those left behind by crashed processes.
#[derive(Parser)]
#[command(version)]
struct ReapCommand {
    /// The directory holding the shared memory objects.
    ///
    /// Defaults to `/dev/shm` on Linux.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Name prefix of the segment objects.
    #[arg(long)]
    prefix: Option<String>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Remove all segments whose creating process is dead.
    Cleanup,
    /// Print name, payload size, owner pid and owner state of every segment.
    List,
    /// Remove one segment regardless of its owner.
    ///
    /// Processes that have it mapped keep their mapping, but nobody can attach anymore.
    Remove {
        #[arg(help = "The segment id, in hexadecimal")]
        id: String,
    },
}
