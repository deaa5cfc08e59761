//! Read entries out of zip and jar archives through a shared handle cache.
use std::{
    io::{self, Write as _},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use tracing::{debug, error};

use archive_cache::{
    archive::{EntryReader, ZipResource, reader::ArchiveCache},
    cache::PinnedCache,
};

mod app_config;
mod trc;

use crate::app_config::{CacheStrategy, Config};
use crate::trc::Trc;

#[derive(Parser)]
#[command(version, about = "Read entries out of zip and jar archives.")]
struct Args {
    #[arg(short, long, value_parser, help = "Optional path to a config TOML.")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the contents of one or more entries to stdout.
    Cat {
        /// The archive to read from.
        archive: PathBuf,
        /// Entry names, in the order they should be written.
        #[arg(required = true)]
        entries: Vec<String>,
    },

    /// List the entries of an archive.
    Ls {
        /// The archive to list.
        archive: PathBuf,
    },
}

type CliError = Box<dyn std::error::Error>;

fn cat(config: &Config, archive: &Path, entries: &[String]) -> Result<(), CliError> {
    let cache: ArchiveCache = ArchiveCache::new(|path: &PathBuf| ZipResource::open(path));
    let mut stdout = io::stdout().lock();

    // One reader per entry, all sharing the archive through the cache.
    let mut readers = entries
        .iter()
        .map(|entry| {
            EntryReader::archive_entry(&cache, archive, entry.as_str())
                .map(|reader| reader.with_chunk_size(config.reader.chunk_size))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for reader in &mut readers {
        let mut stream = reader.open_stream()?;
        io::copy(&mut stream, &mut stdout)?;
    }
    stdout.flush()?;

    for mut reader in readers {
        reader.close()?;
    }
    debug!(stats = ?cache.stats(), "done");
    Ok(())
}

fn ls(config: &Config, archive: &Path) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    match config.cache.strategy {
        CacheStrategy::Refcounted => {
            let cache: ArchiveCache = ArchiveCache::new(|path: &PathBuf| ZipResource::open(path));
            let handle = cache.get(archive.to_path_buf())?;
            for name in handle.entry_names()? {
                writeln!(stdout, "{name}")?;
            }
            handle.release()?;
        }
        CacheStrategy::Pinned => {
            let cache = PinnedCache::new(|path: &PathBuf| ZipResource::open(path));
            let pinned = cache.get(archive.to_path_buf())?;
            for name in pinned.entry_names()? {
                writeln!(stdout, "{name}")?;
            }
            cache.invalidate_all();
        }
    }
    Ok(())
}

/// Main entry point for the application.
fn main() -> ExitCode {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let config = match Config::load(args.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        return ExitCode::FAILURE;
    }

    if let Err(e) = Trc::default().init() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match &args.command {
        Command::Cat { archive, entries } => cat(&config, archive, entries),
        Command::Ls { archive } => ls(&config, archive),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
