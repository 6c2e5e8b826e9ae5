//! Strata CLI
//!
//! Builds, inspects and queries table files, and dumps record logs.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use strata::record;
use strata::{Compression, Options, Result, SortedKv, StrataError, TableReader, TableWriter};
use tracing_subscriber::{fmt, EnvFilter};

/// Strata
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Inspect and build strata tables and record logs")]
#[command(version)]
struct Args {
    /// Skip block checksum verification when reading tables
    #[arg(long, global = true)]
    no_verify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a table from tab-separated `key<TAB>value` lines
    Build {
        /// Input file
        input: PathBuf,

        /// Output table file
        output: PathBuf,

        /// Sort the input first (otherwise keys must already be increasing)
        #[arg(long)]
        sort: bool,

        /// Target data block size in bytes
        #[arg(short, long, default_value = "4096")]
        block_size: usize,

        /// Entries between restart points
        #[arg(short, long, default_value = "16")]
        restart_interval: usize,

        /// Store blocks uncompressed
        #[arg(long)]
        no_compression: bool,
    },

    /// Print entries of a table in `[start, end)`
    Dump {
        table: PathBuf,

        /// First key (default: beginning of table)
        #[arg(short, long, default_value = "")]
        start: String,

        /// Key to stop before (default: end of table)
        #[arg(short, long, default_value = "")]
        end: String,
    },

    /// Print the value of one key
    Get {
        table: PathBuf,

        key: String,
    },

    /// List the data blocks of a table
    Blocks {
        table: PathBuf,
    },

    /// List the records of a record log
    LogDump {
        log: PathBuf,

        /// Stop at the first damaged chunk instead of skipping it
        #[arg(long)]
        strict: bool,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let options = Options::builder()
        .verify_checksums(!args.no_verify)
        .build();
    let mut out = BufWriter::new(io::stdout().lock());

    match args.command {
        Commands::Build {
            input,
            output,
            sort,
            block_size,
            restart_interval,
            no_compression,
        } => {
            let compression = if no_compression {
                Compression::None
            } else {
                Compression::Lz4
            };
            let options = Options::builder()
                .block_size(block_size)
                .block_restart_interval(restart_interval)
                .compression(compression)
                .build();
            build(&input, &output, sort, &options)?;
        }
        Commands::Dump { table, start, end } => {
            let reader = TableReader::open_path(&table, &options)?;
            for entry in SortedKv::find(&reader, start.as_bytes(), end.as_bytes())? {
                let (key, value) = entry?;
                writeln!(
                    out,
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                )?;
            }
        }
        Commands::Get { table, key } => {
            let reader = TableReader::open_path(&table, &options)?;
            let value = reader.get(key.as_bytes())?;
            writeln!(out, "{}", String::from_utf8_lossy(&value))?;
        }
        Commands::Blocks { table } => {
            let reader = TableReader::open_path(&table, &options)?;
            for (i, block) in reader.blocks()?.iter().enumerate() {
                writeln!(
                    out,
                    "{i}\toffset={}\tlength={}\tcompression={:?}\tkey={}",
                    block.handle.offset,
                    block.handle.length,
                    block.compression,
                    String::from_utf8_lossy(&block.key)
                )?;
            }
        }
        Commands::LogDump { log, strict } => {
            let file = BufReader::new(File::open(&log)?);
            let mut reader = record::Reader::new(file);
            if strict {
                reader = reader.strict();
            }
            let mut i = 0u64;
            loop {
                match reader.next_record() {
                    Ok(Some(payload)) => {
                        writeln!(out, "{i}\t{} bytes", payload.len())?;
                        i += 1;
                    }
                    Ok(None) => break,
                    Err(e) if !strict && e.is_corruption() => {
                        writeln!(out, "-\tdamaged record: {e}")?;
                    }
                    Err(e) => return Err(e),
                }
            }
            tracing::info!(
                "{} records, {} damaged blocks skipped",
                i,
                reader.skipped_blocks()
            );
        }
    }

    out.flush()?;
    Ok(())
}

fn build(input: &Path, output: &Path, sort: bool, options: &Options) -> Result<()> {
    let mut entries = Vec::new();
    for (n, line) in BufReader::new(File::open(input)?).lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('\t').ok_or_else(|| {
            StrataError::Corruption(format!("line {}: expected key<TAB>value", n + 1))
        })?;
        entries.push((key.as_bytes().to_vec(), value.as_bytes().to_vec()));
    }
    if sort {
        entries.sort_by(|a, b| options.comparer.compare(&a.0, &b.0));
        entries.dedup_by(|later, earlier| later.0 == earlier.0);
    }

    let mut writer = TableWriter::create(output, options)?;
    for (key, value) in &entries {
        writer.set(key, value)?;
    }
    writer.close()?;
    let written = writer.bytes_written();
    writer.into_inner()?.sync_all()?;

    tracing::info!(
        "Wrote {} entries ({} bytes) to {}",
        entries.len(),
        written,
        output.display()
    );
    Ok(())
}
