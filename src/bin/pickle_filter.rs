//! Pickle Filter
//!
//! Rewrites class references in a pickle (or a ZODB data record holding
//! several concatenated pickles) without unpickling it.
//!
//! Usage:
//!   pickle_filter INPUT --renames renames.json --output OUTPUT [--record]
//!   pickle_filter INPUT --dump [--record]
//!   pickle_filter INPUT --check [--record]

use std::path::PathBuf;
use std::process;

use clap::Parser;
use sha2::{Digest, Sha256};

use picklefilter::pickle::{FilterOptions, OpReader, PickleFilter};
use picklefilter::Renamer;

#[derive(Parser, Debug)]
#[command(name = "pickle_filter")]
#[command(about = "Rewrite class references in pickle streams")]
struct Args {
    /// Pickle or record file to read
    input: PathBuf,

    /// JSON rename map: {"old.module Class": "new.module Class"}
    #[arg(long)]
    renames: Option<PathBuf>,

    /// Where to write the rewritten stream
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Input holds several concatenated pickles
    #[arg(long)]
    record: bool,

    /// Print the opcode events instead of rewriting
    #[arg(long, conflicts_with_all = ["renames", "check"])]
    dump: bool,

    /// Verify that the input re-encodes to identical bytes
    #[arg(long, conflicts_with = "renames")]
    check: bool,

    /// Refuse inputs larger than this many MiB
    #[arg(long, value_name = "MIB", default_value_t = 256)]
    max_input_mib: usize,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{:02x}", b)).collect()
}

fn dump(data: &[u8], record: bool) -> Result<(), String> {
    let mut pos = 0;
    loop {
        let mut reader = OpReader::at(data, pos);
        for event in &mut reader {
            let event = event.map_err(|e| e.to_string())?;
            println!("{}", event);
        }
        pos = reader.position();
        if !record || pos >= data.len() {
            return Ok(());
        }
        println!();
    }
}

fn run(args: &Args) -> Result<(), String> {
    let data = std::fs::read(&args.input)
        .map_err(|e| format!("Failed to read {}: {}", args.input.display(), e))?;
    log::info!(
        "Read {} ({} bytes, sha256 {})",
        args.input.display(),
        data.len(),
        sha256_hex(&data)
    );

    if args.dump {
        return dump(&data, args.record);
    }

    let mut pickle_filter = PickleFilter::with_options(FilterOptions {
        record: args.record,
        max_input_size: args.max_input_mib.saturating_mul(1024 * 1024),
    });

    if args.check {
        let identical = pickle_filter.is_identity(&data).map_err(|e| e.to_string())?;
        if !identical {
            return Err(format!("{} does not re-encode to identical bytes", args.input.display()));
        }
        log::info!("{} round-trips byte for byte", args.input.display());
        return Ok(());
    }

    let output = args
        .output
        .as_ref()
        .ok_or_else(|| "--output is required when rewriting".to_string())?;
    let mut renamer = match &args.renames {
        Some(path) => Renamer::from_path(path).map_err(|e| e.to_string())?,
        None => Renamer::new(),
    };
    if renamer.is_empty() {
        log::warn!("No renames configured; output will match input");
    }

    let rewritten = pickle_filter
        .run(&data, |op, arg| renamer.apply(op, arg))
        .map_err(|e| e.to_string())?;

    std::fs::write(output, &rewritten)
        .map_err(|e| format!("Failed to write {}: {}", output.display(), e))?;

    let stats = pickle_filter.stats();
    log::info!(
        "Wrote {} ({} bytes, sha256 {})",
        output.display(),
        rewritten.len(),
        sha256_hex(&rewritten)
    );
    log::info!(
        "{} pickle(s), {} events, {} reference(s) renamed",
        stats.pickles,
        stats.events,
        renamer.applied()
    );
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        process::exit(1);
    }
}
