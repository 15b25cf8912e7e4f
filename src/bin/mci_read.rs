use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use mcidump::{
    BlockGeometry, ChunkedRangeReader, Error, TransferRequest,
    native::{self, Timeout},
    plan::Reject,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Byte address to start reading from (decimal, or hex with `0x` prefix)
    #[arg(short, long, value_parser = parse_int, default_value = "0")]
    start: u64,

    /// Number of bytes to read; dumps up to the end of the card if unset
    #[arg(short = 'n', long, value_parser = parse_int)]
    size: Option<u64>,

    /// Output filename for the dump
    #[arg(short, long, default_value = "mci_dump.bin")]
    output: String,

    /// Memory card device node or image path
    #[arg(short, long, default_value = "/dev/mmcblk0")]
    device: String,

    /// Transfer block size in bytes (multiple of 512, at most 4096)
    #[arg(short, long, value_parser = parse_int, default_value = "512")]
    block_size: u64,

    /// Timeout for a single block read in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Append to an existing dump, continuing after its last byte
    #[arg(short, long)]
    resume: bool,
}

fn parse_int(s: &str) -> Result<u64, std::num::ParseIntError> {
    // Remove underscores that may be used for readability (e.g., 0x0010_0000)
    let s = s.replace('_', "");

    if let Some(stripped) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(stripped, 16)
    } else {
        s.parse()
    }
}

/// Checks whether a resumed dump had already reached the end of the card.
fn already_complete<D, S>(res: &mcidump::Result<u64, D, S>, existing: u64) -> bool {
    existing > 0 && matches!(res, Err(Error::InvalidRequest(Reject::BeyondCapacity)))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let block_size = u32::try_from(args.block_size).context("Block size out of range")?;
    let geometry = BlockGeometry::new(block_size).context("Invalid block size")?;
    let dev = native::open_image(&args.device)
        .await
        .with_context(|| format!("Failed to open {}", args.device))?;
    let (mut file, existing) = native::create_dump(&args.output, args.resume)
        .await
        .with_context(|| format!("Failed to open {}", args.output))?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current block");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let dev = Timeout::new(dev, Duration::from_millis(args.timeout_ms));
    let mut reader = ChunkedRangeReader::with_geometry(dev, geometry).with_cancel_flag(cancel);

    // Resume dumping process if previously interrupted
    let start = args
        .start
        .checked_add(existing)
        .context("Start address out of range")?;

    if existing > 0 {
        info!("Resuming dump after {existing} bytes");
    }

    let mut last_percent = None;
    let mut progress = |done: u64, total: u64| {
        let percent = u128::from(done) * 100 / u128::from(total);

        if last_percent != Some(percent) {
            last_percent = Some(percent);
            println!("Reading: {percent:3}% ({done}/{total} bytes)");
        }
    };

    info!("Reading the contents of the memory card...");

    let res = match args.size {
        Some(size) => {
            let Some(len) = size.checked_sub(existing).filter(|&len| len > 0) else {
                println!("Dump is already complete");
                return Ok(());
            };

            reader
                .read(TransferRequest::new(start, len), &mut file, &mut progress)
                .await
        }
        None => reader.read_to_end(start, &mut file, &mut progress).await,
    };

    if already_complete(&res, existing) {
        println!("Dump is already complete");
        return Ok(());
    }

    let written = res.context("Failed to read memory card")?;

    println!("Wrote {written} bytes to {}", args.output);

    Ok(())
}
