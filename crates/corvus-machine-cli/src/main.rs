#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use corvus_devices::{LatestFrame, SECTOR_SIZE};
use corvus_machine::{Machine, MachineConfig, RunExit};

const SLICE_INST_BUDGET: u64 = 100_000;

#[derive(Debug, Parser)]
#[command(about = "Native runner for corvus_machine::Machine")]
struct Args {
    /// Raw boot image, loaded at the boot base (execution starts there).
    #[arg(short = 'b', long)]
    boot: PathBuf,

    /// Physical memory size in MiB.
    #[arg(long, default_value_t = 128)]
    ram: u32,

    /// Stop after executing at most N instructions. Without this the machine
    /// runs until the CPU halts.
    #[arg(long)]
    max_insts: Option<u64>,

    /// Run without the monitor (permits memory too small for the
    /// framebuffer window).
    #[arg(long)]
    headless: bool,

    /// Raw disk image(s), attached to slots 0, 1, ... in order. Must be a
    /// multiple of 512 bytes.
    #[arg(long)]
    disk: Vec<PathBuf>,

    /// Dump the last presented frame to a PNG file on exit.
    #[arg(long)]
    fb_png: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let ram_size_bytes = args
        .ram
        .checked_mul(1024 * 1024)
        .context("RAM size overflow")?;
    let config = MachineConfig {
        ram_size_bytes,
        enable_monitor: !args.headless,
        ..MachineConfig::default()
    };

    let frames = LatestFrame::new();
    let mut machine = Machine::with_frame_sink(config, Box::new(frames.clone()))?;

    let image = fs::read(&args.boot)
        .with_context(|| format!("failed to read boot image: {}", args.boot.display()))?;
    machine.load_boot(&image)?;

    for (slot, path) in args.disk.iter().enumerate() {
        let data = fs::read(path)
            .with_context(|| format!("failed to read disk image: {}", path.display()))?;
        if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
            bail!(
                "disk image {} length {} is not a positive multiple of {} bytes",
                path.display(),
                data.len(),
                SECTOR_SIZE
            );
        }
        machine.set_disk(slot, data)?;
    }

    machine.start()?;

    let mut total: u64 = 0;
    let halt = loop {
        let budget = match args.max_insts {
            Some(max) if total >= max => break None,
            Some(max) => (max - total).min(SLICE_INST_BUDGET),
            None => SLICE_INST_BUDGET,
        };
        match machine.run_slice(budget) {
            RunExit::Completed { executed } => total += executed,
            RunExit::Halted {
                exception,
                executed,
            } => {
                total += executed;
                break Some(exception);
            }
        }
    };

    match halt {
        Some(exception) => eprintln!("cpu halted after {total} instructions: {exception}"),
        None => eprintln!("instruction budget reached after {total} instructions"),
    }

    if let Some(path) = &args.fb_png {
        dump_frame_png(&frames, path)?;
    }

    Ok(())
}

fn dump_frame_png(frames: &LatestFrame, path: &Path) -> Result<()> {
    let frame = frames
        .latest()
        .ok_or_else(|| anyhow!("no frame was presented (is the monitor enabled?)"))?;

    // Framebuffer pixels are u32 with little-endian RGBA byte order:
    //   value = R | (G<<8) | (B<<16) | (A<<24)
    // Convert to an explicit RGBA byte buffer for the `image` crate.
    let mut rgba = Vec::with_capacity(frame.pixels.len() * 4);
    for &p in &frame.pixels {
        rgba.push((p & 0xFF) as u8);
        rgba.push(((p >> 8) & 0xFF) as u8);
        rgba.push(((p >> 16) & 0xFF) as u8);
        rgba.push(((p >> 24) & 0xFF) as u8);
    }

    let img = image::RgbaImage::from_raw(frame.width, frame.height, rgba)
        .ok_or_else(|| anyhow!("invalid frame data"))?;
    img.save(path)
        .with_context(|| format!("failed to write PNG: {}", path.display()))?;
    Ok(())
}
