use anyhow::{Context, Result};
use clap::Parser;
use emu_apple2::Apple2System;
use emu_core::System;
use std::fs;
use std::fs::File;
use std::io::Write;

#[derive(Parser)]
struct Args {
    /// Path to the firmware ROM blob, mounted at 0xD000 before reset.
    firmware: String,

    /// Optional disk image (143,360-byte DOS-order .dsk/.do), mounted into Disk1.
    disk: Option<String>,

    /// Dump save-state to this file as JSON.
    #[arg(long, default_value = "state.json")]
    save: String,

    /// Number of 17,050-cycle frames to run.
    #[arg(long, default_value_t = 5)]
    frames: u32,

    /// Print per-frame pixel counts.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Suppress all per-frame output (still writes --save).
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut sys = Apple2System::new();

    let firmware = fs::read(&args.firmware)
        .with_context(|| format!("reading firmware ROM at {}", args.firmware))?;
    sys.mount_firmware(&firmware)?;

    if let Some(disk_path) = args.disk.as_ref() {
        let disk = fs::read(disk_path).with_context(|| format!("reading disk image at {disk_path}"))?;
        sys.mount_disk(&disk)?;
    }

    for fnum in 1..=args.frames {
        let frame = sys.step_frame()?;
        if args.quiet {
            continue;
        }
        if args.debug {
            println!(
                "Frame {fnum}: {}x{} ({} pixels)",
                frame.width,
                frame.height,
                frame.pixels.len()
            );
        }
    }

    let state = sys.save_state();
    let mut f = File::create(&args.save)?;
    write!(f, "{}", serde_json::to_string_pretty(&state)?)?;

    Ok(())
}
