use emu_apple2::Apple2System;
use emu_core::System;

/// Runs a handful of frames against an all-NOP firmware image, demonstrating
/// the front-end scheduling loop (`mount_firmware` + repeated `step_frame`)
/// without requiring an external ROM file on disk.
fn main() {
    let mut sys = Apple2System::new();
    let firmware = vec![0xEAu8; 0x3000]; // NOP, fills 0xD000..=0xFFFF
    sys.mount_firmware(&firmware).expect("mount firmware");

    for fnum in 1..=5 {
        let frame = sys.step_frame().unwrap();
        println!(
            "Headless Apple II frame {fnum}: {}x{} ({} pixels)",
            frame.width,
            frame.height,
            frame.pixels.len()
        );
    }

    println!(
        "Save-state: {}",
        serde_json::to_string_pretty(&sys.save_state()).unwrap()
    );
}
