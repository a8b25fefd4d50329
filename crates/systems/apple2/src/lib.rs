//! Apple II-class system implementation.

mod bus;
mod cpu;
mod disk;

pub use bus::{Apple2Bus, ModeFlags};
pub use cpu::{Apple2Config, Cpu6502};
pub use disk::Disk;

use emu_core::{types::Frame, MountPointInfo, System};
use serde_json::Value;
use thiserror::Error;

/// Cycles per frame at the reference 1.023 MHz NTSC clock (spec §5).
const CYCLES_PER_FRAME: u32 = 17_050;
const TEXT_COLS: u32 = 40;
const TEXT_ROWS: u32 = 24;
const HIRES_COLS: u32 = 280;
const HIRES_ROWS: u32 = 192;
const TEXT_PAGE1: u16 = 0x0400;
const HIRES_PAGE1: u16 = 0x2000;

#[derive(Debug, Error)]
pub enum Apple2Error {
    #[error("disk image has wrong size: expected {expected}, got {actual}")]
    ImageSizeWrong { expected: usize, actual: usize },
    #[error("firmware ROM is not mounted")]
    FirmwareMissing,
    #[error("I/O error loading image: {0}")]
    ImageIoError(String),
    #[error("unknown opcode {0:#04X}")]
    UnknownOpcode(u8),
}

/// Apple II-class system: one CPU driving one bus, owning the disk controller.
pub struct Apple2System {
    cpu: Cpu6502,
    cycles: u64,
}

impl Default for Apple2System {
    fn default() -> Self {
        Self::new()
    }
}

impl Apple2System {
    pub fn new() -> Self {
        Self {
            cpu: Cpu6502::new(Apple2Bus::new()),
            cycles: 0,
        }
    }

    pub fn configure(&mut self, config: Apple2Config) {
        self.cpu.config = config;
    }

    pub fn mount_firmware(&mut self, rom: &[u8]) -> Result<(), Apple2Error> {
        self.cpu.bus.mount_firmware(rom);
        self.reset();
        Ok(())
    }

    pub fn mount_disk(&mut self, image: &[u8]) -> Result<(), Apple2Error> {
        self.cpu
            .bus
            .disk_mut()
            .mount(image)
            .map_err(|actual| Apple2Error::ImageSizeWrong {
                expected: disk::DISK_MAXSIZE,
                actual,
            })?;
        self.cpu.bus.reset();
        Ok(())
    }

    pub fn strobe_key(&mut self, ascii: u8) {
        self.cpu.bus.strobe_key(ascii);
    }

    pub fn request_irq(&mut self) {
        self.cpu.request_irq();
    }

    pub fn request_nmi(&mut self) {
        self.cpu.request_nmi();
    }

    fn render_frame(&self) -> Frame {
        let mode = self.cpu.bus.mode_flags();
        if mode.hires && !mode.text {
            self.render_hires()
        } else {
            self.render_text()
        }
    }

    /// Coarse monochrome block per character cell; faithful glyph rendering
    /// is an out-of-scope external-renderer concern.
    fn render_text(&self) -> Frame {
        let mut frame = Frame::new(TEXT_COLS, TEXT_ROWS);
        for row in 0..TEXT_ROWS {
            for col in 0..TEXT_COLS {
                let addr = TEXT_PAGE1.wrapping_add((row * TEXT_COLS + col) as u16);
                let byte = self.cpu.bus.peek(addr);
                let idx = (row * TEXT_COLS + col) as usize;
                frame.pixels[idx] = if byte & 0x7F != 0x20 {
                    0x00FF_FFFF
                } else {
                    0x0000_0000
                };
            }
        }
        frame
    }

    /// Raw bit-packed monochrome columns; artifact color is the external
    /// renderer's job per spec §1.
    fn render_hires(&self) -> Frame {
        let mut frame = Frame::new(HIRES_COLS, HIRES_ROWS);
        for row in 0..HIRES_ROWS {
            let row_base = HIRES_PAGE1.wrapping_add(hires_row_offset(row));
            for byte_col in 0..40u32 {
                let byte = self.cpu.bus.peek(row_base.wrapping_add(byte_col as u16));
                for bit in 0..7u32 {
                    let x = byte_col * 7 + bit;
                    if x >= HIRES_COLS {
                        break;
                    }
                    let on = (byte >> bit) & 1 != 0;
                    frame.pixels[(row * HIRES_COLS + x) as usize] =
                        if on { 0x00FF_FFFF } else { 0x0000_0000 };
                }
            }
        }
        frame
    }
}

/// Apple II hi-res scanline addressing interleaves rows in blocks of 8,
/// per the standard hi-res memory layout.
fn hires_row_offset(row: u32) -> u16 {
    let third = row / 64;
    let rem = row % 64;
    let group = rem / 8;
    let line = rem % 8;
    (third * 40 + group * 0x28 + line * 0x400) as u16
}

impl System for Apple2System {
    type Error = Apple2Error;

    fn reset(&mut self) {
        self.cpu.reset();
        self.cycles = 0;
    }

    fn step_frame(&mut self) -> Result<Frame, Self::Error> {
        self.cpu.run_cycles(CYCLES_PER_FRAME);
        self.cycles += CYCLES_PER_FRAME as u64;
        Ok(self.render_frame())
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "version": 1,
            "system": "apple2",
            "cycles": self.cycles,
            "cpu": &self.cpu,
        })
    }

    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error> {
        let version = v["version"].as_u64().unwrap_or(0);
        if version != 1 {
            return Err(serde_json::from_str::<()>("invalid").unwrap_err());
        }
        let system = v["system"].as_str().unwrap_or("");
        if system != "apple2" {
            return Err(serde_json::from_str::<()>("invalid").unwrap_err());
        }
        self.cycles = v["cycles"].as_u64().unwrap_or(0);
        if let Some(cpu_value) = v.get("cpu") {
            let loaded: Cpu6502 = serde_json::from_value(cpu_value.clone())?;
            // save_state skips the bus (ROM/disk data shouldn't round-trip);
            // keep the live bus and restore only register/cycle state onto it.
            let bus = std::mem::replace(&mut self.cpu.bus, Apple2Bus::new());
            self.cpu = loaded.with_bus(bus);
        }
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        vec![
            MountPointInfo {
                id: "Firmware".to_string(),
                name: "System Firmware ROM".to_string(),
                extensions: vec!["rom".to_string(), "bin".to_string()],
                required: true,
            },
            MountPointInfo {
                id: "Disk1".to_string(),
                name: "Disk Drive 1".to_string(),
                extensions: vec!["dsk".to_string(), "do".to_string(), "po".to_string()],
                required: false,
            },
        ]
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        match mount_point_id {
            "Firmware" => self.mount_firmware(data),
            "Disk1" => self.mount_disk(data),
            other => Err(Apple2Error::ImageIoError(format!(
                "unknown mount point: {other}"
            ))),
        }
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        match mount_point_id {
            "Disk1" => {
                self.cpu.bus.disk_mut().eject();
                Ok(())
            }
            "Firmware" => Ok(()),
            other => Err(Apple2Error::ImageIoError(format!(
                "unknown mount point: {other}"
            ))),
        }
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        match mount_point_id {
            "Firmware" => self.cpu.bus.has_firmware(),
            "Disk1" => self.cpu.bus.disk().is_loaded(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firmware() -> Vec<u8> {
        vec![0xEAu8; 0x3000]
    }

    #[test]
    fn creation_starts_with_zero_cycles() {
        let sys = Apple2System::new();
        assert_eq!(sys.cycles, 0);
    }

    #[test]
    fn mount_points_lists_firmware_and_disk() {
        let sys = Apple2System::new();
        let mounts = sys.mount_points();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].id, "Firmware");
        assert!(mounts[0].required);
        assert_eq!(mounts[1].id, "Disk1");
        assert!(!mounts[1].required);
    }

    #[test]
    fn mount_and_unmount_firmware() {
        let mut sys = Apple2System::new();
        assert!(sys.mount("Firmware", &firmware()).is_ok());
        assert!(sys.is_mounted("Firmware"));
    }

    #[test]
    fn mount_disk_wrong_size_errors() {
        let mut sys = Apple2System::new();
        let err = sys.mount("Disk1", &[0u8; 10]).unwrap_err();
        match err {
            Apple2Error::ImageSizeWrong { expected, actual } => {
                assert_eq!(expected, disk::DISK_MAXSIZE);
                assert_eq!(actual, 10);
            }
            _ => panic!("expected ImageSizeWrong"),
        }
        assert!(!sys.is_mounted("Disk1"));
    }

    #[test]
    fn mount_disk_correct_size_succeeds() {
        let mut sys = Apple2System::new();
        let image = vec![0u8; disk::DISK_MAXSIZE];
        assert!(sys.mount("Disk1", &image).is_ok());
        assert!(sys.is_mounted("Disk1"));
    }

    #[test]
    fn invalid_mount_point_errors() {
        let mut sys = Apple2System::new();
        assert!(sys.mount("Cartridge", &[]).is_err());
    }

    #[test]
    fn unmounting_disk_leaves_firmware_mounted() {
        let mut sys = Apple2System::new();
        sys.mount("Firmware", &firmware()).unwrap();
        let image = vec![0u8; disk::DISK_MAXSIZE];
        sys.mount("Disk1", &image).unwrap();
        assert!(sys.is_mounted("Firmware"));
        assert!(sys.is_mounted("Disk1"));

        sys.unmount("Disk1").unwrap();

        assert!(!sys.is_mounted("Disk1"));
        assert!(sys.is_mounted("Firmware"));
    }

    #[test]
    fn reset_without_firmware_leaves_pc_at_zero() {
        let mut sys = Apple2System::new();
        sys.reset();
        assert_eq!(sys.cpu.pc, 0);
    }

    #[test]
    fn reset_with_firmware_reads_reset_vector() {
        let mut sys = Apple2System::new();
        let mut rom = vec![0u8; 0x3000];
        rom[0x2FFC] = 0x34; // maps to 0xFFFC
        rom[0x2FFD] = 0x12; // maps to 0xFFFD
        sys.mount_firmware(&rom).unwrap();
        assert_eq!(sys.cpu.pc, 0x1234);
    }

    #[test]
    fn step_frame_advances_cycle_counter() {
        let mut sys = Apple2System::new();
        sys.mount_firmware(&firmware()).unwrap();
        sys.step_frame().unwrap();
        assert_eq!(sys.cycles, CYCLES_PER_FRAME as u64);
    }

    #[test]
    fn step_frame_produces_text_sized_frame_by_default() {
        let mut sys = Apple2System::new();
        sys.mount_firmware(&firmware()).unwrap();
        let frame = sys.step_frame().unwrap();
        assert_eq!(frame.width, TEXT_COLS);
        assert_eq!(frame.height, TEXT_ROWS);
    }

    #[test]
    fn save_load_state_round_trips_registers() {
        let mut sys = Apple2System::new();
        sys.mount_firmware(&firmware()).unwrap();
        sys.cpu.a = 0x42;
        sys.cpu.pc = 0x1000;
        let state = sys.save_state();
        assert_eq!(state["version"], 1);
        assert_eq!(state["system"], "apple2");

        let mut sys2 = Apple2System::new();
        sys2.load_state(&state).unwrap();
        assert_eq!(sys2.cpu.a, 0x42);
        assert_eq!(sys2.cpu.pc, 0x1000);
    }

    #[test]
    fn load_state_rejects_wrong_system_tag() {
        let mut sys = Apple2System::new();
        let bogus = serde_json::json!({"version": 1, "system": "nes"});
        assert!(sys.load_state(&bogus).is_err());
    }
}
