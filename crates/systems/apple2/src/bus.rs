//! Address bus and soft-switch I/O page.
//!
//! Grounded on `original_source/src/mem.cpp`'s `doRead`/`doWrite`. Routes the
//! CPU's 64 KiB address space across main/aux RAM, the ROM shadow, the
//! keyboard latch, sixteen soft-switch flags, and the Disk II controller.

use crate::disk::{Disk, BOOTSTRAP_ROM};
use emu_core::logging::{LogCategory, LogConfig, LogLevel};
use serde::{Deserialize, Serialize};

const MEM_SIZE: usize = 0x10000;
const ROM_START: u32 = 0xD000;
const DISK_BOOT_START: usize = 0xC600;

/// The sixteen soft switches readable at `0xC013..=0xC01F` and toggled by
/// writes to `0xC000..=0xC00F` and reads/writes of `0xC050..=0xC05F`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SoftSwitches {
    pub sw_80store: u8,
    pub sw_ramrd: u8,
    pub sw_ramwrt: u8,
    pub sw_intcxrom: u8,
    pub sw_altzp: u8,
    pub sw_slotc3rom: u8,
    pub sw_80col: u8,
    pub sw_altcharset: u8,

    pub sw_text: u8,
    pub sw_mixed: u8,
    pub sw_page2: u8,
    pub sw_hires: u8,

    pub sw_an0: u8,
    pub sw_an1: u8,
    pub sw_an2: u8,
    pub sw_an3: u8,
}

/// Video mode flags exposed to the front-end renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFlags {
    pub text: bool,
    pub mixed: bool,
    pub page2: bool,
    pub hires: bool,
    pub altcharset: bool,
    pub col80: bool,
}

#[derive(Serialize, Deserialize)]
pub struct Apple2Bus {
    #[serde(with = "big_array")]
    main: [u8; MEM_SIZE],
    #[serde(with = "big_array")]
    aux: [u8; MEM_SIZE],

    switches: SoftSwitches,
    keyboard_latch: u8,

    disk: Disk,

    #[serde(skip)]
    firmware: Vec<u8>,
    #[serde(skip)]
    has_firmware: bool,
}

/// `serde` has no blanket impl for arrays above 32 elements on this edition;
/// route the two 64 KiB RAM banks through a small byte-vector shim.
mod big_array {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; super::MEM_SIZE], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<[u8; super::MEM_SIZE], D::Error> {
        let v: Vec<u8> = serde::Deserialize::deserialize(d)?;
        let mut out = [0u8; super::MEM_SIZE];
        let n = v.len().min(super::MEM_SIZE);
        out[..n].copy_from_slice(&v[..n]);
        Ok(out)
    }
}

impl std::fmt::Debug for Apple2Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Apple2Bus")
            .field("switches", &self.switches)
            .field("keyboard_latch", &self.keyboard_latch)
            .field("has_firmware", &self.has_firmware)
            .finish()
    }
}

impl Default for Apple2Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Apple2Bus {
    pub fn new() -> Self {
        Self {
            main: [0u8; MEM_SIZE],
            aux: [0u8; MEM_SIZE],
            switches: SoftSwitches::default(),
            keyboard_latch: 0,
            disk: Disk::new(),
            firmware: Vec::new(),
            has_firmware: false,
        }
    }

    pub fn mount_firmware(&mut self, rom: &[u8]) {
        self.firmware = rom.to_vec();
        self.has_firmware = true;
    }

    pub fn has_firmware(&self) -> bool {
        self.has_firmware
    }

    pub fn disk_mut(&mut self) -> &mut Disk {
        &mut self.disk
    }

    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    /// Zeroes RAM, reinstalls the firmware ROM shadow, and (if a disk is
    /// mounted) overwrites the slot-6 bootstrap ROM area.
    pub fn reset(&mut self) {
        self.main = [0u8; MEM_SIZE];
        for (i, &b) in self.firmware.iter().enumerate() {
            let addr = ROM_START as usize + i;
            if addr <= 0xFFFF {
                self.main[addr] = b;
            }
        }
        if self.disk.is_loaded() {
            self.main[DISK_BOOT_START..DISK_BOOT_START + 256].copy_from_slice(&BOOTSTRAP_ROM);
        }
    }

    pub fn strobe_key(&mut self, ascii: u8) {
        self.keyboard_latch = ascii | 0x80;
    }

    pub fn clear_strobe(&mut self) {
        self.keyboard_latch &= 0x7F;
    }

    pub fn mode_flags(&self) -> ModeFlags {
        ModeFlags {
            text: self.switches.sw_text != 0,
            mixed: self.switches.sw_mixed != 0,
            page2: self.switches.sw_page2 != 0,
            hires: self.switches.sw_hires != 0,
            altcharset: self.switches.sw_altcharset != 0,
            col80: self.switches.sw_80col != 0,
        }
    }

    /// Raw read bypassing the I/O decoder entirely, for front-end framebuffer access.
    pub fn peek(&self, addr: u16) -> u8 {
        self.main[addr as usize]
    }

    pub fn read8(&mut self, addr: u16) -> u8 {
        let page = addr & 0xFF00;

        if page == 0x0000 {
            return if self.switches.sw_altzp != 0 {
                self.aux[addr as usize]
            } else {
                self.main[addr as usize]
            };
        }

        if page != 0xC000 {
            return self.main[addr as usize];
        }

        match addr {
            0xC000 => self.keyboard_latch,
            0xC010 => {
                let strobe = self.keyboard_latch & 0x80;
                self.clear_strobe();
                strobe
            }
            0xC013 => self.switches.sw_ramrd,
            0xC014 => self.switches.sw_ramwrt,
            0xC015 => self.switches.sw_intcxrom,
            0xC016 => self.switches.sw_altzp,
            0xC017 => self.switches.sw_slotc3rom,
            0xC018 => self.switches.sw_80store,
            0xC019 => 0, // VBL status: timing fidelity out of scope
            0xC01A => self.switches.sw_text,
            0xC01B => self.switches.sw_mixed,
            0xC01C => self.switches.sw_page2,
            0xC01D => self.switches.sw_hires,
            0xC01E => self.switches.sw_altcharset,
            0xC01F => self.switches.sw_80col,

            0xC050 => {
                self.switches.sw_text = 0;
                0
            }
            0xC051 => {
                self.switches.sw_text = 1;
                0
            }
            0xC052 => {
                self.switches.sw_mixed = 0;
                0
            }
            0xC053 => {
                self.switches.sw_mixed = 1;
                0
            }
            0xC054 => {
                self.switches.sw_page2 = 0;
                0
            }
            0xC055 => {
                self.switches.sw_page2 = 1;
                0
            }
            0xC056 => {
                self.switches.sw_hires = 0;
                0
            }
            0xC057 => {
                self.switches.sw_hires = 1;
                0
            }
            0xC058 => {
                self.switches.sw_an0 = 0;
                0
            }
            0xC059 => {
                self.switches.sw_an0 = 1;
                0
            }
            0xC05A => {
                self.switches.sw_an1 = 0;
                0
            }
            0xC05B => {
                self.switches.sw_an1 = 1;
                0
            }
            0xC05C => {
                self.switches.sw_an2 = 0;
                0
            }
            0xC05D => {
                self.switches.sw_an2 = 1;
                0
            }
            0xC05E => {
                self.switches.sw_an3 = 0;
                0
            }
            0xC05F => {
                self.switches.sw_an3 = 1;
                0
            }

            0xC0E0..=0xC0EF => self.disk.io(addr),

            _ => self.main[addr as usize],
        }
    }

    pub fn read16(&mut self, addr: u16) -> u16 {
        let lo = self.read8(addr) as u16;
        let hi = self.read8(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    pub fn write8(&mut self, addr: u16, val: u8) {
        if addr >= ROM_START as u16 {
            return;
        }

        match addr {
            0xC000 => self.switches.sw_80store = 0,
            0xC001 => self.switches.sw_80store = 1,
            0xC002 => self.switches.sw_ramrd = 0,
            0xC003 => self.switches.sw_ramrd = 1,
            0xC004 => self.switches.sw_ramwrt = 0,
            0xC005 => self.switches.sw_ramwrt = 1,
            0xC006 => self.switches.sw_intcxrom = 0,
            0xC007 => self.switches.sw_intcxrom = 1,
            0xC008 => self.switches.sw_altzp = 0,
            0xC009 => self.switches.sw_altzp = 1,
            0xC00A => self.switches.sw_slotc3rom = 0,
            0xC00B => self.switches.sw_slotc3rom = 1,
            0xC00C => self.switches.sw_80col = 0,
            0xC00D => self.switches.sw_80col = 1,
            0xC00E => self.switches.sw_altcharset = 0,
            0xC00F => self.switches.sw_altcharset = 1,

            0xC050 => self.switches.sw_text = 0,
            0xC051 => self.switches.sw_text = 1,
            0xC052 => self.switches.sw_mixed = 0,
            0xC053 => self.switches.sw_mixed = 1,
            0xC054 => self.switches.sw_page2 = 0,
            0xC055 => self.switches.sw_page2 = 1,
            0xC056 => self.switches.sw_hires = 0,
            0xC057 => self.switches.sw_hires = 1,
            0xC058 => self.switches.sw_an0 = 0,
            0xC059 => self.switches.sw_an0 = 1,
            0xC05A => self.switches.sw_an1 = 0,
            0xC05B => self.switches.sw_an1 = 1,
            0xC05C => self.switches.sw_an2 = 0,
            0xC05D => self.switches.sw_an2 = 1,
            0xC05E => self.switches.sw_an3 = 0,
            0xC05F => self.switches.sw_an3 = 1,

            0xC080..=0xC08F => {
                if LogConfig::global().should_log(LogCategory::Bus, LogLevel::Trace) {
                    eprintln!("bus: disk write {:#06X} = {:#04X}", addr, val);
                }
                self.disk.io(addr - 0xC080 + 0xC0E0);
            }

            _ if (0xC000..=0xC0FF).contains(&addr) => {}

            _ => {
                if self.switches.sw_altzp != 0 && addr < 0x0100 {
                    self.aux[addr as usize] = val;
                } else {
                    self.main[addr as usize] = val;
                }
            }
        }
    }

    pub fn write16(&mut self, addr: u16, w: u16) {
        self.write8(addr, (w & 0xFF) as u8);
        self.write8(addr.wrapping_add(1), (w >> 8) as u8);
    }

    /// Read-modify-write for RMW opcodes targeting RAM (zero-page and
    /// absolute,X for ASL/LSR/ROL/ROR/INC/DEC). Never called against the
    /// I/O page by the CPU, matching spec's `raw_ptr` constraint.
    pub fn rmw8(&mut self, addr: u16, f: impl FnOnce(u8) -> u8) -> u8 {
        let old = self.read8(addr);
        let new = f(old);
        self.write8(addr, new);
        new
    }
}
