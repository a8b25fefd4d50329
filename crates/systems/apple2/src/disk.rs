//! Disk II floppy controller: stepper motor emulation and 6-and-2 nibblization.
//!
//! Grounded on `original_source/src/disk_drive.cpp` and `disk_images.cpp`.
//! The controller holds a raw 143,360-byte DOS-order disk image and lazily
//! nibblizes all 35 tracks into the 6-and-2 encoded byte stream the Disk II
//! boot ROM reads a byte at a time from the data register.

use emu_core::logging::{LogCategory, LogConfig, LogLevel};
use serde::{Deserialize, Serialize};

/// Raw disk image size: 35 tracks * 16 sectors * 256 bytes.
pub const DISK_MAXSIZE: usize = 35 * 16 * 256;
/// Encoded nibble stream length per track (gaps + 16 sectors of header+data).
pub const NIBBLES_PER_TRACK: usize = 6656;
const TRACK_COUNT: usize = 35;

/// 6-bit value -> "disk byte" lookup table. Every entry has no more than two
/// consecutive zero bits and the high bit set, satisfying the Disk II's
/// self-sync read circuitry.
const SIX_AND_TWO: [u8; 0x40] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6, 0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

/// Logical-sector -> physical-sector translation for DOS 3.3 order, confirmed
/// against `original_source/src/disk_images.cpp`'s `sectorNumber[1]`.
const DOS_ORDER: [u8; 16] = [
    0x00, 0x07, 0x0E, 0x06, 0x0D, 0x05, 0x0C, 0x04, 0x0B, 0x03, 0x0A, 0x02, 0x09, 0x01, 0x08, 0x0F,
];

/// The Disk II bootstrap ROM, copied verbatim from `original_source/src/disk_drive.hpp`.
/// This is the code the firmware jumps to when it boots from slot 6: it reads
/// track 0 sector 0 off the data register and executes it.
pub const BOOTSTRAP_ROM: [u8; 256] = [
    0xA2, 0x20, 0xA0, 0x00, 0xA2, 0x03, 0x86, 0x3C, 0x8A, 0x0A, 0x24, 0x3C, 0xF0, 0x10, 0x05, 0x3C,
    0x49, 0xFF, 0x29, 0x7E, 0xB0, 0x08, 0x4A, 0xD0, 0xFB, 0x98, 0x9D, 0x56, 0x03, 0xC8, 0xE8, 0x10,
    0xE5, 0x20, 0x58, 0xFF, 0xBA, 0xBD, 0x00, 0x01, 0x0A, 0x0A, 0x0A, 0x0A, 0x85, 0x2B, 0xAA, 0xBD,
    0x8E, 0xC0, 0xBD, 0x8C, 0xC0, 0xBD, 0x8A, 0xC0, 0xBD, 0x89, 0xC0, 0xA0, 0x50, 0xBD, 0x80, 0xC0,
    0x98, 0x29, 0x03, 0x0A, 0x05, 0x2B, 0xAA, 0xBD, 0x81, 0xC0, 0xA9, 0x56, 0x20, 0xA8, 0xFC, 0x88,
    0x10, 0xEB, 0x85, 0x26, 0x85, 0x3D, 0x85, 0x41, 0xA9, 0x08, 0x85, 0x27, 0x18, 0x08, 0xBD, 0x8C,
    0xC0, 0x10, 0xFB, 0x49, 0xD5, 0xD0, 0xF7, 0xBD, 0x8C, 0xC0, 0x10, 0xFB, 0xC9, 0xAA, 0xD0, 0xF3,
    0xEA, 0xBD, 0x8C, 0xC0, 0x10, 0xFB, 0xC9, 0x96, 0xF0, 0x09, 0x28, 0x90, 0xDF, 0x49, 0xAD, 0xF0,
    0x25, 0xD0, 0xD9, 0xA0, 0x03, 0x85, 0x40, 0xBD, 0x8C, 0xC0, 0x10, 0xFB, 0x2A, 0x85, 0x3C, 0xBD,
    0x8C, 0xC0, 0x10, 0xFB, 0x25, 0x3C, 0x88, 0xD0, 0xEC, 0x28, 0xC5, 0x3D, 0xD0, 0xBE, 0xA5, 0x40,
    0xC5, 0x41, 0xD0, 0xB8, 0xB0, 0xB7, 0xA0, 0x56, 0x84, 0x3C, 0xBC, 0x8C, 0xC0, 0x10, 0xFB, 0x59,
    0xD6, 0x02, 0xA4, 0x3C, 0x88, 0x99, 0x00, 0x03, 0xD0, 0xEE, 0x84, 0x3C, 0xBC, 0x8C, 0xC0, 0x10,
    0xFB, 0x59, 0xD6, 0x02, 0xA4, 0x3C, 0x91, 0x26, 0xC8, 0xD0, 0xEF, 0xBC, 0x8C, 0xC0, 0x10, 0xFB,
    0x59, 0xD6, 0x02, 0xD0, 0x87, 0xA0, 0x00, 0xA2, 0x56, 0xCA, 0x30, 0xFB, 0xB1, 0x26, 0x5E, 0x00,
    0x03, 0x2A, 0x5E, 0x00, 0x03, 0x2A, 0x91, 0x26, 0xC8, 0xD0, 0xEE, 0xE6, 0x27, 0xE6, 0x3D, 0xA5,
    0x3D, 0xCD, 0x00, 0x08, 0xA6, 0x2B, 0x90, 0xDB, 0x4C, 0x01, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Bit-reverses the low two bits of a byte, as used by the 4-and-4 and
/// 6-and-2 encoders (`REVERSE_BITS` in `original_source/src/types.hpp`).
#[inline]
fn reverse_2bits(b: u8) -> u8 {
    ((b & 0x01) << 1) | ((b & 0x02) >> 1)
}

/// 4-and-4 encodes one byte into two nibbles, each carrying half of `b`'s
/// bits interleaved with set odd bits so the result always has its odd bits set.
fn encode_44(b: u8, out: &mut [u8]) {
    out[0] = ((b >> 1) & 0x55) | 0xAA;
    out[1] = (b & 0x55) | 0xAA;
}

/// 6-and-2 encodes a 256-byte sector into 343 disk bytes.
fn encode_62(data: &[u8]) -> [u8; 343] {
    let mut buf = [0u8; 343];

    for i in 0..84 {
        buf[i] = (reverse_2bits(data[i + 172]) << 4)
            | (reverse_2bits(data[i + 86]) << 2)
            | reverse_2bits(data[i]);
    }
    for i in 84..86 {
        buf[i] = (reverse_2bits(data[i + 86]) << 2) | reverse_2bits(data[i]);
    }
    for i in 86..342 {
        buf[i] = (data[i - 86] & 0b1111_1100) >> 2;
    }
    buf[342] = buf[341];

    let mut result = [0u8; 343];
    result[0] = buf[0];
    for i in 1..342 {
        result[i] = buf[i] ^ buf[i - 1];
    }
    result[342] = buf[342];

    let mut out = [0u8; 343];
    for i in 0..343 {
        out[i] = SIX_AND_TWO[(result[i] & 0x3F) as usize];
    }
    out
}

/// Nibblizes one track's 16 logical sectors into `output` (must hold at
/// least `NIBBLES_PER_TRACK` bytes). Returns the number of bytes written.
fn encode_track(data: &[u8], track: u8, output: &mut [u8]) -> usize {
    let mut pos = 0usize;
    let volume: u8 = 0xFE;

    for sector in 0u8..16 {
        let physical_sector = DOS_ORDER[sector as usize];

        for _ in 0..48 {
            output[pos] = 0xFF;
            pos += 1;
        }

        output[pos] = 0xD5;
        output[pos + 1] = 0xAA;
        output[pos + 2] = 0x96;
        pos += 3;
        encode_44(volume, &mut output[pos..pos + 2]);
        encode_44(track, &mut output[pos + 2..pos + 4]);
        encode_44(sector, &mut output[pos + 4..pos + 6]);
        encode_44(volume ^ track ^ sector, &mut output[pos + 6..pos + 8]);
        pos += 8;
        output[pos] = 0xDE;
        output[pos + 1] = 0xAA;
        output[pos + 2] = 0xEB;
        pos += 3;

        for _ in 0..5 {
            output[pos] = 0xFF;
            pos += 1;
        }

        output[pos] = 0xD5;
        output[pos + 1] = 0xAA;
        output[pos + 2] = 0xAD;
        pos += 3;
        let sector_start = physical_sector as usize * 256;
        let encoded = encode_62(&data[sector_start..sector_start + 256]);
        output[pos..pos + 343].copy_from_slice(&encoded);
        pos += 343;
        output[pos] = 0xDE;
        output[pos + 1] = 0xAA;
        output[pos + 2] = 0xEB;
        pos += 3;
    }

    pos
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    #[serde(with = "serde_bytes_vec")]
    image: Vec<u8>,
    loaded: bool,

    #[serde(skip, default = "default_nibbles")]
    nibbles: Vec<[u8; NIBBLES_PER_TRACK]>,
    encoded: bool,

    motor_phase: u8,
    magnet: [bool; 4],

    current_drive: u8,
    drive_on: [bool; 2],
    write_mode: bool,
    byte_count: usize,
}

fn default_nibbles() -> Vec<[u8; NIBBLES_PER_TRACK]> {
    vec![[0u8; NIBBLES_PER_TRACK]; TRACK_COUNT]
}

/// `serde` can't derive for `[u8; N]` arrays of this size directly on older
/// editions without const-generic support in the derive path; store the raw
/// image as a plain `Vec<u8>` instead.
mod serde_bytes_vec {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        serde::Deserialize::deserialize(d)
    }
}

impl Default for Disk {
    fn default() -> Self {
        Self::new()
    }
}

impl Disk {
    pub fn new() -> Self {
        Self {
            image: Vec::new(),
            loaded: false,
            nibbles: default_nibbles(),
            encoded: false,
            motor_phase: 0,
            magnet: [false; 4],
            current_drive: 0,
            drive_on: [false; 2],
            write_mode: false,
            byte_count: 0,
        }
    }

    /// Mounts a raw disk image. Must be exactly `DISK_MAXSIZE` bytes.
    pub fn mount(&mut self, image: &[u8]) -> Result<(), usize> {
        if image.len() != DISK_MAXSIZE {
            return Err(image.len());
        }
        self.image = image.to_vec();
        self.loaded = true;
        self.encoded = false;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Ejects the mounted image, leaving the drive empty without touching
    /// stepper-motor or magnet state.
    pub fn eject(&mut self) {
        self.image.clear();
        self.loaded = false;
        self.encoded = false;
    }

    pub fn track(&self) -> u8 {
        self.motor_phase >> 1
    }

    /// Lazily nibblizes all 35 tracks. Idempotent once `encoded` is set.
    fn encode_all(&mut self) {
        if LogConfig::global().should_log(LogCategory::Bus, LogLevel::Debug) {
            eprintln!("disk: nibblizing all 35 tracks");
        }
        for track in 0..TRACK_COUNT {
            let start = track * 16 * 256;
            let end = start + 16 * 256;
            encode_track(&self.image[start..end], track as u8, &mut self.nibbles[track]);
        }
        self.encoded = true;
    }

    /// Entry point for both the `0xC0E0..=0xC0EF` read path and the
    /// `0xC080..=0xC08F` write path (the original forwards writes to the same
    /// handler, ignoring the written value).
    pub fn io(&mut self, addr: u16) -> u8 {
        match addr & 0x0F {
            n @ 0..=7 => self.set_phase(n >> 1, n & 1 != 0, addr),
            8 => self.enable_drive(false),
            9 => self.enable_drive(true),
            0xA => self.select_drive(0),
            0xB => self.select_drive(1),
            0xC => self.read_write_data(),
            0xD => 0,
            0xE => {
                self.write_mode = false;
                0
            }
            0xF => {
                self.write_mode = true;
                0
            }
            _ => unreachable!(),
        }
    }

    fn set_phase(&mut self, phase: u8, on: bool, addr: u16) -> u8 {
        self.magnet[(phase % 4) as usize] = on;

        let mut direction: i32 = 0;
        let aligned = (self.motor_phase & 3) as usize;
        if !self.magnet[aligned] {
            if self.magnet[((self.motor_phase + 3) & 3) as usize] {
                direction -= 1;
            }
            if self.magnet[((self.motor_phase + 1) & 3) as usize] {
                direction += 1;
            }
        }

        let next = self.motor_phase as i32 + direction;
        self.motor_phase = next.clamp(0, 70) as u8;

        if addr == 0xC0E0 {
            0xFF
        } else {
            0x00
        }
    }

    fn enable_drive(&mut self, on: bool) -> u8 {
        self.drive_on[self.current_drive as usize] = on;
        0
    }

    fn select_drive(&mut self, drive: u8) -> u8 {
        self.current_drive = drive;
        0
    }

    fn read_write_data(&mut self) -> u8 {
        if self.current_drive == 0 && !self.write_mode {
            if !self.loaded {
                return 0;
            }
            if !self.encoded {
                self.encode_all();
            }
            let track = self.track() as usize;
            let byte = self.nibbles[track][self.byte_count];
            self.byte_count = (self.byte_count + 1) % NIBBLES_PER_TRACK;
            byte
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_image() -> Vec<u8> {
        vec![0u8; DISK_MAXSIZE]
    }

    #[test]
    fn rejects_wrong_size() {
        let mut disk = Disk::new();
        assert!(disk.mount(&[0u8; 100]).is_err());
        assert!(!disk.is_loaded());
    }

    #[test]
    fn accepts_correct_size() {
        let mut disk = Disk::new();
        assert!(disk.mount(&blank_image()).is_ok());
        assert!(disk.is_loaded());
    }

    #[test]
    fn stepper_monotonic_forward_and_back() {
        let mut disk = Disk::new();
        // Cycle 0 -> 1 -> 2 -> 3 -> 0 energizes each magnet in turn, driving
        // the head forward one half-track per transition.
        let forward = [(0u8, true), (1, true), (0, false), (2, true), (1, false), (3, true), (2, false), (0, true), (3, false)];
        let mut last = disk.track();
        for (phase, on) in forward {
            disk.io(0xC0E0 | ((phase as u16) << 1) | if on { 1 } else { 0 });
            assert!(disk.track() >= last);
            last = disk.track();
        }
    }

    #[test]
    fn both_magnets_on_cancels_movement() {
        let mut disk = Disk::new();
        disk.io(0xC0E1); // phase 0 on
        let track_before = disk.motor_phase;
        disk.io(0xC0E3); // phase 1 on too: adjacent magnets cancel
        assert_eq!(disk.motor_phase, track_before);
    }

    #[test]
    fn nibblization_starts_with_sync_bytes() {
        let mut data = blank_image();
        data[0] = 0xA9;
        data[1] = 0x01;
        data[2] = 0x85;
        data[3] = 0x00;
        let mut disk = Disk::new();
        disk.mount(&data).unwrap();
        disk.select_drive(0);
        for _ in 0..6 {
            let b = disk.read_write_data();
            assert_eq!(b, 0xFF);
        }
    }

    #[test]
    fn byte_count_wraps_at_track_length() {
        let mut disk = Disk::new();
        disk.mount(&blank_image()).unwrap();
        disk.select_drive(0);
        for _ in 0..NIBBLES_PER_TRACK {
            disk.read_write_data();
        }
        assert_eq!(disk.byte_count, 0);
    }

    #[test]
    fn address_field_prologue_present() {
        let data = blank_image();
        let mut disk = Disk::new();
        disk.mount(&data).unwrap();
        disk.select_drive(0);
        for _ in 0..48 {
            disk.read_write_data();
        }
        assert_eq!(disk.read_write_data(), 0xD5);
        assert_eq!(disk.read_write_data(), 0xAA);
        assert_eq!(disk.read_write_data(), 0x96);
    }

    #[test]
    fn write_mode_toggle() {
        let mut disk = Disk::new();
        disk.mount(&blank_image()).unwrap();
        disk.io(0xC0EF); // set write mode
        disk.select_drive(0);
        assert_eq!(disk.read_write_data(), 0);
        disk.io(0xC0EE); // back to read mode
    }
}
