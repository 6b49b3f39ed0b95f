use crate::game::snap::SnapPin;
use log::{debug, info};
use smallvec::SmallVec;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BYTE_OFF: u8 = 0x00;
pub const BYTE_ON: u8 = 0x01;
pub const BYTE_UNCHANGED: u8 = 0xFF;

pub const DEFAULT_MESSAGE_LENGTH: usize = 12;
pub const DEFAULT_LANE_PINS: [usize; 4] = [0, 1, 2, 3];
/// Physical pins in `SnapPin` order: T4, T8, T16, T12, T24, T192.
pub const DEFAULT_SNAP_PINS: [usize; 6] = [4, 5, 6, 7, 8, 9];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("pin {pin} does not fit in a {length}-byte message")]
    PinOutOfRange { pin: usize, length: usize },
    #[error("pin {0} is assigned twice")]
    DuplicatePin(usize),
    #[error("expected {expected} snap pins, got {found}")]
    SnapPinCount { expected: usize, found: usize },
}

/// One fixed-width state-change message. Each byte is `BYTE_OFF`, `BYTE_ON`
/// or `BYTE_UNCHANGED`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HardwareMessage(SmallVec<[u8; 16]>);

impl HardwareMessage {
    pub fn unchanged(length: usize) -> Self {
        Self(SmallVec::from_elem(BYTE_UNCHANGED, length))
    }

    pub fn all_off(length: usize) -> Self {
        Self(SmallVec::from_elem(BYTE_OFF, length))
    }

    #[inline(always)]
    pub fn set(&mut self, pin: usize, on: bool) {
        debug_assert!(pin < self.0.len(), "pin {pin} outside message");
        if let Some(byte) = self.0.get_mut(pin) {
            *byte = if on { BYTE_ON } else { BYTE_OFF };
        }
    }

    /// Puts `pin` back to `BYTE_UNCHANGED`.
    #[inline(always)]
    pub fn release(&mut self, pin: usize) {
        if let Some(byte) = self.0.get_mut(pin) {
            *byte = BYTE_UNCHANGED;
        }
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_all_unchanged(&self) -> bool {
        self.0.iter().all(|&b| b == BYTE_UNCHANGED)
    }

    /// Requested state of `pin`, `None` when left unchanged.
    pub fn pin(&self, pin: usize) -> Option<bool> {
        match self.0.get(pin).copied() {
            Some(BYTE_ON) => Some(true),
            Some(BYTE_OFF) => Some(false),
            _ => None,
        }
    }

    /// Writes every explicit byte into `state`, the way a receiver would.
    pub fn apply_to(&self, state: &mut [bool]) {
        for (slot, byte) in state.iter_mut().zip(self.0.iter()) {
            match *byte {
                BYTE_ON => *slot = true,
                BYTE_OFF => *slot = false,
                _ => {}
            }
        }
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 2);
        for byte in &self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Debug for HardwareMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareMessage({})", self.to_hex())
    }
}

/// Readable form: `1` on, `0` off, `.` unchanged.
impl fmt::Display for HardwareMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            let c = match *byte {
                BYTE_ON => '1',
                BYTE_OFF => '0',
                _ => '.',
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Which message byte drives each lane lamp and snap indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinLayout {
    lanes: Vec<usize>,
    snap: [usize; 6],
    message_length: usize,
}

impl Default for PinLayout {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANE_PINS.to_vec(),
            snap: DEFAULT_SNAP_PINS,
            message_length: DEFAULT_MESSAGE_LENGTH,
        }
    }
}

impl PinLayout {
    pub fn new(
        lanes: Vec<usize>,
        snap: &[usize],
        message_length: usize,
    ) -> Result<Self, LayoutError> {
        let snap: [usize; 6] = snap.try_into().map_err(|_| LayoutError::SnapPinCount {
            expected: 6,
            found: snap.len(),
        })?;
        let mut seen = vec![false; message_length];
        for &pin in lanes.iter().chain(snap.iter()) {
            let Some(slot) = seen.get_mut(pin) else {
                return Err(LayoutError::PinOutOfRange {
                    pin,
                    length: message_length,
                });
            };
            if *slot {
                return Err(LayoutError::DuplicatePin(pin));
            }
            *slot = true;
        }
        Ok(Self {
            lanes,
            snap,
            message_length,
        })
    }

    #[inline(always)]
    pub fn message_length(&self) -> usize {
        self.message_length
    }

    #[inline(always)]
    pub fn lane_pin(&self, lane: usize) -> Option<usize> {
        self.lanes.get(lane).copied()
    }

    #[inline(always)]
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    #[inline(always)]
    pub fn snap_pin(&self, role: SnapPin) -> usize {
        self.snap[role.index()]
    }

    #[inline(always)]
    pub fn snap_pins(&self) -> &[usize; 6] {
        &self.snap
    }

    pub fn unchanged_message(&self) -> HardwareMessage {
        HardwareMessage::unchanged(self.message_length)
    }

    pub fn all_off_message(&self) -> HardwareMessage {
        HardwareMessage::all_off(self.message_length)
    }
}

/// Sink for state-change messages.
pub trait HardwareWriter: Send {
    fn write_message(&mut self, message: &[u8]) -> io::Result<()>;
}

/// Pin controller reached through its device file, e.g. `/dev/ttyACM0`. Line
/// settings are left to the OS.
pub struct SerialDevice {
    path: PathBuf,
    file: File,
}

impl SerialDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        info!("Opened pin controller at {}.", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl HardwareWriter for SerialDevice {
    fn write_message(&mut self, message: &[u8]) -> io::Result<()> {
        self.file.write_all(message)?;
        self.file.flush()
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        debug!("Closing pin controller at {}.", self.path.display());
    }
}
