//! Raw volume device channel
//!
//! The journal reader and catalog scanner only ever talk to a volume through
//! [`DeviceChannel`]: one control request in, one byte buffer out. The
//! Windows binding lives in `winapi`; tests drive the same code through
//! `scripted::ScriptedDevice`.

use crate::error::{Result, UsnTraceError};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Volume addressing
// ============================================================================

/// A volume addressed by drive letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VolumeId(char);

impl VolumeId {
    /// Create from a drive letter (case-insensitive)
    pub fn new(letter: char) -> Result<Self> {
        if letter.is_ascii_alphabetic() {
            Ok(Self(letter.to_ascii_uppercase()))
        } else {
            Err(UsnTraceError::InvalidVolume(letter.to_string()))
        }
    }

    pub fn letter(&self) -> char {
        self.0
    }

    /// Raw device path used to open the volume, e.g. `\\.\C:`
    pub fn device_path(&self) -> String {
        format!("\\\\.\\{}:", self.0)
    }

    /// Root directory path, e.g. `C:\`
    pub fn root_path(&self) -> String {
        format!("{}:\\", self.0)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.0)
    }
}

impl FromStr for VolumeId {
    type Err = UsnTraceError;

    /// Accepts `C`, `c:`, `C:\` and `\\.\C:`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix("\\\\.\\").unwrap_or(trimmed);
        let body = body.trim_end_matches('\\');
        let body = body.strip_suffix(':').unwrap_or(body);

        let mut chars = body.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => VolumeId::new(letter),
            _ => Err(UsnTraceError::InvalidVolume(s.to_string())),
        }
    }
}

impl TryFrom<char> for VolumeId {
    type Error = UsnTraceError;

    fn try_from(letter: char) -> Result<Self> {
        VolumeId::new(letter)
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Result of a successful control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Number of bytes written to the output buffer
    Data(usize),
    /// The device has nothing more for this cursor (ERROR_HANDLE_EOF)
    EndOfData,
}

/// An open, non-exclusive handle to a raw volume. Requests are cursor-based,
/// so only one enumeration or journal read may be in flight per channel.
pub trait DeviceChannel {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<ControlOutcome>;
}

impl<T: DeviceChannel + ?Sized> DeviceChannel for &mut T {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<ControlOutcome> {
        (**self).control(code, input, output)
    }
}

impl<T: DeviceChannel + ?Sized> DeviceChannel for Box<T> {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<ControlOutcome> {
        (**self).control(code, input, output)
    }
}

/// Opens channels to volumes. The channel owns the OS handle and closes it
/// on drop, which covers cancellation and early returns.
pub trait VolumeProvider {
    type Channel: DeviceChannel;

    fn open(&self, volume: VolumeId) -> Result<Self::Channel>;

    /// Volumes worth probing for a journal
    fn candidate_volumes(&self) -> Vec<VolumeId>;
}

// ============================================================================
// Platforms without raw volume access
// ============================================================================

/// Channel type that can never be constructed
#[derive(Debug)]
pub enum NoChannel {}

impl DeviceChannel for NoChannel {
    fn control(&mut self, _code: u32, _input: &[u8], _output: &mut [u8]) -> Result<ControlOutcome> {
        match *self {}
    }
}

/// Provider used where raw volume devices do not exist
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRawDevices;

impl VolumeProvider for NoRawDevices {
    type Channel = NoChannel;

    fn open(&self, _volume: VolumeId) -> Result<NoChannel> {
        Err(UsnTraceError::Unsupported)
    }

    fn candidate_volumes(&self) -> Vec<VolumeId> {
        Vec::new()
    }
}
