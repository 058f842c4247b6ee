//! Windows API bindings for raw volume access
//!
//! Safe wrappers around CreateFileW and DeviceIoControl that implement
//! [`DeviceChannel`] and [`VolumeProvider`] for live volumes.

use crate::error::{Result, UsnTraceError};
use crate::ntfs::device::{ControlOutcome, DeviceChannel, VolumeId, VolumeProvider};
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use tracing::{debug, trace};
use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};

// ============================================================================
// Win32 constants
// ============================================================================

pub const GENERIC_READ: u32 = 0x80000000;
pub const FILE_SHARE_READ: u32 = 0x00000001;
pub const FILE_SHARE_WRITE: u32 = 0x00000002;

/// ERROR_HANDLE_EOF: enumeration or journal read has nothing more
pub const ERROR_HANDLE_EOF: i32 = 38;
/// ERROR_JOURNAL_DELETE_IN_PROGRESS
pub const ERROR_JOURNAL_DELETE_IN_PROGRESS: i32 = 1178;
/// ERROR_JOURNAL_NOT_ACTIVE
pub const ERROR_JOURNAL_NOT_ACTIVE: i32 = 1179;

/// Check if error indicates "journal not active"
pub fn is_journal_not_active_error(code: i32) -> bool {
    code == ERROR_JOURNAL_DELETE_IN_PROGRESS || code == ERROR_JOURNAL_NOT_ACTIVE
}

// ============================================================================
// Safe Handle Wrapper
// ============================================================================

/// RAII wrapper for Windows HANDLE
pub struct SafeHandle {
    handle: HANDLE,
}

impl SafeHandle {
    /// Create from raw handle
    pub fn new(handle: HANDLE) -> Option<Self> {
        if handle == INVALID_HANDLE_VALUE || handle.0.is_null() {
            None
        } else {
            Some(Self { handle })
        }
    }

    pub fn as_raw(&self) -> HANDLE {
        self.handle
    }
}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

// SAFETY: a volume handle may be used from any thread; the channel is never
// shared, only moved.
unsafe impl Send for SafeHandle {}

// ============================================================================
// Volume Operations
// ============================================================================

/// Open a volume for raw read access without locking out other users
pub fn open_volume(volume: VolumeId) -> Result<SafeHandle> {
    use windows::core::PCWSTR;
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_MODE, OPEN_EXISTING,
    };

    let path = volume.device_path();
    let wide_path: Vec<u16> = OsStr::new(&path)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let handle = unsafe {
        CreateFileW(
            PCWSTR::from_raw(wide_path.as_ptr()),
            GENERIC_READ,
            FILE_SHARE_MODE(FILE_SHARE_READ | FILE_SHARE_WRITE),
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(0),
            None,
        )
    };

    match handle {
        Ok(h) => {
            debug!("Opened {}", path);
            SafeHandle::new(h)
                .ok_or_else(|| UsnTraceError::VolumeOpenError(path, std::io::Error::last_os_error()))
        }
        Err(e) => Err(UsnTraceError::VolumeOpenError(
            path,
            std::io::Error::from_raw_os_error(e.code().0 & 0xFFFF),
        )),
    }
}

// ============================================================================
// Device channel
// ============================================================================

/// Open volume handle speaking FSCTL requests
pub struct WinVolumeChannel {
    volume: VolumeId,
    handle: SafeHandle,
}

impl WinVolumeChannel {
    pub fn open(volume: VolumeId) -> Result<Self> {
        Ok(Self {
            volume,
            handle: open_volume(volume)?,
        })
    }

    pub fn volume(&self) -> VolumeId {
        self.volume
    }
}

impl DeviceChannel for WinVolumeChannel {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<ControlOutcome> {
        use windows::Win32::System::IO::DeviceIoControl;

        let in_ptr = if input.is_empty() {
            None
        } else {
            Some(input.as_ptr() as *const std::ffi::c_void)
        };
        let mut bytes_returned: u32 = 0;

        let result = unsafe {
            DeviceIoControl(
                self.handle.as_raw(),
                code,
                in_ptr,
                input.len() as u32,
                Some(output.as_mut_ptr() as *mut std::ffi::c_void),
                output.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        if result.is_ok() {
            trace!("DeviceIoControl(0x{:08X}) returned {} bytes", code, bytes_returned);
            return Ok(ControlOutcome::Data(bytes_returned as usize));
        }

        let error = std::io::Error::last_os_error();
        match error.raw_os_error() {
            Some(ERROR_HANDLE_EOF) => Ok(ControlOutcome::EndOfData),
            Some(os) if is_journal_not_active_error(os) => {
                Err(UsnTraceError::UsnJournalNotActive(self.volume.to_string()))
            }
            _ => Err(UsnTraceError::DeviceControl { code, source: error }),
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Live volumes of this machine
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsVolumes;

impl VolumeProvider for WindowsVolumes {
    type Channel = WinVolumeChannel;

    fn open(&self, volume: VolumeId) -> Result<WinVolumeChannel> {
        WinVolumeChannel::open(volume)
    }

    /// Drive letters currently mapped, from GetLogicalDrives
    fn candidate_volumes(&self) -> Vec<VolumeId> {
        use windows::Win32::Storage::FileSystem::GetLogicalDrives;

        let mask = unsafe { GetLogicalDrives() };
        (0..26u8)
            .filter(|bit| mask & (1 << bit) != 0)
            .filter_map(|bit| VolumeId::new((b'A' + bit) as char).ok())
            .collect()
    }
}
