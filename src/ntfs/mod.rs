//! NTFS filesystem support
//!
//! - Wire structures of the USN control requests and records
//! - Device channel abstraction, with a Windows binding and a scripted device
//! - USN journal reading and full catalog enumeration

pub mod catalog;
pub mod device;
pub mod journal;
pub mod scripted;
pub mod structs;
#[cfg(windows)]
pub mod winapi;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogRecord, CatalogScanner, ScanStop, ScanSummary};
pub use device::{ControlOutcome, DeviceChannel, NoRawDevices, VolumeId, VolumeProvider};
pub use journal::{ChangeReason, ChangeRecord, JournalReader, JournalStop};
pub use structs::{Frn, JournalDescriptor, NtfsVolumeData, UsnRecord};

/// Volume provider of the host platform
#[cfg(windows)]
pub type PlatformVolumes = winapi::WindowsVolumes;

/// Volume provider of the host platform
#[cfg(not(windows))]
pub type PlatformVolumes = NoRawDevices;

pub fn platform_volumes() -> PlatformVolumes {
    PlatformVolumes::default()
}
