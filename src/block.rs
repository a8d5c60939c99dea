//! SAN block-device interface
//!
//! The emulation core consumes remote volumes through [`SanDevice`]; the
//! transports behind it (iSCSI, AoE, FCoE, HTTP, ...) belong to the block
//! layer and never show through. Every method may pump the network stack and
//! take arbitrarily long; callers must not hold anything across these calls
//! beyond the drive record itself.

use crate::SanError;

/// Failure surfaced by the block layer.
///
/// The core treats these as opaque: they are mapped to INT 13 status bytes
/// at the handler boundary and never cross the interrupt boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// Transport or media I/O failure.
    Io,
    /// Access beyond the end of the volume.
    OutOfRange,
    /// Write to a read-only volume.
    ReadOnly,
    /// Operation not supported by this transport.
    Unsupported,
}

/// EDD device-path description of a SAN volume.
///
/// Returned by [`SanDevice::describe`] and surfaced to callers of the
/// get-extended-parameters subfunction, so a booted OS can locate the
/// volume again.
#[derive(Debug, Clone, Copy)]
pub struct EddInterface {
    /// Host bus type, blank padded (e.g. `b"PCI "`).
    pub bus_type: [u8; 4],
    /// Interface type, blank padded (e.g. `b"SANBOOT "`).
    pub interface_type: [u8; 8],
    /// Interface path qualifier (bus-specific).
    pub interface_path: u64,
    /// Device path qualifier (interface-specific).
    pub device_path: u64,
}

/// A remote block device backing one emulated BIOS drive.
pub trait SanDevice {
    /// Read whole blocks starting at `lba`. `buf.len()` is a multiple of
    /// [`block_size`](Self::block_size).
    fn read(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Write whole blocks starting at `lba`.
    fn write(&mut self, lba: u64, buf: &[u8]) -> Result<(), BlockError>;

    /// Reset the device.
    fn reset(&mut self) -> Result<(), BlockError>;

    /// Re-establish the connection behind the device.
    fn reopen(&mut self) -> Result<(), BlockError>;

    /// Whether the connection has gone stale and must be reopened before
    /// the next transfer.
    fn needs_reopen(&self) -> bool {
        false
    }

    /// Total capacity in blocks.
    fn capacity(&self) -> u64;

    /// Block size in bytes.
    fn block_size(&self) -> usize;

    /// Whether the volume is a CD-ROM (2048-byte blocks, possibly carrying
    /// an El Torito boot catalog).
    fn is_cdrom(&self) -> bool {
        false
    }

    /// EDD device-path information for this volume.
    fn describe(&self) -> Result<EddInterface, BlockError> {
        Err(BlockError::Unsupported)
    }

    /// Offer boot firmware tables describing this volume (iBFT, aBFT, ...)
    /// to `install`. Called once per drive by the table installer.
    fn acpi_describe(
        &self,
        install: &mut dyn FnMut(&[u8]) -> Result<(), SanError>,
    ) -> Result<(), SanError> {
        let _ = install;
        Ok(())
    }
}
