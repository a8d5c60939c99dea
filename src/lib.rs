//! sanboot - legacy BIOS disk services over SAN block devices
//!
//! This library emulates the BIOS INT 13h disk service interrupt on top of
//! remote block devices, so an unmodified boot loader (MBR boot code, an
//! El Torito image, DOS, NTLDR, GRUB stage 1) can boot from a
//! network-attached volume as though it were an ordinary floppy or fixed
//! disk.
//!
//! The embedding firmware supplies the block devices (`block::SanDevice`),
//! access to the real-mode address space (`realmode::RealMemory`), the
//! low-memory placement decisions (`int13::Config`) and the interrupt stub
//! glue (`int13::trampoline`); this crate supplies the drive emulation:
//! geometry inference, the command dispatcher and handlers, BIOS drive
//! count reconciliation, the boot record loader and the boot firmware
//! table installer.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod block;
pub mod int13;
pub mod realmode;
pub mod xbft;

#[cfg(test)]
pub(crate) mod testing;

pub use block::{BlockError, EddInterface, SanDevice};
pub use int13::boot::{BootConfig, Handoff};
pub use int13::frame::RegisterFrame;
pub use int13::{Config, Control, HookFlags, Int13Emulator, Int13Error};
pub use realmode::{RealMemory, SegOff};

/// Failure of a drive lifecycle or boot operation.
///
/// Once a drive is hooked, per-call failures surface only as INT 13 status
/// bytes; this type covers the API surface around the interrupt itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanError {
    /// The requested drive number is already emulated.
    DriveInUse,
    /// No free slot for another emulated drive.
    TooManyDrives,
    /// The drive number is not emulated.
    UnknownDrive,
    /// The device's block size cannot be emulated.
    UnsupportedBlockSize,
    /// The block layer failed while setting the drive up.
    Block(BlockError),
    /// An INT 13 command issued by the boot loader failed with this status.
    Command(u8),
    /// The volume carries no usable boot record.
    NotBootable,
    /// The boot firmware table pool is full.
    TableOverflow,
    /// A produced boot firmware table is malformed.
    InvalidTable,
}
