//! Wire structures exchanged through real-mode memory
//!
//! These are the caller-visible packet layouts of the extended INT 13
//! interface (EDD) and the El Torito CD-ROM subfunctions. All fields are
//! little-endian and unaligned; they are marshalled with `zerocopy` through
//! the `RealMemory` helpers, never by pointer.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::realmode::SegOff;

/// A far pointer as it appears inside a packet: offset word first.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
#[repr(C)]
pub struct FarPtr {
    pub offset: U16,
    pub segment: U16,
}

impl FarPtr {
    pub fn to_segoff(self) -> SegOff {
        SegOff::new(self.segment.get(), self.offset.get())
    }
}

impl From<SegOff> for FarPtr {
    fn from(at: SegOff) -> Self {
        FarPtr {
            offset: U16::new(at.offset),
            segment: U16::new(at.segment),
        }
    }
}

/// Extended read/write disk address packet (subfunctions 0x42/0x43).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
#[repr(C)]
pub struct DiskAddressPacket {
    /// Caller-provided structure size.
    pub bufsize: u8,
    pub reserved_a: u8,
    /// Block count: 0x00-0x7f literal, 0xff means `long_count`.
    pub count: u8,
    pub reserved_b: u8,
    /// Data buffer, or `FFFF:FFFF` meaning `buffer_phys`.
    pub buffer: FarPtr,
    /// Starting linear block address.
    pub lba: U64,
    /// 64-bit physical buffer address (EDD 3.0 packets).
    pub buffer_phys: U64,
    /// Extended block count, selected by `count == 0xff`.
    pub long_count: U32,
    pub reserved_c: U32,
}

/// Minimum acceptable disk address packet size.
pub const DAP_BASE_SIZE: usize = 16;
/// Packet size through `buffer_phys`.
pub const DAP_PHYS_SIZE: usize = 24;
/// Packet size through `long_count`.
pub const DAP_LONG_SIZE: usize = 28;

/// Offset of the `count` byte within the packet.
pub const DAP_COUNT_OFFSET: u16 = 2;
/// Offset of the `long_count` field within the packet.
pub const DAP_LONG_COUNT_OFFSET: u16 = 24;

bitflags::bitflags! {
    /// Information flags in the extended drive parameters structure.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ParameterFlags: u16 {
        /// DMA boundary errors are handled transparently.
        const DMA_TRANSPARENT = 0x0001;
        /// The CHS geometry fields are valid.
        const GEOMETRY_VALID = 0x0002;
        /// Media is removable.
        const REMOVABLE = 0x0004;
    }
}

/// Extended drive parameters (subfunction 0x48), EDD 3.0 layout.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
#[repr(C)]
pub struct DriveParameters {
    pub bufsize: U16,
    pub flags: U16,
    pub cylinders: U32,
    pub heads: U32,
    pub sectors_per_track: U32,
    pub sectors: U64,
    pub sector_size: U16,
    /// Device parameter table extension; `FFFF:FFFF` when absent.
    pub dpte: FarPtr,
    /// Device path information key (0xBEDD when present).
    pub dpi_key: U16,
    pub dpi_len: u8,
    pub reserved_a: [u8; 3],
    pub bus_type: [u8; 4],
    pub interface_type: [u8; 8],
    pub interface_path: U64,
    pub device_path: U64,
    pub reserved_b: u8,
    /// Two's-complement checksum over the device path information block.
    pub checksum: u8,
}

/// Structure length without any device path information.
pub const PARAMS_V1_SIZE: usize = 26;
/// Structure length through the DPTE pointer.
pub const PARAMS_V2_SIZE: usize = 30;
/// Full EDD 3.0 structure length.
pub const PARAMS_V3_SIZE: usize = 66;

/// Device path information signature key.
pub const DPI_KEY: u16 = 0xbedd;
/// Length of the device path information block.
pub const DPI_LEN: u8 = 36;

impl DriveParameters {
    /// Set the DPI checksum so the device path block sums to zero.
    pub fn update_checksum(&mut self) {
        self.checksum = 0;
        let sum = self.as_bytes()[PARAMS_V2_SIZE..PARAMS_V3_SIZE]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        self.checksum = 0u8.wrapping_sub(sum);
    }
}

/// CD-ROM emulation specification packet (subfunction 0x4B).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
#[repr(C)]
pub struct CdromSpecification {
    pub size: u8,
    /// Emulated media type; zero for no-emulation boot.
    pub media_type: u8,
    pub drive: u8,
    pub controller: u8,
    pub image_lba: U32,
    pub device: U16,
    pub buffer: U16,
    pub load_segment: U16,
    pub sector_count: U16,
    pub chs: [u8; 3],
}

/// Boot catalog read command packet (subfunction 0x4D).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
#[repr(C)]
pub struct CdromBootCatalogCommand {
    pub size: u8,
    pub reserved: u8,
    /// Number of 2048-byte sectors to read.
    pub count: U16,
    /// Physical buffer address.
    pub buffer: U32,
    /// First catalog sector to read.
    pub start: U16,
}

/// Diskette parameter table for a 1.44 MB drive, as pointed at by ES:DI on
/// return from subfunction 0x08: specify bytes, motor timings, 512-byte
/// sectors, 18 sectors per track, gap lengths, fill byte, settle and start
/// times.
pub const FDD_PARAMETER_TABLE: [u8; 11] = [
    0xaf, 0x02, 0x25, 0x02, 0x12, 0x1b, 0xff, 0x6c, 0xf6, 0x0f, 0x08,
];

/// Drive type reported in BL for a 1.44 MB diskette drive.
pub const FDD_TYPE_1M44: u8 = 0x04;

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;
    use zerocopy::FromZeros;

    #[test]
    fn packet_sizes() {
        assert_eq!(size_of::<DiskAddressPacket>(), 32);
        assert_eq!(size_of::<DriveParameters>(), PARAMS_V3_SIZE);
        assert_eq!(size_of::<CdromSpecification>(), 19);
        assert_eq!(size_of::<CdromBootCatalogCommand>(), 10);
    }

    #[test]
    fn drive_parameters_checksum_sums_to_zero() {
        let mut params = DriveParameters::new_zeroed();
        params.dpi_key = U16::new(DPI_KEY);
        params.dpi_len = DPI_LEN;
        params.bus_type = *b"PCI ";
        params.interface_type = *b"SANBOOT ";
        params.interface_path = U64::new(0x1234);
        params.update_checksum();
        let sum = params.as_bytes()[PARAMS_V2_SIZE..PARAMS_V3_SIZE]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn far_ptr_roundtrip() {
        let wire = FarPtr::from(SegOff::new(0x07c0, 0x0010));
        assert_eq!(wire.as_bytes(), &[0x10, 0x00, 0xc0, 0x07]);
        assert_eq!(wire.to_segoff(), SegOff::new(0x07c0, 0x0010));
    }
}
