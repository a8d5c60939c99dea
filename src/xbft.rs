//! Boot firmware table installer
//!
//! SAN transports describe the boot volume to the loaded OS through small
//! ACPI tables (iBFT, aBFT, sBFT, ...). The installer packs them into a
//! fixed low-memory pool at 16-byte-aligned offsets, stamps the OEM
//! identifiers and recomputes each table's checksum. The OS finds the
//! tables by scanning base memory the way it scans for any ACPI artifact.

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::SanError;
use crate::realmode::{RealMemory, SegOff};

/// Size of the boot firmware table pool.
pub const XBFT_SIZE: usize = 768;
/// Alignment of each installed table within the pool.
pub const XBFT_ALIGN: usize = 16;

/// OEM ID stamped into every installed table.
pub const OEM_ID: [u8; 6] = *b"FENSYS";
/// OEM table ID stamped into every installed table.
pub const OEM_TABLE_ID: [u8; 8] = *b"iPXE    ";

/// Common ACPI description header at the front of every table.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
#[repr(C)]
pub struct AcpiHeader {
    pub signature: [u8; 4],
    pub length: U32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: U32,
    pub asl_compiler_id: [u8; 4],
    pub asl_compiler_revision: U32,
}

/// Size of [`AcpiHeader`].
pub const ACPI_HEADER_SIZE: usize = 36;

/// Copies description tables into the pool. Offered to each drive's table
/// producer by `Int13Emulator::describe`.
pub struct TableInstaller<'a, M> {
    mem: &'a mut M,
    base: SegOff,
    used: &'a mut usize,
}

impl<'a, M: RealMemory> TableInstaller<'a, M> {
    /// `base` must be 16-byte aligned and back at least [`XBFT_SIZE`]
    /// bytes; `used` is the pool's high-water mark, carried across calls.
    pub fn new(mem: &'a mut M, base: SegOff, used: &'a mut usize) -> Self {
        TableInstaller { mem, base, used }
    }

    /// Install one table: copy it to the next aligned slot, stamp the OEM
    /// identifiers and fix the checksum.
    pub fn install(&mut self, table: &[u8]) -> Result<(), SanError> {
        if table.len() < ACPI_HEADER_SIZE {
            return Err(SanError::InvalidTable);
        }
        let mut header = AcpiHeader::read_from_bytes(&table[..ACPI_HEADER_SIZE])
            .map_err(|_| SanError::InvalidTable)?;
        if header.length.get() as usize != table.len() {
            log::warn!(
                "table {:?} length field {} disagrees with {} presented bytes",
                header.signature,
                header.length.get(),
                table.len()
            );
            return Err(SanError::InvalidTable);
        }

        let offset = *self.used;
        if table.len() > XBFT_SIZE - offset {
            log::warn!(
                "no space for {} byte table {:?} ({} of {} bytes used)",
                table.len(),
                header.signature,
                offset,
                XBFT_SIZE
            );
            return Err(SanError::TableOverflow);
        }

        header.oem_id = OEM_ID;
        header.oem_table_id = OEM_TABLE_ID;
        header.checksum = 0;
        let body = &table[ACPI_HEADER_SIZE..];
        let sum = header
            .as_bytes()
            .iter()
            .chain(body.iter())
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        header.checksum = 0u8.wrapping_sub(sum);

        let slot = self.base.add_offset(offset as u16);
        self.mem.put_real(slot, &header);
        self.mem
            .copy_to_real(slot.add_offset(ACPI_HEADER_SIZE as u16), body);
        *self.used = offset + table.len().next_multiple_of(XBFT_ALIGN);

        log::debug!(
            "installed {} byte table {:?} at {}",
            table.len(),
            header.signature,
            slot
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;
    use zerocopy::FromZeros;

    fn table(signature: &[u8; 4], len: usize) -> Vec<u8> {
        let mut header = AcpiHeader::new_zeroed();
        header.signature = *signature;
        header.length = U32::new(len as u32);
        header.oem_id = *b"ACMEIN";
        header.checksum = 0x5a;
        let mut bytes = header.as_bytes().to_vec();
        bytes.resize(len, 0xa5);
        bytes
    }

    #[test]
    fn install_stamps_oem_and_checksum() {
        let mut mem = vec![0u8; 0x1000];
        let mut used = 0usize;
        let base = SegOff::new(0, 0x100);
        let mut installer = TableInstaller::new(&mut mem, base, &mut used);
        installer.install(&table(b"iBFT", 52)).unwrap();
        assert_eq!(used, 64);

        let installed = &mem[0x100..0x100 + 52];
        assert_eq!(&installed[10..16], &OEM_ID);
        assert_eq!(&installed[16..24], &OEM_TABLE_ID);
        let sum = installed.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn installs_are_aligned_and_leave_tail_untouched() {
        let mut mem = vec![0u8; 0x1000];
        let mut used = 0usize;
        let base = SegOff::new(0, 0x100);
        let mut installer = TableInstaller::new(&mut mem, base, &mut used);
        installer.install(&table(b"aBFT", 40)).unwrap();
        installer.install(&table(b"sBFT", 36)).unwrap();
        assert_eq!(used, 48 + 48);
        assert_eq!(&mem[0x100 + 48..0x100 + 52], b"sBFT");
        // Bytes past the high-water mark stay untouched.
        assert!(mem[0x100 + used..0x100 + XBFT_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn overflow_is_rejected_without_writing() {
        let mut mem = vec![0u8; 0x1000];
        let mut used = XBFT_SIZE - 16;
        let base = SegOff::new(0, 0x100);
        let mut installer = TableInstaller::new(&mut mem, base, &mut used);
        assert_eq!(
            installer.install(&table(b"iBFT", 40)),
            Err(SanError::TableOverflow)
        );
        assert_eq!(used, XBFT_SIZE - 16);
        assert!(mem[0x100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn truncated_or_lying_tables_are_rejected() {
        let mut mem = vec![0u8; 0x1000];
        let mut used = 0usize;
        let base = SegOff::new(0, 0x100);
        let mut installer = TableInstaller::new(&mut mem, base, &mut used);
        assert_eq!(installer.install(&[0u8; 8]), Err(SanError::InvalidTable));
        let mut lying = table(b"iBFT", 40);
        lying.truncate(38);
        assert_eq!(installer.install(&lying), Err(SanError::InvalidTable));
        assert_eq!(used, 0);
    }
}
