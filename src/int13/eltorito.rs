//! El Torito boot record detection
//!
//! ISO 9660 places a boot record volume descriptor at sector 17; if it
//! carries the El Torito signature, the embedded 32-bit pointer locates the
//! boot catalog. The catalog itself is only read later, on demand, through
//! the read-boot-catalog subfunction.

use crate::block::{BlockError, SanDevice};

/// ISO9660 sector size (always 2048 bytes).
pub const ISO_SECTOR_SIZE: usize = 2048;

/// Boot record volume descriptor sector.
const BOOT_RECORD_LBA: u64 = 17;

/// El Torito system identifier.
const EL_TORITO_SIGNATURE: &[u8] = b"EL TORITO SPECIFICATION";

/// CD001 identifier for volume descriptors.
const CD001_SIGNATURE: &[u8] = b"CD001";

/// Boot catalog validation entry platform ID for x86.
pub const PLATFORM_X86: u8 = 0x00;
/// Boot catalog entry indicator for a bootable image.
pub const BOOT_INDICATOR_BOOTABLE: u8 = 0x88;
/// Boot media type for a no-emulation image.
pub const MEDIA_NO_EMULATION: u8 = 0x00;
/// Load segment used when the catalog entry leaves it zero.
pub const DEFAULT_LOAD_SEGMENT: u16 = 0x07c0;

/// Look for an El Torito boot record on a CD-ROM volume.
///
/// Returns the boot catalog LBA if the descriptor at sector 17 matches; a
/// volume without the signature simply has no boot catalog.
pub fn boot_catalog<D: SanDevice>(device: &mut D) -> Result<Option<u32>, BlockError> {
    if device.block_size() != ISO_SECTOR_SIZE {
        return Ok(None);
    }

    let mut buffer = [0u8; ISO_SECTOR_SIZE];
    device.read(BOOT_RECORD_LBA, &mut buffer)?;

    // Descriptor type 0 (boot record), "CD001", version 1
    if buffer[0] != 0x00 || &buffer[1..6] != CD001_SIGNATURE || buffer[6] != 0x01 {
        log::debug!("no boot record volume descriptor at sector 17");
        return Ok(None);
    }

    if &buffer[7..7 + EL_TORITO_SIGNATURE.len()] != EL_TORITO_SIGNATURE {
        log::debug!("boot record is not El Torito");
        return Ok(None);
    }

    // Boot catalog pointer (little-endian 32-bit at offset 0x47)
    let catalog = u32::from_le_bytes([buffer[0x47], buffer[0x48], buffer[0x49], buffer[0x4a]]);
    log::debug!("El Torito boot catalog at sector {}", catalog);
    Ok(Some(catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDisk;
    use std::vec;

    pub fn image_with_boot_record(catalog: u32) -> std::vec::Vec<u8> {
        let mut data = vec![0u8; 20 * ISO_SECTOR_SIZE];
        let brvd = 17 * ISO_SECTOR_SIZE;
        data[brvd] = 0x00;
        data[brvd + 1..brvd + 6].copy_from_slice(CD001_SIGNATURE);
        data[brvd + 6] = 0x01;
        data[brvd + 7..brvd + 7 + EL_TORITO_SIGNATURE.len()].copy_from_slice(EL_TORITO_SIGNATURE);
        data[brvd + 0x47..brvd + 0x4b].copy_from_slice(&catalog.to_le_bytes());
        data
    }

    #[test]
    fn detects_boot_record() {
        let mut disk = TestDisk::cdrom(image_with_boot_record(19));
        assert_eq!(boot_catalog(&mut disk).unwrap(), Some(19));
    }

    #[test]
    fn rejects_missing_signature() {
        let mut data = image_with_boot_record(19);
        data[17 * ISO_SECTOR_SIZE + 7] = b'X';
        let mut disk = TestDisk::cdrom(data);
        assert_eq!(boot_catalog(&mut disk).unwrap(), None);
    }

    #[test]
    fn rejects_wrong_descriptor_type() {
        let mut data = image_with_boot_record(19);
        data[17 * ISO_SECTOR_SIZE] = 0xff;
        let mut disk = TestDisk::cdrom(data);
        assert_eq!(boot_catalog(&mut disk).unwrap(), None);
    }

    #[test]
    fn non_cd_block_size_has_no_catalog() {
        let mut disk = TestDisk::new(vec![0u8; 40 * 512], 512);
        assert_eq!(boot_catalog(&mut disk).unwrap(), None);
    }
}
