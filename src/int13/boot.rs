//! Boot record loader
//!
//! Loads the initial boot record of an emulated drive through the (now
//! hooked) interrupt, the same path any other caller would take, and
//! validates it. The actual transfer of control is the embedding firmware's
//! hand-off collaborator: it far-jumps to the returned entry point with DL
//! set to the drive number and must never return.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::FromZeros;

use super::eltorito::{
    BOOT_INDICATOR_BOOTABLE, DEFAULT_LOAD_SEGMENT, MEDIA_NO_EMULATION, PLATFORM_X86,
};
use super::frame::RegisterFrame;
use super::packets::{CdromBootCatalogCommand, DAP_BASE_SIZE, DiskAddressPacket, FarPtr};
use super::{DriveKind, Int13Emulator};
use crate::SanError;
use crate::block::SanDevice;
use crate::realmode::{RealMemory, SegOff};

/// Conventional boot record load address.
const BOOT_SECTOR: SegOff = SegOff::new(0x0000, 0x7c00);
/// Location of the boot sector's 0xAA55 signature.
const BOOT_SIGNATURE: SegOff = SegOff::new(0x0000, 0x7dfe);

/// Largest extended-read chunk expressible in a packet's count byte.
const MAX_CHUNK: u32 = 0x7f;

/// Boot policy knobs passed to [`Int13Emulator::boot`].
#[derive(Clone, Copy, Debug)]
pub struct BootConfig {
    /// Keep the drive registered if the boot attempt fails, so a later
    /// device can still reach it; by default a failed boot unhooks it.
    pub keep: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig { keep: false }
    }
}

/// A validated, loaded boot record ready for hand-off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handoff {
    /// Far entry point of the loaded boot code.
    pub entry: SegOff,
    /// Value to place in DL before jumping.
    pub drive: u8,
}

impl<D: SanDevice> Int13Emulator<D> {
    /// Load and validate the boot record of `drive`.
    ///
    /// Tries the MBR strategy first, then El Torito for drives carrying a
    /// boot catalog. On success the caller must transfer control to the
    /// returned entry point and never come back; returning from the loaded
    /// code is a boot failure.
    pub fn boot<M: RealMemory>(
        &mut self,
        mem: &mut M,
        drive: u8,
        config: &BootConfig,
    ) -> Result<Handoff, SanError> {
        let result = self.try_boot(mem, drive);
        if let Err(error) = result {
            log::info!("boot from drive {:02x} failed: {:?}", drive, error);
            if !config.keep {
                let _ = self.unhook(mem, drive);
            }
        }
        result
    }

    fn try_boot<M: RealMemory>(&mut self, mem: &mut M, drive: u8) -> Result<Handoff, SanError> {
        let index = self.find(drive).ok_or(SanError::UnknownDrive)?;
        let has_catalog = matches!(
            self.drive(index).kind,
            DriveKind::Cdrom {
                boot_catalog: Some(_)
            }
        );

        match self.load_mbr(mem, drive) {
            Ok(handoff) => Ok(handoff),
            Err(error) if has_catalog => {
                log::debug!("MBR strategy failed ({:?}), trying El Torito", error);
                self.load_eltorito(mem, drive)
            }
            Err(error) => Err(error),
        }
    }

    /// Read sector 0 to 0000:7C00 through subfunction 0x02 and check the
    /// boot signature.
    fn load_mbr<M: RealMemory>(&mut self, mem: &mut M, drive: u8) -> Result<Handoff, SanError> {
        let mut frame = RegisterFrame::default();
        frame.ax = 0x0201; // read, one sector
        frame.cx = 0x0001; // cylinder 0, sector 1
        frame.dx = drive as u16; // head 0
        frame.es = BOOT_SECTOR.segment;
        frame.bx = BOOT_SECTOR.offset;
        self.interrupt(mem, &mut frame);
        if frame.cf() {
            return Err(SanError::Command(frame.ah()));
        }

        let mut signature = [0u8; 2];
        mem.copy_from_real(&mut signature, BOOT_SIGNATURE);
        if signature != [0x55, 0xaa] {
            log::debug!("drive {:02x} boot sector has no 0xAA55 signature", drive);
            return Err(SanError::NotBootable);
        }
        log::info!("booting drive {:02x} from MBR", drive);
        Ok(Handoff {
            entry: BOOT_SECTOR,
            drive,
        })
    }

    /// Load the El Torito boot catalog, validate its default entry and load
    /// the boot image it names.
    fn load_eltorito<M: RealMemory>(
        &mut self,
        mem: &mut M,
        drive: u8,
    ) -> Result<Handoff, SanError> {
        let scratch = self.config().scratch;

        // Fetch the 2 KiB boot catalog to 0000:7C00 via subfunction 0x4D.
        let mut command = CdromBootCatalogCommand::new_zeroed();
        command.size = core::mem::size_of::<CdromBootCatalogCommand>() as u8;
        command.count = U16::new(1);
        command.buffer = U32::new(BOOT_SECTOR.to_physical());
        mem.put_real(scratch, &command);
        let mut frame = RegisterFrame::default();
        frame.set_ah(0x4d);
        frame.set_dl(drive);
        frame.ds = scratch.segment;
        frame.si = scratch.offset;
        self.interrupt(mem, &mut frame);
        if frame.cf() {
            return Err(SanError::Command(frame.ah()));
        }

        // Validation entry, then the initial/default boot entry.
        let mut catalog = [0u8; 64];
        mem.copy_from_real(&mut catalog, BOOT_SECTOR);
        if catalog[1] != PLATFORM_X86 {
            log::debug!("boot catalog platform {:02x} is not x86", catalog[1]);
            return Err(SanError::NotBootable);
        }
        let entry = &catalog[32..64];
        if entry[0] != BOOT_INDICATOR_BOOTABLE {
            log::debug!("default catalog entry is not bootable");
            return Err(SanError::NotBootable);
        }
        if entry[1] != MEDIA_NO_EMULATION {
            log::debug!("boot media type {:02x} is not no-emulation", entry[1]);
            return Err(SanError::NotBootable);
        }
        let mut load_segment = u16::from_le_bytes([entry[2], entry[3]]);
        if load_segment == 0 {
            load_segment = DEFAULT_LOAD_SEGMENT;
        }
        let sectors = u16::from_le_bytes([entry[6], entry[7]]) as u32;
        let image_lba = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);

        // The entry counts virtual 512-byte sectors; transfers happen in
        // 2048-byte CD blocks.
        let blocks = sectors.div_ceil(4);
        let mut loaded = 0u32;
        while loaded < blocks {
            let chunk = (blocks - loaded).min(MAX_CHUNK);
            let mut packet = DiskAddressPacket::new_zeroed();
            packet.bufsize = DAP_BASE_SIZE as u8;
            packet.count = chunk as u8;
            packet.buffer =
                FarPtr::from(SegOff::new(load_segment.wrapping_add((loaded * 128) as u16), 0));
            packet.lba = U64::new(image_lba as u64 + loaded as u64);
            mem.put_real(scratch, &packet);

            let mut frame = RegisterFrame::default();
            frame.set_ah(0x42);
            frame.set_dl(drive);
            frame.ds = scratch.segment;
            frame.si = scratch.offset;
            self.interrupt(mem, &mut frame);
            if frame.cf() {
                return Err(SanError::Command(frame.ah()));
            }
            loaded += chunk;
        }

        let entry = SegOff::new(load_segment, 0);
        log::info!(
            "booting drive {:02x} from El Torito image at sector {} ({} virtual sectors, entry {})",
            drive,
            image_lba,
            sectors,
            entry
        );
        Ok(Handoff { entry, drive })
    }
}
