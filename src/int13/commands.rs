//! Per-command handlers for the dispatcher
//!
//! Each handler returns `Ok(value)` with the byte the caller sees in AH, or
//! an [`Int13Error`] that the dispatcher converts to carry-set / AH-status.
//! Register side effects beyond AH are written directly into the frame.

use core::mem::size_of;

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use super::eltorito::MEDIA_NO_EMULATION;
use super::frame::RegisterFrame;
use super::packets::{
    CdromBootCatalogCommand, CdromSpecification, DAP_BASE_SIZE, DAP_COUNT_OFFSET,
    DAP_LONG_COUNT_OFFSET, DAP_LONG_SIZE, DAP_PHYS_SIZE, DPI_KEY, DPI_LEN, DiskAddressPacket,
    DriveParameters, FDD_TYPE_1M44, FarPtr, PARAMS_V1_SIZE, PARAMS_V2_SIZE, PARAMS_V3_SIZE,
    ParameterFlags,
};
use super::{
    DriveKind, HookFlags, Int13Emulator, Int13Error, MAX_BLOCK_SIZE, SECTOR_SIZE,
};
use crate::block::SanDevice;
use crate::realmode::{RealMemory, SegOff};

/// Disk type reported by subfunction 0x15 for a diskette drive.
const DISK_TYPE_FDD: u8 = 0x01;
/// Disk type reported by subfunction 0x15 for a fixed disk.
const DISK_TYPE_HDD: u8 = 0x03;

/// INT 13 extensions API version reported by subfunction 0x41.
const EDD_VERSION: u8 = 0x30;

bitflags::bitflags! {
    /// Extension subsets advertised in CX by subfunction 0x41.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Extensions: u16 {
        /// Extended disk access functions (linear addressing).
        const LINEAR = 0x0001;
        /// Enhanced disk drive functions.
        const EDD = 0x0004;
        /// 64-bit extensions.
        const LBA64 = 0x0008;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Move `count` blocks between the device and real-mode memory through a
/// bounce buffer, reopening a stale connection first. A zero count never
/// touches the block layer.
fn transfer<D: SanDevice, M: RealMemory>(
    device: &mut D,
    mem: &mut M,
    lba: u64,
    count: u32,
    buffer: u64,
    access: Access,
) -> Result<(), Int13Error> {
    if count == 0 {
        return Ok(());
    }
    if device.needs_reopen() {
        device.reopen().map_err(|_| Int13Error::NotReady)?;
    }
    let block_size = device.block_size();
    let end = buffer
        .checked_add(count as u64 * block_size as u64)
        .ok_or(Int13Error::Invalid)?;
    if end > u32::MAX as u64 + 1 {
        return Err(Int13Error::Invalid);
    }
    let mut scratch = [0u8; MAX_BLOCK_SIZE];
    let block = &mut scratch[..block_size];
    for index in 0..count as u64 {
        let phys = (buffer + index * block_size as u64) as u32;
        match access {
            Access::Read => {
                device.read(lba + index, block)?;
                mem.write(phys, block);
            }
            Access::Write => {
                mem.read(phys, block);
                device.write(lba + index, block)?;
            }
        }
    }
    Ok(())
}

impl<D: SanDevice> Int13Emulator<D> {
    /// Decode the function code and route to the matching handler.
    pub(crate) fn command<M: RealMemory>(
        &mut self,
        index: usize,
        mem: &mut M,
        frame: &mut RegisterFrame,
    ) -> Result<u8, Int13Error> {
        match frame.ah() {
            0x00 => self.reset_drive(index),
            0x01 => self.get_last_status(index),
            0x02 => self.rw_sectors(index, mem, frame, Access::Read),
            0x03 => self.rw_sectors(index, mem, frame, Access::Write),
            0x08 => self.get_parameters(index, frame),
            0x15 => self.get_disk_type(index, frame),
            0x41 => self.extension_check(index, frame),
            0x42 => self.extended_rw(index, mem, frame, Access::Read),
            0x43 => self.extended_rw(index, mem, frame, Access::Write),
            0x44 => self.extended_verify(index),
            0x47 => self.extended_seek(index),
            0x48 => self.get_extended_parameters(index, mem, frame),
            0x4b => self.cdrom_status_terminate(index, mem, frame),
            0x4d => self.cdrom_read_boot_catalog(index, mem, frame),
            other => {
                log::debug!(
                    "unsupported function {:02x} on drive {:02x}",
                    other,
                    self.drive(index).drive
                );
                Err(Int13Error::Invalid)
            }
        }
    }

    /// AH=0x00: reset disk system.
    fn reset_drive(&mut self, index: usize) -> Result<u8, Int13Error> {
        let drive = self.drive_mut(index);
        drive
            .device
            .reset()
            .map_err(|_| Int13Error::ResetFailed)?;
        Ok(0)
    }

    /// AH=0x01: status of the last operation.
    fn get_last_status(&self, index: usize) -> Result<u8, Int13Error> {
        Ok(self.drive(index).last_status)
    }

    /// AH=0x02/0x03: read/write sectors by CHS address into ES:BX.
    fn rw_sectors<M: RealMemory>(
        &mut self,
        index: usize,
        mem: &mut M,
        frame: &mut RegisterFrame,
        access: Access,
    ) -> Result<u8, Int13Error> {
        let drive = self.drive_mut(index);
        if drive.device.block_size() != SECTOR_SIZE {
            return Err(Int13Error::Invalid);
        }
        // CL carries the sector in its low 6 bits and the cylinder's top
        // two bits in its high bits.
        let cylinder = ((frame.cl() as u32 & 0xc0) << 2) | frame.ch() as u32;
        let sector = (frame.cl() & 0x3f) as u32;
        let head = frame.dh() as u32;
        let lba = drive
            .geometry
            .chs_to_lba(cylinder, head, sector)
            .ok_or(Int13Error::Invalid)?;
        let buffer = SegOff::new(frame.es, frame.bx).to_physical() as u64;
        transfer(
            &mut drive.device,
            mem,
            lba,
            frame.al() as u32,
            buffer,
            access,
        )?;
        Ok(0)
    }

    /// AH=0x08: drive parameters.
    fn get_parameters(&self, index: usize, frame: &mut RegisterFrame) -> Result<u8, Int13Error> {
        let fdd_parameter_table = self.config().fdd_parameter_table;
        let num_fdds = self.fdd_count();
        let num_drives = self.hdd_count();
        let drive = self.drive(index);
        let geometry = drive.geometry;
        let max_cylinder = geometry.cylinders - 1;
        let max_head = geometry.heads - 1;
        // Reported undecremented, matching real BIOSes.
        let max_sector = geometry.sectors_per_track;
        frame.set_ch(max_cylinder as u8);
        frame.set_cl((((max_cylinder >> 8) as u8) << 6) | (max_sector as u8 & 0x3f));
        frame.set_dh(max_head as u8);
        if drive.is_fdd() {
            frame.set_dl(num_fdds);
            frame.set_bl(FDD_TYPE_1M44);
            frame.es = fdd_parameter_table.segment;
            frame.di = fdd_parameter_table.offset;
        } else {
            frame.set_dl(num_drives);
        }
        Ok(0)
    }

    /// AH=0x15: disk type, with the 32-bit block count in CX:DX for fixed
    /// disks.
    fn get_disk_type(&self, index: usize, frame: &mut RegisterFrame) -> Result<u8, Int13Error> {
        let drive = self.drive(index);
        if drive.is_fdd() {
            Ok(DISK_TYPE_FDD)
        } else {
            let blocks = drive.device.capacity().min(u32::MAX as u64) as u32;
            frame.cx = (blocks >> 16) as u16;
            frame.dx = blocks as u16;
            Ok(DISK_TYPE_HDD)
        }
    }

    /// AH=0x41: extensions installation check.
    fn extension_check(&self, index: usize, frame: &mut RegisterFrame) -> Result<u8, Int13Error> {
        if frame.bx != 0x55aa {
            return Err(Int13Error::Invalid);
        }
        if self.drive(index).is_fdd() {
            return Err(Int13Error::Invalid);
        }
        frame.bx = 0xaa55;
        frame.cx = (Extensions::LINEAR | Extensions::EDD | Extensions::LBA64).bits();
        Ok(EDD_VERSION)
    }

    /// AH=0x42/0x43: extended read/write from the disk address packet at
    /// DS:SI.
    fn extended_rw<M: RealMemory>(
        &mut self,
        index: usize,
        mem: &mut M,
        frame: &mut RegisterFrame,
        access: Access,
    ) -> Result<u8, Int13Error> {
        let packet_at = SegOff::new(frame.ds, frame.si);
        let mut raw = [0u8; size_of::<DiskAddressPacket>()];
        mem.copy_from_real(&mut raw[..1], packet_at);
        let bufsize = raw[0] as usize;
        if bufsize < DAP_BASE_SIZE {
            log::debug!("disk address packet too small ({} bytes)", bufsize);
            return Err(Int13Error::Invalid);
        }
        let take = bufsize.min(raw.len());
        mem.copy_from_real(&mut raw[..take], packet_at);
        let packet =
            DiskAddressPacket::read_from_bytes(&raw[..]).map_err(|_| Int13Error::Invalid)?;

        let long = packet.count == 0xff;
        let count = match packet.count {
            0x00..=0x7f => packet.count as u32,
            0xff if bufsize >= DAP_LONG_SIZE => packet.long_count.get(),
            _ => return Err(Int13Error::Invalid),
        };
        let buffer = if packet.buffer.to_segoff().is_sentinel() {
            if bufsize < DAP_PHYS_SIZE {
                return Err(Int13Error::Invalid);
            }
            packet.buffer_phys.get()
        } else {
            packet.buffer.to_segoff().to_physical() as u64
        };

        let drive = self.drive_mut(index);
        match transfer(&mut drive.device, mem, packet.lba.get(), count, buffer, access) {
            Ok(()) => Ok(0),
            Err(error) => {
                // Report that nothing was transferred.
                mem.copy_to_real(packet_at.add_offset(DAP_COUNT_OFFSET), &[0u8]);
                if long {
                    mem.put_real(packet_at.add_offset(DAP_LONG_COUNT_OFFSET), &U32::new(0));
                }
                log::debug!("extended transfer failed: {:?}", error);
                Err(Int13Error::ReadError)
            }
        }
    }

    /// AH=0x44: extended verify. Verification is meaningless for a network
    /// target; the default contract preserves the invalid-function status.
    fn extended_verify(&self, index: usize) -> Result<u8, Int13Error> {
        if self
            .drive(index)
            .flags
            .contains(HookFlags::PERMISSIVE_VERIFY)
        {
            Ok(0)
        } else {
            Err(Int13Error::Invalid)
        }
    }

    /// AH=0x47: extended seek, a no-op.
    fn extended_seek(&self, _index: usize) -> Result<u8, Int13Error> {
        Ok(0)
    }

    /// AH=0x48: extended drive parameters into the buffer at DS:SI,
    /// honoring the caller's buffer-size field.
    fn get_extended_parameters<M: RealMemory>(
        &self,
        index: usize,
        mem: &mut M,
        frame: &mut RegisterFrame,
    ) -> Result<u8, Int13Error> {
        let packet_at = SegOff::new(frame.ds, frame.si);
        let mut raw = [0u8; 2];
        mem.copy_from_real(&mut raw, packet_at);
        let caller_bufsize = u16::from_le_bytes(raw) as usize;
        if caller_bufsize < PARAMS_V1_SIZE {
            return Err(Int13Error::Invalid);
        }

        let drive = self.drive(index);
        let geometry = drive.geometry;
        let mut flags = ParameterFlags::DMA_TRANSPARENT | ParameterFlags::GEOMETRY_VALID;
        if drive.is_fdd() || drive.is_cdrom() {
            flags |= ParameterFlags::REMOVABLE;
        }
        let mut params = DriveParameters::new_zeroed();
        params.flags = U16::new(flags.bits());
        params.cylinders = U32::new(geometry.cylinders);
        params.heads = U32::new(geometry.heads);
        params.sectors_per_track = U32::new(geometry.sectors_per_track);
        params.sectors = U64::new(drive.device.capacity());
        params.sector_size = U16::new(drive.device.block_size() as u16);
        params.dpte = FarPtr::from(SegOff::new(0xffff, 0xffff));

        let len = if caller_bufsize >= PARAMS_V3_SIZE {
            match drive.device.describe() {
                Ok(edd) => {
                    params.dpi_key = U16::new(DPI_KEY);
                    params.dpi_len = DPI_LEN;
                    params.bus_type = edd.bus_type;
                    params.interface_type = edd.interface_type;
                    params.interface_path = U64::new(edd.interface_path);
                    params.device_path = U64::new(edd.device_path);
                    params.update_checksum();
                    PARAMS_V3_SIZE
                }
                Err(_) => PARAMS_V2_SIZE,
            }
        } else if caller_bufsize >= PARAMS_V2_SIZE {
            PARAMS_V2_SIZE
        } else {
            PARAMS_V1_SIZE
        };
        params.bufsize = U16::new(len as u16);
        mem.copy_to_real(packet_at, &params.as_bytes()[..len]);
        Ok(0)
    }

    /// AH=0x4B: CD-ROM emulation status / terminate. Writes the
    /// specification packet to DS:SI.
    fn cdrom_status_terminate<M: RealMemory>(
        &self,
        index: usize,
        mem: &mut M,
        frame: &mut RegisterFrame,
    ) -> Result<u8, Int13Error> {
        let drive = self.drive(index);
        if !drive.is_cdrom() {
            return Err(Int13Error::Invalid);
        }
        let mut spec = CdromSpecification::new_zeroed();
        spec.size = size_of::<CdromSpecification>() as u8;
        spec.media_type = MEDIA_NO_EMULATION;
        spec.drive = drive.drive;
        mem.put_real(SegOff::new(frame.ds, frame.si), &spec);
        Ok(0)
    }

    /// AH=0x4D: read sectors of the El Torito boot catalog into the
    /// physical buffer named by the command packet at DS:SI.
    fn cdrom_read_boot_catalog<M: RealMemory>(
        &mut self,
        index: usize,
        mem: &mut M,
        frame: &mut RegisterFrame,
    ) -> Result<u8, Int13Error> {
        let command: CdromBootCatalogCommand = mem.get_real(SegOff::new(frame.ds, frame.si));
        let drive = self.drive_mut(index);
        let DriveKind::Cdrom {
            boot_catalog: Some(catalog),
        } = drive.kind
        else {
            log::debug!("drive {:02x} has no boot catalog", drive.drive);
            return Err(Int13Error::Invalid);
        };
        let lba = catalog as u64 + command.start.get() as u64;
        transfer(
            &mut drive.device,
            mem,
            lba,
            command.count.get() as u32,
            command.buffer.get() as u64,
            Access::Read,
        )?;
        Ok(0)
    }
}
